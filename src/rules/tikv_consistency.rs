//! TiKVConsistency (C9): detects divergence across row-store peers that
//! would break scale-out.

use std::collections::HashSet;

use crate::context::RuleContext;
use crate::errors::RuleError;
use crate::ignore_lists::{is_filename_only, is_tikv_critical};
use crate::rule::{CheckResult, DataRequirements, ParamType, Rule, Severity};
use crate::snapshot::{ComponentState, Role};
use crate::value::{compare, compare_file_names, deep_diff, format_value, Value};

pub struct TiKVConsistency;

#[async_trait::async_trait]
impl Rule for TiKVConsistency {
    fn name(&self) -> &'static str {
        "TIKV_CONSISTENCY"
    }

    fn description(&self) -> &'static str {
        "Row-store peers whose merged configuration diverges from the baseline peer."
    }

    fn category(&self) -> &'static str {
        "consistency"
    }

    fn data_requirements(&self) -> DataRequirements {
        DataRequirements {
            components: [Role::Tikv].into_iter().collect(),
            need_config: true,
            need_system_variables: false,
            need_all_tikv_nodes: true,
        }
    }

    #[tracing::instrument(skip(self, ctx), name = "tikv_consistency")]
    async fn evaluate(&self, ctx: &RuleContext) -> Result<Vec<CheckResult>, RuleError> {
        let peers = ctx.snapshot.peers_of_role(Role::Tikv);
        if peers.len() < 2 {
            return Ok(Vec::new());
        }

        let baseline = peers[0];
        let baseline_addr = baseline.address().unwrap_or_default().to_owned();
        let degraded = baseline.status.get("degraded").is_some();

        let mut results = Vec::new();
        for peer in &peers[1..] {
            let peer = *peer;
            let peer_addr = peer.address().unwrap_or_default().to_owned();
            let mut names: Vec<&String> = baseline.config.keys().chain(peer.config.keys()).collect();
            names.sort();
            names.dedup();

            for name in names {
                compare_one(name, baseline, peer, &peer_addr, &baseline_addr, degraded, &mut results);
            }
        }
        Ok(results)
    }
}

fn compare_one(
    name: &str,
    baseline: &ComponentState,
    peer: &ComponentState,
    peer_addr: &str,
    baseline_addr: &str,
    degraded: bool,
    results: &mut Vec<CheckResult>,
) {
    let baseline_value = baseline.config.get(name).map(|pv| &pv.value);
    let peer_value = peer.config.get(name).map(|pv| &pv.value);

    match (peer_value, baseline_value) {
        (Some(p), Some(b)) if p.is_map_type() && b.is_map_type() => {
            let empty: HashSet<&str> = HashSet::new();
            let diffs = deep_diff(p, b, name, &empty);
            for (leaf_path, entry) in diffs {
                push_result(&leaf_path, entry.current, entry.reference, peer_addr, baseline_addr, degraded, results);
            }
        }
        (Some(p), Some(b)) => {
            let differs = if is_filename_only(name) {
                let p_str = p.as_str().map(str::to_owned).unwrap_or_else(|| format_value(p));
                let b_str = b.as_str().map(str::to_owned).unwrap_or_else(|| format_value(b));
                !compare_file_names(&p_str, &b_str)
            } else {
                !compare(p, b)
            };
            if differs {
                push_result(name, Some(p.clone()), Some(b.clone()), peer_addr, baseline_addr, degraded, results);
            }
        }
        (None, None) => {}
        (p, b) => {
            push_result(name, p.cloned(), b.cloned(), peer_addr, baseline_addr, degraded, results);
        }
    }
}

fn push_result(
    name: &str,
    peer_value: Option<Value>,
    baseline_value: Option<Value>,
    peer_addr: &str,
    baseline_addr: &str,
    degraded: bool,
    results: &mut Vec<CheckResult>,
) {
    let severity = if is_tikv_critical(name) { Severity::Error } else { Severity::Warning };
    let mut result = CheckResult::new(
        format!("tikv-{}", peer_addr),
        name,
        ParamType::Config,
        severity,
        format!("{} diverges from baseline peer {}", name, baseline_addr),
    );
    result.current_value = peer_value;
    result.source_default = baseline_value;
    result.metadata.insert("baseline_peer".to_owned(), baseline_addr.to_owned());
    result.metadata.insert("divergent_peer".to_owned(), peer_addr.to_owned());
    if degraded {
        result
            .metadata
            .insert("degraded".to_owned(), "sql front-end unreachable; compared last_tikv.toml only".to_owned());
    }
    results.push(result);
}
