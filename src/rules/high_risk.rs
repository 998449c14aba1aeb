//! HighRiskParams (C10): an operator-curated (and built-in-seeded) policy of
//! dangerous parameters to report on any upgrade touching their declared
//! version range.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::context::{RuleContext, SYSVAR_PREFIX};
use crate::errors::RuleError;
use crate::rule::{CheckResult, DataRequirements, ParamType, Rule, Severity};
use crate::snapshot::Role;
use crate::value::{compare, Value};
use crate::version::{in_half_open_range, ReleaseVersion};

use super::common::resolve_current;

/// One policy entry: `{ severity, description, check_modified, allowed_values, from_version, to_version }`.
#[derive(Clone, Debug, Deserialize)]
pub struct HighRiskParamConfig {
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub check_modified: bool,
    #[serde(default)]
    pub allowed_values: Vec<Value>,
    #[serde(default)]
    pub from_version: Option<String>,
    #[serde(default)]
    pub to_version: Option<String>,
}

/// Merged built-in + operator policy, keyed by parameter name (bare config
/// name, or `sysvar:`-prefixed session variable).
#[derive(Clone, Debug, Default)]
pub struct HighRiskPolicy {
    pub params: HashMap<String, HighRiskParamConfig>,
}

impl HighRiskPolicy {
    /// Union merge; `user` wins on name collisions.
    pub fn merge(builtin: HighRiskPolicy, user: HighRiskPolicy) -> HighRiskPolicy {
        let mut params = builtin.params;
        params.extend(user.params);
        HighRiskPolicy { params }
    }
}

const BUILTIN_POLICY_JSON: &str = include_str!("../../assets/high_risk_params/default.json");

/// The policy shipped with the tool itself.
pub fn load_builtin() -> HighRiskPolicy {
    match serde_json::from_str::<HashMap<String, HighRiskParamConfig>>(BUILTIN_POLICY_JSON) {
        Ok(params) => HighRiskPolicy { params },
        Err(e) => {
            tracing::error!(error = %e, "built-in high-risk policy failed to parse");
            HighRiskPolicy::default()
        }
    }
}

/// Operator-supplied policy file. A missing or malformed file degrades to
/// an empty policy layer -- the built-in policy still applies.
pub async fn load_user_policy(path: &Path) -> HighRiskPolicy {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) => {
            tracing::debug!(?path, error = %e, "no user high-risk policy file, using built-ins only");
            return HighRiskPolicy::default();
        }
    };
    match serde_json::from_slice::<HashMap<String, HighRiskParamConfig>>(&bytes) {
        Ok(params) => HighRiskPolicy { params },
        Err(e) => {
            tracing::warn!(?path, error = %e, "user high-risk policy file malformed, ignoring");
            HighRiskPolicy::default()
        }
    }
}

/// Where the operator policy file lives absent an explicit path: the usual
/// per-user config directory, under this tool's name.
pub fn default_policy_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tidb-precheck").join("high_risk_params.json"))
}

pub struct HighRiskParams {
    policy: HighRiskPolicy,
}

impl HighRiskParams {
    pub fn new(policy: HighRiskPolicy) -> Self {
        HighRiskParams { policy }
    }
}

const ROLES: [Role; 4] = [Role::Tidb, Role::Pd, Role::Tikv, Role::Tiflash];

#[async_trait::async_trait]
impl Rule for HighRiskParams {
    fn name(&self) -> &'static str {
        "HIGH_RISK_PARAMS"
    }

    fn description(&self) -> &'static str {
        "Operator-curated dangerous parameters, checked on any upgrade whose path touches their declared version range."
    }

    fn category(&self) -> &'static str {
        "high_risk"
    }

    fn data_requirements(&self) -> DataRequirements {
        DataRequirements {
            components: ROLES.into_iter().collect(),
            need_config: true,
            need_system_variables: true,
            need_all_tikv_nodes: false,
        }
    }

    #[tracing::instrument(skip(self, ctx), name = "high_risk_params")]
    async fn evaluate(&self, ctx: &RuleContext) -> Result<Vec<CheckResult>, RuleError> {
        let mut results = Vec::new();
        let source_rv = ReleaseVersion::parse(&ctx.source_version);
        let target_rv = if ctx.target_version.is_empty() {
            None
        } else {
            Some(ReleaseVersion::parse(&ctx.target_version))
        };

        for (name, policy) in &self.policy.params {
            let from = policy.from_version.as_deref().map(ReleaseVersion::parse);
            let to = policy.to_version.as_deref().map(ReleaseVersion::parse);
            if !in_scope(&source_rv, target_rv.as_ref(), from.as_ref(), to.as_ref()) {
                continue;
            }

            for role in ROLES {
                let role_key = role.bare_key();
                let component = match ctx.snapshot.first_of_role(role) {
                    Some(c) => c,
                    None => continue,
                };
                let current = match resolve_current(component, name) {
                    Some(v) => v,
                    None => continue,
                };

                let source_default = ctx.get_source_default(role_key, name);
                if policy.check_modified {
                    if let Some(source_default) = &source_default {
                        if compare(&current, source_default) {
                            continue;
                        }
                    }
                }

                if !policy.allowed_values.is_empty() && policy.allowed_values.iter().any(|v| compare(v, &current)) {
                    continue;
                }

                let mut result = CheckResult::new(role_key, name.clone(), param_type_of(name), policy.severity, policy.description.clone());
                result.current_value = Some(current);
                result.details = Some(policy.description.clone());
                if policy.check_modified {
                    result.source_default = source_default;
                }
                results.push(result);
            }
        }
        Ok(results)
    }
}

fn param_type_of(name: &str) -> ParamType {
    if name.starts_with(SYSVAR_PREFIX) {
        ParamType::SystemVariable
    } else {
        ParamType::Config
    }
}

/// True iff the upgrade path overlaps `[from, to)`. With a known target,
/// the path is the closed interval `[source, target]`; overlap with the
/// half-open policy range holds iff `source < to` and `target >= from`
/// (missing bounds are unbounded on that side). Without a target version
/// (test mode), the gate degenerates to `source ∈ [from, to)`.
fn in_scope(source: &ReleaseVersion, target: Option<&ReleaseVersion>, from: Option<&ReleaseVersion>, to: Option<&ReleaseVersion>) -> bool {
    match target {
        None => in_half_open_range(source, from, to),
        Some(target) => {
            let below_to = to.map_or(true, |to| source < to);
            let above_from = from.map_or(true, |from| target >= from);
            below_to && above_from
        }
    }
}
