//! Pre-upgrade compatibility analysis core for a distributed SQL cluster
//! made of four cooperating service roles (SQL front-end, metadata
//! service, row-store, columnar engine).
//!
//! This crate is the core pipeline only: knowledge-base loading, the
//! data-requirements-driven runtime collector, and the rule engine. The
//! CLI, interactive prompts, report rendering, the knowledge-base
//! generator, and the topology-file reader are all out of scope -- callers
//! own those and talk to this crate through [`run_analysis`].

pub mod cancel;
pub mod collector;
pub mod context;
pub mod endpoints;
pub mod errors;
pub mod ignore_lists;
pub mod kb;
pub mod rule;
pub mod rules;
pub mod snapshot;
#[cfg(test)]
mod tests;
pub mod value;
pub mod version;

use std::path::Path;

use crate::cancel::CancellationToken;
use crate::collector::Collector;
use crate::context::RuleContext;
use crate::endpoints::ClusterEndpoints;
use crate::errors::AnalysisError;
use crate::rule::{CheckResult, Runner};
use crate::rules::high_risk::HighRiskPolicy;

/// Everything one analysis run needs beyond the live cluster endpoints.
pub struct AnalysisRequest<'a> {
    pub endpoints: ClusterEndpoints,
    pub target_version: String,
    pub kb_root: &'a Path,
    /// Operator-supplied high-risk policy file; `None` uses the built-in
    /// policy alone.
    pub high_risk_policy_path: Option<&'a Path>,
}

/// Runs the full pipeline once: builds the default rule set, collects
/// exactly the cluster data the union of their `DataRequirements` calls
/// for, resolves the source version (declared, or detected off the
/// collected snapshot), loads both knowledge bases and the global
/// forced-change log, then evaluates every rule against the resulting
/// `RuleContext`.
///
/// Bounded and one-shot: nothing here outlives the call. Cancellation is
/// honored between collector roles/peers and between rules.
#[tracing::instrument(skip(request, cancel))]
pub async fn run_analysis(request: AnalysisRequest<'_>, cancel: &CancellationToken) -> Result<Vec<CheckResult>, AnalysisError> {
    request.endpoints.validate()?;

    let builtin_policy = rules::high_risk::load_builtin();
    let policy = match request.high_risk_policy_path {
        Some(path) => HighRiskPolicy::merge(builtin_policy, rules::high_risk::load_user_policy(path).await),
        None => builtin_policy,
    };

    let runner = Runner::new(rules::default_rules(policy));
    let requirements = runner.data_requirements();

    let collector = Collector::new();
    let mut snapshot = collector.collect(&request.endpoints, &requirements, cancel).await?;
    snapshot.target_version = request.target_version.clone();
    if snapshot.source_version.is_empty() {
        if let Some(declared) = &request.endpoints.source_version {
            snapshot.source_version = declared.clone();
        }
    }

    let target_kb = kb::load_target(request.kb_root, &request.target_version).await?;
    let source_kb = kb::load_source(request.kb_root, &snapshot.source_version).await?;
    let upgrade_logic = kb::load_upgrade_logic(request.kb_root).await?;

    let source_release = version::ReleaseVersion::parse(&snapshot.source_version);
    let target_release = version::ReleaseVersion::parse(&request.target_version);
    let source_bootstrap_version = version::resolve_bootstrap(source_kb.bootstrap_version, &source_release);
    let target_bootstrap_version = version::resolve_bootstrap(target_kb.bootstrap_version, &target_release);

    let ctx = RuleContext {
        source_version: snapshot.source_version.clone(),
        target_version: snapshot.target_version.clone(),
        snapshot,
        source_bootstrap_version,
        target_bootstrap_version,
        source_defaults: source_kb,
        target_defaults: target_kb,
        upgrade_logic,
        parameter_notes: Vec::new(),
    };

    Ok(runner.run(&ctx, cancel).await)
}
