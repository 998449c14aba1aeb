//! End-to-end integration tests: builds small in-memory fixtures (no
//! network, no filesystem) and runs the full [`crate::rule::Runner`] over
//! them, exercising the universal invariants from the design's testable
//! properties section and the literal end-to-end scenarios alongside them.
//!
//! Per-rule behavior already has focused coverage next to each rule; this
//! module checks what only shows up once every rule runs together: result
//! ordering across rules, rule-id/category/risk-level normalization, and
//! idempotence of a full run against one fixed snapshot.

use std::collections::BTreeMap;

use crate::cancel::CancellationToken;
use crate::context::RuleContext;
use crate::kb::{ChangeRecord, KnowledgeBase};
use crate::rule::{DEFAULT_RULE_ORDER, RiskLevel, Runner, Severity};
use crate::rules::high_risk::HighRiskPolicy;
use crate::rules::{self};
use crate::snapshot::{ComponentState, Role};
use crate::value::{ParameterValue, Value};

fn pv(v: Value) -> ParameterValue {
    ParameterValue::new(v)
}

fn tidb_component(config: BTreeMap<String, ParameterValue>, variables: BTreeMap<String, ParameterValue>) -> ComponentState {
    let mut s = ComponentState {
        component_type: "tidb".to_owned(),
        config,
        variables,
        ..Default::default()
    };
    s.status.insert("address".to_owned(), "10.0.0.1:4000".to_owned());
    s
}

fn tikv_component(addr: &str, config: BTreeMap<String, ParameterValue>) -> ComponentState {
    let mut s = ComponentState {
        component_type: "tikv".to_owned(),
        config,
        ..Default::default()
    };
    s.status.insert("address".to_owned(), addr.to_owned());
    s
}

/// A single fixed context wired up with a bit of everything: a front-end
/// with a user-modified parameter and a forced-change overwrite, plus two
/// diverging row-store peers. Used by the invariant tests below, which care
/// about cross-rule properties rather than any one rule's output.
fn fixture_ctx() -> RuleContext {
    let mut ctx = RuleContext::empty();
    ctx.source_version = "v6.5.0".to_owned();
    ctx.target_version = "v7.5.0".to_owned();
    ctx.source_bootstrap_version = 140;
    ctx.target_bootstrap_version = 160;

    let mut tidb_config = BTreeMap::new();
    tidb_config.insert("max-connections".to_owned(), pv(Value::Int(1000)));
    let tidb_vars = BTreeMap::new();
    ctx.snapshot.insert_bare_and_peer(Role::Tidb, "10.0.0.1:4000", tidb_component(tidb_config, tidb_vars));

    let mut tikv_a = BTreeMap::new();
    tikv_a.insert(
        "storage".to_owned(),
        pv(Value::Map([("reserve-space".to_owned(), Value::String("2GB".to_owned()))].into_iter().collect())),
    );
    let mut tikv_b = BTreeMap::new();
    tikv_b.insert(
        "storage".to_owned(),
        pv(Value::Map([("reserve-space".to_owned(), Value::String("4GB".to_owned()))].into_iter().collect())),
    );
    ctx.snapshot.insert_bare_and_peer(Role::Tikv, "10.0.0.2:20160", tikv_component("10.0.0.2:20160", tikv_a));
    ctx.snapshot.insert_bare_and_peer(Role::Tikv, "10.0.0.3:20160", tikv_component("10.0.0.3:20160", tikv_b));

    let mut source_kb = KnowledgeBase::default();
    let mut source_tidb = BTreeMap::new();
    source_tidb.insert("max-connections".to_owned(), pv(Value::Int(1000)));
    source_kb.config_defaults.insert("tidb".to_owned(), source_tidb);
    ctx.source_defaults = source_kb;

    let mut target_kb = KnowledgeBase::default();
    let mut target_tidb = BTreeMap::new();
    target_tidb.insert("max-connections".to_owned(), pv(Value::Int(2000)));
    target_kb.config_defaults.insert("tidb".to_owned(), target_tidb);
    ctx.target_defaults = target_kb;

    ctx.upgrade_logic.changes_by_role.insert(
        "tidb".to_owned(),
        vec![ChangeRecord {
            version: 150,
            name: "max-connections".to_owned(),
            value: Value::Int(3000),
            from_value: None,
            details_note: None,
            suggestions: Vec::new(),
            report_severity: None,
        }],
    );

    ctx
}

fn runner() -> Runner {
    Runner::new(rules::default_rules(HighRiskPolicy::default()))
}

/// Testable property 8: an empty snapshot produces no findings from any
/// rule and no errors. `UpgradeDifferences` is the one rule that always
/// appends a "compared N, filtered M" bookkeeping entry (see its own
/// `empty_snapshot_yields_only_summary` test); that entry is not a finding
/// about any parameter, so it is excluded here rather than treated as a
/// violation of the zero-findings property.
#[tokio::test]
async fn empty_snapshot_yields_zero_findings_across_every_rule() {
    let ctx = RuleContext::empty();
    let cancel = CancellationToken::new();
    let results = runner().run(&ctx, &cancel).await;
    let findings: Vec<_> = results.iter().filter(|r| r.parameter_name != "_summary").collect();
    assert!(findings.is_empty(), "expected no findings against an empty snapshot, got {:?}", findings);
}

/// Testable property 3: every result's `risk_level` is consistent with its
/// `severity`, and `rule_id`/`category` are always filled in by the runner.
#[tokio::test]
async fn every_result_has_consistent_risk_level_and_nonblank_identity() {
    let ctx = fixture_ctx();
    let cancel = CancellationToken::new();
    let results = runner().run(&ctx, &cancel).await;
    assert!(!results.is_empty());
    for result in &results {
        assert!(!result.rule_id.is_empty());
        assert!(!result.category.is_empty());
        assert!(DEFAULT_RULE_ORDER.contains(&result.rule_id.as_str()));
        let expected = match result.severity {
            Severity::Critical | Severity::Error => RiskLevel::High,
            Severity::Warning => RiskLevel::Medium,
            Severity::Info => RiskLevel::Low,
        };
        assert_eq!(result.risk_level, Some(expected), "mismatched risk level for {:?}", result);
    }
}

/// Testable property 4: inter-rule results are concatenated in registration
/// order -- once a later rule's id appears, no earlier rule's id may
/// reappear afterward.
#[tokio::test]
async fn results_are_concatenated_in_rule_registration_order() {
    let ctx = fixture_ctx();
    let cancel = CancellationToken::new();
    let results = runner().run(&ctx, &cancel).await;

    let rank = |rule_id: &str| DEFAULT_RULE_ORDER.iter().position(|r| *r == rule_id).unwrap();
    let mut last_rank = 0;
    for result in &results {
        let this_rank = rank(&result.rule_id);
        assert!(this_rank >= last_rank, "rule {} appeared out of registration order", result.rule_id);
        last_rank = this_rank;
    }
}

/// Testable property 7: running the same context through the same rule set
/// twice yields an identical multiset of results (map iteration order may
/// differ internally, but nothing here should, since every rule iterates a
/// `BTreeMap`/fixed role list).
#[tokio::test]
async fn rerunning_the_same_context_is_idempotent() {
    let ctx = fixture_ctx();
    let cancel = CancellationToken::new();
    let first = runner().run(&ctx, &cancel).await;
    let second = runner().run(&ctx, &cancel).await;

    let key = |r: &crate::rule::CheckResult| (r.rule_id.clone(), r.component.clone(), r.parameter_name.clone(), format!("{:?}", r.severity));
    let mut first_keys: Vec<_> = first.iter().map(key).collect();
    let mut second_keys: Vec<_> = second.iter().map(key).collect();
    first_keys.sort();
    second_keys.sort();
    assert_eq!(first_keys, second_keys);
}

/// Combined end-to-end scenario: the fixture wires up a forced front-end
/// overwrite (S1-shaped) alongside two diverging row-store peers
/// (S5-shaped) in one snapshot, and both should surface once the full rule
/// set runs together, each tagged with the rule that found it.
#[tokio::test]
async fn combined_forced_overwrite_and_peer_divergence_both_surface() {
    let ctx = fixture_ctx();
    let cancel = CancellationToken::new();
    let results = runner().run(&ctx, &cancel).await;

    let overwrite = results
        .iter()
        .find(|r| r.rule_id == "UPGRADE_DIFFERENCES" && r.parameter_name == "max-connections")
        .expect("forced overwrite result missing");
    assert_eq!(overwrite.severity, Severity::Error);
    assert_eq!(overwrite.forced_value, Some(Value::Int(3000)));

    let divergence = results
        .iter()
        .find(|r| r.rule_id == "TIKV_CONSISTENCY" && r.parameter_name == "storage.reserve-space")
        .expect("peer divergence result missing");
    assert_eq!(divergence.severity, Severity::Error);
}

/// Cancellation before the run starts: the runner still returns cleanly
/// with an empty (partial) result set rather than panicking.
#[tokio::test]
async fn cancellation_before_run_yields_empty_partial_results() {
    let ctx = fixture_ctx();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let results = runner().run(&ctx, &cancel).await;
    assert!(results.is_empty());
}
