pub mod common;
pub mod high_risk;
pub mod tikv_consistency;
pub mod upgrade_differences;
pub mod user_modified;

pub use high_risk::HighRiskParams;
pub use tikv_consistency::TiKVConsistency;
pub use upgrade_differences::UpgradeDifferences;
pub use user_modified::UserModifiedParams;

/// Constructs the four built-in rules in the canonical default order
/// ([`crate::rule::DEFAULT_RULE_ORDER`]).
pub fn default_rules(high_risk_policy: crate::rules::high_risk::HighRiskPolicy) -> Vec<Box<dyn crate::rule::Rule>> {
    vec![
        Box::new(UserModifiedParams),
        Box::new(UpgradeDifferences),
        Box::new(TiKVConsistency),
        Box::new(HighRiskParams::new(high_risk_policy)),
    ]
}
