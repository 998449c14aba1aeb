//! Rule contract and sequential runner (C6).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::context::RuleContext;
use crate::errors::RuleError;
use crate::snapshot::Role;
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl From<Severity> for RiskLevel {
    fn from(s: Severity) -> Self {
        match s {
            Severity::Critical | Severity::Error => RiskLevel::High,
            Severity::Warning => RiskLevel::Medium,
            Severity::Info => RiskLevel::Low,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Config,
    SystemVariable,
}

/// A single finding emitted by a rule.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckResult {
    pub rule_id: String,
    pub category: String,
    pub component: String,
    pub parameter_name: String,
    pub param_type: ParamType,
    pub severity: Severity,
    /// Derived from `severity` by the runner if left `None`.
    pub risk_level: Option<RiskLevel>,
    pub message: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub current_value: Option<Value>,
    #[serde(default)]
    pub source_default: Option<Value>,
    #[serde(default)]
    pub target_default: Option<Value>,
    #[serde(default)]
    pub forced_value: Option<Value>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckResult {
    pub fn new(component: impl Into<String>, parameter_name: impl Into<String>, param_type: ParamType, severity: Severity, message: impl Into<String>) -> Self {
        CheckResult {
            rule_id: String::new(),
            category: String::new(),
            component: component.into(),
            parameter_name: parameter_name.into(),
            param_type,
            severity,
            risk_level: None,
            message: message.into(),
            details: None,
            current_value: None,
            source_default: None,
            target_default: None,
            forced_value: None,
            suggestions: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}

/// The union of a rule's (or the runner's) data needs, handed to the
/// collector so it fetches no more than necessary.
#[derive(Clone, Debug, Default)]
pub struct DataRequirements {
    pub components: HashSet<Role>,
    pub need_config: bool,
    pub need_system_variables: bool,
    pub need_all_tikv_nodes: bool,
}

impl DataRequirements {
    pub fn union(mut self, other: DataRequirements) -> DataRequirements {
        self.components.extend(other.components);
        self.need_config |= other.need_config;
        self.need_system_variables |= other.need_system_variables;
        self.need_all_tikv_nodes |= other.need_all_tikv_nodes;
        self
    }
}

/// A single analysis rule. Evaluation is async only because
/// `TiKVConsistency` may need to re-open a SQL connection for `SHOW
/// CONFIG`; every other rule returns immediately.
#[async_trait::async_trait]
pub trait Rule: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn category(&self) -> &'static str;
    fn data_requirements(&self) -> DataRequirements;
    async fn evaluate(&self, ctx: &RuleContext) -> Result<Vec<CheckResult>, RuleError>;
}

/// The default, canonical rule registration order. Embedding code and tests
/// share this so "the order rules were registered" is a visible property,
/// not emergent `HashMap` iteration behavior.
pub const DEFAULT_RULE_ORDER: &[&str] = &[
    "USER_MODIFIED_PARAMS",
    "UPGRADE_DIFFERENCES",
    "TIKV_CONSISTENCY",
    "HIGH_RISK_PARAMS",
];

/// Runs a fixed, ordered list of rules against one `RuleContext`.
pub struct Runner {
    rules: Vec<Box<dyn Rule>>,
}

impl Runner {
    pub fn new(rules: Vec<Box<dyn Rule>>) -> Self {
        Runner { rules }
    }

    pub fn data_requirements(&self) -> DataRequirements {
        self.rules
            .iter()
            .fold(DataRequirements::default(), |acc, r| acc.union(r.data_requirements()))
    }

    /// Evaluate every rule in registration order, concatenating results. A
    /// rule that errors contributes one error-severity `CheckResult`
    /// instead of aborting the run. Checks `cancel` between rules.
    #[tracing::instrument(skip(self, ctx, cancel))]
    pub async fn run(&self, ctx: &RuleContext, cancel: &CancellationToken) -> Vec<CheckResult> {
        let mut results = Vec::new();
        for rule in &self.rules {
            if cancel.is_cancelled() {
                tracing::info!("analysis cancelled between rules, returning partial results");
                break;
            }
            let rule_results = match rule.evaluate(ctx).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(rule = rule.name(), error = %e, "rule execution failed");
                    vec![CheckResult::new(
                        String::new(),
                        String::new(),
                        ParamType::Config,
                        Severity::Error,
                        format!("rule {} failed: {}", rule.name(), e),
                    )]
                }
            };
            for mut result in rule_results {
                if result.rule_id.is_empty() {
                    result.rule_id = rule.name().to_owned();
                }
                if result.category.is_empty() {
                    result.category = rule.category().to_owned();
                }
                if result.risk_level.is_none() {
                    result.risk_level = Some(result.severity.into());
                }
                results.push(result);
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFails;

    #[async_trait::async_trait]
    impl Rule for AlwaysFails {
        fn name(&self) -> &'static str {
            "ALWAYS_FAILS"
        }
        fn description(&self) -> &'static str {
            "test rule that always errors"
        }
        fn category(&self) -> &'static str {
            "test"
        }
        fn data_requirements(&self) -> DataRequirements {
            DataRequirements::default()
        }
        async fn evaluate(&self, _ctx: &RuleContext) -> Result<Vec<CheckResult>, RuleError> {
            Err(RuleError::Failed {
                rule: "ALWAYS_FAILS",
                detail: "boom".to_owned(),
            })
        }
    }

    #[tokio::test]
    async fn rule_error_becomes_single_error_result() {
        let ctx = RuleContext::empty();
        let runner = Runner::new(vec![Box::new(AlwaysFails)]);
        let cancel = CancellationToken::new();
        let results = runner.run(&ctx, &cancel).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].severity, Severity::Error);
        assert_eq!(results[0].risk_level, Some(RiskLevel::High));
    }

    #[tokio::test]
    async fn cancellation_stops_before_remaining_rules() {
        let ctx = RuleContext::empty();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let runner = Runner::new(vec![Box::new(AlwaysFails)]);
        let results = runner.run(&ctx, &cancel).await;
        assert!(results.is_empty());
    }
}
