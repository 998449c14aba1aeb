//! UpgradeDifferences (C8): predicts, per parameter, whether the upgrade
//! will observably change its effective value.

use std::collections::HashSet;

use crate::context::{split_sysvar, RuleContext, SYSVAR_PREFIX};
use crate::errors::RuleError;
use crate::ignore_lists::EXTENDED_IGNORE;
use crate::rule::{CheckResult, DataRequirements, ParamType, Rule, Severity};
use crate::snapshot::{ComponentState, Role};
use crate::value::{compare, deep_diff, Value};

use super::common::resolve_current;

pub struct UpgradeDifferences;

const ROLES: [Role; 4] = [Role::Tidb, Role::Pd, Role::Tikv, Role::Tiflash];

#[async_trait::async_trait]
impl Rule for UpgradeDifferences {
    fn name(&self) -> &'static str {
        "UPGRADE_DIFFERENCES"
    }

    fn description(&self) -> &'static str {
        "Predicts per-parameter whether the target version's upgrade will observably change its effective value."
    }

    fn category(&self) -> &'static str {
        "upgrade_impact"
    }

    fn data_requirements(&self) -> DataRequirements {
        DataRequirements {
            components: ROLES.into_iter().collect(),
            need_config: true,
            need_system_variables: true,
            need_all_tikv_nodes: false,
        }
    }

    #[tracing::instrument(skip(self, ctx), name = "upgrade_differences")]
    async fn evaluate(&self, ctx: &RuleContext) -> Result<Vec<CheckResult>, RuleError> {
        let mut results = Vec::new();
        let mut compared = 0u32;
        let mut filtered = 0u32;

        for role in ROLES {
            let role_key = role.bare_key();
            let component = match ctx.snapshot.first_of_role(role) {
                Some(c) => c,
                None => continue,
            };

            if let Some(defaults) = ctx.target_defaults.config_defaults.get(role_key) {
                for (name, target_default) in defaults {
                    compared += 1;
                    if !evaluate_one(ctx, role, role_key, component, name, &target_default.value, ParamType::Config, &mut results) {
                        filtered += 1;
                    }
                }
            }

            if role == Role::Tidb {
                for (name, target_default) in &ctx.target_defaults.system_variable_defaults {
                    let full_name = format!("{}{}", SYSVAR_PREFIX, name);
                    compared += 1;
                    if !evaluate_one(
                        ctx,
                        role,
                        role_key,
                        component,
                        &full_name,
                        &target_default.value,
                        ParamType::SystemVariable,
                        &mut results,
                    ) {
                        filtered += 1;
                    }
                }
            }
        }

        let mut summary = CheckResult::new(
            String::new(),
            "_summary".to_owned(),
            ParamType::Config,
            Severity::Info,
            format!("compared {} parameters, filtered {}", compared, filtered),
        );
        summary.metadata.insert("compared".to_owned(), compared.to_string());
        summary.metadata.insert("filtered".to_owned(), filtered.to_string());
        results.push(summary);

        Ok(results)
    }
}

/// Returns `false` when the parameter was filtered out (no result worth
/// reporting), `true` otherwise.
fn evaluate_one(
    ctx: &RuleContext,
    role: Role,
    role_key: &str,
    component: &ComponentState,
    name: &str,
    target_default: &Value,
    param_type: ParamType,
    results: &mut Vec<CheckResult>,
) -> bool {
    let (_, bare) = split_sysvar(name);
    if EXTENDED_IGNORE.contains(&bare) {
        return false;
    }

    let current = match resolve_current(component, name) {
        Some(v) => v,
        None => return evaluate_new_parameter(ctx, role, role_key, name, target_default, param_type, results),
    };

    if target_default.is_map_type() && current.is_map_type() {
        let empty: HashSet<&str> = HashSet::new();
        let diffs = deep_diff(&current, target_default, name, &empty);
        if diffs.is_empty() {
            return false;
        }
        for (leaf_path, entry) in diffs {
            let severity = default_changed_severity(role, param_type);
            let mut result = CheckResult::new(role_key, &leaf_path, param_type, severity, "default changed and current value differs");
            result.current_value = entry.current;
            result.target_default = entry.reference;
            results.push(result);
        }
        return true;
    }

    // A change's `from_value` gate failing to match `current` doesn't mean
    // no forced change applies -- the record still exists in range, it just
    // wasn't conditioned on the value actually seen. Fall back to the
    // unconditional value so it's still reported as a forced overwrite
    // rather than a plain default-diff.
    let forced = ctx
        .get_forced_change_for_value(role_key, name, &current)
        .or_else(|| ctx.get_forced_change_unconditional(role_key, name));
    match forced {
        Some(forced_value) => {
            if !compare(&forced_value, &current) {
                let metadata = ctx.get_forced_change_metadata(role_key, name, &current);
                let severity = metadata
                    .as_ref()
                    .and_then(|m| m.report_severity)
                    .unwrap_or(if role == Role::Tidb { Severity::Error } else { Severity::Warning });
                let mut result = CheckResult::new(role_key, name, param_type, severity, "value will be overwritten by the target's bootstrap sequence");
                result.current_value = Some(current);
                result.forced_value = Some(forced_value);
                result.target_default = Some(target_default.clone());
                if let Some(m) = metadata {
                    result.details = m.details_note;
                    result.suggestions = m.suggestions;
                }
                results.push(result);
            } else {
                let mut result = CheckResult::new(
                    role_key,
                    name,
                    param_type,
                    Severity::Info,
                    "shipped default changed but the forced value matches the current value",
                );
                result.current_value = Some(current);
                result.target_default = Some(target_default.clone());
                results.push(result);
            }
            true
        }
        None => {
            if compare(target_default, &current) {
                return false;
            }
            let severity = default_changed_severity(role, param_type);
            let mut result = CheckResult::new(role_key, name, param_type, severity, "shipped default changed and current value differs");
            result.current_value = Some(current);
            result.target_default = Some(target_default.clone());
            results.push(result);
            true
        }
    }
}

fn default_changed_severity(role: Role, param_type: ParamType) -> Severity {
    match (role, param_type) {
        (Role::Pd, _) => Severity::Info,
        (Role::Tidb, ParamType::SystemVariable) => Severity::Info,
        _ => Severity::Warning,
    }
}

fn evaluate_new_parameter(
    ctx: &RuleContext,
    role: Role,
    role_key: &str,
    name: &str,
    target_default: &Value,
    param_type: ParamType,
    results: &mut Vec<CheckResult>,
) -> bool {
    let source_default = ctx.get_source_default(role_key, name);
    let unchanged = source_default.as_ref().map_or(false, |src| compare(src, target_default));
    if unchanged && role != Role::Pd {
        return false;
    }
    let mut result = CheckResult::new(role_key, name, param_type, Severity::Info, "new parameter introduced by the target version");
    result.target_default = Some(target_default.clone());
    results.push(result);
    true
}
