//! UserModifiedParams (C7): surfaces every source-default that has been
//! overridden in the running cluster.

use std::collections::HashSet;

use crate::context::{split_sysvar, RuleContext, SYSVAR_PREFIX};
use crate::errors::RuleError;
use crate::ignore_lists::{is_filename_only, is_resource_derived, TOP_LEVEL_IGNORE};
use crate::rule::{CheckResult, DataRequirements, ParamType, Rule, Severity};
use crate::snapshot::{ComponentState, Role};
use crate::value::{compare, compare_file_names, deep_diff, value_at_leaf_path, Value};

pub struct UserModifiedParams;

const ROLES: [Role; 4] = [Role::Tidb, Role::Pd, Role::Tikv, Role::Tiflash];

#[async_trait::async_trait]
impl Rule for UserModifiedParams {
    fn name(&self) -> &'static str {
        "USER_MODIFIED_PARAMS"
    }

    fn description(&self) -> &'static str {
        "Parameters and session variables whose running value differs from the source version's shipped default."
    }

    fn category(&self) -> &'static str {
        "modification"
    }

    fn data_requirements(&self) -> DataRequirements {
        DataRequirements {
            components: ROLES.into_iter().collect(),
            need_config: true,
            need_system_variables: true,
            need_all_tikv_nodes: false,
        }
    }

    #[tracing::instrument(skip(self, ctx), name = "user_modified_params")]
    async fn evaluate(&self, ctx: &RuleContext) -> Result<Vec<CheckResult>, RuleError> {
        let mut results = Vec::new();
        for role in ROLES {
            let role_key = role.bare_key();
            let component = match ctx.snapshot.first_of_role(role) {
                Some(c) => c,
                None => continue,
            };

            if let Some(defaults) = ctx.source_defaults.config_defaults.get(role_key) {
                for (name, source_default) in defaults {
                    evaluate_one(ctx, role_key, component, name, &source_default.value, ParamType::Config, &mut results);
                }
            }

            if role == Role::Tidb {
                for (name, source_default) in &ctx.source_defaults.system_variable_defaults {
                    let full_name = format!("{}{}", SYSVAR_PREFIX, name);
                    evaluate_one(
                        ctx,
                        role_key,
                        component,
                        &full_name,
                        &source_default.value,
                        ParamType::SystemVariable,
                        &mut results,
                    );
                }
            }
        }
        Ok(results)
    }
}

use super::common::resolve_current;

fn evaluate_one(
    ctx: &RuleContext,
    role_key: &str,
    component: &ComponentState,
    name: &str,
    source_default: &Value,
    param_type: ParamType,
    results: &mut Vec<CheckResult>,
) {
    let (_, bare) = split_sysvar(name);
    if TOP_LEVEL_IGNORE.contains(&bare) {
        return;
    }

    let current = match resolve_current(component, name) {
        Some(v) => v,
        None => return,
    };

    if is_resource_derived(bare) {
        let target_default = ctx.get_target_default(role_key, name);
        if let Some(target_default) = &target_default {
            if compare(source_default, target_default) {
                return;
            }
        }
    }

    if source_default.is_map_type() {
        let ignored: HashSet<&str> = TOP_LEVEL_IGNORE.iter().copied().collect();
        let diffs = deep_diff(&current, source_default, name, &ignored);
        let target_default_root = ctx.get_target_default(role_key, name);
        for (leaf_path, entry) in diffs {
            if is_resource_derived(&leaf_path) {
                let target_leaf = target_default_root
                    .as_ref()
                    .and_then(|root| value_at_leaf_path(root, name, &leaf_path));
                if let (Some(reference), Some(target_leaf)) = (&entry.reference, target_leaf) {
                    if compare(reference, &target_leaf) {
                        continue;
                    }
                }
            }
            results.push(modified_result(role_key, &leaf_path, param_type, entry.current, entry.reference));
        }
        return;
    }

    if is_filename_only(bare) {
        let current_str = current.as_str().map(str::to_owned).unwrap_or_else(|| crate::value::format_value(&current));
        let default_str = source_default
            .as_str()
            .map(str::to_owned)
            .unwrap_or_else(|| crate::value::format_value(source_default));
        if !compare_file_names(&current_str, &default_str) {
            results.push(modified_result(role_key, name, param_type, Some(current), Some(source_default.clone())));
        }
        return;
    }

    if !compare(&current, source_default) {
        results.push(modified_result(role_key, name, param_type, Some(current), Some(source_default.clone())));
    }
}

fn modified_result(
    component: &str,
    name: &str,
    param_type: ParamType,
    current: Option<Value>,
    source_default: Option<Value>,
) -> CheckResult {
    let mut result = CheckResult::new(
        component,
        name,
        param_type,
        Severity::Info,
        format!("{} has been modified from its source-version default", name),
    );
    result.current_value = current;
    result.source_default = source_default;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kb::KnowledgeBase;
    use crate::value::ParameterValue;
    use std::collections::BTreeMap;

    fn state_with_config(config: BTreeMap<String, ParameterValue>) -> ComponentState {
        let mut s = ComponentState {
            component_type: "tikv".to_owned(),
            ..Default::default()
        };
        s.status.insert("address".to_owned(), "10.0.0.1:20160".to_owned());
        s.config = config;
        s
    }

    fn pv(v: Value) -> ParameterValue {
        ParameterValue::new(v)
    }

    #[tokio::test]
    async fn scalar_modification_v_s4_nested_map_diff() {
        let current_storage = Value::Map(
            [
                ("reserve-space".to_owned(), Value::String("5GiB".to_owned())),
                (
                    "block-cache".to_owned(),
                    Value::Map(
                        [
                            ("capacity".to_owned(), Value::String("7373835KiB".to_owned())),
                            ("high-pri-pool-ratio".to_owned(), Value::Float(0.8)),
                        ]
                        .into_iter()
                        .collect(),
                    ),
                ),
            ]
            .into_iter()
            .collect(),
        );
        let default_storage = Value::Map(
            [
                ("reserve-space".to_owned(), Value::String("0KiB".to_owned())),
                (
                    "block-cache".to_owned(),
                    Value::Map(
                        [
                            ("capacity".to_owned(), Value::String("23192823398B".to_owned())),
                            ("high-pri-pool-ratio".to_owned(), Value::Float(0.8)),
                        ]
                        .into_iter()
                        .collect(),
                    ),
                ),
            ]
            .into_iter()
            .collect(),
        );

        let mut config = BTreeMap::new();
        config.insert("storage".to_owned(), pv(current_storage));
        let component = state_with_config(config);

        let mut ctx = RuleContext::empty();
        ctx.snapshot.insert_bare_and_peer(Role::Tikv, "10.0.0.1:20160", component);
        let mut source_kb = KnowledgeBase::default();
        let mut tikv_defaults = BTreeMap::new();
        tikv_defaults.insert("storage".to_owned(), pv(default_storage));
        source_kb.config_defaults.insert("tikv".to_owned(), tikv_defaults);
        ctx.source_defaults = source_kb;

        let rule = UserModifiedParams;
        let results = rule.evaluate(&ctx).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().any(|r| r.parameter_name == "storage.reserve-space"));
        assert!(results.iter().any(|r| r.parameter_name == "storage.block-cache.capacity"));
        assert!(!results.iter().any(|r| r.parameter_name == "storage.block-cache.high-pri-pool-ratio"));
        for r in &results {
            assert_eq!(r.severity, Severity::Info);
        }
    }

    #[tokio::test]
    async fn top_level_ignore_list_is_honored() {
        let mut config = BTreeMap::new();
        config.insert("data-dir".to_owned(), pv(Value::String("/data/a".to_owned())));
        let component = state_with_config(config);

        let mut ctx = RuleContext::empty();
        ctx.snapshot.insert_bare_and_peer(Role::Tikv, "10.0.0.1:20160", component);
        let mut source_kb = KnowledgeBase::default();
        let mut tikv_defaults = BTreeMap::new();
        tikv_defaults.insert("data-dir".to_owned(), pv(Value::String("/data/b".to_owned())));
        source_kb.config_defaults.insert("tikv".to_owned(), tikv_defaults);
        ctx.source_defaults = source_kb;

        let rule = UserModifiedParams;
        let results = rule.evaluate(&ctx).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn resource_derived_nested_leaf_is_suppressed_against_target_default() {
        let current_storage = Value::Map(
            [
                ("reserve-space".to_owned(), Value::String("5GiB".to_owned())),
                (
                    "block-cache".to_owned(),
                    Value::Map([("capacity".to_owned(), Value::String("999MiB".to_owned()))].into_iter().collect()),
                ),
            ]
            .into_iter()
            .collect(),
        );
        let source_storage = Value::Map(
            [
                ("reserve-space".to_owned(), Value::String("0KiB".to_owned())),
                (
                    "block-cache".to_owned(),
                    Value::Map([("capacity".to_owned(), Value::String("500MiB".to_owned()))].into_iter().collect()),
                ),
            ]
            .into_iter()
            .collect(),
        );
        let target_storage = Value::Map(
            [(
                "block-cache".to_owned(),
                Value::Map([("capacity".to_owned(), Value::String("500MiB".to_owned()))].into_iter().collect()),
            )]
            .into_iter()
            .collect(),
        );

        let mut config = BTreeMap::new();
        config.insert("storage".to_owned(), pv(current_storage));
        let component = state_with_config(config);

        let mut ctx = RuleContext::empty();
        ctx.snapshot.insert_bare_and_peer(Role::Tikv, "10.0.0.1:20160", component);

        let mut source_kb = KnowledgeBase::default();
        let mut source_tikv = BTreeMap::new();
        source_tikv.insert("storage".to_owned(), pv(source_storage));
        source_kb.config_defaults.insert("tikv".to_owned(), source_tikv);
        ctx.source_defaults = source_kb;

        let mut target_kb = KnowledgeBase::default();
        let mut target_tikv = BTreeMap::new();
        target_tikv.insert("storage".to_owned(), pv(target_storage));
        target_kb.config_defaults.insert("tikv".to_owned(), target_tikv);
        ctx.target_defaults = target_kb;

        let rule = UserModifiedParams;
        let results = rule.evaluate(&ctx).await.unwrap();
        // block-cache.capacity is resource-derived and its source default
        // matches the target default at the same nested leaf, so it's
        // suppressed; reserve-space isn't resource-derived and still surfaces.
        assert_eq!(results.len(), 1);
        assert!(results.iter().any(|r| r.parameter_name == "storage.reserve-space"));
        assert!(!results.iter().any(|r| r.parameter_name == "storage.block-cache.capacity"));
    }

    #[tokio::test]
    async fn empty_source_kb_yields_zero_results() {
        let component = state_with_config(BTreeMap::new());
        let mut ctx = RuleContext::empty();
        ctx.snapshot.insert_bare_and_peer(Role::Tikv, "10.0.0.1:20160", component);
        let rule = UserModifiedParams;
        let results = rule.evaluate(&ctx).await.unwrap();
        assert!(results.is_empty());
    }
}
