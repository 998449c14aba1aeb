//! Rule context (C5): the read-only evaluation frame every rule sees.

use std::collections::BTreeMap;

use crate::kb::{ChangeRecord, KnowledgeBase, UpgradeLogic};
use crate::rule::{ParamType, Severity};
use crate::snapshot::ClusterSnapshot;
use crate::value::{compare, Value};
use crate::version::ReleaseVersion;

pub const SYSVAR_PREFIX: &str = "sysvar:";

/// Splits a `sysvar:`-prefixed lookup name from a bare config name; used
/// anywhere a parameter name needs routing to session variables vs config.
pub fn split_sysvar(name: &str) -> (bool, &str) {
    match name.strip_prefix(SYSVAR_PREFIX) {
        Some(rest) => (true, rest),
        None => (false, name),
    }
}

/// A knowledge-base annotation conditionally surfaced alongside a result.
#[derive(Clone, Debug)]
pub struct ParameterNote {
    pub role: String,
    pub param_type: ParamType,
    pub name: String,
    /// Note only applies when the target default matches this value.
    pub target_default: Option<Value>,
    /// Note only applies from this target release version onward.
    pub target_version_min: Option<ReleaseVersion>,
    pub note: String,
}

/// Fields of a matched forced-change record other than its value.
#[derive(Clone, Debug, Default)]
pub struct ForcedChangeMetadata {
    pub details_note: Option<String>,
    pub suggestions: Vec<String>,
    pub report_severity: Option<Severity>,
}

/// Immutable evaluation frame handed to every rule.
#[derive(Clone, Debug, Default)]
pub struct RuleContext {
    pub snapshot: ClusterSnapshot,
    pub source_version: String,
    pub target_version: String,
    pub source_bootstrap_version: u32,
    pub target_bootstrap_version: u32,
    pub source_defaults: KnowledgeBase,
    pub target_defaults: KnowledgeBase,
    pub upgrade_logic: UpgradeLogic,
    pub parameter_notes: Vec<ParameterNote>,
}

impl RuleContext {
    pub fn empty() -> Self {
        RuleContext::default()
    }

    pub fn get_source_default(&self, role: &str, name: &str) -> Option<Value> {
        let (is_sysvar, bare) = split_sysvar(name);
        if is_sysvar {
            self.source_defaults.system_variable_default(bare).map(|pv| pv.value.clone())
        } else {
            self.source_defaults.config_default(role, bare).map(|pv| pv.value.clone())
        }
    }

    pub fn get_target_default(&self, role: &str, name: &str) -> Option<Value> {
        let (is_sysvar, bare) = split_sysvar(name);
        if is_sysvar {
            self.target_defaults.system_variable_default(bare).map(|pv| pv.value.clone())
        } else {
            self.target_defaults.config_default(role, bare).map(|pv| pv.value.clone())
        }
    }

    /// True if `change` falls in `(source_bootstrap, target_bootstrap]`,
    /// preferring bootstrap comparison; falls back to release-version
    /// comparison only when bootstrap is entirely unknown on both ends.
    fn change_in_range(&self, change: &ChangeRecord) -> bool {
        if self.source_bootstrap_version != 0 || self.target_bootstrap_version != 0 {
            return self.source_bootstrap_version < change.version && change.version <= self.target_bootstrap_version;
        }
        let source_rv = ReleaseVersion::parse(&self.source_version);
        let target_rv = ReleaseVersion::parse(&self.target_version);
        let change_rv = ReleaseVersion::parse(&change.version.to_string());
        source_rv < change_rv && change_rv <= target_rv
    }

    /// Every forced change in range for `role`, accumulated name -> value
    /// (later-ordered matches for the same name win, as a map accumulation
    /// naturally does).
    pub fn get_forced_changes(&self, role: &str) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        for change in self.upgrade_logic.changes_for(role) {
            if self.change_in_range(change) {
                out.insert(change.name.clone(), change.value.clone());
            }
        }
        out
    }

    /// In-range changes for `(role, name)`, additionally gated by
    /// `from_value` matching `current` via numeric-aware `Compare` when
    /// present.
    pub fn get_forced_change_for_value(&self, role: &str, name: &str, current: &Value) -> Option<Value> {
        let mut result = None;
        for change in self.upgrade_logic.changes_for(role) {
            if change.name != name || !self.change_in_range(change) {
                continue;
            }
            let condition_met = match &change.from_value {
                Some(fv) => compare(fv, current),
                None => true,
            };
            if condition_met {
                result = Some(change.value.clone());
            }
        }
        result
    }

    /// The in-range change for `(role, name)` with the highest version,
    /// ignoring `from_value` entirely. Used as the forced-overwrite value
    /// when a change record exists but its `from_value` condition didn't
    /// match `current` -- the change still applies, just unconditionally.
    pub fn get_forced_change_unconditional(&self, role: &str, name: &str) -> Option<Value> {
        let mut result = None;
        for change in self.upgrade_logic.changes_for(role) {
            if change.name != name || !self.change_in_range(change) {
                continue;
            }
            result = Some(change.value.clone());
        }
        result
    }

    pub fn get_forced_change_metadata(&self, role: &str, name: &str, current: &Value) -> Option<ForcedChangeMetadata> {
        let mut result: Option<ForcedChangeMetadata> = None;
        for change in self.upgrade_logic.changes_for(role) {
            if change.name != name || !self.change_in_range(change) {
                continue;
            }
            let condition_met = match &change.from_value {
                Some(fv) => compare(fv, current),
                None => true,
            };
            if !condition_met {
                continue;
            }
            if change.details_note.is_some() || !change.suggestions.is_empty() || change.report_severity.is_some() {
                result = Some(ForcedChangeMetadata {
                    details_note: change.details_note.clone(),
                    suggestions: change.suggestions.clone(),
                    report_severity: change.report_severity,
                });
            }
        }
        result
    }

    pub fn get_parameter_note(&self, role: &str, name: &str, param_type: ParamType, target_default: Option<&Value>) -> Option<String> {
        let target_rv = ReleaseVersion::parse(&self.target_version);
        self.parameter_notes
            .iter()
            .find(|n| {
                n.role == role
                    && n.name == name
                    && n.param_type == param_type
                    && n.target_default
                        .as_ref()
                        .map_or(true, |td| target_default.map_or(false, |actual| compare(td, actual)))
                    && n.target_version_min.as_ref().map_or(true, |min| &target_rv >= min)
            })
            .map(|n| n.note.clone())
    }
}
