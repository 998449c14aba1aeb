//! Small helpers shared by more than one rule.

use crate::context::split_sysvar;
use crate::snapshot::ComponentState;
use crate::value::Value;

/// Resolve a parameter's current collected value off a component, routing
/// `sysvar:`-prefixed names to session variables and everything else to
/// config.
pub fn resolve_current(component: &ComponentState, name: &str) -> Option<Value> {
    let (is_sysvar, bare) = split_sysvar(name);
    if is_sysvar {
        component.variables.get(bare).map(|pv| pv.value.clone())
    } else {
        component.config.get(bare).map(|pv| pv.value.clone())
    }
}
