//! Row-store peer collection: merges the on-disk user-set snapshot with the
//! runtime config reported through the SQL front-end, runtime winning.

use std::path::Path;

use crate::errors::CollectionError;
use crate::value::{merge_config_defaults, ConfigDefaults, ParameterValue, Value};

/// Parses `<data_dir>/last_tikv.toml` on the peer's host. Assumed locally
/// accessible to the process running this analysis; reaching it over a
/// remote transport is out of scope (see the spec's collector contract).
pub async fn read_user_set_config(addr: &str, data_dir: &Path) -> Result<ConfigDefaults, CollectionError> {
    let path = data_dir.join("last_tikv.toml");
    let text = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| CollectionError::ConfigSnapshotUnreadable {
            addr: addr.to_owned(),
            path: path.clone(),
            detail: e.to_string(),
        })?;
    let parsed: toml::Value = toml::from_str(&text).map_err(|e| CollectionError::ConfigSnapshotUnreadable {
        addr: addr.to_owned(),
        path,
        detail: e.to_string(),
    })?;
    match Value::from_toml(parsed) {
        Value::Map(m) => Ok(m.into_iter().map(|(k, v)| (k, ParameterValue::new(v))).collect()),
        _ => Ok(ConfigDefaults::new()),
    }
}

/// Merges user-set (lower precedence) with runtime (higher precedence)
/// config for one peer, per the collector's defined precedence.
pub fn merge(user_set: Option<&ConfigDefaults>, runtime: Option<&ConfigDefaults>) -> ConfigDefaults {
    match (user_set, runtime) {
        (Some(u), Some(r)) => merge_config_defaults(u, r),
        (Some(u), None) => u.clone(),
        (None, Some(r)) => r.clone(),
        (None, None) => ConfigDefaults::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::compare;

    #[test]
    fn runtime_wins_over_user_set_on_overlapping_leaves() {
        let mut user_set = ConfigDefaults::new();
        user_set.insert(
            "storage".to_owned(),
            ParameterValue::new(Value::Map(
                [("reserve-space".to_owned(), Value::String("0KiB".to_owned()))].into_iter().collect(),
            )),
        );
        let mut runtime = ConfigDefaults::new();
        runtime.insert(
            "storage".to_owned(),
            ParameterValue::new(Value::Map(
                [("reserve-space".to_owned(), Value::String("5GiB".to_owned()))].into_iter().collect(),
            )),
        );
        let merged = merge(Some(&user_set), Some(&runtime));
        let storage = merged.get("storage").unwrap().value.as_map().unwrap();
        assert!(compare(storage.get("reserve-space").unwrap(), &Value::String("5GiB".to_owned())));
    }

    #[test]
    fn missing_runtime_falls_back_to_user_set_alone() {
        let mut user_set = ConfigDefaults::new();
        user_set.insert("storage".to_owned(), ParameterValue::new(Value::String("x".to_owned())));
        let merged = merge(Some(&user_set), None);
        assert_eq!(merged.len(), 1);
    }
}
