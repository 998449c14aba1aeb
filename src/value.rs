//! Typed parameter values, numeric-aware equality, and deep structural diff.
//!
//! The upstream source materializes every config/sysvar value as an untyped
//! container; everything downstream of this module routes through
//! [`compare`] and [`format_value`] instead of matching on the raw decoded
//! shape, so that `1e6`, `1000000`, and `"1000000"` are all the same value.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Sorted map alias, used throughout so iteration order is deterministic.
pub type SortedMap<K, V> = BTreeMap<K, V>;

/// The `"type"` tag stored alongside a [`ParameterValue`] in `defaults.json`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Int,
    Float,
    Bool,
    String,
    Map,
    List,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Bool => "bool",
            ValueType::String => "string",
            ValueType::Map => "map",
            ValueType::List => "list",
        };
        f.write_str(s)
    }
}

/// A parameter value: a scalar, an ordered list, or a mapping from string to
/// (recursively) another `Value`.
///
/// Variant order matters for untagged deserialization: `Bool` before `Int`
/// before `Float` before `String` so that e.g. `true` never gets coerced
/// into a numeric variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(SortedMap<String, Value>),
}

impl Value {
    pub fn is_map_type(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    pub fn is_slice_type(&self) -> bool {
        matches!(self, Value::List(_))
    }

    /// Best-effort type tag for a bare value that arrived without one (e.g.
    /// a `ParameterValue` that didn't carry a `"type"` field, or a runtime
    /// value collected straight off the wire).
    pub fn inferred_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::String,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::List(_) => ValueType::List,
            Value::Map(_) => ValueType::Map,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&SortedMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Convert from a `serde_json::Value`, e.g. when decoding a forced
    /// change's `value` field or a row-store `SHOW CONFIG` result that was
    /// shipped back as JSON.
    pub fn from_json(v: serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::String(n.to_string())
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::List(a.into_iter().map(Value::from_json).collect()),
            serde_json::Value::Object(o) => {
                Value::Map(o.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect())
            }
        }
    }

    /// Convert from a `toml::Value`, e.g. when parsing a peer's
    /// `last_tikv.toml` user-set config snapshot.
    pub fn from_toml(v: toml::Value) -> Value {
        match v {
            toml::Value::String(s) => Value::String(s),
            toml::Value::Integer(i) => Value::Int(i),
            toml::Value::Float(f) => Value::Float(f),
            toml::Value::Boolean(b) => Value::Bool(b),
            toml::Value::Datetime(dt) => Value::String(dt.to_string()),
            toml::Value::Array(a) => Value::List(a.into_iter().map(Value::from_toml).collect()),
            toml::Value::Table(t) => {
                Value::Map(t.into_iter().map(|(k, v)| (k, Value::from_toml(v))).collect())
            }
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(l) => serde_json::Value::Array(l.iter().map(Value::to_json).collect()),
            Value::Map(m) => {
                serde_json::Value::Object(m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// The on-disk envelope used by `defaults.json`: a value plus its declared
/// type tag. Some hand-edited or older KB files omit the tag, or store the
/// bare value with no envelope at all -- both shapes deserialize here.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterValue {
    pub value: Value,
    pub value_type: ValueType,
}

impl ParameterValue {
    pub fn new(value: Value) -> Self {
        let value_type = value.inferred_type();
        ParameterValue { value, value_type }
    }
}

impl Serialize for ParameterValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("ParameterValue", 2)?;
        s.serialize_field("value", &self.value)?;
        s.serialize_field("type", &self.value_type)?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for ParameterValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Detour through serde_json::Value so we can tell a `{value, type}`
        // envelope apart from a bare value without a custom visitor per
        // caller format.
        let raw = serde_json::Value::deserialize(deserializer)?;
        if let serde_json::Value::Object(ref obj) = raw {
            if let Some(inner) = obj.get("value") {
                let value = Value::from_json(inner.clone());
                let value_type = match obj.get("type").and_then(|t| t.as_str()) {
                    Some("int") => ValueType::Int,
                    Some("float") => ValueType::Float,
                    Some("bool") => ValueType::Bool,
                    Some("string") => ValueType::String,
                    Some("map") => ValueType::Map,
                    Some("list") => ValueType::List,
                    _ => value.inferred_type(),
                };
                return Ok(ParameterValue { value, value_type });
            }
        }
        let value = Value::from_json(raw);
        Ok(ParameterValue::new(value))
    }
}

/// Mapping from parameter name (dotted config path, or `sysvar:<name>` for
/// session variables) to its stored default.
pub type ConfigDefaults = SortedMap<String, ParameterValue>;

/// Reassembles flat `(dotted.name, value)` rows -- the shape `SHOW CONFIG`
/// returns -- into the nested-map [`ConfigDefaults`] the rest of the system
/// expects, where a structured parameter like `storage` carries its
/// sub-fields as a single `Value::Map` rather than many flat keys.
pub fn unflatten(rows: impl IntoIterator<Item = (String, Value)>) -> ConfigDefaults {
    let mut root: SortedMap<String, Value> = SortedMap::new();
    for (dotted_name, value) in rows {
        let segments: Vec<&str> = dotted_name.split('.').collect();
        insert_path(&mut root, &segments, value);
    }
    root.into_iter().map(|(k, v)| (k, ParameterValue::new(v))).collect()
}

fn insert_path(node: &mut SortedMap<String, Value>, segments: &[&str], value: Value) {
    match segments {
        [] => {}
        [last] => {
            node.insert((*last).to_owned(), value);
        }
        [head, rest @ ..] => {
            let entry = node.entry((*head).to_owned()).or_insert_with(|| Value::Map(SortedMap::new()));
            if !matches!(entry, Value::Map(_)) {
                *entry = Value::Map(SortedMap::new());
            }
            if let Value::Map(sub) = entry {
                insert_path(sub, rest, value);
            }
        }
    }
}

/// `Compare(a, b)`: numerically equal after attempted float parse of both
/// sides, otherwise byte-equal canonical string form.
///
/// Always true for `compare(a, a)`.
pub fn compare(a: &Value, b: &Value) -> bool {
    if let (Some(fa), Some(fb)) = (as_numeric(a), as_numeric(b)) {
        return fa == fb;
    }
    format_value(a) == format_value(b)
}

fn as_numeric(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// `Format(v)`: canonical string rendering. Integers and whole-valued floats
/// render without a decimal point or exponent; fractional floats use
/// fixed-point precision chosen by magnitude bucket; strings that parse as
/// numbers are reformatted by the numeric rule; maps/lists emit canonical
/// JSON with stable (sorted) key order.
pub fn format_value(v: &Value) -> String {
    match v {
        Value::Null => "null".to_owned(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => format_float(*f),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(f) if !s.trim().is_empty() => format_float(f),
            _ => serde_json::to_string(s).unwrap_or_else(|_| format!("{:?}", s)),
        },
        Value::List(_) | Value::Map(_) => {
            serde_json::to_string(&v.to_json()).unwrap_or_default()
        }
    }
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e18 {
        return format!("{:.0}", f);
    }
    let magnitude = f.abs();
    if magnitude >= 1.0 && magnitude < 1e6 {
        format!("{:.6}", f)
    } else if magnitude >= 1e-3 && magnitude < 1.0 {
        format!("{:.9}", f)
    } else {
        format!("{:.0}", f)
    }
}

/// `CompareFileNames`: strip directory separators (both `/` and `\`) and
/// compare basenames.
pub fn compare_file_names(a: &str, b: &str) -> bool {
    basename(a) == basename(b)
}

fn basename(p: &str) -> &str {
    p.rsplit(['/', '\\']).next().unwrap_or(p)
}

/// One leaf-level difference found by [`deep_diff`].
#[derive(Clone, Debug, PartialEq)]
pub struct DiffEntry {
    pub current: Option<Value>,
    pub reference: Option<Value>,
}

/// Recursive structural comparison of two (potentially map-valued)
/// parameters, keyed by dotted path.
///
/// `ignored_params` is consulted only as a guard on the top-level call --
/// if `base_path` itself names an ignored parameter, the whole walk is
/// skipped. It is never consulted again while recursing into nested map
/// fields: a field that happens to share a name with an ignored top-level
/// parameter (e.g. `storage.data-dir` next to a top-level `data-dir`) is
/// still reported, because nested suppression would mask real drift in
/// structured configs. Callers that want per-field suppression must do it
/// themselves on the returned map.
pub fn deep_diff(
    current: &Value,
    reference: &Value,
    base_path: &str,
    ignored_params: &HashSet<&str>,
) -> SortedMap<String, DiffEntry> {
    let mut out = SortedMap::new();
    if ignored_params.contains(base_path) {
        return out;
    }
    diff_into(current, reference, base_path, &mut out);
    out
}

fn diff_into(current: &Value, reference: &Value, path: &str, out: &mut SortedMap<String, DiffEntry>) {
    match (current, reference) {
        (Value::Map(a), Value::Map(b)) => {
            let mut keys: Vec<&String> = a.keys().chain(b.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let sub_path = format!("{}.{}", path, key);
                match (a.get(key), b.get(key)) {
                    (Some(ca), Some(rb)) => diff_into(ca, rb, &sub_path, out),
                    (ca, rb) => push_if_differs(ca, rb, &sub_path, out),
                }
            }
        }
        _ => {
            if !compare(current, reference) {
                out.insert(
                    path.to_owned(),
                    DiffEntry {
                        current: Some(current.clone()),
                        reference: Some(reference.clone()),
                    },
                );
            }
        }
    }
}

fn push_if_differs(
    current: Option<&Value>,
    reference: Option<&Value>,
    path: &str,
    out: &mut SortedMap<String, DiffEntry>,
) {
    let differs = match (current, reference) {
        (Some(a), Some(b)) => !compare(a, b),
        (None, None) => false,
        _ => true,
    };
    if differs {
        out.insert(
            path.to_owned(),
            DiffEntry {
                current: current.cloned(),
                reference: reference.cloned(),
            },
        );
    }
}

/// Descends from a top-level parameter's value (e.g. the `storage` map) to
/// the leaf named by a `deep_diff` dotted path (e.g.
/// `storage.block-cache.capacity`), walking the segments after the
/// top-level name through nested `Value::Map`s. Returns `None` if the path
/// doesn't start with `top_level_name` or any segment is absent/non-map.
pub fn value_at_leaf_path(root: &Value, top_level_name: &str, leaf_path: &str) -> Option<Value> {
    let mut segments = leaf_path.split('.');
    if segments.next() != Some(top_level_name) {
        return None;
    }
    let mut current = root;
    for segment in segments {
        current = current.as_map()?.get(segment)?;
    }
    Some(current.clone())
}

/// Recursive overlay merge: `high` wins leaf-for-leaf, `low` fills in
/// whatever `high` doesn't mention. Two maps merge field-by-field; any
/// other pairing (scalar vs scalar, scalar vs map, missing vs present)
/// takes `high` outright.
pub fn merge_values(low: &Value, high: &Value) -> Value {
    match (low, high) {
        (Value::Map(l), Value::Map(h)) => {
            let mut out = l.clone();
            for (k, hv) in h {
                match out.get(k) {
                    Some(lv) => {
                        let merged = merge_values(lv, hv);
                        out.insert(k.clone(), merged);
                    }
                    None => {
                        out.insert(k.clone(), hv.clone());
                    }
                }
            }
            Value::Map(out)
        }
        _ => high.clone(),
    }
}

/// Same overlay merge at the [`ConfigDefaults`] level, used by the row-store
/// collector to merge `last_tikv.toml` (low) with `SHOW CONFIG` (high).
pub fn merge_config_defaults(low: &ConfigDefaults, high: &ConfigDefaults) -> ConfigDefaults {
    let mut out = low.clone();
    for (name, hv) in high {
        match out.get(name) {
            Some(lv) => {
                out.insert(name.clone(), ParameterValue::new(merge_values(&lv.value, &hv.value)));
            }
            None => {
                out.insert(name.clone(), hv.clone());
            }
        }
    }
    out
}

/// Convenience composite: how `current` relates to the source and target
/// shipped defaults.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreeWayDiff {
    pub modified_from_source: bool,
    pub differs_from_target: bool,
}

pub fn three_way_diff(current: &Value, source_default: &Value, target_default: &Value) -> ThreeWayDiff {
    ThreeWayDiff {
        modified_from_source: !compare(current, source_default),
        differs_from_target: !compare(current, target_default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v_i(i: i64) -> Value {
        Value::Int(i)
    }
    fn v_f(f: f64) -> Value {
        Value::Float(f)
    }
    fn v_s(s: &str) -> Value {
        Value::String(s.to_owned())
    }

    #[test]
    fn compare_is_reflexive() {
        for v in [
            v_i(42),
            v_f(1.5),
            v_s("hello"),
            Value::Bool(true),
            Value::Null,
            Value::List(vec![v_i(1), v_s("x")]),
        ] {
            assert!(compare(&v, &v), "{:?} should compare equal to itself", v);
        }
    }

    #[test]
    fn compare_numeric_representations() {
        assert!(compare(&v_f(1e6), &v_i(1_000_000)));
        assert!(compare(&v_s("1000000"), &v_i(1_000_000)));
        assert!(compare(&v_s("1e6"), &v_i(1_000_000)));
        assert!(!compare(&v_i(1), &v_i(2)));
    }

    #[test]
    fn format_integers_have_no_decimal_point() {
        assert_eq!(format_value(&v_i(1000000)), "1000000");
        assert_eq!(format_value(&v_f(1000000.0)), "1000000");
    }

    #[test]
    fn format_fractional_floats_use_magnitude_bucket() {
        assert_eq!(format_value(&v_f(1.5)), "1.500000");
        assert_eq!(format_value(&v_f(0.08)), "0.080000000");
    }

    #[test]
    fn compare_file_names_ignores_directory() {
        assert!(compare_file_names("/var/log/tidb.log", "tidb.log"));
        assert!(compare_file_names(r"C:\logs\tidb.log", "/opt/tidb/tidb.log"));
        assert!(!compare_file_names("tidb.log", "tikv.log"));
    }

    #[test]
    fn deep_diff_of_identical_values_is_empty() {
        let m = Value::Map(
            [
                ("a".to_owned(), v_i(1)),
                ("b".to_owned(), Value::Map([("c".to_owned(), v_s("x"))].into_iter().collect())),
            ]
            .into_iter()
            .collect(),
        );
        let ignored = HashSet::new();
        assert!(deep_diff(&m, &m, "storage", &ignored).is_empty());
    }

    #[test]
    fn deep_diff_reports_nested_leaf_paths() {
        let current = Value::Map(
            [
                ("reserve-space".to_owned(), v_s("5GiB")),
                (
                    "block-cache".to_owned(),
                    Value::Map(
                        [
                            ("capacity".to_owned(), v_s("7373835KiB")),
                            ("high-pri-pool-ratio".to_owned(), v_f(0.8)),
                        ]
                        .into_iter()
                        .collect(),
                    ),
                ),
            ]
            .into_iter()
            .collect(),
        );
        let reference = Value::Map(
            [
                ("reserve-space".to_owned(), v_s("0KiB")),
                (
                    "block-cache".to_owned(),
                    Value::Map(
                        [
                            ("capacity".to_owned(), v_s("23192823398B")),
                            ("high-pri-pool-ratio".to_owned(), v_f(0.8)),
                        ]
                        .into_iter()
                        .collect(),
                    ),
                ),
            ]
            .into_iter()
            .collect(),
        );
        let ignored = HashSet::new();
        let diff = deep_diff(&current, &reference, "storage", &ignored);
        assert_eq!(diff.len(), 2);
        assert!(diff.contains_key("storage.reserve-space"));
        assert!(diff.contains_key("storage.block-cache.capacity"));
        assert!(!diff.contains_key("storage.block-cache.high-pri-pool-ratio"));
    }

    #[test]
    fn deep_diff_top_level_ignore_guard() {
        let m = v_s("whatever");
        let other = v_s("different");
        let mut ignored = HashSet::new();
        ignored.insert("data-dir");
        assert!(deep_diff(&m, &other, "data-dir", &ignored).is_empty());
    }

    #[test]
    fn deep_diff_nested_field_is_not_suppressed_by_ignore_list() {
        // "data-dir" is an ignored top-level parameter name, but a nested
        // field that happens to share that name inside a different
        // top-level parameter ("storage") is still reported.
        let current = Value::Map(
            [("data-dir".to_owned(), v_s("/data/a"))].into_iter().collect(),
        );
        let reference = Value::Map(
            [("data-dir".to_owned(), v_s("/data/b"))].into_iter().collect(),
        );
        let mut ignored = HashSet::new();
        ignored.insert("data-dir");
        let diff = deep_diff(&current, &reference, "storage", &ignored);
        assert_eq!(diff.len(), 1);
        assert!(diff.contains_key("storage.data-dir"));
    }

    #[test]
    fn value_at_leaf_path_descends_through_nested_maps() {
        let storage = Value::Map(
            [(
                "block-cache".to_owned(),
                Value::Map([("capacity".to_owned(), v_s("1GiB"))].into_iter().collect()),
            )]
            .into_iter()
            .collect(),
        );
        assert_eq!(
            value_at_leaf_path(&storage, "storage", "storage.block-cache.capacity"),
            Some(v_s("1GiB"))
        );
        assert_eq!(value_at_leaf_path(&storage, "storage", "storage.block-cache.missing"), None);
        assert_eq!(value_at_leaf_path(&storage, "storage", "other.block-cache.capacity"), None);
    }

    #[test]
    fn parameter_value_round_trips_through_json() {
        let pv = ParameterValue {
            value: v_i(1_000_000),
            value_type: ValueType::Int,
        };
        let json = serde_json::to_string(&pv).unwrap();
        let back: ParameterValue = serde_json::from_str(&json).unwrap();
        assert!(compare(&pv.value, &back.value));
        assert_eq!(pv.value_type, back.value_type);
    }

    #[test]
    fn parameter_value_accepts_bare_shape() {
        let pv: ParameterValue = serde_json::from_str("\"1000000\"").unwrap();
        assert!(compare(&pv.value, &v_i(1_000_000)));
    }

    #[test]
    fn unflatten_groups_dotted_rows_under_their_top_level_segment() {
        let rows = vec![
            ("storage.reserve-space".to_owned(), v_s("5GiB")),
            ("storage.block-cache.capacity".to_owned(), v_s("7373835KiB")),
            ("max-connections".to_owned(), v_i(1000)),
        ];
        let defaults = unflatten(rows);
        assert_eq!(defaults.len(), 2);
        let storage = defaults.get("storage").unwrap().value.as_map().unwrap();
        assert_eq!(storage.get("reserve-space"), Some(&v_s("5GiB")));
        let block_cache = storage.get("block-cache").unwrap().as_map().unwrap();
        assert_eq!(block_cache.get("capacity"), Some(&v_s("7373835KiB")));
        assert_eq!(defaults.get("max-connections").unwrap().value, v_i(1000));
    }

    #[test]
    fn merge_config_defaults_prefers_high_precedence_leaves() {
        let mut low = ConfigDefaults::new();
        low.insert(
            "storage".to_owned(),
            pv(Value::Map(
                [
                    ("reserve-space".to_owned(), v_s("0KiB")),
                    ("block-cache".to_owned(), Value::Map([("capacity".to_owned(), v_s("1GiB"))].into_iter().collect())),
                ]
                .into_iter()
                .collect(),
            )),
        );
        let mut high = ConfigDefaults::new();
        high.insert(
            "storage".to_owned(),
            pv(Value::Map([("reserve-space".to_owned(), v_s("5GiB"))].into_iter().collect())),
        );
        let merged = merge_config_defaults(&low, &high);
        let storage = merged.get("storage").unwrap().value.as_map().unwrap();
        assert_eq!(storage.get("reserve-space"), Some(&v_s("5GiB")));
        let block_cache = storage.get("block-cache").unwrap().as_map().unwrap();
        assert_eq!(block_cache.get("capacity"), Some(&v_s("1GiB")));
    }

    fn pv(v: Value) -> ParameterValue {
        ParameterValue::new(v)
    }
}
