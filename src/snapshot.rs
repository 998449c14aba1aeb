//! Point-in-time collected cluster state (C4's output, C5's input).

use chrono::{DateTime, Utc};

use crate::value::ConfigDefaults;

/// The four service roles this analyzer understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Tidb,
    Pd,
    Tikv,
    Tiflash,
}

impl Role {
    pub fn bare_key(self) -> &'static str {
        match self {
            Role::Tidb => "tidb",
            Role::Pd => "pd",
            Role::Tikv => "tikv",
            Role::Tiflash => "tiflash",
        }
    }
}

/// One running instance's collected configuration/status.
#[derive(Clone, Debug, Default)]
pub struct ComponentState {
    /// Role discriminant as a bare string (`"tidb"`, `"pd"`, `"tikv"`, `"tiflash"`).
    pub component_type: String,
    pub version: String,
    pub config: ConfigDefaults,
    /// Session variables; populated only for the SQL front-end.
    pub variables: ConfigDefaults,
    /// At least `"address"`; `"user"`/`"password"` for the SQL front-end.
    pub status: std::collections::HashMap<String, String>,
}

impl ComponentState {
    pub fn address(&self) -> Option<&str> {
        self.status.get("address").map(String::as_str)
    }
}

/// A role or peer that some rule's `DataRequirements` asked for but that
/// collection could not (fully) satisfy.
#[derive(Clone, Debug)]
pub struct CollectionWarning {
    pub role: String,
    pub detail: String,
    pub fatal: bool,
}

/// Turns a peer address into the synthesized per-peer key
/// `"<role>-<ip>-<port>"`, replacing `:`/`.` with `-`.
pub fn peer_key(role: Role, addr: &str) -> String {
    let sanitized: String = addr
        .chars()
        .map(|c| if c == ':' || c == '.' { '-' } else { c })
        .collect();
    format!("{}-{}", role.bare_key(), sanitized)
}

/// The full collected state of a cluster at one point in time.
#[derive(Clone, Debug, Default)]
pub struct ClusterSnapshot {
    pub timestamp: Option<DateTime<Utc>>,
    pub source_version: String,
    pub target_version: String,
    /// Bare role keys (`"tidb"`, `"pd"`, `"tikv"`, `"tiflash"`) plus
    /// per-peer keys (`"tikv-<ip>-<port>"`).
    pub components: std::collections::BTreeMap<String, ComponentState>,
    pub collection_warnings: Vec<CollectionWarning>,
}

impl ClusterSnapshot {
    pub fn new(source_version: String, target_version: String) -> Self {
        ClusterSnapshot {
            timestamp: None,
            source_version,
            target_version,
            components: std::collections::BTreeMap::new(),
            collection_warnings: Vec::new(),
        }
    }

    /// First `ComponentState` for a role: its bare key if present,
    /// otherwise the lexicographically first per-peer key.
    pub fn first_of_role(&self, role: Role) -> Option<&ComponentState> {
        if let Some(c) = self.components.get(role.bare_key()) {
            return Some(c);
        }
        let prefix = format!("{}-", role.bare_key());
        self.components
            .iter()
            .find(|(k, _)| k.starts_with(&prefix))
            .map(|(_, v)| v)
    }

    /// Every collected peer of a role, in key order (bare key excluded --
    /// it always duplicates one of the per-peer entries per the
    /// synthesized-key invariant).
    pub fn peers_of_role(&self, role: Role) -> Vec<&ComponentState> {
        let prefix = format!("{}-", role.bare_key());
        self.components
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(_, v)| v)
            .collect()
    }

    pub fn insert_bare_and_peer(&mut self, role: Role, addr: &str, state: ComponentState) {
        self.components.insert(peer_key(role, addr), state.clone());
        self.components.entry(role.bare_key().to_owned()).or_insert(state);
    }
}
