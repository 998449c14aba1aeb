//! Knowledge base loader (C2): per-version shipped defaults plus the global
//! forced-change log.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::KbError;
use crate::rule::Severity;
use crate::value::{ConfigDefaults, Value};

/// One version's shipped defaults and bootstrap step.
#[derive(Clone, Debug, Default)]
pub struct KnowledgeBase {
    /// Role (`"tidb"`, `"pd"`, `"tikv"`, `"tiflash"`) -> its config defaults.
    pub config_defaults: HashMap<String, ConfigDefaults>,
    /// Session-variable defaults; only ever populated for `"tidb"`.
    pub system_variable_defaults: ConfigDefaults,
    pub bootstrap_version: u32,
}

impl KnowledgeBase {
    pub fn config_default(&self, role: &str, name: &str) -> Option<&crate::value::ParameterValue> {
        self.config_defaults.get(role)?.get(name)
    }

    pub fn system_variable_default(&self, name: &str) -> Option<&crate::value::ParameterValue> {
        self.system_variable_defaults.get(name)
    }
}

#[derive(Deserialize)]
struct RawKb {
    #[serde(default)]
    config_defaults: HashMap<String, ConfigDefaults>,
    #[serde(default)]
    system_variable_defaults: HashMap<String, ConfigDefaults>,
    #[serde(default)]
    bootstrap_version: u32,
}

impl From<RawKb> for KnowledgeBase {
    fn from(raw: RawKb) -> Self {
        let system_variable_defaults = raw
            .system_variable_defaults
            .get("tidb")
            .cloned()
            .unwrap_or_default();
        KnowledgeBase {
            config_defaults: raw.config_defaults,
            system_variable_defaults,
            bootstrap_version: raw.bootstrap_version,
        }
    }
}

/// Read `<root>/<version>/defaults.json`. `Ok(None)` means the file does
/// not exist; whether that is fatal is the caller's call (fatal for the
/// target version, non-fatal -- treated as empty defaults -- for source).
#[tracing::instrument(skip(root))]
pub async fn load(root: &Path, version: &str) -> Result<Option<KnowledgeBase>, KbError> {
    let path = root.join(version).join("defaults.json");
    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(?path, "knowledge base file not present");
            return Ok(None);
        }
        Err(e) => return Err(KbError::Io { path, source: e }),
    };
    let raw: RawKb =
        serde_json::from_slice(&bytes).map_err(|e| KbError::Corrupt { path: path.clone(), source: e })?;
    tracing::debug!(?path, role_count = raw.config_defaults.len(), "loaded knowledge base");
    Ok(Some(KnowledgeBase::from(raw)))
}

/// Load the target version's KB, treating a missing file as fatal.
pub async fn load_target(root: &Path, version: &str) -> Result<KnowledgeBase, KbError> {
    load(root, version).await?.ok_or_else(|| KbError::TargetMissing {
        version: version.to_owned(),
        path: root.join(version).join("defaults.json"),
    })
}

/// Load the source version's KB, treating a missing file as empty defaults.
pub async fn load_source(root: &Path, version: &str) -> Result<KnowledgeBase, KbError> {
    match load(root, version).await? {
        Some(kb) => Ok(kb),
        None => {
            tracing::warn!(%version, "source knowledge base missing; proceeding with empty defaults");
            Ok(KnowledgeBase::default())
        }
    }
}

/// One forced-change record from `upgrade_logic.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeRecord {
    #[serde(deserialize_with = "deserialize_flexible_u32")]
    pub version: u32,
    pub name: String,
    pub value: Value,
    #[serde(default)]
    pub from_value: Option<Value>,
    #[serde(default)]
    pub details_note: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub report_severity: Option<Severity>,
}

fn deserialize_flexible_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        Num(u32),
        Str(String),
    }
    match Flexible::deserialize(deserializer)? {
        Flexible::Num(n) => Ok(n),
        Flexible::Str(s) => s.trim().parse::<u32>().map_err(serde::de::Error::custom),
    }
}

#[derive(Deserialize)]
struct RawRoleChanges {
    #[serde(default)]
    changes: Vec<ChangeRecord>,
}

/// Global forced-change log, keyed by role.
#[derive(Clone, Debug, Default)]
pub struct UpgradeLogic {
    pub changes_by_role: HashMap<String, Vec<ChangeRecord>>,
}

impl UpgradeLogic {
    pub fn changes_for(&self, role: &str) -> &[ChangeRecord] {
        self.changes_by_role.get(role).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Read `<root>/tidb/upgrade_logic.json`. A missing file is treated as an
/// empty log (no forced changes known).
#[tracing::instrument(skip(root))]
pub async fn load_upgrade_logic(root: &Path) -> Result<UpgradeLogic, KbError> {
    let path: PathBuf = root.join("tidb").join("upgrade_logic.json");
    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(?path, "upgrade logic file not present, treating as empty");
            return Ok(UpgradeLogic::default());
        }
        Err(e) => return Err(KbError::Io { path, source: e }),
    };
    let raw: HashMap<String, RawRoleChanges> =
        serde_json::from_slice(&bytes).map_err(|e| KbError::Corrupt { path: path.clone(), source: e })?;
    let changes_by_role = raw.into_iter().map(|(role, rc)| (role, rc.changes)).collect();
    Ok(UpgradeLogic { changes_by_role })
}
