//! SQL front-end fetcher: the wire-protocol half of the collector.
//!
//! A single connection pool to the SQL front-end also doubles as the
//! transport for `SHOW CONFIG`, the runtime half of row-store and columnar
//! collection (see `super::tikv`) -- real deployments only expose the
//! front-end's SQL port to the operator host running this analysis.

use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::Row;

use crate::endpoints::ClusterEndpoints;
use crate::errors::CollectionError;
use crate::value::{unflatten, ConfigDefaults, Value};

use super::CONNECTION_TIMEOUT;

/// Opens a short-lived pool to the SQL front-end. Per the concurrency
/// model, connections are capped at a 10-second max lifetime; nothing here
/// outlives a single `collect()` call.
pub async fn connect(endpoints: &ClusterEndpoints) -> Result<MySqlPool, CollectionError> {
    let addr = endpoints.tidb_addr.as_deref().ok_or_else(|| CollectionError::FrontEndUnreachable {
        addr: String::new(),
        detail: "no tidb_addr configured".to_owned(),
    })?;
    let user = if endpoints.tidb_user.is_empty() { "root" } else { &endpoints.tidb_user };
    let url = format!(
        "mysql://{user}:{password}@{addr}/mysql",
        user = user,
        password = endpoints.tidb_password,
        addr = addr,
    );
    MySqlPoolOptions::new()
        .max_connections(4)
        .max_lifetime(CONNECTION_TIMEOUT)
        .acquire_timeout(CONNECTION_TIMEOUT)
        .connect(&url)
        .await
        .map_err(|e| CollectionError::FrontEndUnreachable {
            addr: addr.to_owned(),
            detail: e.to_string(),
        })
}

/// `SELECT tidb_version()`, which returns a multi-line banner; the release
/// version lives on the `Release Version: vX.Y.Z` line.
pub async fn fetch_version(pool: &MySqlPool, addr: &str) -> Result<String, CollectionError> {
    let row = sqlx::query("SELECT tidb_version()")
        .fetch_one(pool)
        .await
        .map_err(|e| CollectionError::FrontEndUnreachable { addr: addr.to_owned(), detail: e.to_string() })?;
    let banner: String = row.try_get(0).unwrap_or_default();
    Ok(banner
        .lines()
        .find_map(|line| line.trim().strip_prefix("Release Version:"))
        .map(|v| v.trim().to_owned())
        .unwrap_or(banner))
}

/// `SHOW GLOBAL VARIABLES`, as a flat name -> value config map (session
/// variables have no nested structure, so no `unflatten` is needed).
pub async fn fetch_global_variables(pool: &MySqlPool, addr: &str) -> Result<ConfigDefaults, CollectionError> {
    let rows = sqlx::query("SHOW GLOBAL VARIABLES")
        .fetch_all(pool)
        .await
        .map_err(|e| CollectionError::FrontEndUnreachable { addr: addr.to_owned(), detail: e.to_string() })?;
    let mut out = ConfigDefaults::new();
    for row in rows {
        let name: String = row.try_get(0).unwrap_or_default();
        let value: String = row.try_get(1).unwrap_or_default();
        out.insert(name, crate::value::ParameterValue::new(Value::String(value)));
    }
    Ok(out)
}

/// One row of `SHOW CONFIG WHERE type = ? [AND instance = ?]`: TiDB's
/// configuration-introspection statement, which fans out over every
/// component type reachable through this one connection.
pub struct ConfigRow {
    pub instance: String,
    pub name: String,
    pub value: String,
}

/// Runs `SHOW CONFIG WHERE type = <component_type>`, optionally narrowed to
/// one `instance`. Used both for the front-end's own config and, with
/// `component_type = "tikv"`/`"tiflash"`, as the runtime half of row-store
/// and columnar collection.
pub async fn show_config(
    pool: &MySqlPool,
    component_type: &str,
    instance: Option<&str>,
) -> Result<Vec<ConfigRow>, CollectionError> {
    let rows = match instance {
        Some(instance) => sqlx::query("SHOW CONFIG WHERE type = ? AND instance = ?")
            .bind(component_type)
            .bind(instance)
            .fetch_all(pool)
            .await,
        None => sqlx::query("SHOW CONFIG WHERE type = ?").bind(component_type).fetch_all(pool).await,
    }
    .map_err(|e| CollectionError::ShowConfigFailed {
        role: role_name(component_type),
        instance: instance.unwrap_or("*").to_owned(),
        detail: e.to_string(),
    })?;

    Ok(rows
        .into_iter()
        .map(|row| ConfigRow {
            instance: row.try_get::<String, _>("Instance").unwrap_or_default(),
            name: row.try_get::<String, _>("Name").unwrap_or_default(),
            value: row.try_get::<String, _>("Value").unwrap_or_default(),
        })
        .collect())
}

fn role_name(component_type: &str) -> &'static str {
    match component_type {
        "tidb" => "tidb",
        "pd" => "pd",
        "tikv" => "tikv",
        "tiflash" => "tiflash",
        _ => "unknown",
    }
}

/// Groups `SHOW CONFIG` rows by `instance` and reassembles each instance's
/// dotted rows into a nested [`ConfigDefaults`].
pub fn group_by_instance(rows: Vec<ConfigRow>) -> std::collections::BTreeMap<String, ConfigDefaults> {
    let mut by_instance: std::collections::BTreeMap<String, Vec<(String, Value)>> = std::collections::BTreeMap::new();
    for row in rows {
        by_instance.entry(row.instance).or_default().push((row.name, Value::String(row.value)));
    }
    by_instance.into_iter().map(|(instance, rows)| (instance, unflatten(rows))).collect()
}
