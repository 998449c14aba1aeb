//! HTTP admin fetchers for the metadata service (PD) and columnar engine
//! (TiFlash).

use reqwest::Client;
use url::Url;

use crate::value::{ConfigDefaults, ParameterValue, Value};

/// Builds an admin-endpoint URL from a bare `host:port` address, rejecting
/// addresses that don't parse as a valid authority.
fn admin_url(addr: &str, path: &str) -> Result<Url, String> {
    Url::parse(&format!("http://{}{}", addr, path)).map_err(|e| format!("invalid endpoint address {:?}: {}", addr, e))
}

/// GET `/pd/api/v1/config` against one metadata-service endpoint and decode
/// the returned JSON object's top-level keys as a [`ConfigDefaults`].
pub async fn fetch_pd_config(client: &Client, addr: &str) -> Result<ConfigDefaults, String> {
    let url = admin_url(addr, "/pd/api/v1/config")?;
    fetch_json_config(client, url).await
}

/// GET the columnar engine's admin config endpoint. Endpoint path mirrors
/// PD's shape; real deployments proxy it through the same admin port
/// convention.
pub async fn fetch_tiflash_config(client: &Client, addr: &str) -> Result<ConfigDefaults, String> {
    let url = admin_url(addr, "/config")?;
    fetch_json_config(client, url).await
}

async fn fetch_json_config(client: &Client, url: Url) -> Result<ConfigDefaults, String> {
    let response = client.get(url).send().await.map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("unexpected status {}", response.status()));
    }
    let body: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
    match body {
        serde_json::Value::Object(obj) => Ok(obj
            .into_iter()
            .map(|(k, v)| (k, ParameterValue::new(Value::from_json(v))))
            .collect()),
        other => {
            let mut out = ConfigDefaults::new();
            out.insert("value".to_owned(), ParameterValue::new(Value::from_json(other)));
            Ok(out)
        }
    }
}

/// GET a version string off an admin endpoint's `/status` (or equivalent);
/// best-effort, a failure here never fails collection of the config itself.
pub async fn fetch_version_best_effort(client: &Client, addr: &str, path: &str) -> Option<String> {
    let url = format!("http://{}{}", addr, path);
    let response = client.get(&url).send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    let body: serde_json::Value = response.json().await.ok()?;
    body.get("version").and_then(|v| v.as_str()).map(str::to_owned)
}
