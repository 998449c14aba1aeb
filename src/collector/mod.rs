//! Data-requirements-driven runtime collector (C4).
//!
//! `collect()` takes the union of every enabled rule's [`DataRequirements`]
//! and issues only the queries needed to satisfy it: the SQL wire protocol
//! against the front-end, HTTP against the metadata service and columnar
//! engine, and an on-disk TOML read plus `SHOW CONFIG` for each row-store
//! peer. The four roles are fetched in turn; metadata-service peers are
//! fanned out concurrently since none depends on another, while columnar
//! and row-store peers are walked serially (checking `cancel` between
//! each) since row-store collection shares one front-end connection.

pub mod http;
pub mod sql;
pub mod tikv;

use std::time::Duration;

use futures_util::future::join_all;
use reqwest::Client;

use crate::cancel::CancellationToken;
use crate::endpoints::ClusterEndpoints;
use crate::errors::CollectionError;
use crate::rule::DataRequirements;
use crate::snapshot::{peer_key, ClusterSnapshot, CollectionWarning, ComponentState, Role};
use crate::value::ConfigDefaults;

/// Shared by every transport the collector opens: SQL connection max
/// lifetime and the HTTP client timeout.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-role transport boundary for the HTTP-fetched roles (metadata
/// service, columnar engine). Isolates the collector's merge/precedence
/// logic from the actual wire transport so it can be exercised with a
/// fake in tests instead of a live cluster.
#[async_trait::async_trait]
pub trait RoleFetcher: Send + Sync {
    async fn fetch_config(&self, addr: &str) -> Result<ConfigDefaults, String>;

    /// Best-effort version string for this peer. Defaults to unknown; only
    /// the HTTP-backed fetchers override it.
    async fn fetch_version(&self, addr: &str) -> Option<String> {
        let _ = addr;
        None
    }
}

struct PdFetcher<'a>(&'a Client);

#[async_trait::async_trait]
impl RoleFetcher for PdFetcher<'_> {
    async fn fetch_config(&self, addr: &str) -> Result<ConfigDefaults, String> {
        http::fetch_pd_config(self.0, addr).await
    }

    async fn fetch_version(&self, addr: &str) -> Option<String> {
        http::fetch_version_best_effort(self.0, addr, "/pd/api/v1/version").await
    }
}

struct TiFlashFetcher<'a>(&'a Client);

#[async_trait::async_trait]
impl RoleFetcher for TiFlashFetcher<'_> {
    async fn fetch_config(&self, addr: &str) -> Result<ConfigDefaults, String> {
        http::fetch_tiflash_config(self.0, addr).await
    }

    async fn fetch_version(&self, addr: &str) -> Option<String> {
        http::fetch_version_best_effort(self.0, addr, "/status").await
    }
}

pub struct Collector {
    http_client: Client,
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector {
    pub fn new() -> Self {
        let http_client = Client::builder()
            .timeout(CONNECTION_TIMEOUT)
            .build()
            .expect("building the collector's http client");
        Collector { http_client }
    }

    /// Collects exactly the data the union of `requirements` calls for.
    /// Fatal only when the SQL front-end is required by some rule and
    /// unreachable; every other per-role failure becomes a
    /// [`CollectionWarning`] on the returned snapshot.
    #[tracing::instrument(skip(self, endpoints, requirements, cancel))]
    pub async fn collect(
        &self,
        endpoints: &ClusterEndpoints,
        requirements: &DataRequirements,
        cancel: &CancellationToken,
    ) -> Result<ClusterSnapshot, CollectionError> {
        let mut snapshot = ClusterSnapshot::new(endpoints.source_version.clone().unwrap_or_default(), String::new());

        let front_end_required = requirements.components.contains(&Role::Tidb) && endpoints.tidb_addr.is_some();
        let front_end_pool = if endpoints.tidb_addr.is_some() {
            match sql::connect(endpoints).await {
                Ok(pool) => Some(pool),
                Err(e) => {
                    if front_end_required {
                        return Err(e);
                    }
                    tracing::warn!(error = %e, "sql front-end unreachable, proceeding without it");
                    snapshot.collection_warnings.push(CollectionWarning {
                        role: "tidb".to_owned(),
                        detail: e.to_string(),
                        fatal: false,
                    });
                    None
                }
            }
        } else {
            None
        };

        let mut detected_version = None;

        if let (Some(pool), Some(addr)) = (&front_end_pool, endpoints.tidb_addr.as_deref()) {
            if requirements.components.contains(&Role::Tidb) {
                let mut state = ComponentState {
                    component_type: "tidb".to_owned(),
                    ..Default::default()
                };
                state.status.insert("address".to_owned(), addr.to_owned());
                state.status.insert("user".to_owned(), endpoints.tidb_user.clone());

                match sql::fetch_version(pool, addr).await {
                    Ok(v) => {
                        detected_version = Some(v.clone());
                        state.version = v;
                    }
                    Err(e) => snapshot.collection_warnings.push(CollectionWarning {
                        role: "tidb".to_owned(),
                        detail: e.to_string(),
                        fatal: false,
                    }),
                }

                if requirements.need_system_variables {
                    match sql::fetch_global_variables(pool, addr).await {
                        Ok(vars) => state.variables = vars,
                        Err(e) => snapshot.collection_warnings.push(CollectionWarning {
                            role: "tidb".to_owned(),
                            detail: e.to_string(),
                            fatal: false,
                        }),
                    }
                }

                if requirements.need_config {
                    match sql::show_config(pool, "tidb", None).await {
                        Ok(rows) => {
                            let by_instance = sql::group_by_instance(rows);
                            if let Some(cfg) = by_instance.into_values().next() {
                                state.config = cfg;
                            }
                        }
                        Err(e) => snapshot.collection_warnings.push(CollectionWarning {
                            role: "tidb".to_owned(),
                            detail: e.to_string(),
                            fatal: false,
                        }),
                    }
                }

                snapshot.insert_bare_and_peer(Role::Tidb, addr, state);
            }
        }

        let mut pd_version = None;
        if requirements.components.contains(&Role::Pd) && !endpoints.pd_addrs.is_empty() {
            pd_version = self.collect_pd(endpoints, &mut snapshot, cancel).await;
        }

        let mut tiflash_version = None;
        if requirements.components.contains(&Role::Tiflash) && !endpoints.tiflash_addrs.is_empty() {
            tiflash_version = self.collect_tiflash(endpoints, &mut snapshot, cancel).await;
        }

        if requirements.components.contains(&Role::Tikv) && !endpoints.tikv_addrs.is_empty() {
            self.collect_tikv(endpoints, requirements, front_end_pool.as_ref(), &mut snapshot, cancel).await;
        }

        if endpoints.source_version.is_none() {
            // Prefer the front-end's version; fall back to the first
            // non-empty version any other role reported.
            snapshot.source_version = detected_version.or(pd_version).or(tiflash_version).unwrap_or_default();
        }

        snapshot.timestamp = Some(chrono::Utc::now());
        Ok(snapshot)
    }

    async fn collect_pd(&self, endpoints: &ClusterEndpoints, snapshot: &mut ClusterSnapshot, cancel: &CancellationToken) -> Option<String> {
        if cancel.is_cancelled() {
            return None;
        }
        let fetcher = PdFetcher(&self.http_client);
        collect_http_role(&fetcher, Role::Pd, &endpoints.pd_addrs, snapshot, BareKeyPolicy::FirstSuccess).await
    }

    async fn collect_tiflash(&self, endpoints: &ClusterEndpoints, snapshot: &mut ClusterSnapshot, cancel: &CancellationToken) -> Option<String> {
        if cancel.is_cancelled() {
            return None;
        }
        let fetcher = TiFlashFetcher(&self.http_client);
        collect_http_role(&fetcher, Role::Tiflash, &endpoints.tiflash_addrs, snapshot, BareKeyPolicy::FirstCollected).await
    }

    /// Row-store collection. Honors `need_all_tikv_nodes`: when unset, only
    /// the first peer in declared order is collected.
    async fn collect_tikv(
        &self,
        endpoints: &ClusterEndpoints,
        requirements: &DataRequirements,
        front_end_pool: Option<&sqlx::MySqlPool>,
        snapshot: &mut ClusterSnapshot,
        cancel: &CancellationToken,
    ) {
        let addrs: Vec<&String> = if requirements.need_all_tikv_nodes {
            endpoints.tikv_addrs.iter().collect()
        } else {
            endpoints.tikv_addrs.iter().take(1).collect()
        };

        for addr in addrs {
            if cancel.is_cancelled() {
                break;
            }
            let mut state = ComponentState {
                component_type: "tikv".to_owned(),
                ..Default::default()
            };
            state.status.insert("address".to_owned(), addr.clone());

            let user_set = match endpoints.tikv_data_dirs.get(addr) {
                Some(dir) => match tikv::read_user_set_config(addr, std::path::Path::new(dir)).await {
                    Ok(cfg) => Some(cfg),
                    Err(e) => {
                        snapshot.collection_warnings.push(CollectionWarning {
                            role: "tikv".to_owned(),
                            detail: e.to_string(),
                            fatal: false,
                        });
                        None
                    }
                },
                None => None,
            };

            let runtime = match front_end_pool {
                Some(pool) if requirements.need_config => match sql::show_config(pool, "tikv", Some(addr)).await {
                    Ok(rows) => {
                        let by_instance = sql::group_by_instance(rows);
                        by_instance.get(addr.as_str()).cloned().or_else(|| by_instance.into_values().next())
                    }
                    Err(e) => {
                        state.status.insert("degraded".to_owned(), "true".to_owned());
                        snapshot.collection_warnings.push(CollectionWarning {
                            role: "tikv".to_owned(),
                            detail: e.to_string(),
                            fatal: false,
                        });
                        None
                    }
                },
                _ => {
                    if requirements.need_config {
                        state.status.insert("degraded".to_owned(), "true".to_owned());
                    }
                    None
                }
            };

            state.config = tikv::merge(user_set.as_ref(), runtime.as_ref());
            snapshot.insert_bare_and_peer(Role::Tikv, addr, state);
        }
    }
}

/// When to promote a per-peer state to the role's bare key.
enum BareKeyPolicy {
    /// First peer that returns `Ok` wins (metadata service: per-peer
    /// status is always recorded, but a failed peer never displaces an
    /// already-successful aggregate).
    FirstSuccess,
    /// First peer processed wins regardless of outcome (columnar engine:
    /// there is no meaningful "aggregate" distinct from any one peer).
    FirstCollected,
}

/// Shared HTTP-role collection: fan the peer set out concurrently through
/// `fetcher`, then fold the (address, outcome) pairs into per-peer and
/// bare-key snapshot entries per `bare_key_policy`. Returns the first
/// non-empty peer version seen, for the caller's source-version detection.
async fn collect_http_role(
    fetcher: &dyn RoleFetcher,
    role: Role,
    addrs: &[String],
    snapshot: &mut ClusterSnapshot,
    bare_key_policy: BareKeyPolicy,
) -> Option<String> {
    let role_name = role.bare_key();
    let fetches = addrs.iter().map(|addr| async move {
        let cfg = fetcher.fetch_config(addr).await;
        let version = fetcher.fetch_version(addr).await;
        (addr.clone(), cfg, version)
    });
    let outcomes = join_all(fetches).await;

    let mut bare: Option<ComponentState> = None;
    let mut detected_version = None;
    for (addr, outcome, version) in outcomes {
        let mut state = ComponentState {
            component_type: role_name.to_owned(),
            ..Default::default()
        };
        state.status.insert("address".to_owned(), addr.clone());
        if let Some(v) = version {
            if detected_version.is_none() {
                detected_version = Some(v.clone());
            }
            state.version = v;
        }
        let succeeded = outcome.is_ok();
        match outcome {
            Ok(cfg) => {
                state.status.insert("status".to_owned(), "ok".to_owned());
                state.config = cfg;
            }
            Err(detail) => {
                state.status.insert("status".to_owned(), "error".to_owned());
                let wrapped = CollectionError::HttpFailed { role: role_name, addr: addr.clone(), detail };
                snapshot.collection_warnings.push(CollectionWarning {
                    role: role_name.to_owned(),
                    detail: wrapped.to_string(),
                    fatal: false,
                });
            }
        }
        let promote = match bare_key_policy {
            BareKeyPolicy::FirstSuccess => succeeded && bare.is_none(),
            BareKeyPolicy::FirstCollected => bare.is_none(),
        };
        if promote {
            bare = Some(state.clone());
        }
        snapshot.components.insert(peer_key(role, &addr), state);
    }
    if let Some(state) = bare {
        snapshot.components.entry(role_name.to_owned()).or_insert(state);
    }
    detected_version
}
