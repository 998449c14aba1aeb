//! Normalised cluster connection info (C3): where to reach each of the four
//! roles, and which row-store data directories belong to which peer.

use std::collections::HashMap;

use crate::errors::EndpointError;

/// Connection info for every role in the cluster, as handed to the
/// collector. Constructed by an out-of-scope topology reader.
#[derive(Clone, Debug, Default)]
pub struct ClusterEndpoints {
    pub tidb_addr: Option<String>,
    pub tidb_user: String,
    pub tidb_password: String,

    pub pd_addrs: Vec<String>,
    pub tikv_addrs: Vec<String>,
    pub tiflash_addrs: Vec<String>,

    /// `tikv_addr -> data_dir`. Keys must be a subset of `tikv_addrs`.
    pub tikv_data_dirs: HashMap<String, String>,

    /// Caller-declared source version, overriding whatever the collector
    /// would otherwise detect from the running cluster.
    pub source_version: Option<String>,
}

impl ClusterEndpoints {
    pub fn new() -> Self {
        ClusterEndpoints {
            tidb_user: "root".to_owned(),
            ..Default::default()
        }
    }

    /// At least one address field populated; every `tikv_data_dirs` key is
    /// one of `tikv_addrs`.
    pub fn validate(&self) -> Result<(), EndpointError> {
        let any_addr = self.tidb_addr.is_some()
            || !self.pd_addrs.is_empty()
            || !self.tikv_addrs.is_empty()
            || !self.tiflash_addrs.is_empty();
        if !any_addr {
            return Err(EndpointError::NoAddresses);
        }
        for addr in self.tikv_data_dirs.keys() {
            if !self.tikv_addrs.iter().any(|a| a == addr) {
                return Err(EndpointError::UnknownDataDirAddr { addr: addr.clone() });
            }
        }
        Ok(())
    }
}
