//! Shared constant parameter-name sets used by the modification/difference
//! rules.

/// Top-level names skipped by [`crate::rules::user_modified`] before any
/// value comparison happens.
pub const TOP_LEVEL_IGNORE: &[&str] = &[
    "data-dir",
    "log-dir",
    "deploy-dir",
    "version_compile_machine",
    "version_compile_os",
];

/// Extended deployment-specific set, additionally skipped by
/// [`crate::rules::upgrade_differences`].
pub const EXTENDED_IGNORE: &[&str] = &[
    "data-dir",
    "log-dir",
    "deploy-dir",
    "version_compile_machine",
    "version_compile_os",
    "host",
    "path",
    "socket",
    "temp-dir",
    "tmp-storage-path",
    "log.file.filename",
    "log.slow-query-file",
    "log.file.max-size",
    "log.file.max-days",
    "log.file.max-backups",
    "log-file",
    "tmp_path",
    "storage.main.dir",
    "storage.latest.dir",
    "storage.raft.dir",
    "deprecate-integer-display-length",
];

/// Parameters compared by basename instead of full value equality.
pub const FILENAME_ONLY: &[&str] = &["log.file.filename", "log.slow-query-file", "log-file"];

/// Parameters the target auto-sizes from machine CPU/RAM at boot; a
/// difference here when shipped defaults agree is hardware noise, not an
/// operator edit.
pub const RESOURCE_DERIVED: &[&str] = &[
    "server.grpc-concurrency",
    "raftstore.apply-pool-size",
    "raftstore.store-pool-size",
    "readpool.unified.max-thread-count",
    "readpool.storage.high-concurrency",
    "readpool.storage.normal-concurrency",
    "readpool.storage.low-concurrency",
    "readpool.coprocessor.high-concurrency",
    "readpool.coprocessor.normal-concurrency",
    "readpool.coprocessor.low-concurrency",
    "storage.block-cache.capacity",
    "storage.scheduler-worker-pool-size",
];

/// Row-store parameters whose divergence across peers is escalated to
/// error/high in [`crate::rules::tikv_consistency`].
pub const TIKV_CRITICAL_PARAMS: &[&str] = &[
    "storage.reserve-space",
    "raftstore.raft-entry-max-size",
    "rocksdb.defaultcf.block-cache-size",
];

pub fn is_resource_derived(name: &str) -> bool {
    RESOURCE_DERIVED.contains(&name)
}

pub fn is_filename_only(name: &str) -> bool {
    FILENAME_ONLY.contains(&name)
}

pub fn is_tikv_critical(name: &str) -> bool {
    TIKV_CRITICAL_PARAMS.contains(&name)
}
