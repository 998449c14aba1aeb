//! Error taxonomy for the analysis pipeline.
//!
//! One enum per phase (KB loading, endpoint validation, collection, rule
//! evaluation), composed into a single [`AnalysisError`] for whatever
//! out-of-scope binary drives [`crate::run_analysis`]. `RuleError` never
//! escapes as an `AnalysisError` on its own -- per the rule runner it is
//! always downgraded into a [`crate::rule::CheckResult`] instead.

use std::path::PathBuf;

use thiserror::Error;

/// Errors loading or interpreting a knowledge base.
#[derive(Debug, Error)]
pub enum KbError {
    #[error("target knowledge base for version {version:?} not found at {path:?}")]
    TargetMissing { version: String, path: PathBuf },

    #[error("knowledge base file {path:?} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read knowledge base file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors validating a [`crate::endpoints::ClusterEndpoints`].
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("no cluster endpoints were supplied; at least one role address is required")]
    NoAddresses,

    #[error("tikv_data_dirs has an entry for {addr:?} which is not in tikv_addrs")]
    UnknownDataDirAddr { addr: String },
}

/// Errors collecting live cluster state for a single role or peer.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("required SQL front-end {addr:?} could not be reached: {detail}")]
    FrontEndUnreachable { addr: String, detail: String },

    #[error("HTTP request to {role} endpoint {addr:?} failed: {detail}")]
    HttpFailed {
        role: &'static str,
        addr: String,
        detail: String,
    },

    #[error("failed to read on-disk config snapshot {path:?} for tikv peer {addr:?}: {detail}")]
    ConfigSnapshotUnreadable {
        addr: String,
        path: PathBuf,
        detail: String,
    },

    #[error("SHOW CONFIG query for {role} instance {instance:?} failed: {detail}")]
    ShowConfigFailed {
        role: &'static str,
        instance: String,
        detail: String,
    },
}

/// Errors surfaced by a single rule during evaluation.
///
/// Wrapped with the originating rule's name before being downgraded into a
/// `CheckResult` by the runner -- see [`crate::rule::Runner`].
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule {rule} failed: {detail}")]
    Failed { rule: &'static str, detail: String },

    #[error("rule {rule} observed a broken knowledge base: {detail}")]
    DataConsistency { rule: &'static str, detail: String },
}

/// Top-level error type for a whole analysis run.
///
/// Reserved for failures that abort the *entire* run: a missing/corrupt
/// target KB, an endpoint configuration problem, or a collection failure
/// that a rule cannot gracefully degrade around (the SQL front-end being
/// unreachable when some rule requires it).
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Kb(#[from] KbError),

    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error("knowledge base and collected state disagree: {0}")]
    DataConsistency(String),
}
