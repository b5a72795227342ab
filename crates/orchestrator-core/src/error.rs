//! Error taxonomy for the orchestrator (spec §7).
//!
//! Two layers: [`ClusterError`] is raised by a single [`crate::cluster::ClusterClient`]
//! call and tells the selector/dispatcher whether the failure is transient
//! (worth a retry on the same or another cluster) or not. [`OrchestratorError`]
//! is the structural, run-level error returned from [`crate::orchestrator::Orchestrator::run`].

use thiserror::Error;

/// Error surfaced by a [`crate::cluster::ClusterClient`] call.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// A transient failure (network blip, rate limit, cluster unreachable).
    /// Counts against the cluster's [`crate::retry::ClusterRetryContext`].
    #[error("transient cluster error: {0}")]
    Transient(String),

    /// Any other failure. Per spec §4.5 step 5 and §9 Open Questions, this
    /// is preserved as a non-retryable failure rather than rotated past,
    /// but is logged loudly since it likely indicates a real bug.
    #[error("cluster error: {0}")]
    Other(String),
}

impl ClusterError {
    /// Whether this error should count against the cluster's retry budget
    /// and be tried again on an alternate cluster.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClusterError::Transient(_))
    }
}

/// Error raised while resolving the effective platform set from
/// `container.yaml` (spec §6 "container.yaml schema").
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path} as YAML: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Structural, run-level error (spec §7).
///
/// Per-platform failures (unknown platform, all clusters exhausted, monitor
/// failure) are *not* represented here -- they are recorded as a
/// [`crate::worker_build::WorkerBuildInfo`] with a fail reason and surfaced
/// through [`crate::result::BuildResult::fail_reason`] instead, per spec
/// §7 "Platform-level failures do not abort peer platforms."
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("no clusters configured for platform {0:?}")]
    UnknownPlatform(String),

    #[error("build descriptor is malformed: {0}")]
    MalformedBuildDescriptor(String),

    #[error("container.yaml is unreadable")]
    ManifestUnreadable(#[from] ManifestError),

    #[error("orchestrator run was cancelled")]
    Cancelled,
}

/// Raised internally by [`crate::selector::ClusterSelector`] /
/// [`crate::retry::wait_for_any_cluster`] when every cluster for a platform
/// has exhausted its retry budget (spec §4.2, §4.3).
#[derive(Debug, Error)]
#[error("no cluster available for platform {platform:?}: all clusters have failed")]
pub struct AllClustersFailed {
    pub platform: String,
}
