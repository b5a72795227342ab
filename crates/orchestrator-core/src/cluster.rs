//! Cluster data model and the two external-collaborator traits the
//! orchestrator depends on: [`ConfigProvider`] and [`ClusterClient`]
//! (spec §1 "Out of scope: external collaborators", §4.8 in SPEC_FULL.md).

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::ClusterError;

/// A worker cluster as reported by the configuration provider (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub name: String,
    /// Lower is preferred. Primary sort key for [`crate::selector::ClusterSelector`].
    pub priority: u32,
    pub max_concurrent_builds: u32,
}

/// Read-only source of the clusters enabled for a platform (spec §1).
///
/// Implementations are expected to be cheap to call repeatedly; the
/// orchestrator does not cache the result across dispatch attempts.
pub trait ConfigProvider: Send + Sync {
    /// Enabled clusters for `platform`, in any order -- the selector does
    /// its own ordering (spec §4.3).
    fn enabled_clusters_for(&self, platform: &str) -> Vec<Cluster>;
}

/// Opaque per-attempt handle to a remote worker build.
///
/// The orchestrator never interprets this beyond passing it back into the
/// [`ClusterClient`] that created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBuildHandle {
    pub build_name: String,
}

/// Terminal state of a remote build, as reported by
/// [`ClusterClient::wait_for_build_to_finish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteBuildStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl RemoteBuildStatus {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, RemoteBuildStatus::Succeeded)
    }
}

/// Annotations reported by a finished (or running) remote build, as read
/// off the cluster (spec §4.4 `get_annotations`).
#[derive(Debug, Clone)]
pub struct RemoteBuildAnnotations {
    pub cluster_url: String,
    pub namespace: String,
    /// JSON value of the `digests` annotation, default `[]`.
    pub digests: serde_json::Value,
    /// JSON value of the `plugins-metadata` annotation, default `{}`.
    pub plugins_metadata: serde_json::Value,
    pub metadata_fragment: Option<String>,
    pub metadata_fragment_key: Option<String>,
    pub repositories_unique: Vec<String>,
    pub repositories_primary: Vec<String>,
    pub koji_build_id: Option<String>,
}

impl Default for RemoteBuildAnnotations {
    /// Matches spec §4.4: `digests` defaults to `[]`, `plugins-metadata` to
    /// `{}` when the remote build has no such annotation.
    fn default() -> Self {
        Self {
            cluster_url: String::new(),
            namespace: String::new(),
            digests: serde_json::json!([]),
            plugins_metadata: serde_json::json!({}),
            metadata_fragment: None,
            metadata_fragment_key: None,
            repositories_unique: Vec::new(),
            repositories_primary: Vec::new(),
            koji_build_id: None,
        }
    }
}

/// Adapter interface for a remote worker-build cluster.
///
/// Each concrete client (OpenShift/osbs, or a test double) implements this
/// trait. It is intentionally object-safe so it can be stored as
/// `Arc<dyn ClusterClient>` in [`crate::cluster::ClusterInfo`] -- mirroring
/// the teacher's `Harness` trait.
///
/// # Object Safety
///
/// Every method returns a concrete type or a boxed trait object, so
/// `dyn ClusterClient` is usable directly.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Name of the cluster this client talks to (for logging).
    fn cluster_name(&self) -> &str;

    /// Count of currently active (non-terminal) builds on this cluster,
    /// used to compute load (spec §3, §4.3 step "Probing calls the cluster
    /// client to count active builds").
    async fn active_builds(&self) -> Result<u32, ClusterError>;

    /// Start a worker build with the given kwargs (spec §4.5 step 3).
    async fn create_worker_build(
        &self,
        kwargs: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<RemoteBuildHandle, ClusterError>;

    /// Stream build log lines until the build reaches a terminal state
    /// (spec §4.4 `watch_logs`).
    fn stream_logs(&self, build: &RemoteBuildHandle) -> Pin<Box<dyn Stream<Item = String> + Send>>;

    /// Block until the build reaches a terminal state (spec §4.4 `wait_to_finish`).
    async fn wait_for_build_to_finish(
        &self,
        build: &RemoteBuildHandle,
    ) -> Result<RemoteBuildStatus, ClusterError>;

    /// Whether the build has already reached a terminal state, without
    /// blocking (used by cancellation to avoid cancelling a finished build).
    async fn is_finished(&self, build: &RemoteBuildHandle) -> bool;

    /// Request cancellation of a running build (spec §4.4 `cancel_build`).
    async fn cancel_build(&self, build: &RemoteBuildHandle) -> Result<(), ClusterError>;

    /// Read back the build's annotations (spec §4.4 `get_annotations`).
    async fn annotations(&self, build: &RemoteBuildHandle) -> Result<RemoteBuildAnnotations, ClusterError>;

    /// Best-effort pod failure reason lookup. Per spec §4.4, any failure
    /// here (including capability absence) is silently omitted by the
    /// caller, so this returns `None` rather than an error.
    async fn pod_failure_reason(&self, build: &RemoteBuildHandle) -> Option<String>;
}

/// A probed, ready-to-use cluster for one platform (spec §3 `ClusterInfo`).
///
/// Discarded at the end of each retry round -- a fresh probe is taken every
/// time [`crate::selector::ClusterSelector::get_clusters`] runs.
#[derive(Clone)]
pub struct ClusterInfo {
    pub cluster: Cluster,
    pub platform: String,
    pub client: std::sync::Arc<dyn ClusterClient>,
    /// `active_builds / max_concurrent_builds`. Sole tie-breaker among
    /// equal-priority clusters (spec §3 invariant).
    pub load: f64,
}

impl std::fmt::Debug for ClusterInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterInfo")
            .field("cluster", &self.cluster)
            .field("platform", &self.platform)
            .field("load", &self.load)
            .finish_non_exhaustive()
    }
}

// Compile-time assertion: ClusterClient must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn ClusterClient) {}
};
