//! In-memory test doubles for [`orchestrator_core::cluster::ClusterClient`]
//! and [`orchestrator_core::cluster::ConfigProvider`].
//!
//! The real collaborators (an OpenShift/osbs cluster, the pipeline's config
//! store) are out of scope for this crate (spec §1); this testkit is the
//! in-memory stand-in used by `orchestrator-core`'s own integration tests and
//! by the `orchestrator-cli` demo binary, the way the teacher ships
//! `gator-test-utils` for its own external dependency (Postgres) -- except
//! here there is no real service to spin up, so the double is a plain struct
//! behind a mutex rather than a container.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::Notify;

use orchestrator_core::cluster::{
    Cluster, ClusterClient, ConfigProvider, RemoteBuildAnnotations, RemoteBuildHandle, RemoteBuildStatus,
};
use orchestrator_core::orchestrator::ClientFactory;
use orchestrator_core::ClusterError;

/// Mutable behavior knobs for one [`FakeClusterClient`], configured once at
/// construction and then driven by the fake's own method calls.
///
/// Guarded by a plain `std::sync::Mutex` rather than `tokio::sync::Mutex`:
/// every access here is a short synchronous read/write with no `.await`
/// held across the critical section, and the `with_*` builders and
/// `stream_logs` need to lock from non-async code.
struct Behavior {
    active_builds: u32,
    probe_fails_remaining: u32,
    create_fails_remaining: u32,
    create_fails_forever: bool,
    finish_status: RemoteBuildStatus,
    log_lines: Vec<String>,
    annotations: RemoteBuildAnnotations,
    pod_failure_reason: Option<String>,
    /// When set, `wait_for_build_to_finish` blocks until `cancel_build` is
    /// called, so tests can exercise cancel-mid-build (spec §8 scenario 5).
    blocks_until_cancelled: bool,
    last_create_kwargs: Option<serde_json::Map<String, serde_json::Value>>,
}

/// An in-memory stand-in for a single (cluster, platform) remote client.
///
/// Construct with [`FakeClusterClient::new`] and chain the `with_*` builders
/// to script its behavior, then wrap in `Arc::new(..) as Arc<dyn
/// ClusterClient>` for use with [`FakeConfigProvider`].
pub struct FakeClusterClient {
    name: String,
    behavior: Mutex<Behavior>,
    cancelled: AtomicBool,
    finished: AtomicBool,
    notify: Notify,
    probe_calls: AtomicU32,
    create_calls: AtomicU32,
}

impl FakeClusterClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behavior: Mutex::new(Behavior {
                active_builds: 0,
                probe_fails_remaining: 0,
                create_fails_remaining: 0,
                create_fails_forever: false,
                finish_status: RemoteBuildStatus::Succeeded,
                log_lines: Vec::new(),
                annotations: RemoteBuildAnnotations::default(),
                pod_failure_reason: None,
                blocks_until_cancelled: false,
                last_create_kwargs: None,
            }),
            cancelled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            notify: Notify::new(),
            probe_calls: AtomicU32::new(0),
            create_calls: AtomicU32::new(0),
        }
    }

    pub fn with_active_builds(self, n: u32) -> Self {
        self.behavior.lock().unwrap().active_builds = n;
        self
    }

    /// `active_builds()` (the selector's probe call) returns a transient
    /// error this many times before succeeding.
    pub fn with_probe_fails(self, n: u32) -> Self {
        self.behavior.lock().unwrap().probe_fails_remaining = n;
        self
    }

    /// `create_worker_build()` returns a transient error this many times
    /// before succeeding.
    pub fn with_create_fails(self, n: u32) -> Self {
        self.behavior.lock().unwrap().create_fails_remaining = n;
        self
    }

    /// `create_worker_build()` always fails with a non-transient error.
    pub fn with_create_fails_forever(self) -> Self {
        self.behavior.lock().unwrap().create_fails_forever = true;
        self
    }

    pub fn with_finish_status(self, status: RemoteBuildStatus) -> Self {
        self.behavior.lock().unwrap().finish_status = status;
        self
    }

    pub fn with_log_lines(self, lines: Vec<String>) -> Self {
        self.behavior.lock().unwrap().log_lines = lines;
        self
    }

    pub fn with_annotations(self, annotations: RemoteBuildAnnotations) -> Self {
        self.behavior.lock().unwrap().annotations = annotations;
        self
    }

    pub fn with_pod_failure_reason(self, reason: impl Into<String>) -> Self {
        self.behavior.lock().unwrap().pod_failure_reason = Some(reason.into());
        self
    }

    /// `wait_for_build_to_finish` blocks until `cancel_build` is called,
    /// then reports `Cancelled`.
    pub fn that_blocks_until_cancelled(self) -> Self {
        self.behavior.lock().unwrap().blocks_until_cancelled = true;
        self
    }

    pub fn probe_call_count(&self) -> u32 {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn create_call_count(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The kwargs passed to the most recent `create_worker_build` call, for
    /// asserting that overrides and computed fields reached the client
    /// (spec §8 scenario 6).
    pub async fn last_create_kwargs(&self) -> Option<serde_json::Map<String, serde_json::Value>> {
        self.behavior.lock().unwrap().last_create_kwargs.clone()
    }
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    fn cluster_name(&self) -> &str {
        &self.name
    }

    async fn active_builds(&self) -> Result<u32, ClusterError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        let mut behavior = self.behavior.lock().unwrap();
        if behavior.probe_fails_remaining > 0 {
            behavior.probe_fails_remaining -= 1;
            return Err(ClusterError::Transient(format!("{} unreachable", self.name)));
        }
        Ok(behavior.active_builds)
    }

    async fn create_worker_build(
        &self,
        kwargs: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<RemoteBuildHandle, ClusterError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut behavior = self.behavior.lock().unwrap();
        behavior.last_create_kwargs = Some(kwargs.clone());
        if behavior.create_fails_forever {
            return Err(ClusterError::Other(format!("{} rejected the build request", self.name)));
        }
        if behavior.create_fails_remaining > 0 {
            behavior.create_fails_remaining -= 1;
            return Err(ClusterError::Transient(format!("{} busy", self.name)));
        }
        Ok(RemoteBuildHandle {
            build_name: format!("{}-build", self.name),
        })
    }

    fn stream_logs(&self, _build: &RemoteBuildHandle) -> Pin<Box<dyn Stream<Item = String> + Send>> {
        let lines = self.behavior.lock().unwrap().log_lines.clone();
        Box::pin(futures::stream::iter(lines))
    }

    async fn wait_for_build_to_finish(
        &self,
        _build: &RemoteBuildHandle,
    ) -> Result<RemoteBuildStatus, ClusterError> {
        let blocks = self.behavior.lock().unwrap().blocks_until_cancelled;
        if blocks {
            while !self.cancelled.load(Ordering::SeqCst) {
                self.notify.notified().await;
            }
            self.finished.store(true, Ordering::SeqCst);
            return Ok(RemoteBuildStatus::Cancelled);
        }

        self.finished.store(true, Ordering::SeqCst);
        Ok(self.behavior.lock().unwrap().finish_status.clone())
    }

    async fn is_finished(&self, _build: &RemoteBuildHandle) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    async fn cancel_build(&self, _build: &RemoteBuildHandle) -> Result<(), ClusterError> {
        self.cancelled.store(true, Ordering::SeqCst);
        self.finished.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn annotations(&self, _build: &RemoteBuildHandle) -> Result<RemoteBuildAnnotations, ClusterError> {
        Ok(self.behavior.lock().unwrap().annotations.clone())
    }

    async fn pod_failure_reason(&self, _build: &RemoteBuildHandle) -> Option<String> {
        self.behavior.lock().unwrap().pod_failure_reason.clone()
    }
}

/// In-memory [`ConfigProvider`]: a fixed map of platform to the clusters
/// enabled for it, registered alongside the [`FakeClusterClient`] that
/// should answer for each (platform, cluster) pair.
pub struct FakeConfigProvider {
    clusters_by_platform: HashMap<String, Vec<Cluster>>,
    clients: HashMap<(String, String), Arc<dyn ClusterClient>>,
}

impl FakeConfigProvider {
    pub fn new() -> Self {
        Self {
            clusters_by_platform: HashMap::new(),
            clients: HashMap::new(),
        }
    }

    /// Register one cluster for `platform`, backed by `client`.
    pub fn with_cluster(mut self, platform: impl Into<String>, cluster: Cluster, client: Arc<dyn ClusterClient>) -> Self {
        let platform = platform.into();
        self.clients.insert((platform.clone(), cluster.name.clone()), client);
        self.clusters_by_platform.entry(platform).or_default().push(cluster);
        self
    }

    /// Build the [`ClientFactory`] the orchestrator needs to resolve a
    /// client for a (cluster, platform) pair at dispatch time.
    pub fn client_factory(self: &Arc<Self>) -> Arc<ClientFactory> {
        let this = Arc::clone(self);
        Arc::new(move |cluster_name: &str, platform: &str| {
            this.clients
                .get(&(platform.to_string(), cluster_name.to_string()))
                .cloned()
                .unwrap_or_else(|| panic!("no fake client registered for cluster {cluster_name:?} on platform {platform:?}"))
        })
    }
}

impl Default for FakeConfigProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigProvider for FakeConfigProvider {
    fn enabled_clusters_for(&self, platform: &str) -> Vec<Cluster> {
        self.clusters_by_platform.get(platform).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_client_succeeds_by_default() {
        let client = FakeClusterClient::new("c1");
        let build = client.create_worker_build(&serde_json::Map::new()).await.unwrap();
        let status = client.wait_for_build_to_finish(&build).await.unwrap();
        assert!(status.is_succeeded());
    }

    #[tokio::test]
    async fn fake_client_exhausts_scripted_probe_failures() {
        let client = FakeClusterClient::new("c1").with_probe_fails(2);
        assert!(client.active_builds().await.is_err());
        assert!(client.active_builds().await.is_err());
        assert!(client.active_builds().await.is_ok());
        assert_eq!(client.probe_call_count(), 3);
    }

    #[tokio::test]
    async fn config_provider_resolves_registered_clients() {
        let provider = Arc::new(FakeConfigProvider::new().with_cluster(
            "x86_64",
            Cluster {
                name: "a".to_string(),
                priority: 0,
                max_concurrent_builds: 10,
            },
            Arc::new(FakeClusterClient::new("a")),
        ));
        let factory = provider.client_factory();
        let client = factory("a", "x86_64");
        assert_eq!(client.cluster_name(), "a");
    }
}
