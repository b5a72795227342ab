//! Resolves the platform set, fans `PlatformDispatcher`s out in parallel,
//! handles global cancellation, and aggregates results (spec §4.6).

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::build_descriptor::extract_build_image;
use crate::cluster::{ClusterClient, ConfigProvider};
use crate::dispatcher::{compose_worker_kwargs, PlatformDispatcher};
use crate::error::OrchestratorError;
use crate::manifest::load_platform_filter;
use crate::result::BuildResult;
use crate::worker_build::WorkerBuildInfo;
use crate::workspace::Workspace;

/// Factory for a [`ClusterClient`] given a cluster name and platform.
/// `Arc`-shareable so the same orchestrator can be driven concurrently from
/// multiple platform tasks (spec §5 "clients are configured per (cluster,
/// platform) probe and not pooled").
pub type ClientFactory = dyn Fn(&str, &str) -> Arc<dyn ClusterClient> + Send + Sync;

/// Static configuration for one orchestrator run (spec §6 "Config surface").
#[derive(Clone)]
pub struct OrchestratorConfig {
    pub platforms: BTreeSet<String>,
    /// Forwarded to workers, minus `architecture`, plus computed fields
    /// (spec §6).
    pub build_kwargs: serde_json::Map<String, serde_json::Value>,
    /// Path to an optional `container.yaml` next to the build recipe
    /// (spec §4.6 step 2). `None` is treated identically to a missing file.
    pub container_yaml_path: Option<PathBuf>,
    pub release: String,
    pub is_rebuild: bool,
    pub filesystem_koji_task_id: Option<i64>,
    pub find_cluster_retry_delay: Duration,
    pub failure_retry_delay: Duration,
    pub max_cluster_fails: u32,
}

impl OrchestratorConfig {
    /// Defaults per spec §6: 15s / 10s / 20 fails.
    pub fn new(platforms: BTreeSet<String>, build_kwargs: serde_json::Map<String, serde_json::Value>, release: String) -> Self {
        Self {
            platforms,
            build_kwargs,
            container_yaml_path: None,
            release,
            is_rebuild: false,
            filesystem_koji_task_id: None,
            find_cluster_retry_delay: Duration::from_secs(15),
            failure_retry_delay: Duration::from_secs(10),
            max_cluster_fails: 20,
        }
    }
}

/// Message sent from a spawned per-platform task back to the orchestrator
/// loop (mirrors the teacher's `LifecycleDone`).
struct PlatformDone {
    platform: String,
    result: Result<WorkerBuildInfo, OrchestratorError>,
}

/// Orchestrates one build run across all requested platforms.
pub struct Orchestrator {
    config: OrchestratorConfig,
    config_provider: Arc<dyn ConfigProvider>,
    client_factory: Arc<ClientFactory>,
    workspace: Arc<Workspace>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        config_provider: Arc<dyn ConfigProvider>,
        client_factory: Arc<ClientFactory>,
        workspace: Arc<Workspace>,
    ) -> Self {
        Self {
            config,
            config_provider,
            client_factory,
            workspace,
        }
    }

    /// Access to the run-scoped workspace, e.g. so a peer pipeline stage can
    /// call [`Workspace::override_build_kwarg`] before [`Self::run`].
    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    /// Run the orchestrator to completion (spec §4.6 steps 1-7).
    ///
    /// # Errors
    ///
    /// Only structural failures are returned as `Err`: a malformed build
    /// descriptor, an unreadable `container.yaml`, or cancellation.
    /// Per-platform failures (unknown platform, all clusters exhausted,
    /// monitor failure) are folded into the returned [`BuildResult`]'s
    /// `fail_reason` instead (spec §7).
    pub async fn run(
        &self,
        build_descriptor: &serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<BuildResult, OrchestratorError> {
        // 1. Inject build image (spec step 1). The extracted image is
        // validated here (fatal on malformed descriptor); a full client
        // implementation would thread it into config_kwargs.build_image,
        // which is an external-collaborator concern this crate does not own.
        let _build_image = extract_build_image(build_descriptor)?;

        // 2. Resolve platforms (spec step 2).
        let filter = match &self.config.container_yaml_path {
            Some(path) => load_platform_filter(path)?,
            None => crate::manifest::PlatformFilter::default(),
        };
        let platforms = filter.apply(&self.config.platforms);

        // 3. Fan out (spec step 3).
        let (tx, mut rx) = mpsc::channel::<PlatformDone>(platforms.len().max(1));

        let mut handles = Vec::with_capacity(platforms.len());
        for platform in &platforms {
            let platform = platform.clone();
            let config_provider = Arc::clone(&self.config_provider);
            let client_factory = Arc::clone(&self.client_factory);
            let workspace = Arc::clone(&self.workspace);
            let orchestrator_config = self.config.clone();
            let tx = tx.clone();
            let cancel_for_task = cancel.clone();

            handles.push(tokio::spawn(async move {
                if cancel_for_task.is_cancelled() {
                    return;
                }

                let workspace_for_cb = Arc::clone(&workspace);
                let dispatcher = PlatformDispatcher {
                    platform: platform.clone(),
                    config: config_provider,
                    client_factory,
                    find_cluster_retry_delay: orchestrator_config.find_cluster_retry_delay,
                    failure_retry_delay: orchestrator_config.failure_retry_delay,
                    max_cluster_fails: orchestrator_config.max_cluster_fails,
                    on_build_started: Arc::new(move |info| workspace_for_cb.register_in_flight(info)),
                };

                let koji_upload_dir = workspace.koji_upload_dir().to_string();
                let result = tokio::select! {
                    result = dispatcher.select_and_start_cluster(|p| {
                        compose_worker_kwargs(
                            &orchestrator_config.build_kwargs,
                            &workspace.override_kwargs(),
                            p,
                            &orchestrator_config.release,
                            &koji_upload_dir,
                            orchestrator_config.is_rebuild,
                            orchestrator_config.filesystem_koji_task_id,
                        )
                    }) => result,
                    _ = cancel_for_task.cancelled() => {
                        Ok(WorkerBuildInfo::sentinel(platform.clone(), "orchestrator cancelled"))
                    }
                };

                let _ = tx.send(PlatformDone { platform, result }).await;
            }));
        }
        drop(tx);

        // 4. Join, with cooperative cancellation (spec §5 "Cancellation").
        let mut structural_error: Option<OrchestratorError> = None;
        let mut remaining = platforms.len();

        while remaining > 0 {
            tokio::select! {
                maybe_done = rx.recv() => {
                    match maybe_done {
                        Some(done) => {
                            remaining -= 1;
                            match done.result {
                                Ok(info) => self.workspace.record_build_info(info),
                                Err(e) => {
                                    tracing::error!(platform = %done.platform, error = %e, "platform task failed structurally");
                                    if structural_error.is_none() {
                                        structural_error = Some(e);
                                        cancel.cancel();
                                        self.cancel_in_flight_builds().await;
                                    }
                                }
                            }
                        }
                        None => break,
                    }
                }
                _ = cancel.cancelled(), if structural_error.is_none() => {
                    structural_error = Some(OrchestratorError::Cancelled);
                    self.cancel_in_flight_builds().await;
                }
            }
        }

        for handle in handles {
            let _ = handle.await;
        }

        if let Some(err) = structural_error {
            return Err(err);
        }

        // 5. Aggregate (spec step 5).
        let build_result = self.aggregate().await;

        Ok(build_result)
    }

    /// Cancel every build registered via
    /// [`crate::workspace::Workspace::register_in_flight`] whose build is
    /// non-null and not yet finished, in parallel (spec §3 lifecycle, §5
    /// "Cancellation"). Called the instant cancellation is first observed,
    /// so it runs concurrently with the platform tasks winding down rather
    /// than waiting for them to quiesce first.
    async fn cancel_in_flight_builds(&self) {
        let infos = self.workspace.in_flight_infos();
        let cancels = infos.iter().map(|info| info.cancel_build());
        for result in futures::future::join_all(cancels).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "best-effort cancellation of a worker build failed");
            }
        }
    }

    async fn aggregate(&self) -> BuildResult {
        let mut worker_builds = serde_json::Map::new();
        let mut unique_repos = BTreeSet::new();
        let mut primary_repos = BTreeSet::new();
        let mut koji_build_ids = BTreeSet::new();
        let mut fail_reasons = serde_json::Map::new();

        for info in self.workspace.build_infos() {
            let platform = info.platform.clone();
            let has_build = info.build.is_some();

            if has_build {
                if let Some(annotations) = info.get_annotations().await {
                    worker_builds.insert(platform.clone(), annotations);
                }
                let (unique, primary) = info.repositories().await;
                unique_repos.extend(unique);
                primary_repos.extend(primary);
                if let Some(id) = info.koji_build_id().await {
                    koji_build_ids.insert(id);
                }
            }

            let succeeded = has_build && info.has_succeeded().await;
            if !succeeded {
                fail_reasons.insert(platform, info.get_fail_reason().await);
            }
        }

        let mut annotations = serde_json::Map::new();
        annotations.insert("worker-builds".to_string(), serde_json::Value::Object(worker_builds));
        if !unique_repos.is_empty() || !primary_repos.is_empty() {
            annotations.insert(
                "repositories".to_string(),
                serde_json::json!({
                    "unique": unique_repos.into_iter().collect::<Vec<_>>(),
                    "primary": primary_repos.into_iter().collect::<Vec<_>>(),
                }),
            );
        }

        let mut labels = serde_json::Map::new();
        if koji_build_ids.len() == 1 {
            labels.insert(
                "koji-build-id".to_string(),
                serde_json::json!(koji_build_ids.into_iter().next().unwrap()),
            );
        } else if koji_build_ids.len() > 1 {
            // Open question resolved in DESIGN.md: omit + warn on disagreement
            // rather than picking arbitrarily.
            tracing::warn!(
                ids = ?koji_build_ids,
                "worker builds reported disagreeing koji-build-ids, omitting label"
            );
        }

        let fail_reason = if fail_reasons.is_empty() {
            None
        } else {
            Some(serde_json::Value::Object(fail_reasons).to_string())
        };

        BuildResult {
            fail_reason,
            annotations: serde_json::Value::Object(annotations),
            labels: serde_json::Value::Object(labels),
        }
    }
}
