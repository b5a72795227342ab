//! Per-platform cluster-selection loop: iterate candidates, start a worker
//! build, rotate to the next cluster on transient failure (spec §4.5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cluster::{Cluster, ClusterClient, ClusterInfo, ConfigProvider};
use crate::error::ClusterError;
use crate::retry::ClusterRetryContext;
use crate::selector::ClusterSelector;
use crate::worker_build::WorkerBuildInfo;

/// Builds the kwargs map for one worker build (spec §4.5 step 2).
///
/// `base_kwargs` is a deep copy of the plan's `build_kwargs` (minus
/// `architecture`); `release`, `platform`, `koji_upload_dir`, `is_auto`, and
/// `filesystem_koji_task_id` are computed and set; overrides are applied on
/// top so they always win (spec §4.7).
pub fn compose_worker_kwargs(
    base_kwargs: &serde_json::Map<String, serde_json::Value>,
    overrides: &serde_json::Map<String, serde_json::Value>,
    platform: &str,
    release: &str,
    koji_upload_dir: &str,
    is_auto: bool,
    filesystem_koji_task_id: Option<i64>,
) -> serde_json::Map<String, serde_json::Value> {
    let mut kwargs = base_kwargs.clone();
    kwargs.remove("architecture");
    kwargs.insert("release".to_string(), serde_json::json!(release));
    kwargs.insert("platform".to_string(), serde_json::json!(platform));
    kwargs.insert("koji_upload_dir".to_string(), serde_json::json!(koji_upload_dir));
    kwargs.insert("is_auto".to_string(), serde_json::json!(is_auto));
    if let Some(task_id) = filesystem_koji_task_id {
        kwargs.insert("filesystem_koji_task_id".to_string(), serde_json::json!(task_id));
    }
    for (k, v) in overrides {
        kwargs.insert(k.clone(), v.clone());
    }
    kwargs
}

/// Per-platform dispatch loop: raised once by the orchestrator, produces
/// exactly one terminal [`WorkerBuildInfo`].
pub struct PlatformDispatcher {
    pub platform: String,
    pub config: Arc<dyn ConfigProvider>,
    pub client_factory: Arc<dyn Fn(&str, &str) -> Arc<dyn ClusterClient> + Send + Sync>,
    pub find_cluster_retry_delay: Duration,
    pub failure_retry_delay: Duration,
    pub max_cluster_fails: u32,
    /// Called synchronously the instant a worker build is created, before
    /// logs are streamed or completion is awaited, so the caller can
    /// register it somewhere reachable by cancellation (spec §5
    /// "Cancellation"; see [`crate::workspace::Workspace::register_in_flight`]).
    pub on_build_started: Arc<dyn Fn(WorkerBuildInfo) + Send + Sync>,
}

impl PlatformDispatcher {
    /// Run the select-and-start loop for this platform to completion,
    /// returning exactly one [`WorkerBuildInfo`] (spec §4.5).
    ///
    /// `kwargs_fn` builds the per-attempt kwargs (so the caller can read
    /// workspace overrides fresh on every attempt, per spec step 1).
    pub async fn select_and_start_cluster<F>(
        &self,
        kwargs_fn: F,
    ) -> Result<WorkerBuildInfo, crate::error::OrchestratorError>
    where
        F: Fn(&str) -> serde_json::Map<String, serde_json::Value>,
    {
        let clusters = self.config.enabled_clusters_for(&self.platform);
        if clusters.is_empty() {
            tracing::error!(platform = %self.platform, "no clusters configured for platform");
            return Err(crate::error::OrchestratorError::UnknownPlatform(self.platform.clone()));
        }

        let mut retry_contexts: HashMap<String, ClusterRetryContext> = clusters
            .iter()
            .map(|c| (c.name.clone(), ClusterRetryContext::new(self.max_cluster_fails)))
            .collect();

        let clients: HashMap<String, Arc<dyn ClusterClient>> = clusters
            .iter()
            .map(|c| (c.name.clone(), (self.client_factory)(&c.name, &self.platform)))
            .collect();

        let selector = ClusterSelector::new(self.find_cluster_retry_delay);

        loop {
            let ordered = match selector
                .get_clusters(&self.platform, &mut retry_contexts, &clusters, &clients)
                .await
            {
                Ok(ordered) => ordered,
                Err(all_failed) => {
                    tracing::warn!(platform = %self.platform, "all clusters failed for platform");
                    return Ok(WorkerBuildInfo::sentinel(
                        self.platform.clone(),
                        all_failed.to_string(),
                    ));
                }
            };

            for cluster_info in &ordered {
                tracing::info!(
                    platform = %self.platform,
                    cluster = %cluster_info.cluster.name,
                    "attempting to start build"
                );

                match self.do_worker_build(cluster_info, &kwargs_fn).await {
                    Ok(info) => return Ok(info),
                    Err(e) => {
                        tracing::warn!(
                            platform = %self.platform,
                            cluster = %cluster_info.cluster.name,
                            error = %e,
                            "transient failure creating worker build, rotating cluster"
                        );
                        retry_contexts
                            .get_mut(&cluster_info.cluster.name)
                            .expect("retry context must exist")
                            .try_again_later(self.failure_retry_delay);
                    }
                }
            }
            // None of the ordered candidates worked out; loop re-probes.
        }
    }

    /// Attempt one worker build on `cluster_info` (spec §4.5 `do_worker_build`).
    ///
    /// Returns `Ok` with the terminal [`WorkerBuildInfo`] whenever a build
    /// was appended (whether it ultimately passed or failed), and `Err` only
    /// for a *transient* failure in the `create_worker_build` call itself,
    /// so the caller knows to rotate clusters (spec step 5).
    async fn do_worker_build<F>(
        &self,
        cluster_info: &ClusterInfo,
        kwargs_fn: &F,
    ) -> Result<WorkerBuildInfo, ClusterError>
    where
        F: Fn(&str) -> serde_json::Map<String, serde_json::Value>,
    {
        let kwargs = kwargs_fn(&self.platform);

        let created = cluster_info.client.create_worker_build(&kwargs).await;

        let build = match created {
            Ok(build) => build,
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => {
                // Non-transient: preserved as swallow-and-record per spec
                // §4.5 step 5 / §9 Open Questions, but logged loudly.
                tracing::error!(
                    platform = %self.platform,
                    cluster = %cluster_info.cluster.name,
                    error = %e,
                    "non-transient error creating worker build; not retrying"
                );
                return Ok(WorkerBuildInfo::creation_failed(cluster_info));
            }
        };

        tracing::info!(
            platform = %self.platform,
            cluster = %cluster_info.cluster.name,
            build = %build.build_name,
            "created worker build"
        );

        let info = WorkerBuildInfo::started(cluster_info, build);
        (self.on_build_started)(info.clone());

        // Stream logs, then wait to finish. Any failure here is captured
        // rather than propagated (spec step 4).
        info.watch_logs().await;
        if let Err(e) = info.wait_to_finish().await {
            tracing::warn!(
                platform = %self.platform,
                error = %e,
                "failed to monitor worker build, attempting best-effort cancel"
            );
            if let Err(cancel_err) = info.cancel_build().await {
                tracing::warn!(
                    platform = %self.platform,
                    error = %cancel_err,
                    "best-effort cancel of unmonitored build also failed"
                );
            }
            return Ok(info.with_monitor_exception(e));
        }

        Ok(info)
    }
}
