//! A single attempted worker build and its outcome bookkeeping (spec §4.4).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;

use crate::cluster::{Cluster, ClusterClient, ClusterInfo, RemoteBuildHandle, RemoteBuildStatus};

/// Owns one attempted worker build on one cluster, for one platform.
///
/// Exactly one of these is retained per platform in the orchestrator's
/// result set, regardless of how many clusters were tried (spec §3
/// invariant).
pub struct WorkerBuildInfo {
    pub platform: String,
    pub cluster: Option<Cluster>,
    client: Option<Arc<dyn ClusterClient>>,
    pub build: Option<RemoteBuildHandle>,
    pub monitor_exception: Option<String>,
    /// When this attempt was recorded (build creation, or sentinel/failure).
    /// Bookkeeping only -- not part of the spec's `get_annotations` schema --
    /// used to log how long a build ran (see `wait_to_finish`).
    pub started_at: DateTime<Utc>,
}

impl Clone for WorkerBuildInfo {
    fn clone(&self) -> Self {
        Self {
            platform: self.platform.clone(),
            cluster: self.cluster.clone(),
            client: self.client.clone(),
            build: self.build.clone(),
            monitor_exception: self.monitor_exception.clone(),
            started_at: self.started_at,
        }
    }
}

impl WorkerBuildInfo {
    /// A sentinel entry recorded when no cluster could even be attempted
    /// (spec §4.5 step 3a, `AllClustersFailed`).
    pub fn sentinel(platform: impl Into<String>, monitor_exception: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            cluster: None,
            client: None,
            build: None,
            monitor_exception: Some(monitor_exception.into()),
            started_at: Utc::now(),
        }
    }

    /// Create a record for a build that was successfully started on
    /// `cluster_info`.
    pub fn started(cluster_info: &ClusterInfo, build: RemoteBuildHandle) -> Self {
        Self {
            platform: cluster_info.platform.clone(),
            cluster: Some(cluster_info.cluster.clone()),
            client: Some(Arc::clone(&cluster_info.client)),
            build: Some(build),
            monitor_exception: None,
            started_at: Utc::now(),
        }
    }

    /// Create a record for a platform where `create_worker_build` itself
    /// failed non-transiently -- `build` stays `None` (spec §4.5 step 5).
    pub fn creation_failed(cluster_info: &ClusterInfo) -> Self {
        Self {
            platform: cluster_info.platform.clone(),
            cluster: Some(cluster_info.cluster.clone()),
            client: Some(Arc::clone(&cluster_info.client)),
            build: None,
            monitor_exception: None,
            started_at: Utc::now(),
        }
    }

    /// Record a monitor-phase exception against this build (spec §4.4
    /// "monitoring exceptions are captured into `monitor_exception`").
    pub fn with_monitor_exception(mut self, exception: impl Into<String>) -> Self {
        self.monitor_exception = Some(exception.into());
        self
    }

    /// Stream build logs line-by-line, tagging each line with the platform
    /// (spec §4.4 `watch_logs`). Returns once the stream ends.
    pub async fn watch_logs(&self) {
        let (Some(client), Some(build)) = (&self.client, &self.build) else {
            return;
        };
        let mut lines = client.stream_logs(build);
        while let Some(line) = lines.next().await {
            tracing::info!(platform = %self.platform, "{line}");
        }
    }

    /// Block until the remote build reaches a terminal state (spec §4.4
    /// `wait_to_finish`).
    pub async fn wait_to_finish(&self) -> Result<RemoteBuildStatus, String> {
        let (Some(client), Some(build)) = (&self.client, &self.build) else {
            return Err("build not started".to_string());
        };
        let result = client.wait_for_build_to_finish(build).await;
        let elapsed = Utc::now().signed_duration_since(self.started_at);
        match &result {
            Ok(status) => tracing::info!(
                platform = %self.platform,
                elapsed_secs = elapsed.num_seconds(),
                status = ?status,
                "worker build finished"
            ),
            Err(e) => tracing::warn!(
                platform = %self.platform,
                elapsed_secs = elapsed.num_seconds(),
                error = %e,
                "worker build monitoring failed"
            ),
        }
        result.map_err(|e| e.to_string())
    }

    /// Request cancellation if a build exists and is not yet finished
    /// (spec §4.4 `cancel_build`). Errors are swallowed by the caller
    /// (spec §4.5 step 4, §5 "Cancellation ... best-effort").
    pub async fn cancel_build(&self) -> anyhow::Result<()> {
        let (Some(client), Some(build)) = (&self.client, &self.build) else {
            return Ok(());
        };
        if client.is_finished(build).await {
            return Ok(());
        }
        client.cancel_build(build).await.map_err(Into::into)
    }

    /// Annotations for this build (spec §4.4 `get_annotations`). `None` if
    /// no build was ever created.
    pub async fn get_annotations(&self) -> Option<serde_json::Value> {
        let (Some(client), Some(build)) = (&self.client, &self.build) else {
            return None;
        };

        match client.annotations(build).await {
            Ok(a) => {
                let mut obj = serde_json::Map::new();
                obj.insert(
                    "build".to_string(),
                    serde_json::json!({
                        "cluster-url": a.cluster_url,
                        "namespace": a.namespace,
                        "build-name": build.build_name,
                    }),
                );
                obj.insert("digests".to_string(), a.digests);
                obj.insert("plugins-metadata".to_string(), a.plugins_metadata);
                if let (Some(fragment), Some(key)) = (&a.metadata_fragment, &a.metadata_fragment_key) {
                    obj.insert("metadata_fragment".to_string(), serde_json::json!(fragment));
                    obj.insert("metadata_fragment_key".to_string(), serde_json::json!(key));
                }
                Some(serde_json::Value::Object(obj))
            }
            Err(e) => {
                tracing::warn!(platform = %self.platform, error = %e, "failed to read build annotations");
                None
            }
        }
    }

    /// Repositories reported by the finished build, if any (spec §4.6
    /// step 5 `annotations.repositories`).
    pub async fn repositories(&self) -> (Vec<String>, Vec<String>) {
        let (Some(client), Some(build)) = (&self.client, &self.build) else {
            return (Vec::new(), Vec::new());
        };
        match client.annotations(build).await {
            Ok(a) => (a.repositories_unique, a.repositories_primary),
            Err(_) => (Vec::new(), Vec::new()),
        }
    }

    /// koji-build-id reported by this build, if any.
    pub async fn koji_build_id(&self) -> Option<String> {
        let (Some(client), Some(build)) = (&self.client, &self.build) else {
            return None;
        };
        client.annotations(build).await.ok().and_then(|a| a.koji_build_id)
    }

    /// Whether the remote build succeeded. `false` if no build was ever
    /// created or the status can't be determined.
    pub async fn has_succeeded(&self) -> bool {
        let (Some(client), Some(build)) = (&self.client, &self.build) else {
            return false;
        };
        matches!(
            client.wait_for_build_to_finish(build).await,
            Ok(status) if status.is_succeeded()
        )
    }

    /// Combined failure reason (spec §4.4 `get_fail_reason`):
    /// - `general`: the monitor exception repr, or "build not started".
    /// - spread of `plugins-metadata.errors` if present.
    /// - otherwise a best-effort `pod: <reason>`, silently omitted on
    ///   failure.
    pub async fn get_fail_reason(&self) -> serde_json::Value {
        let mut reason = serde_json::Map::new();

        if let Some(ex) = &self.monitor_exception {
            reason.insert("general".to_string(), serde_json::json!(ex));
        } else if self.build.is_none() {
            reason.insert("general".to_string(), serde_json::json!("build not started"));
        }

        let (Some(client), Some(build)) = (&self.client, &self.build) else {
            return serde_json::Value::Object(reason);
        };

        let metadata_errors = client
            .annotations(build)
            .await
            .ok()
            .and_then(|a| a.plugins_metadata.get("errors").cloned());

        match metadata_errors {
            Some(serde_json::Value::Object(errors)) => {
                for (k, v) in errors {
                    reason.insert(k, v);
                }
            }
            _ => {
                if let Some(pod_reason) = client.pod_failure_reason(build).await {
                    reason.insert("pod".to_string(), serde_json::json!(pod_reason));
                }
            }
        }

        serde_json::Value::Object(reason)
    }
}

impl std::fmt::Debug for WorkerBuildInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerBuildInfo")
            .field("platform", &self.platform)
            .field("cluster", &self.cluster)
            .field("build", &self.build)
            .field("monitor_exception", &self.monitor_exception)
            .finish_non_exhaustive()
    }
}
