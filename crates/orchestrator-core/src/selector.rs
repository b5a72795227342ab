//! Cluster selection: probe candidates, skip dead/waiting ones, return an
//! ordered shortlist (spec §4.3).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cluster::{Cluster, ClusterClient, ClusterInfo};
use crate::error::AllClustersFailed;
use crate::retry::{wait_for_any_cluster, ClusterRetryContext};

/// Stateless selector: enumerates candidates, probes their load, and
/// returns them sorted by (priority asc, load asc).
pub struct ClusterSelector {
    pub find_cluster_retry_delay: Duration,
}

impl ClusterSelector {
    pub fn new(find_cluster_retry_delay: Duration) -> Self {
        Self {
            find_cluster_retry_delay,
        }
    }

    /// Return clusters for `platform` that are currently reachable, ordered
    /// by ascending priority then ascending load (spec §4.3 algorithm).
    ///
    /// `clients` supplies a [`ClusterClient`] for each cluster by name --
    /// the caller is responsible for constructing one client per (cluster,
    /// platform) pair (spec §5 "clients are configured per (cluster,
    /// platform) probe and not pooled").
    ///
    /// # Errors
    ///
    /// [`AllClustersFailed`] if every cluster's retry context is dead and no
    /// probe attempt is possible.
    pub async fn get_clusters(
        &self,
        platform: &str,
        retry_contexts: &mut HashMap<String, ClusterRetryContext>,
        all_clusters: &[Cluster],
        clients: &HashMap<String, Arc<dyn ClusterClient>>,
    ) -> Result<Vec<ClusterInfo>, AllClustersFailed> {
        let mut candidates: Vec<Cluster> = all_clusters.to_vec();
        let mut probed: HashMap<String, ClusterInfo> = HashMap::new();

        while !candidates.is_empty() && probed.is_empty() {
            wait_for_any_cluster(retry_contexts, platform).await?;

            let mut ordered = candidates.clone();
            ordered.sort_by_key(|c| c.priority);

            for cluster in &ordered {
                let ctx = retry_contexts
                    .get(&cluster.name)
                    .expect("retry context must exist for every candidate cluster");
                if ctx.is_failed() || ctx.in_retry_wait(tokio::time::Instant::now()) {
                    continue;
                }

                let Some(client) = clients.get(&cluster.name) else {
                    tracing::warn!(
                        platform = %platform,
                        cluster = %cluster.name,
                        "no client configured for cluster, skipping"
                    );
                    continue;
                };

                match client.active_builds().await {
                    Ok(active) => {
                        let load = f64::from(active) / f64::from(cluster.max_concurrent_builds.max(1));
                        tracing::debug!(
                            platform = %platform,
                            cluster = %cluster.name,
                            load = load,
                            active_builds = active,
                            max_concurrent_builds = cluster.max_concurrent_builds,
                            "probed cluster"
                        );
                        probed.insert(
                            cluster.name.clone(),
                            ClusterInfo {
                                cluster: cluster.clone(),
                                platform: platform.to_string(),
                                client: Arc::clone(client),
                                load,
                            },
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            platform = %platform,
                            cluster = %cluster.name,
                            error = %e,
                            "failed to probe cluster, entering retry-wait"
                        );
                        retry_contexts
                            .get_mut(&cluster.name)
                            .expect("retry context must exist")
                            .try_again_later(self.find_cluster_retry_delay);
                    }
                }
            }

            candidates.retain(|c| {
                !retry_contexts
                    .get(&c.name)
                    .expect("retry context must exist")
                    .is_failed()
            });
        }

        // Sort by load first, then a stable sort by priority so priority
        // remains the primary key (spec §4.3 step 3, §3 "Ordering").
        let mut result: Vec<ClusterInfo> = probed.into_values().collect();
        result.sort_by(|a, b| a.load.partial_cmp(&b.load).unwrap_or(std::cmp::Ordering::Equal));
        result.sort_by_key(|c| c.cluster.priority);

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{RemoteBuildAnnotations, RemoteBuildHandle, RemoteBuildStatus};
    use crate::error::ClusterError;
    use async_trait::async_trait;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    struct FixedLoadClient {
        name: String,
        active: u32,
        fail_probes: bool,
        probe_count: AtomicU32,
    }

    #[async_trait]
    impl ClusterClient for FixedLoadClient {
        fn cluster_name(&self) -> &str {
            &self.name
        }

        async fn active_builds(&self) -> Result<u32, ClusterError> {
            self.probe_count.fetch_add(1, AtomicOrdering::SeqCst);
            if self.fail_probes {
                Err(ClusterError::Transient("unreachable".to_string()))
            } else {
                Ok(self.active)
            }
        }

        async fn create_worker_build(
            &self,
            _kwargs: &serde_json::Map<String, serde_json::Value>,
        ) -> Result<RemoteBuildHandle, ClusterError> {
            unimplemented!("not exercised by selector tests")
        }

        fn stream_logs(&self, _build: &RemoteBuildHandle) -> Pin<Box<dyn futures::Stream<Item = String> + Send>> {
            Box::pin(futures::stream::empty())
        }

        async fn wait_for_build_to_finish(
            &self,
            _build: &RemoteBuildHandle,
        ) -> Result<RemoteBuildStatus, ClusterError> {
            unimplemented!()
        }

        async fn is_finished(&self, _build: &RemoteBuildHandle) -> bool {
            true
        }

        async fn cancel_build(&self, _build: &RemoteBuildHandle) -> Result<(), ClusterError> {
            Ok(())
        }

        async fn annotations(
            &self,
            _build: &RemoteBuildHandle,
        ) -> Result<RemoteBuildAnnotations, ClusterError> {
            Ok(RemoteBuildAnnotations::default())
        }

        async fn pod_failure_reason(&self, _build: &RemoteBuildHandle) -> Option<String> {
            None
        }
    }

    fn cluster(name: &str, priority: u32, max: u32) -> Cluster {
        Cluster {
            name: name.to_string(),
            priority,
            max_concurrent_builds: max,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn orders_by_priority_then_load() {
        let clusters = vec![cluster("b", 1, 10), cluster("a", 1, 10), cluster("c", 0, 10)];
        let mut contexts: HashMap<String, ClusterRetryContext> = clusters
            .iter()
            .map(|c| (c.name.clone(), ClusterRetryContext::new(20)))
            .collect();

        let clients: HashMap<String, Arc<dyn ClusterClient>> = [
            (
                "a".to_string(),
                Arc::new(FixedLoadClient {
                    name: "a".to_string(),
                    active: 5,
                    fail_probes: false,
                    probe_count: AtomicU32::new(0),
                }) as Arc<dyn ClusterClient>,
            ),
            (
                "b".to_string(),
                Arc::new(FixedLoadClient {
                    name: "b".to_string(),
                    active: 2,
                    fail_probes: false,
                    probe_count: AtomicU32::new(0),
                }) as Arc<dyn ClusterClient>,
            ),
            (
                "c".to_string(),
                Arc::new(FixedLoadClient {
                    name: "c".to_string(),
                    active: 9,
                    fail_probes: false,
                    probe_count: AtomicU32::new(0),
                }) as Arc<dyn ClusterClient>,
            ),
        ]
        .into_iter()
        .collect();

        let selector = ClusterSelector::new(Duration::from_secs(15));
        let result = selector
            .get_clusters("x86_64", &mut contexts, &clusters, &clients)
            .await
            .unwrap();

        let names: Vec<&str> = result.iter().map(|ci| ci.cluster.name.as_str()).collect();
        // priority 0 ("c") always first; among priority-1 ties, lower load ("b") first.
        assert_eq!(names, vec!["c", "b", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failure_enters_retry_wait_and_is_skipped_next_round() {
        let clusters = vec![cluster("flaky", 0, 10), cluster("steady", 1, 10)];
        let mut contexts: HashMap<String, ClusterRetryContext> = clusters
            .iter()
            .map(|c| (c.name.clone(), ClusterRetryContext::new(20)))
            .collect();

        let clients: HashMap<String, Arc<dyn ClusterClient>> = [
            (
                "flaky".to_string(),
                Arc::new(FixedLoadClient {
                    name: "flaky".to_string(),
                    active: 0,
                    fail_probes: true,
                    probe_count: AtomicU32::new(0),
                }) as Arc<dyn ClusterClient>,
            ),
            (
                "steady".to_string(),
                Arc::new(FixedLoadClient {
                    name: "steady".to_string(),
                    active: 1,
                    fail_probes: false,
                    probe_count: AtomicU32::new(0),
                }) as Arc<dyn ClusterClient>,
            ),
        ]
        .into_iter()
        .collect();

        let selector = ClusterSelector::new(Duration::from_secs(15));
        let result = selector
            .get_clusters("x86_64", &mut contexts, &clusters, &clients)
            .await
            .unwrap();

        // "flaky" failed its probe and was skipped; only "steady" is returned.
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].cluster.name, "steady");
        assert_eq!(contexts["flaky"].fails(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn all_clusters_dead_returns_all_clusters_failed() {
        let clusters = vec![cluster("a", 0, 10)];
        let mut contexts: HashMap<String, ClusterRetryContext> = HashMap::new();
        let mut dead = ClusterRetryContext::new(1);
        dead.try_again_later(Duration::from_secs(1));
        contexts.insert("a".to_string(), dead);

        let clients: HashMap<String, Arc<dyn ClusterClient>> = HashMap::new();

        let selector = ClusterSelector::new(Duration::from_secs(15));
        let err = selector
            .get_clusters("x86_64", &mut contexts, &clusters, &clients)
            .await
            .unwrap_err();
        assert_eq!(err.platform, "x86_64");
    }
}
