//! End-to-end orchestrator tests against the in-memory cluster fakes from
//! `orchestrator-testkit`.
//!
//! Every test pauses tokio's clock (`start_paused = true`) so the retry and
//! backoff delays in `OrchestratorConfig` run instantly rather than in wall
//! time.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use orchestrator_core::cluster::Cluster;
use orchestrator_core::{Orchestrator, OrchestratorConfig, OrchestratorError, Workspace};
use orchestrator_testkit::{FakeClusterClient, FakeConfigProvider};

fn test_config(platforms: &[&str]) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::new(
        platforms.iter().map(|p| p.to_string()).collect::<BTreeSet<_>>(),
        serde_json::json!({"architecture": "x86_64", "git_uri": "https://example.test/repo.git"})
            .as_object()
            .unwrap()
            .clone(),
        "1.0".to_string(),
    );
    // Keep retry/backoff delays small; tokio::time::pause still makes these
    // instant, but small values keep test intent readable.
    config.find_cluster_retry_delay = Duration::from_secs(15);
    config.failure_retry_delay = Duration::from_secs(10);
    config.max_cluster_fails = 20;
    config
}

fn build_descriptor() -> serde_json::Value {
    serde_json::json!({
        "spec": {
            "strategy": {
                "customStrategy": {
                    "from": {
                        "kind": "DockerImage",
                        "name": "registry.example.test/buildroot:latest",
                    }
                }
            }
        }
    })
}

#[tokio::test(start_paused = true)]
async fn happy_path_two_platforms_both_succeed() {
    let client_x86 = Arc::new(FakeClusterClient::new("east"));
    let client_arm = Arc::new(FakeClusterClient::new("east"));

    let provider = Arc::new(
        FakeConfigProvider::new()
            .with_cluster(
                "x86_64",
                Cluster {
                    name: "east".to_string(),
                    priority: 0,
                    max_concurrent_builds: 10,
                },
                client_x86.clone(),
            )
            .with_cluster(
                "aarch64",
                Cluster {
                    name: "east".to_string(),
                    priority: 0,
                    max_concurrent_builds: 10,
                },
                client_arm.clone(),
            ),
    );

    let orchestrator = Orchestrator::new(
        test_config(&["x86_64", "aarch64"]),
        provider.clone(),
        provider.client_factory(),
        Arc::new(Workspace::new()),
    );

    let result = orchestrator
        .run(&build_descriptor(), CancellationToken::new())
        .await
        .expect("orchestrator run should not fail structurally");

    assert!(result.is_success(), "expected a successful build, got {result:?}");
    let worker_builds = &result.annotations["worker-builds"];
    assert!(worker_builds.get("x86_64").is_some());
    assert!(worker_builds.get("aarch64").is_some());
}

#[tokio::test(start_paused = true)]
async fn transient_creation_failure_rotates_to_alternate_cluster() {
    let flaky = Arc::new(FakeClusterClient::new("flaky").with_create_fails(1));
    let steady = Arc::new(FakeClusterClient::new("steady"));

    let provider = Arc::new(
        FakeConfigProvider::new()
            .with_cluster(
                "x86_64",
                Cluster {
                    name: "flaky".to_string(),
                    priority: 0,
                    max_concurrent_builds: 10,
                },
                flaky.clone(),
            )
            .with_cluster(
                "x86_64",
                Cluster {
                    name: "steady".to_string(),
                    priority: 1,
                    max_concurrent_builds: 10,
                },
                steady.clone(),
            ),
    );

    let orchestrator = Orchestrator::new(
        test_config(&["x86_64"]),
        provider.clone(),
        provider.client_factory(),
        Arc::new(Workspace::new()),
    );

    let result = orchestrator
        .run(&build_descriptor(), CancellationToken::new())
        .await
        .expect("orchestrator run should not fail structurally");

    assert!(result.is_success());
    assert!(flaky.create_call_count() >= 1, "the first candidate should have been tried");
    assert!(steady.create_call_count() >= 1, "the second candidate should have picked up the build");
}

#[tokio::test(start_paused = true)]
async fn all_clusters_dead_surfaces_as_fail_reason_not_a_structural_error() {
    // More transient failures than max_cluster_fails so the retry context
    // dies; with only one cluster configured there is nothing to rotate to.
    let dead = Arc::new(FakeClusterClient::new("only").with_create_fails(25));

    let provider = Arc::new(FakeConfigProvider::new().with_cluster(
        "x86_64",
        Cluster {
            name: "only".to_string(),
            priority: 0,
            max_concurrent_builds: 10,
        },
        dead.clone(),
    ));

    let mut config = test_config(&["x86_64"]);
    config.max_cluster_fails = 3;

    let orchestrator = Orchestrator::new(config, provider.clone(), provider.client_factory(), Arc::new(Workspace::new()));

    let result = orchestrator
        .run(&build_descriptor(), CancellationToken::new())
        .await
        .expect("per-platform exhaustion is folded into the result, not a structural error");

    assert!(!result.is_success());
    let fail_reason = result.fail_reason.expect("expected a fail reason");
    assert!(fail_reason.contains("x86_64"), "fail reason should mention the platform: {fail_reason}");
}

#[tokio::test(start_paused = true)]
async fn manifest_filter_excludes_a_platform() {
    let dir = tempfile::tempdir().unwrap();
    let container_yaml = dir.path().join("container.yaml");
    std::fs::write(&container_yaml, "platforms:\n  only:\n    - x86_64\n").unwrap();

    let client_x86 = Arc::new(FakeClusterClient::new("east"));
    let client_arm = Arc::new(FakeClusterClient::new("east"));

    let provider = Arc::new(
        FakeConfigProvider::new()
            .with_cluster(
                "x86_64",
                Cluster {
                    name: "east".to_string(),
                    priority: 0,
                    max_concurrent_builds: 10,
                },
                client_x86.clone(),
            )
            .with_cluster(
                "aarch64",
                Cluster {
                    name: "east".to_string(),
                    priority: 0,
                    max_concurrent_builds: 10,
                },
                client_arm.clone(),
            ),
    );

    let mut config = test_config(&["x86_64", "aarch64"]);
    config.container_yaml_path = Some(container_yaml);

    let orchestrator = Orchestrator::new(config, provider.clone(), provider.client_factory(), Arc::new(Workspace::new()));

    let result = orchestrator
        .run(&build_descriptor(), CancellationToken::new())
        .await
        .expect("orchestrator run should not fail structurally");

    assert!(result.is_success());
    let worker_builds = result.annotations["worker-builds"].as_object().unwrap();
    assert!(worker_builds.contains_key("x86_64"));
    assert!(
        !worker_builds.contains_key("aarch64"),
        "aarch64 should have been filtered out by container.yaml"
    );
    assert_eq!(client_arm.create_call_count(), 0, "a filtered-out platform should never reach its client");
}

#[tokio::test(start_paused = true)]
async fn cancellation_propagates_to_in_flight_builds() {
    let blocked_a = Arc::new(FakeClusterClient::new("a").that_blocks_until_cancelled());
    let blocked_b = Arc::new(FakeClusterClient::new("b").that_blocks_until_cancelled());

    let provider = Arc::new(
        FakeConfigProvider::new()
            .with_cluster(
                "x86_64",
                Cluster {
                    name: "a".to_string(),
                    priority: 0,
                    max_concurrent_builds: 10,
                },
                blocked_a.clone(),
            )
            .with_cluster(
                "aarch64",
                Cluster {
                    name: "b".to_string(),
                    priority: 0,
                    max_concurrent_builds: 10,
                },
                blocked_b.clone(),
            ),
    );

    let orchestrator = Arc::new(Orchestrator::new(
        test_config(&["x86_64", "aarch64"]),
        provider.clone(),
        provider.client_factory(),
        Arc::new(Workspace::new()),
    ));

    let cancel = CancellationToken::new();
    let run_orchestrator = Arc::clone(&orchestrator);
    let cancel_for_run = cancel.clone();
    let handle = tokio::spawn(async move { run_orchestrator.run(&build_descriptor(), cancel_for_run).await });

    // Let both per-platform tasks reach `create_worker_build` and start
    // blocking on `wait_for_build_to_finish` before cancelling.
    for _ in 0..1000 {
        if blocked_a.create_call_count() > 0 && blocked_b.create_call_count() > 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(blocked_a.create_call_count() > 0 && blocked_b.create_call_count() > 0, "both builds should have started");

    cancel.cancel();

    let result = handle.await.expect("task should not panic");
    assert!(matches!(result, Err(OrchestratorError::Cancelled)));
    assert!(blocked_a.was_cancelled(), "build on cluster a should have been cancelled in flight");
    assert!(blocked_b.was_cancelled(), "build on cluster b should have been cancelled in flight");
}

#[tokio::test(start_paused = true)]
async fn override_build_kwarg_wins_over_computed_fields() {
    let client = Arc::new(FakeClusterClient::new("east"));

    let provider = Arc::new(FakeConfigProvider::new().with_cluster(
        "x86_64",
        Cluster {
            name: "east".to_string(),
            priority: 0,
            max_concurrent_builds: 10,
        },
        client.clone(),
    ));

    let workspace = Arc::new(Workspace::new());
    workspace.override_build_kwarg("release", serde_json::json!("9.9-override"));

    let orchestrator = Orchestrator::new(
        test_config(&["x86_64"]),
        provider.clone(),
        provider.client_factory(),
        workspace,
    );

    let result = orchestrator
        .run(&build_descriptor(), CancellationToken::new())
        .await
        .expect("orchestrator run should not fail structurally");

    assert!(result.is_success());
    let kwargs = client.last_create_kwargs().await.expect("create_worker_build should have been called");
    assert_eq!(kwargs["release"], serde_json::json!("9.9-override"));
    assert!(kwargs.get("architecture").is_none(), "architecture should still be stripped before overrides apply");
}
