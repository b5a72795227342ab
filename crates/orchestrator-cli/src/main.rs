mod config;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use orchestrator_core::build_descriptor::read_build_descriptor_from_env;
use orchestrator_core::cluster::Cluster;
use orchestrator_core::{ClusterClient, Orchestrator, OrchestratorConfig, Workspace};
use orchestrator_testkit::{FakeClusterClient, FakeConfigProvider};

use config::ResolvedConfig;

/// Manual smoke-test harness for `orchestrator-core`: wires a
/// [`FakeConfigProvider`] (in-memory clusters, no real OpenShift/osbs
/// collaborator) to a real [`Orchestrator`] and runs one build to
/// completion. Not the production CLI surface a cluster-backed deployment
/// would have -- see `orchestrator-core` for the library itself.
#[derive(Parser)]
#[command(name = "orchestrator", about = "Multi-platform build orchestrator (demo CLI)")]
struct Cli {
    /// Platforms to build, comma-separated (defaults to every platform with
    /// a configured cluster).
    #[arg(long, value_delimiter = ',')]
    platforms: Option<Vec<String>>,

    /// Build descriptor JSON file (defaults to reading the `BUILD` env var,
    /// spec §6 "Build descriptor").
    #[arg(long)]
    build_descriptor: Option<PathBuf>,

    /// Release string stamped onto every worker build (overrides
    /// `ORCHESTRATOR_RELEASE` env var and the config file).
    #[arg(long)]
    release: Option<String>,

    /// Path to a `container.yaml` manifest restricting the platform set
    /// (spec §4.6 step 2).
    #[arg(long)]
    container_yaml: Option<PathBuf>,

    /// Override a single build kwarg, `key=value` (repeatable). The value
    /// is parsed as JSON if possible, else kept as a string.
    #[arg(long = "override", value_name = "KEY=VALUE")]
    overrides: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let resolved = ResolvedConfig::resolve(cli.release.as_deref());

    let build_descriptor = match &cli.build_descriptor {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read build descriptor at {}", path.display()))?;
            serde_json::from_str(&raw).context("build descriptor is not valid JSON")?
        }
        None => read_build_descriptor_from_env().context("reading BUILD env var")?,
    };

    let mut platforms = BTreeSet::new();
    let mut provider = FakeConfigProvider::new();
    for cluster in &resolved.clusters {
        if let Some(wanted) = &cli.platforms {
            if !wanted.iter().any(|p| p == &cluster.platform) {
                continue;
            }
        }
        platforms.insert(cluster.platform.clone());
        let client: Arc<dyn ClusterClient> = Arc::new(FakeClusterClient::new(&cluster.name));
        provider = provider.with_cluster(
            cluster.platform.clone(),
            Cluster {
                name: cluster.name.clone(),
                priority: cluster.priority,
                max_concurrent_builds: cluster.max_concurrent_builds,
            },
            client,
        );
    }

    if platforms.is_empty() {
        anyhow::bail!("no clusters configured for the requested platform set");
    }

    let mut orchestrator_config = OrchestratorConfig::new(platforms, serde_json::Map::new(), resolved.release);
    orchestrator_config.container_yaml_path = cli.container_yaml;

    let provider = Arc::new(provider);
    let workspace = Arc::new(Workspace::new());
    for override_str in &cli.overrides {
        let (key, value) = override_str
            .split_once('=')
            .with_context(|| format!("--override {override_str:?} is not KEY=VALUE"))?;
        let value = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        workspace.override_build_kwarg(key, value);
    }

    let orchestrator = Orchestrator::new(orchestrator_config, provider.clone(), provider.client_factory(), workspace);

    let result = orchestrator.run(&build_descriptor, CancellationToken::new()).await?;

    let output = serde_json::json!({
        "fail_reason": result.fail_reason,
        "annotations": result.annotations,
        "labels": result.labels,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    if !result.is_success() {
        std::process::exit(1);
    }

    Ok(())
}
