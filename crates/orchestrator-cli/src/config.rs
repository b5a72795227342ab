//! Configuration file management for the orchestrator demo CLI.
//!
//! Provides a TOML-based config file at `~/.config/orchestrator/config.toml`
//! and a resolution chain: CLI flag > env var > config file > default.
//! This is a living example of wiring `orchestrator-core` together, not the
//! production config surface a real cluster-backed CLI would have.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub release: Option<String>,
    #[serde(default)]
    pub clusters: Vec<ClusterSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSection {
    pub platform: String,
    pub name: String,
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "default_max_concurrent_builds")]
    pub max_concurrent_builds: u32,
}

fn default_max_concurrent_builds() -> u32 {
    10
}

/// Return the orchestrator config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/orchestrator` or
/// `~/.config/orchestrator`. We intentionally ignore the platform-specific
/// `dirs::config_dir()` (which returns `~/Library/Application Support` on
/// macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("orchestrator");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("orchestrator")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Clusters to fall back on when no config file is present, so the demo
/// runs with no setup at all.
fn default_clusters() -> Vec<ClusterSection> {
    vec![
        ClusterSection {
            platform: "x86_64".to_string(),
            name: "demo-east".to_string(),
            priority: 0,
            max_concurrent_builds: 10,
        },
        ClusterSection {
            platform: "aarch64".to_string(),
            name: "demo-east".to_string(),
            priority: 0,
            max_concurrent_builds: 10,
        },
    ]
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct ResolvedConfig {
    pub release: String,
    pub clusters: Vec<ClusterSection>,
}

impl ResolvedConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config
    /// file > default.
    ///
    /// - Release: `cli_release` > `ORCHESTRATOR_RELEASE` env > `config_file.release` > `"1.0"`.
    /// - Clusters: `config_file.clusters` if non-empty, else a built-in demo pair.
    pub fn resolve(cli_release: Option<&str>) -> Self {
        let file_config = load_config().ok();

        let release = cli_release
            .map(str::to_string)
            .or_else(|| std::env::var("ORCHESTRATOR_RELEASE").ok())
            .or_else(|| file_config.as_ref().and_then(|c| c.release.clone()))
            .unwrap_or_else(|| "1.0".to_string());

        let clusters = file_config
            .map(|c| c.clusters)
            .filter(|clusters| !clusters.is_empty())
            .unwrap_or_else(default_clusters);

        Self { release, clusters }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("orchestrator/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }

    #[test]
    fn resolve_falls_back_to_default_clusters_and_release() {
        // No config file is expected in the test sandbox and no relevant
        // env vars are set by the test harness.
        let resolved = ResolvedConfig::resolve(None);
        assert!(!resolved.clusters.is_empty());
        assert!(!resolved.release.is_empty());
    }

    #[test]
    fn resolve_with_cli_flag_overrides_release() {
        let resolved = ResolvedConfig::resolve(Some("9.9-cli"));
        assert_eq!(resolved.release, "9.9-cli");
    }

    #[test]
    fn config_file_parses_cluster_sections() {
        let toml = r#"
release = "2.0"

[[clusters]]
platform = "x86_64"
name = "east"
priority = 1
"#;
        let parsed: ConfigFile = toml::from_str(toml).unwrap();
        assert_eq!(parsed.release.as_deref(), Some("2.0"));
        assert_eq!(parsed.clusters.len(), 1);
        assert_eq!(parsed.clusters[0].max_concurrent_builds, 10);
    }
}
