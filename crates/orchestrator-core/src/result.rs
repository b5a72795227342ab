//! The single aggregated outcome of an orchestrator run (spec §3, §4.6
//! step 5, §6 "Result (produced)").

/// Result of running the orchestrator to completion.
///
/// Mirrors the original plugin's `BuildResult`: on any per-platform
/// failure, `fail_reason` carries a JSON-encoded mapping of platform to
/// failure reason; otherwise the run is a "remote image" success and
/// `fail_reason` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub fail_reason: Option<String>,
    pub annotations: serde_json::Value,
    pub labels: serde_json::Value,
}

impl BuildResult {
    pub fn is_success(&self) -> bool {
        self.fail_reason.is_none()
    }
}
