//! Parses the ambient build-descriptor JSON (spec §4.6 step 1, §6 "Build
//! descriptor (consumed via environment)").
//!
//! Mirrors `atomic_reactor.util.get_build_json`, which reads the
//! OpenShift-injected `BUILD` environment variable.

use crate::error::OrchestratorError;

const BUILD_ENV_VAR: &str = "BUILD";

/// Extract the builder image name from a build descriptor.
///
/// Requires `spec.strategy.customStrategy.from.kind == "DockerImage"` and a
/// `name`; any missing field or a different `kind` is fatal to the whole
/// orchestrator (spec §4.6 step 1).
pub fn extract_build_image(descriptor: &serde_json::Value) -> Result<String, OrchestratorError> {
    let from = descriptor
        .pointer("/spec/strategy/customStrategy/from")
        .ok_or_else(|| {
            OrchestratorError::MalformedBuildDescriptor(
                "missing spec.strategy.customStrategy.from".to_string(),
            )
        })?;

    let kind = from
        .get("kind")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| OrchestratorError::MalformedBuildDescriptor("missing from.kind".to_string()))?;

    if kind != "DockerImage" {
        return Err(OrchestratorError::MalformedBuildDescriptor(format!(
            "from.kind is {kind:?}, expected \"DockerImage\""
        )));
    }

    from.get("name")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| OrchestratorError::MalformedBuildDescriptor("missing from.name".to_string()))
}

/// Read and parse the build descriptor from the `BUILD` environment
/// variable.
pub fn read_build_descriptor_from_env() -> Result<serde_json::Value, OrchestratorError> {
    let raw = std::env::var(BUILD_ENV_VAR).map_err(|_| {
        OrchestratorError::MalformedBuildDescriptor(format!("{BUILD_ENV_VAR} environment variable is not set"))
    })?;
    serde_json::from_str(&raw)
        .map_err(|e| OrchestratorError::MalformedBuildDescriptor(format!("invalid JSON in {BUILD_ENV_VAR}: {e}")))
}
