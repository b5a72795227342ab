//! Core library for the multi-platform build orchestrator: cluster
//! selection, per-platform dispatch, and run-scoped aggregation.
//!
//! See [`orchestrator::Orchestrator`] for the entry point.

pub mod build_descriptor;
pub mod cluster;
pub mod dispatcher;
pub mod error;
pub mod labels;
pub mod manifest;
pub mod orchestrator;
pub mod result;
pub mod retry;
pub mod selector;
pub mod worker_build;
pub mod workspace;

pub use cluster::{Cluster, ClusterClient, ConfigProvider};
pub use error::{AllClustersFailed, ClusterError, ManifestError, OrchestratorError};
pub use orchestrator::{ClientFactory, Orchestrator, OrchestratorConfig};
pub use result::BuildResult;
pub use workspace::Workspace;
