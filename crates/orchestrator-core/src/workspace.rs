//! Process-scoped registry that lets peer pipeline stages mutate per-worker
//! build arguments and later read back per-platform build handles
//! (spec §4.7, §9 Design Notes "model it as a well-typed, run-scoped
//! context object passed explicitly rather than as an ambient global").

use std::collections::HashMap;
use std::sync::Mutex;

use rand::distr::{Alphanumeric, SampleString};

use crate::worker_build::WorkerBuildInfo;

/// Run-scoped context shared between the orchestrator and peer pipeline
/// stages. Constructed once per run and held behind an `Arc` by whoever
/// drives the orchestrator (spec §9 Design Notes).
pub struct Workspace {
    koji_upload_dir: String,
    build_info: Mutex<HashMap<String, WorkerBuildInfo>>,
    override_kwargs: Mutex<serde_json::Map<String, serde_json::Value>>,
    /// Builds registered the moment they are created, before their
    /// monitoring loop (`watch_logs`/`wait_to_finish`) completes. Kept
    /// separate from `build_info` (which only gains an entry once a
    /// platform's dispatch loop has *finished*) so that orchestrator-wide
    /// cancellation can reach a build that is still being monitored when
    /// the cancellation fires (spec §3 lifecycle, §5 "Cancellation").
    in_flight: Mutex<HashMap<String, WorkerBuildInfo>>,
}

impl Workspace {
    /// Mint a fresh workspace, generating `koji_upload_dir` once for the
    /// whole run (spec §3 lifecycle: "`koji_upload_dir` is minted during
    /// Orchestrator construction").
    pub fn new() -> Self {
        Self {
            koji_upload_dir: generate_koji_upload_dir(),
            build_info: Mutex::new(HashMap::new()),
            override_kwargs: Mutex::new(serde_json::Map::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Register a just-started build so it is reachable by
    /// orchestrator-wide cancellation even while its platform task is still
    /// inside `watch_logs`/`wait_to_finish` (spec §5 "Cancellation").
    pub fn register_in_flight(&self, info: WorkerBuildInfo) {
        self.in_flight
            .lock()
            .expect("workspace in_flight mutex poisoned")
            .insert(info.platform.clone(), info);
    }

    /// Snapshot of every build registered via [`Self::register_in_flight`],
    /// for orchestrator-wide cancellation.
    pub fn in_flight_infos(&self) -> Vec<WorkerBuildInfo> {
        self.in_flight
            .lock()
            .expect("workspace in_flight mutex poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// The per-run upload directory fragment, identical across every
    /// worker build (spec §3 invariant).
    pub fn koji_upload_dir(&self) -> &str {
        &self.koji_upload_dir
    }

    /// Override a build kwarg for all worker builds (spec §4.7
    /// `override_build_kwarg`). Applied on top of the computed per-worker
    /// kwargs, so overrides always win (spec §4.7, §8 scenario 6).
    pub fn override_build_kwarg(&self, key: impl Into<String>, value: serde_json::Value) {
        self.override_kwargs
            .lock()
            .expect("workspace override_kwargs mutex poisoned")
            .insert(key.into(), value);
    }

    /// Snapshot of the current override kwargs, read fresh on every
    /// dispatch attempt (spec §4.5 step 1).
    pub fn override_kwargs(&self) -> serde_json::Map<String, serde_json::Value> {
        self.override_kwargs
            .lock()
            .expect("workspace override_kwargs mutex poisoned")
            .clone()
    }

    /// Record the terminal [`WorkerBuildInfo`] for a platform. Called
    /// exactly once per platform by the orchestrator after fan-out
    /// completes (spec §3 invariant).
    pub fn record_build_info(&self, info: WorkerBuildInfo) {
        self.build_info
            .lock()
            .expect("workspace build_info mutex poisoned")
            .insert(info.platform.clone(), info);
    }

    /// Post-run accessor for a platform's build info (spec §4.7
    /// `get_worker_build_info`). Intended for use after the orchestrator's
    /// run has completed.
    pub fn with_build_info<R>(&self, platform: &str, f: impl FnOnce(Option<&WorkerBuildInfo>) -> R) -> R {
        let guard = self.build_info.lock().expect("workspace build_info mutex poisoned");
        f(guard.get(platform))
    }

    /// All recorded platforms, for iteration during aggregation.
    pub fn platforms(&self) -> Vec<String> {
        self.build_info
            .lock()
            .expect("workspace build_info mutex poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// A cloned snapshot of every recorded `WorkerBuildInfo`. Cloning lets
    /// the caller `.await` each entry's accessors without holding the
    /// mutex guard across an await point (spec §4.6 step 5 aggregation).
    pub fn build_infos(&self) -> Vec<WorkerBuildInfo> {
        self.build_info
            .lock()
            .expect("workspace build_info mutex poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Cloned snapshot of one platform's `WorkerBuildInfo`, if recorded.
    pub fn build_info(&self, platform: &str) -> Option<WorkerBuildInfo> {
        self.build_info
            .lock()
            .expect("workspace build_info mutex poisoned")
            .get(platform)
            .cloned()
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

/// `"koji-upload/<wall-clock-timestamp>.<8 random ASCII letters>"` (spec §3
/// lifecycle, §6, §8 "matches `^koji-upload/\d+(\.\d+)?\.[A-Za-z]{8}$`").
fn generate_koji_upload_dir() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let timestamp = format!("{}.{:07}", now.as_secs(), now.subsec_micros());
    let letters = Alphanumeric.sample_string(&mut rand::rng(), 8);
    // Alphanumeric includes digits; restrict to ASCII letters to match the
    // spec's `[A-Za-z]{8}` exactly.
    let letters = ensure_ascii_letters(letters);
    format!("koji-upload/{timestamp}.{letters}")
}

fn ensure_ascii_letters(sample: String) -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    sample
        .chars()
        .map(|c| {
            if c.is_ascii_alphabetic() {
                c
            } else if rng.random_bool(0.5) {
                rng.random_range(b'a'..=b'z') as char
            } else {
                rng.random_range(b'A'..=b'Z') as char
            }
        })
        .collect()
}
