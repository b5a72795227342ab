//! Per-(platform, cluster) retry bookkeeping (spec §4.1, §4.2).

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::AllClustersFailed;

/// Failure counter and retry-wait deadline for one cluster, scoped to a
/// single platform's dispatch loop.
///
/// Not `Clone`/`Sync`-shared across platforms: each [`crate::dispatcher::PlatformDispatcher`]
/// owns its own set, built fresh per run (spec §3 "Retry contexts are not
/// shared between platforms").
#[derive(Debug)]
pub struct ClusterRetryContext {
    fails: u32,
    retry_at: Instant,
    max_fails: u32,
}

impl ClusterRetryContext {
    /// Create a fresh context. Starts with zero fails and no retry wait.
    pub fn new(max_fails: u32) -> Self {
        Self {
            fails: 0,
            retry_at: Instant::now(),
            max_fails,
        }
    }

    /// True iff this cluster has exhausted its retry budget. Once true,
    /// stays true for the lifetime of the context (spec §3 invariant: "A
    /// `ClusterRetryContext` once dead never recovers within the same run").
    pub fn is_failed(&self) -> bool {
        self.fails >= self.max_fails
    }

    /// True iff `now` is still within this cluster's retry-wait window.
    pub fn in_retry_wait(&self, now: Instant) -> bool {
        now < self.retry_at
    }

    /// Record a failure and, if not already dead, put the cluster in
    /// retry-wait for `delay`. A no-op once [`Self::is_failed`] is true --
    /// the fail counter does not keep incrementing past `max_fails`.
    pub fn try_again_later(&mut self, delay: Duration) {
        if self.is_failed() {
            return;
        }
        self.fails += 1;
        self.retry_at = Instant::now() + delay;
    }

    #[cfg(test)]
    pub fn fails(&self) -> u32 {
        self.fails
    }
}

/// Sleep until the earliest non-failed cluster's retry-wait expires.
///
/// Per spec §4.2, whole-second granularity is acceptable; this rounds the
/// remaining wait *up* to the next whole second rather than truncating, so
/// retries never fire early (see DESIGN.md's resolution of the spec's open
/// question on this point).
///
/// # Errors
///
/// Returns [`AllClustersFailed`] if every context in `contexts` is dead.
pub async fn wait_for_any_cluster(
    contexts: &HashMap<String, ClusterRetryContext>,
    platform: &str,
) -> Result<(), AllClustersFailed> {
    let earliest = contexts
        .values()
        .filter(|ctx| !ctx.is_failed())
        .map(|ctx| ctx.retry_at)
        .min()
        .ok_or_else(|| AllClustersFailed {
            platform: platform.to_string(),
        })?;

    let now = Instant::now();
    if earliest > now {
        let remaining = earliest - now;
        let rounded = Duration::from_secs(remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0));
        tokio::time::sleep(rounded).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_is_not_failed() {
        let ctx = ClusterRetryContext::new(3);
        assert!(!ctx.is_failed());
        assert_eq!(ctx.fails(), 0);
    }

    #[test]
    fn try_again_later_increments_until_max_fails() {
        let mut ctx = ClusterRetryContext::new(2);
        ctx.try_again_later(Duration::from_secs(1));
        assert_eq!(ctx.fails(), 1);
        assert!(!ctx.is_failed());

        ctx.try_again_later(Duration::from_secs(1));
        assert_eq!(ctx.fails(), 2);
        assert!(ctx.is_failed());
    }

    #[test]
    fn try_again_later_is_noop_once_failed() {
        let mut ctx = ClusterRetryContext::new(1);
        ctx.try_again_later(Duration::from_secs(1));
        assert!(ctx.is_failed());

        ctx.try_again_later(Duration::from_secs(1));
        assert_eq!(ctx.fails(), 1, "fail count must not increment past max_fails");
    }

    #[test]
    fn in_retry_wait_reflects_deadline() {
        let mut ctx = ClusterRetryContext::new(5);
        let before = Instant::now();
        ctx.try_again_later(Duration::from_secs(60));
        assert!(ctx.in_retry_wait(before));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_any_cluster_fails_when_all_dead() {
        let mut contexts = HashMap::new();
        let mut ctx = ClusterRetryContext::new(1);
        ctx.try_again_later(Duration::from_secs(1));
        contexts.insert("a".to_string(), ctx);

        let err = wait_for_any_cluster(&contexts, "x86_64").await.unwrap_err();
        assert_eq!(err.platform, "x86_64");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_any_cluster_sleeps_until_earliest_retry_at() {
        let mut contexts = HashMap::new();

        let mut soon = ClusterRetryContext::new(5);
        soon.try_again_later(Duration::from_secs(5));
        contexts.insert("soon".to_string(), soon);

        let mut later = ClusterRetryContext::new(5);
        later.try_again_later(Duration::from_secs(50));
        contexts.insert("later".to_string(), later);

        let start = Instant::now();
        wait_for_any_cluster(&contexts, "x86_64").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(50));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_any_cluster_returns_immediately_when_nothing_waiting() {
        let mut contexts = HashMap::new();
        contexts.insert("a".to_string(), ClusterRetryContext::new(5));

        let start = Instant::now();
        wait_for_any_cluster(&contexts, "x86_64").await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
