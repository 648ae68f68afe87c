//! Concurrent probe execution
//!
//! Runs every probe of a verifier's target list concurrently, bounded by a
//! semaphore, each under a hard timeout. A probe passes when its transport
//! completes and the success criterion for that transport holds.

mod http;
mod quic;
mod stun;

pub use stun::is_binding_response;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use prikop_core::targets::{Proto, Target, VerifierKind};

/// Aggregated outcome of one probe suite run
#[derive(Debug, Clone, Default)]
pub struct ProbeOutcome {
    pub success_count: usize,
    pub total_count: usize,
    pub passed: Vec<String>,
    pub failed: Vec<String>,
}

/// Execution limits for one suite run
#[derive(Debug, Clone, Copy)]
pub struct ProbeLimits {
    /// Probes in flight at once
    pub max_parallel: usize,
    /// Hard timeout per probe
    pub timeout: Duration,
}

/// Run the verifier's probe list and aggregate pass/fail per URL.
pub async fn run_suite(kind: &VerifierKind, limits: ProbeLimits) -> ProbeOutcome {
    let mut targets = Vec::new();
    for target in kind.targets() {
        for _ in 0..target.times.max(1) {
            targets.push(target.clone());
        }
    }

    let total_count = targets.len();
    let semaphore = Arc::new(Semaphore::new(limits.max_parallel.max(1)));
    let mut set = JoinSet::new();

    for target in targets {
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (target.url, false);
            };
            let passed = tokio::time::timeout(limits.timeout, check(&target))
                .await
                .unwrap_or(false);
            (target.url, passed)
        });
    }

    let mut outcome = ProbeOutcome {
        total_count,
        ..ProbeOutcome::default()
    };
    while let Some(joined) = set.join_next().await {
        let Ok((url, passed)) = joined else { continue };
        if passed {
            outcome.success_count += 1;
            outcome.passed.push(url);
        } else {
            outcome.failed.push(url);
        }
    }

    debug!(
        passed = outcome.success_count,
        total = outcome.total_count,
        "probe suite finished"
    );
    outcome
}

async fn check(target: &Target) -> bool {
    match target.proto {
        Proto::Stun => stun::check(&target.url).await.unwrap_or(false),
        Proto::Quic => quic::check(target).await.unwrap_or(false),
        Proto::Tcp | Proto::Udp => http::check(target).await.unwrap_or(false),
    }
}

/// Defeat intermediary caches by varying a query parameter per request.
pub(crate) fn bust_cache(url: &str) -> String {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}t={stamp}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bust_cache_separator() {
        assert!(bust_cache("https://a.example/x").contains("/x?t="));
        assert!(bust_cache("https://a.example/x?y=1").contains("&t="));
    }

    #[tokio::test]
    async fn test_suite_counts_unreachable_targets_as_failures() {
        // A verifier pointed at a port nobody listens on: every probe fails
        // but the counts still add up.
        let kind = VerifierKind::for_group("discord_l7");
        let limits = ProbeLimits {
            max_parallel: 12,
            timeout: Duration::from_millis(300),
        };
        let outcome = run_suite(&kind, limits).await;
        assert_eq!(outcome.total_count, kind.targets().len());
        assert_eq!(
            outcome.passed.len() + outcome.failed.len(),
            outcome.total_count
        );
    }
}
