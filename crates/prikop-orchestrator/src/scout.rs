//! Active reconnaissance
//!
//! Before seeding a phase, two canonical fingerprints probe the middlebox
//! through the pool: does IP fragmentation survive the path, and does a
//! checksum-corrupted decoy get through. The answers prune the seed
//! population and steer the fooling boosters.

use tokio_util::sync::CancellationToken;
use tracing::info;

use prikop_core::protocol::WorkerRequest;
use prikop_core::types::ReconReport;

use crate::pool::WorkerPool;

const IPFRAG_PROBE: &str = "--dpi-desync=ipfrag1 --dpi-desync-repeats=2";
const BADSUM_PROBE: &str = "--dpi-desync=fake --dpi-desync-fooling=badsum";

/// Run the reconnaissance probes against a target group.
///
/// A capability counts as working only when the probe both completed the
/// transport round-trip and reported success.
pub async fn run_scout(
    pool: &WorkerPool,
    token: &CancellationToken,
    group: &str,
) -> ReconReport {
    info!(group, "starting active reconnaissance");

    let ip_frag_works = probe(pool, token, group, IPFRAG_PROBE).await;
    info!(
        works = ip_frag_works,
        "fragmentation probe (ipfrag1) finished"
    );

    let bad_sum_works = probe(pool, token, group, BADSUM_PROBE).await;
    info!(works = bad_sum_works, "badsum probe (fake+badsum) finished");

    ReconReport {
        ip_frag_works,
        bad_sum_works,
    }
}

async fn probe(pool: &WorkerPool, token: &CancellationToken, group: &str, args: &str) -> bool {
    let request = WorkerRequest {
        strategy_args: args.to_string(),
        target_group: group.to_string(),
    };
    match pool.exec(token, &request).await {
        Ok(result) => result.success,
        Err(_) => false,
    }
}
