//! HTTP/1.1 and HTTP/2 probes
//!
//! One shared client, certificate validation off (this is a reachability
//! check through a mangled path, not a security check) and connection
//! reuse disabled so every probe handshakes through the engine again.

use once_cell::sync::Lazy;
use prikop_core::targets::Target;
use std::time::Duration;
use tracing::trace;

use super::bust_cache;

pub(crate) const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const HARD_TIMEOUT: Duration = Duration::from_secs(5);

static CLIENT: Lazy<Result<reqwest::Client, String>> = Lazy::new(|| {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .pool_max_idle_per_host(0)
        .connect_timeout(HARD_TIMEOUT)
        .timeout(HARD_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| e.to_string())
});

/// One HTTP probe: request completes, status acceptable, threshold bytes read.
pub async fn check(target: &Target) -> Result<bool, String> {
    let client = CLIENT.as_ref().map_err(Clone::clone)?;
    let url = bust_cache(&target.url);

    let resp = client.get(&url).send().await.map_err(|e| e.to_string())?;

    if !target.ignore_status {
        let status = resp.status().as_u16();
        if !(200..400).contains(&status) {
            trace!(url, status, "probe rejected by status");
            return Ok(false);
        }
    }

    let mut read = 0usize;
    let mut resp = resp;
    while read < target.threshold {
        match resp.chunk().await {
            Ok(Some(chunk)) => read += chunk.len(),
            Ok(None) => break,
            Err(e) => return Err(e.to_string()),
        }
    }

    Ok(read >= target.threshold)
}
