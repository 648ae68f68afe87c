//! Phase runner: the per-phase evolutionary loop
//!
//! Seed, evaluate the whole population through the pool, track the global
//! best, stop early when the phase target is met, evolve, repeat. A batch
//! is a join barrier; inside it evaluations complete in any order.

use std::io::Write;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use prikop_core::config::SearchConfig;
use prikop_core::evolve;
use prikop_core::grammar::Strategy;
use prikop_core::protocol::{WorkerRequest, WorkerResult};
use prikop_core::score::{rank, score};
use prikop_core::seed::seed;
use prikop_core::types::{ReconReport, ScoredStrategy};

use crate::pool::WorkerPool;

/// One optimization phase: a (protocol, host-list) slice of the problem
#[derive(Debug, Clone)]
pub struct Phase {
    pub name: &'static str,
    /// Target catalog group the workers probe
    pub group: &'static str,
    /// Engine filter prefix emitted in front of the winning strategy
    pub filters: String,
    pub max_gens: u32,
    /// Success percentage that ends the phase early
    pub target_success_rate: u32,
    /// Extra strategies merged into the zero generation, as raw args
    pub seed_hints: Vec<String>,
}

/// Run one phase to completion and return its best strategy, if any.
pub async fn run_phase(
    pool: &Arc<WorkerPool>,
    token: &CancellationToken,
    search: &SearchConfig,
    phase: &Phase,
    payloads: &[String],
    report: &ReconReport,
) -> Option<ScoredStrategy> {
    let mut rng = StdRng::seed_from_u64(clock_seed());

    let mut population = seed(payloads, report);
    for hint in &phase.seed_hints {
        let mut strategy = Strategy::parse(hint);
        strategy.sanitize(payloads, &mut rng);
        population.push(strategy);
    }

    let mut global_best: Option<ScoredStrategy> = None;

    for gen in 0..phase.max_gens {
        if token.is_cancelled() {
            return None;
        }

        info!(
            phase = phase.name,
            gen,
            max_gens = phase.max_gens,
            population = population.len(),
            "generation starting"
        );

        let mut results = evaluate_batch(pool, token, &population, phase.group, search).await;
        if token.is_cancelled() {
            return None;
        }

        rank(&mut results, search.complexity_alpha);

        if let Some(best_gen) = results.first() {
            // Only a strategy that actually passed something can lead
            if best_gen.result.success_count > 0 {
                let candidate = score(&best_gen.result, best_gen.complexity, search.complexity_alpha);
                let incumbent = global_best
                    .as_ref()
                    .map(|b| score(&b.result, b.complexity, search.complexity_alpha));
                if incumbent.map_or(true, |s| candidate > s) {
                    info!(
                        args = %best_gen.raw_args,
                        success = best_gen.result.success_count,
                        total = best_gen.result.total_count,
                        "new global best"
                    );
                    log_probe_details(best_gen);
                    global_best = Some(best_gen.clone());
                }
            }
        }

        if let Some(best) = &global_best {
            let result = &best.result;
            if result.total_count > 0
                && result.success_count == result.total_count
                && gen > search.ideal_min_generation
                && best.complexity <= search.ideal_complexity_max
            {
                info!("ideal strategy found, skipping remaining generations");
                break;
            }
            if result.success_rate() >= phase.target_success_rate {
                info!(
                    rate = result.success_rate(),
                    target = phase.target_success_rate,
                    "phase target reached"
                );
                break;
            }
        }

        population = evolve::evolve(&results, payloads, search);
        if population.is_empty() {
            break;
        }
    }

    global_best
}

/// Evaluate every candidate through the pool with bounded parallelism.
pub(crate) async fn evaluate_batch(
    pool: &Arc<WorkerPool>,
    token: &CancellationToken,
    population: &[Strategy],
    group: &str,
    search: &SearchConfig,
) -> Vec<ScoredStrategy> {
    let progress = Arc::new(Progress::new(population.len()));
    let ticker_stop = CancellationToken::new();
    let ticker = tokio::spawn(run_ticker(Arc::clone(&progress), ticker_stop.clone()));

    let semaphore = Arc::new(Semaphore::new(search.max_workers.max(1)));
    let mut set: JoinSet<Option<ScoredStrategy>> = JoinSet::new();

    for strategy in population.iter().cloned() {
        let pool = Arc::clone(pool);
        let token = token.clone();
        let semaphore = Arc::clone(&semaphore);
        let progress = Arc::clone(&progress);
        let group = group.to_string();

        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok()?;
            if token.is_cancelled() {
                return None;
            }

            let raw_args = strategy.to_args();
            let request = WorkerRequest {
                strategy_args: raw_args.clone(),
                target_group: group,
            };

            let started = Instant::now();
            let result = match pool.exec(&token, &request).await {
                Ok(result) => result,
                Err(e) => WorkerResult::failure(e.to_string()),
            };
            let duration = started.elapsed();

            if progress.record(&result) {
                announce(&format!(
                    "    [+] {}/{} passed: {}",
                    result.success_count, result.total_count, raw_args
                ));
            }

            Some(ScoredStrategy {
                complexity: strategy.complexity(),
                strategy,
                raw_args,
                duration,
                result,
            })
        });
    }

    let mut results = Vec::with_capacity(population.len());
    while let Some(joined) = set.join_next().await {
        if let Ok(Some(scored)) = joined {
            results.push(scored);
        }
    }

    ticker_stop.cancel();
    let _ = ticker.await;
    progress.finish();

    results
}

fn log_probe_details(best: &ScoredStrategy) {
    for url in &best.result.passed {
        debug!(%url, "passed");
    }
    for url in &best.result.failed {
        debug!(%url, "failed");
    }
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

// --- batch progress reporting ------------------------------------------------

/// All terminal drawing goes through one lock so carriage-return redraws
/// and announcements interleave cleanly.
static TERM: parking_lot::Mutex<()> = parking_lot::const_mutex(());

/// Shared per-batch counters. The best success count uses compare-and-swap
/// so only a strictly new high produces a line of output.
struct Progress {
    total: usize,
    processed: AtomicUsize,
    best: AtomicI64,
}

impl Progress {
    fn new(total: usize) -> Self {
        Self {
            total,
            processed: AtomicUsize::new(0),
            best: AtomicI64::new(-1),
        }
    }

    /// Count a finished evaluation; true when it sets a new high.
    fn record(&self, result: &WorkerResult) -> bool {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if !result.success {
            return false;
        }
        let candidate = result.success_count as i64;
        let mut current = self.best.load(Ordering::Relaxed);
        while candidate > current {
            match self.best.compare_exchange_weak(
                current,
                candidate,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
        false
    }

    fn redraw(&self) {
        let processed = self.processed.load(Ordering::Relaxed);
        let best = self.best.load(Ordering::Relaxed);
        let _guard = TERM.lock();
        if best >= 0 {
            eprint!("\r    [{processed}/{}] best so far: {best}   ", self.total);
        } else {
            eprint!("\r    [{processed}/{}]                  ", self.total);
        }
        let _ = std::io::stderr().flush();
    }

    fn finish(&self) {
        let _guard = TERM.lock();
        eprintln!();
    }
}

async fn run_ticker(progress: Arc<Progress>, stop: CancellationToken) {
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = interval.tick() => progress.redraw(),
        }
    }
}

fn announce(line: &str) {
    let _guard = TERM.lock();
    eprintln!("\r{line}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use prikop_core::config::PoolConfig;
    use prikop_core::protocol;
    use std::path::Path;
    use std::time::Duration;
    use tokio::net::UnixListener;

    use crate::pool::Worker;

    fn payloads() -> Vec<String> {
        vec![
            "/p/tls_clienthello_a.bin".to_string(),
            "/p/quic_initial_b.bin".to_string(),
            "/p/capture_017.bin".to_string(),
        ]
    }

    fn small_search() -> SearchConfig {
        SearchConfig {
            population: 12,
            elites: 2,
            max_workers: 8,
            ..SearchConfig::default()
        }
    }

    fn test_pool(dir: &Path, sockets: Vec<std::path::PathBuf>) -> Arc<WorkerPool> {
        let workers = sockets
            .into_iter()
            .enumerate()
            .map(|(i, socket_path)| Worker {
                id: format!("worker_{i}"),
                socket_path,
            })
            .collect();
        Arc::new(WorkerPool::with_workers(
            PoolConfig {
                size: 4,
                host_socket_dir: dir.to_path_buf(),
                container_timeout_secs: 1,
                ..PoolConfig::default()
            },
            workers,
        ))
    }

    /// Stub worker whose response depends on the request args; counts
    /// every request it serves.
    fn spawn_scripted_stub<F>(socket_path: &Path, counter: Arc<AtomicUsize>, respond: F)
    where
        F: Fn(&WorkerRequest) -> WorkerResult + Send + Sync + Clone + 'static,
    {
        let listener = UnixListener::bind(socket_path).expect("bind stub");
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                let counter = Arc::clone(&counter);
                let respond = respond.clone();
                tokio::spawn(async move {
                    let mut framed = protocol::framed(stream);
                    let Ok(req) = protocol::recv::<_, WorkerRequest>(&mut framed).await else {
                        return;
                    };
                    counter.fetch_add(1, Ordering::Relaxed);
                    let _ = protocol::send(&mut framed, &respond(&req)).await;
                });
            }
        });
    }

    fn phase(target_success_rate: u32, max_gens: u32) -> Phase {
        Phase {
            name: "TEST",
            group: "general",
            filters: "--filter-tcp=80,443".into(),
            max_gens,
            target_success_rate,
            seed_hints: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_phase_stops_on_target_rate() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("worker_0.sock");
        let counter = Arc::new(AtomicUsize::new(0));
        spawn_scripted_stub(&sock, Arc::clone(&counter), |_| WorkerResult {
            success: true,
            success_count: 25,
            total_count: 25,
            ..WorkerResult::default()
        });

        let pool = test_pool(dir.path(), vec![sock]);
        let token = CancellationToken::new();
        let best = run_phase(
            &pool,
            &token,
            &small_search(),
            &phase(80, 10),
            &payloads(),
            &ReconReport::default(),
        )
        .await
        .expect("phase should find a winner");

        assert_eq!(best.result.success_count, 25);
        // 100% >= 80% after generation zero: only the seed population ran
        assert_eq!(counter.load(Ordering::Relaxed), 11);
    }

    #[tokio::test]
    async fn test_global_best_survives_worse_generations() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("worker_0.sock");
        let counter = Arc::new(AtomicUsize::new(0));
        // Only the naked multisplit seed scores high; everything else is poor
        spawn_scripted_stub(&sock, Arc::clone(&counter), |req| {
            let high = req.strategy_args.contains("multisplit")
                && req.strategy_args.contains("--dpi-desync-split-pos=1")
                && !req.strategy_args.contains("seqovl");
            WorkerResult {
                success: true,
                success_count: if high { 20 } else { 2 },
                total_count: 25,
                ..WorkerResult::default()
            }
        });

        let pool = test_pool(dir.path(), vec![sock]);
        let token = CancellationToken::new();
        // Target rate no generation can reach: the loop runs to max_gens
        let best = run_phase(
            &pool,
            &token,
            &small_search(),
            &phase(101, 3),
            &payloads(),
            &ReconReport::default(),
        )
        .await
        .expect("phase should keep its best");

        assert_eq!(best.result.success_count, 20);
    }

    #[tokio::test]
    async fn test_engine_crash_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("worker_0.sock");
        let counter = Arc::new(AtomicUsize::new(0));
        spawn_scripted_stub(&sock, Arc::clone(&counter), |_| {
            WorkerResult::failure("ENGINE_CRASH: exited early (signal: 11)")
        });

        let pool = test_pool(dir.path(), vec![sock]);
        let token = CancellationToken::new();
        let search = small_search();
        let best = run_phase(
            &pool,
            &token,
            &search,
            &phase(80, 2),
            &payloads(),
            &ReconReport::default(),
        )
        .await;

        assert!(best.is_none());
        // Gen 0 is the 11 seeds; the crash wave must not shrink gen 1,
        // which evolves to exactly the configured population.
        assert_eq!(
            counter.load(Ordering::Relaxed),
            11 + search.population
        );
    }

    #[tokio::test]
    async fn test_cancellation_unwinds_quickly() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("worker_0.sock");
        // Accepts, reads, never answers
        let listener = UnixListener::bind(&sock).unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let mut framed = protocol::framed(stream);
                    let _ = protocol::recv::<_, WorkerRequest>(&mut framed).await;
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                });
            }
        });

        let pool = test_pool(dir.path(), vec![sock]);
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let best = run_phase(
            &pool,
            &token,
            &small_search(),
            &phase(80, 10),
            &payloads(),
            &ReconReport::default(),
        )
        .await;

        assert!(best.is_none());
        // container_timeout is 1s in the test pool; cancellation must not
        // wait even that long per in-flight request
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_seed_hints_join_generation_zero() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("worker_0.sock");
        let counter = Arc::new(AtomicUsize::new(0));
        spawn_scripted_stub(&sock, Arc::clone(&counter), |_| WorkerResult {
            success: true,
            success_count: 25,
            total_count: 25,
            ..WorkerResult::default()
        });

        let pool = test_pool(dir.path(), vec![sock]);
        let token = CancellationToken::new();
        let mut test_phase = phase(80, 10);
        test_phase.seed_hints = vec![
            "--dpi-desync=fake --dpi-desync-repeats=2 --dpi-desync-any-protocol".to_string(),
        ];
        run_phase(
            &pool,
            &token,
            &small_search(),
            &test_phase,
            &payloads(),
            &ReconReport::default(),
        )
        .await
        .expect("winner");

        // 11 seeds + 1 hint
        assert_eq!(counter.load(Ordering::Relaxed), 12);
    }
}
