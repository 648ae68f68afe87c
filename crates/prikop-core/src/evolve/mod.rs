//! Evolutionary step
//!
//! Takes the scored results of the previous generation and produces the
//! next population of exactly the configured size: elites, fine mutants,
//! crossover children and — depending on how the best parent is doing —
//! either exploitation mutants or exploratory chaos.

mod chaos;
mod mutator;

pub use chaos::{generate as generate_chaos, random_strategy};
pub use mutator::Mutator;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::SearchConfig;
use crate::grammar::Strategy;
use crate::score::rank;
use crate::types::ScoredStrategy;

/// Success percentage above which the search switches from exploration to
/// exploitation of the best parent.
pub const STABLE_SUCCESS_RATE: u32 = 60;

/// How the remaining population slots are filled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Saturate with fine mutations of the best parent
    Exploit,
    /// Inject fully random strategies to find a path
    Explore,
}

/// Decide the fill mode from the ranked previous generation.
pub fn fill_mode(ranked: &[ScoredStrategy]) -> FillMode {
    match ranked.first() {
        Some(best) if best.result.success_rate() > STABLE_SUCCESS_RATE => FillMode::Exploit,
        _ => FillMode::Explore,
    }
}

/// Produce the next generation, seeding the PRNG from the clock.
pub fn evolve(
    results: &[ScoredStrategy],
    payloads: &[String],
    cfg: &SearchConfig,
) -> Vec<Strategy> {
    let mut rng = StdRng::seed_from_u64(clock_seed());
    evolve_with(results, payloads, cfg, &mut rng)
}

/// Produce the next generation with an injected PRNG (used by tests).
pub fn evolve_with<R: Rng + ?Sized>(
    results: &[ScoredStrategy],
    payloads: &[String],
    cfg: &SearchConfig,
    rng: &mut R,
) -> Vec<Strategy> {
    let mut ranked = results.to_vec();
    rank(&mut ranked, cfg.complexity_alpha);

    let mutator = Mutator::new(payloads);
    let mut next: Vec<Strategy> = Vec::with_capacity(cfg.population);

    // 1. Elitism: the best survive untouched
    for parent in ranked.iter().take(cfg.elites as usize) {
        next.push(parent.strategy.clone());
    }

    // 2. Fine mutation over the breeding pool
    let pool = ranked.len().min(10);
    for parent in ranked.iter().take(pool) {
        for _ in 0..3 {
            let mut child = parent.strategy.clone();
            mutator.mutate(&mut child, rng);
            next.push(child);
        }
    }

    // 3. Crossover: base from p1, decoy and TTL groups from p2
    if ranked.len() >= 2 {
        for _ in 0..10 {
            let p1 = &ranked[rng.gen_range(0..pool)];
            let p2 = &ranked[rng.gen_range(0..pool)];
            let mut child = p1.strategy.clone();
            child.fake = p2.strategy.fake.clone();
            child.ttl = p2.strategy.ttl;
            if rng.gen_bool(0.3) {
                mutator.mutate(&mut child, rng);
            } else {
                child.sanitize(payloads, rng);
            }
            next.push(child);
        }
    }

    // 4. Population control: truncate the surplus, fill the deficit
    next.truncate(cfg.population);
    let mode = fill_mode(&ranked);
    while next.len() < cfg.population {
        match mode {
            FillMode::Exploit => {
                let mut child = ranked[0].strategy.clone();
                mutator.mutate(&mut child, rng);
                next.push(child);
            }
            FillMode::Explore => next.push(chaos::random_strategy(payloads, rng)),
        }
    }

    next
}

/// PRNG seed from the system clock, nanosecond resolution.
pub(crate) fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
