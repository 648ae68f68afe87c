//! Chaos generation: fully randomized but grammar-valid strategies
//!
//! Used as exploration fuel when the search has no working baseline yet,
//! and as fresh blood when a generation comes up short.

use rand::seq::SliceRandom;
use rand::Rng;

use super::mutator::SPLIT_POSITIONS;
use crate::grammar::{Mode, Strategy, MAX_REPEATS, MAX_TTL};
use crate::seed::{classify, PayloadKind};

// Fake is weighted double: decoy injection is the widest part of the space
const CHAOS_MODES: [Mode; 5] = [
    Mode::Fake,
    Mode::Fake,
    Mode::Multidisorder,
    Mode::Multisplit,
    Mode::Fakedsplit,
];

const CHAOS_FOOLING: [&str; 4] = ["ts", "md5sig", "badsum", "datanoack"];
const TLS_MODS: [&str; 3] = ["", "rnd", "rndsni"];

/// Produce one random strategy, sanitized against the payload set.
pub fn random_strategy<R: Rng + ?Sized>(payloads: &[String], rng: &mut R) -> Strategy {
    let mut s = Strategy::new(*CHAOS_MODES.choose(rng).unwrap_or(&Mode::Fake));
    s.repeats = rng.gen_range(1..MAX_REPEATS);

    if matches!(s.mode, Mode::Fake | Mode::Fakedsplit) {
        match *CHAOS_FOOLING.choose(rng).unwrap_or(&"md5sig") {
            "ts" => s.fooling.ts = true,
            "badsum" => s.fooling.badsum = true,
            "datanoack" => s.fooling.datanoack = true,
            _ => s.fooling.md5sig = true,
        }
    }

    if s.mode.is_fake() {
        if let Some(payload) = payloads.choose(rng) {
            if classify(payload) == PayloadKind::Quic {
                s.fake.quic = Some(payload.clone());
            } else {
                s.fake.tls = Some(payload.clone());
            }
            if classify(payload) != PayloadKind::Raw {
                s.fake.tls_mod = (*TLS_MODS.choose(rng).unwrap_or(&"")).to_string();
            }
        }
    } else {
        s.split.pos = (*SPLIT_POSITIONS.choose(rng).unwrap_or(&"1")).to_string();
        if rng.gen_bool(0.5) {
            s.split.seqovl = 1;
        }
    }

    if rng.gen_bool(1.0 / 3.0) {
        s.wss.enabled = true;
    }
    if rng.gen_bool(0.5) {
        s.ttl.fixed = rng.gen_range(1..MAX_TTL);
    } else {
        s.ttl.auto = rng.gen_range(1..=MAX_TTL / 2);
    }

    s.sanitize(payloads, rng);
    s
}

/// Produce `n` random strategies.
pub fn generate<R: Rng + ?Sized>(n: usize, payloads: &[String], rng: &mut R) -> Vec<Strategy> {
    (0..n).map(|_| random_strategy(payloads, rng)).collect()
}
