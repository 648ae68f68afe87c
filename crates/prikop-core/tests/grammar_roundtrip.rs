//! Property tests for the strategy grammar
//!
//! The recognized flag subset must be a fixpoint of `parse(to_args(..))`
//! for any sanitized genome, including genomes produced by long mutation
//! chains and by the chaos generator.

use prikop_core::evolve::{generate_chaos, Mutator};
use prikop_core::grammar::{Mode, Strategy};
use prikop_core::seed::seed;
use prikop_core::types::ReconReport;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn payloads() -> Vec<String> {
    vec![
        "/app/fake/tls_clienthello_www_google_com.bin".to_string(),
        "/app/fake/quic_initial_www_google_com.bin".to_string(),
        "/app/fake/capture_017.bin".to_string(),
    ]
}

fn assert_roundtrip(s: &Strategy) {
    let emitted = s.to_args();
    let parsed = Strategy::parse(&emitted);
    assert_eq!(&parsed, s, "parse(to_args(..)) diverged for: {emitted}");
    assert_eq!(parsed.to_args(), emitted, "re-serialization diverged");
}

proptest! {
    #[test]
    fn chaos_strategies_roundtrip(seed_value in any::<u64>()) {
        let payloads = payloads();
        let mut rng = StdRng::seed_from_u64(seed_value);
        for s in generate_chaos(8, &payloads, &mut rng) {
            assert_roundtrip(&s);
        }
    }

    #[test]
    fn mutation_chains_roundtrip(seed_value in any::<u64>()) {
        let payloads = payloads();
        let mutator = Mutator::new(&payloads);
        let mut rng = StdRng::seed_from_u64(seed_value);
        let mut s = Strategy::new(Mode::Multisplit);
        s.split.pos = "1".into();
        for _ in 0..25 {
            mutator.mutate(&mut s, &mut rng);
            assert_roundtrip(&s);
        }
    }
}

#[test]
fn seeded_strategies_roundtrip() {
    let payloads = payloads();
    for report in [
        ReconReport::default(),
        ReconReport {
            ip_frag_works: true,
            bad_sum_works: true,
        },
    ] {
        for s in seed(&payloads, &report) {
            assert_roundtrip(&s);
        }
    }
}

#[test]
fn raw_groups_roundtrip_through_the_recognized_subset() {
    let input = "--dpi-desync=fakedsplit --dpi-desync-repeats=3 \
                 --dpi-desync-udplen-increment=25 --hostcase --domcase \
                 --dup-ttl=1 --orig-ttl=9 --synack-split=syn";
    let parsed = Strategy::parse(input);
    let emitted = parsed.to_args();
    // every recognized token survives
    for token in input.split_whitespace() {
        assert!(emitted.contains(token), "{token} lost in {emitted}");
    }
    // and the emitted form is stable
    assert_eq!(Strategy::parse(&emitted).to_args(), emitted);
}

#[test]
fn unknown_flags_are_dropped_not_fatal() {
    let input = "--dpi-desync=fake --qnum=200 --filter-tcp=80,443 \
                 --hostlist=/targets/google.txt --dpi-desync-repeats=2";
    let parsed = Strategy::parse(input);
    assert_eq!(parsed.mode, Mode::Fake);
    assert_eq!(parsed.repeats, 2);
    let emitted = parsed.to_args();
    assert!(!emitted.contains("qnum"));
    assert!(!emitted.contains("filter-tcp"));
    assert!(!emitted.contains("hostlist"));
}
