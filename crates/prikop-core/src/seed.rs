//! Zero-generation seeding
//!
//! Builds the initial population from the discovered decoy payload files
//! and the reconnaissance report: a couple of "naked" split strategies that
//! need no payload, then three targeted hypotheses per payload file.

use crate::grammar::{Mode, Strategy};
use crate::types::ReconReport;

/// What a payload file most likely contains, judged by its filename
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// A captured TLS ClientHello
    Tls,
    /// A captured QUIC Initial
    Quic,
    /// Unrecognized capture, used as a raw carrier with modifiers disabled
    Raw,
}

/// Classify a payload file by filename substrings.
pub fn classify(path: &str) -> PayloadKind {
    let name = path.rsplit('/').next().unwrap_or(path).to_ascii_lowercase();
    if name.contains("quic") {
        PayloadKind::Quic
    } else if name.contains("tls") || name.contains("clienthello") {
        PayloadKind::Tls
    } else {
        PayloadKind::Raw
    }
}

/// Build the zero generation.
///
/// Every emitted strategy is already grammar-valid, so `sanitize` is a
/// no-op on it.
pub fn seed(payloads: &[String], report: &ReconReport) -> Vec<Strategy> {
    let mut population = Vec::with_capacity(3 + payloads.len() * 3);

    // Naked checks: base modes that work without any decoy
    let mut naked_split = Strategy::new(Mode::Multisplit);
    naked_split.split.pos = "1".into();
    naked_split.repeats = 2;
    population.push(naked_split);

    let mut naked_disorder = Strategy::new(Mode::Multidisorder);
    naked_disorder.split.pos = "1".into();
    naked_disorder.repeats = 2;
    naked_disorder.wss.enabled = true;
    naked_disorder.wss.value = "1:6".into();
    population.push(naked_disorder);

    // Fragmentation only earns a seat if the scout saw it survive
    if report.ip_frag_works {
        let mut frag = Strategy::new(Mode::Ipfrag1);
        frag.repeats = 2;
        population.push(frag);
    }

    // The sniper: three targeted hypotheses per discovered payload
    for payload in payloads {
        let kind = classify(payload);

        // Hypothesis A: TLS decoy with SNI randomization
        let mut a = Strategy::new(Mode::Fake);
        a.repeats = 4;
        a.fake.tls = Some(payload.clone());
        if kind != PayloadKind::Raw {
            a.fake.tls_mod = "rndsni".into();
        }
        a.fooling.md5sig = true;
        a.fooling.badseq = true;
        a.fooling.badsum = report.bad_sum_works;
        population.push(a);

        // Hypothesis B: QUIC decoy
        let mut b = Strategy::new(Mode::Fake);
        b.repeats = 4;
        b.fake.quic = Some(payload.clone());
        if kind != PayloadKind::Raw {
            b.fake.tls_mod = "rnd".into();
        }
        b.fooling.md5sig = true;
        b.fooling.badsum = report.bad_sum_works;
        population.push(b);

        // Hypothesis C: the payload as a split overlay pattern
        let mut c = Strategy::new(Mode::Multisplit);
        c.repeats = 3;
        c.split.pos = "2".into();
        c.split.seqovl = 336; // approximate ClientHello length
        c.split.pattern = Some(payload.clone());
        population.push(c);
    }

    population
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn payloads() -> Vec<String> {
        vec![
            "/app/fake/tls_clienthello_www_google_com.bin".to_string(),
            "/app/fake/quic_initial_www_google_com.bin".to_string(),
            "/app/fake/capture_017.bin".to_string(),
        ]
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("/p/tls_clienthello_iana_org.bin"), PayloadKind::Tls);
        assert_eq!(classify("/p/clienthello_dump.bin"), PayloadKind::Tls);
        assert_eq!(classify("/p/quic_initial.bin"), PayloadKind::Quic);
        assert_eq!(classify("/p/capture_017.bin"), PayloadKind::Raw);
        // only the filename counts, not the directory
        assert_eq!(classify("/tls_store/capture.bin"), PayloadKind::Raw);
    }

    #[test]
    fn test_seed_counts_with_pruned_ipfrag() {
        let report = ReconReport {
            ip_frag_works: false,
            bad_sum_works: true,
        };
        let population = seed(&payloads(), &report);
        // 2 naked + 3 payloads x 3 hypotheses
        assert_eq!(population.len(), 11);
        assert!(population.iter().all(|s| s.mode != Mode::Ipfrag1));
    }

    #[test]
    fn test_seed_includes_ipfrag_when_scout_approves() {
        let report = ReconReport {
            ip_frag_works: true,
            bad_sum_works: false,
        };
        let population = seed(&payloads(), &report);
        assert_eq!(population.len(), 12);
        assert!(population.iter().any(|s| s.mode == Mode::Ipfrag1));
    }

    #[test]
    fn test_seed_badsum_boost_applies_to_every_fake() {
        let report = ReconReport {
            ip_frag_works: false,
            bad_sum_works: true,
        };
        let population = seed(&payloads(), &report);
        let fakes: Vec<_> = population.iter().filter(|s| s.mode == Mode::Fake).collect();
        assert!(!fakes.is_empty());
        assert!(fakes.iter().all(|s| s.fooling.badsum));
        assert!(fakes.iter().all(|s| s.fooling.md5sig));
    }

    #[test]
    fn test_seed_without_badsum_boost() {
        let report = ReconReport::default();
        let population = seed(&payloads(), &report);
        assert!(population
            .iter()
            .filter(|s| s.mode == Mode::Fake)
            .all(|s| !s.fooling.badsum));
    }

    #[test]
    fn test_seed_raw_carrier_disables_modifiers() {
        let report = ReconReport::default();
        let raw_only = vec!["/app/fake/capture_017.bin".to_string()];
        let population = seed(&raw_only, &report);
        for s in population.iter().filter(|s| s.mode == Mode::Fake) {
            assert!(s.fake.tls_mod.is_empty());
        }
    }

    #[test]
    fn test_seed_output_is_sanitize_fixpoint() {
        let report = ReconReport {
            ip_frag_works: true,
            bad_sum_works: true,
        };
        let payloads = payloads();
        let mut rng = StdRng::seed_from_u64(42);
        for s in seed(&payloads, &report) {
            let mut sanitized = s.clone();
            sanitized.sanitize(&payloads, &mut rng);
            assert_eq!(sanitized, s, "seeded strategy changed under sanitize: {s}");
        }
    }

    #[test]
    fn test_seed_overlay_hypothesis_shape() {
        let report = ReconReport::default();
        let population = seed(&payloads(), &report);
        let overlay = population
            .iter()
            .find(|s| s.mode == Mode::Multisplit && s.split.seqovl > 0)
            .expect("overlay hypothesis missing");
        assert_eq!(overlay.split.pos, "2");
        assert_eq!(overlay.split.seqovl, 336);
        assert!(overlay.split.pattern.is_some());
    }
}
