//! Grammar-preserving mutation
//!
//! Instead of purely stochastic edits, mutation respects the dependencies
//! between the mode and its associated parameter groups, and every edit
//! ends in a `sanitize` pass so no junk genes survive.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::grammar::{Mode, Strategy, MAX_REPEATS, MAX_TTL};
use crate::seed::{classify, PayloadKind};

/// Split-position expressions worth trying
pub(crate) const SPLIT_POSITIONS: [&str; 6] = ["1", "2", "3", "1,sniext+1", "2,sniext+1", "1,midsld"];

const TLS_MODS: [&str; 3] = ["", "rnd", "rndsni"];
const HOST_POSITIONS: [&str; 3] = ["1", "2", "method+2"];
const IPFRAG_POSITIONS: [&str; 3] = ["8", "16", "24"];
const BADSEQ_INCREMENTS: [i32; 4] = [0, -1, 1, -10000];

/// Probability that an individual boolean fooling flag flips
const FLAG_TOGGLE_P: f64 = 0.3;

/// Mutator bound to the discovered payload set
pub struct Mutator<'a> {
    payloads: &'a [String],
}

impl<'a> Mutator<'a> {
    pub fn new(payloads: &'a [String]) -> Self {
        Self { payloads }
    }

    /// One fine mutation: roulette over the mutation categories.
    ///
    /// 20% structure (mode), 40% mode-specific parameters (fake or split),
    /// 40% universal parameters (repeats, fooling, ttl).
    pub fn mutate<R: Rng + ?Sized>(&self, s: &mut Strategy, rng: &mut R) {
        let r: f64 = rng.gen();

        if r < 0.20 {
            self.mutate_mode(s, rng);
            s.sanitize(self.payloads, rng);
            return;
        }

        if r < 0.60 {
            if s.mode.is_fake() {
                self.mutate_fake(s, rng);
            } else {
                self.mutate_split(s, rng);
            }
        } else {
            match rng.gen_range(0..3) {
                0 => self.mutate_repeats(s, rng),
                1 => self.mutate_fooling(s, rng),
                _ => self.mutate_ttl(s, rng),
            }
        }

        s.sanitize(self.payloads, rng);
    }

    fn mutate_mode<R: Rng + ?Sized>(&self, s: &mut Strategy, rng: &mut R) {
        s.mode = *Mode::ALL.choose(rng).unwrap_or(&Mode::Fake);
    }

    fn mutate_repeats<R: Rng + ?Sized>(&self, s: &mut Strategy, rng: &mut R) {
        let delta: i16 = rng.gen_range(-1..=1);
        let next = i16::from(s.repeats) + delta;
        s.repeats = next.clamp(1, i16::from(MAX_REPEATS)) as u8;
    }

    fn mutate_fake<R: Rng + ?Sized>(&self, s: &mut Strategy, rng: &mut R) {
        let Some(payload) = self.payloads.choose(rng) else {
            return;
        };

        // Occasionally route the payload through one of the exotic carriers
        if rng.gen_bool(0.15) {
            s.fake = Default::default();
            let slot = rng.gen_range(0..6);
            let target = match slot {
                0 => &mut s.fake.http,
                1 => &mut s.fake.wireguard,
                2 => &mut s.fake.discord,
                3 => &mut s.fake.stun,
                4 => &mut s.fake.unknown_udp,
                _ => &mut s.fake.unknown,
            };
            *target = Some(payload.clone());
            return;
        }

        // Main toggle between the TLS and QUIC carriers
        if rng.gen_bool(0.5) {
            s.fake.tls = Some(payload.clone());
            s.fake.quic = None;
        } else {
            s.fake.quic = Some(payload.clone());
            s.fake.tls = None;
        }

        s.fake.tls_mod = if classify(payload) == PayloadKind::Raw {
            String::new()
        } else {
            (*TLS_MODS.choose(rng).unwrap_or(&"")).to_string()
        };
    }

    fn mutate_split<R: Rng + ?Sized>(&self, s: &mut Strategy, rng: &mut R) {
        if rng.gen_bool(0.5) {
            if let Ok(pos) = s.split.pos.parse::<i32>() {
                // Numeric positions walk, symbolic ones resample
                s.split.pos = (pos + rng.gen_range(-1..=1)).clamp(1, 8).to_string();
            } else {
                s.split.pos = (*SPLIT_POSITIONS.choose(rng).unwrap_or(&"1")).to_string();
            }
        }

        if rng.gen_bool(0.5) {
            if s.split.seqovl > 0 && rng.gen_bool(0.5) {
                s.split.seqovl = 0;
                s.split.pattern = None;
            } else {
                s.split.seqovl = 1 + rng.gen_range(0..1000);
                if !self.payloads.is_empty() && rng.gen_bool(0.3) {
                    s.split.pattern = self.payloads.choose(rng).cloned();
                }
            }
        }

        match s.mode {
            Mode::Fakedsplit => {
                if !self.payloads.is_empty() && rng.gen_bool(0.3) {
                    s.split.faked_pattern = self.payloads.choose(rng).cloned();
                }
            }
            Mode::Hostfakesplit => {
                s.split.host_pos = (*HOST_POSITIONS.choose(rng).unwrap_or(&"1")).to_string();
            }
            Mode::Ipfrag1 => {
                if rng.gen_bool(0.3) {
                    s.split.ipfrag_pos_udp =
                        (*IPFRAG_POSITIONS.choose(rng).unwrap_or(&"8")).to_string();
                }
            }
            _ => {}
        }
    }

    fn mutate_ttl<R: Rng + ?Sized>(&self, s: &mut Strategy, rng: &mut R) {
        if rng.gen_bool(0.5) {
            s.ttl.fixed = rng.gen_range(1..=10).min(MAX_TTL);
            s.ttl.auto = 0;
        } else {
            s.ttl.auto = rng.gen_range(1..=5).min(MAX_TTL);
            s.ttl.fixed = 0;
        }
    }

    fn mutate_fooling<R: Rng + ?Sized>(&self, s: &mut Strategy, rng: &mut R) {
        let f = &mut s.fooling;
        for flag in [
            &mut f.md5sig,
            &mut f.badsum,
            &mut f.badseq,
            &mut f.ts,
            &mut f.datanoack,
            &mut f.hop_by_hop,
            &mut f.hop_by_hop2,
        ] {
            if rng.gen_bool(FLAG_TOGGLE_P) {
                *flag = !*flag;
            }
        }
        if rng.gen_bool(0.15) {
            f.badseq_increment = *BADSEQ_INCREMENTS.choose(rng).unwrap_or(&0);
        }
    }
}
