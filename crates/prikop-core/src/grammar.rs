//! Packet-engine strategy grammar
//!
//! A [`Strategy`] is the typed genome the evolutionary search operates on:
//! a structured record of packet-engine command-line flags. The grammar
//! provides a deterministic argv serializer ([`Strategy::to_args`]), a
//! tolerant parser used for genome recovery ([`Strategy::parse`]) and
//! constraint enforcement with self-repair ([`Strategy::sanitize`]).
//!
//! The orchestrator never interprets these flags itself; it only assembles
//! them here and hands the result to the engine verbatim.

use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on `--dpi-desync-repeats`
pub const MAX_REPEATS: u8 = 20;
/// Upper bound on fixed and auto TTL values
pub const MAX_TTL: u8 = 12;

/// Desynchronization mode, the structural root of the genome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Inject decoy payloads ahead of the real flow
    #[default]
    Fake,
    /// Segment the flow at symbolic positions
    Multisplit,
    /// Segment and reorder
    Multidisorder,
    /// Segment with a decoy first segment
    Fakedsplit,
    /// IP-level fragmentation
    Ipfrag1,
    /// Host-anchored decoy split
    Hostfakesplit,
}

impl Mode {
    /// All modes, for uniform resampling
    pub const ALL: [Mode; 6] = [
        Mode::Fake,
        Mode::Multisplit,
        Mode::Multidisorder,
        Mode::Fakedsplit,
        Mode::Ipfrag1,
        Mode::Hostfakesplit,
    ];

    /// Flag value as the engine expects it
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Fake => "fake",
            Mode::Multisplit => "multisplit",
            Mode::Multidisorder => "multidisorder",
            Mode::Fakedsplit => "fakedsplit",
            Mode::Ipfrag1 => "ipfrag1",
            Mode::Hostfakesplit => "hostfakesplit",
        }
    }

    /// Whether this mode carries decoy payload options
    pub fn is_fake(self) -> bool {
        matches!(self, Mode::Fake)
    }

    /// Whether this mode carries split options
    pub fn uses_split(self) -> bool {
        !self.is_fake()
    }

    /// Substring-based detection with fixed priority, tolerating the
    /// engine's legacy aliases (`split2`, `disorder2`).
    pub fn detect(s: &str) -> Mode {
        if s.contains("split2") || s.contains("multisplit") {
            Mode::Multisplit
        } else if s.contains("disorder2") || s.contains("multidisorder") {
            Mode::Multidisorder
        } else if s.contains("fakedsplit") {
            Mode::Fakedsplit
        } else if s.contains("ipfrag1") {
            Mode::Ipfrag1
        } else if s.contains("hostfakesplit") {
            Mode::Hostfakesplit
        } else {
            Mode::Fake
        }
    }
}

/// Fooling flags plus their signed increments
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FoolingSet {
    pub md5sig: bool,
    pub badsum: bool,
    pub badseq: bool,
    pub ts: bool,
    pub datanoack: bool,
    pub hop_by_hop: bool,
    pub hop_by_hop2: bool,
    /// Offset applied to the decoy sequence number, 0 = engine default
    pub badseq_increment: i32,
    /// Offset applied to the decoy ack number, 0 = engine default
    pub badack_increment: i32,
    /// Offset applied to the decoy TCP timestamp, 0 = engine default
    pub ts_increment: i32,
}

impl FoolingSet {
    /// Enabled flags in the fixed emit order
    pub fn tokens(&self) -> Vec<&'static str> {
        let mut t = Vec::new();
        if self.md5sig {
            t.push("md5sig");
        }
        if self.badsum {
            t.push("badsum");
        }
        if self.badseq {
            t.push("badseq");
        }
        if self.ts {
            t.push("ts");
        }
        if self.datanoack {
            t.push("datanoack");
        }
        if self.hop_by_hop {
            t.push("hopbyhop");
        }
        if self.hop_by_hop2 {
            t.push("hopbyhop2");
        }
        t
    }

    fn set_token(&mut self, token: &str) {
        match token {
            "md5sig" => self.md5sig = true,
            "badsum" => self.badsum = true,
            "badseq" => self.badseq = true,
            "ts" => self.ts = true,
            "datanoack" => self.datanoack = true,
            "hopbyhop" => self.hop_by_hop = true,
            "hopbyhop2" => self.hop_by_hop2 = true,
            _ => {} // unknown fooling token, ignored
        }
    }
}

/// Decoy payload bindings and their modifiers
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FakeSet {
    pub tls: Option<String>,
    pub quic: Option<String>,
    pub http: Option<String>,
    pub wireguard: Option<String>,
    pub dht: Option<String>,
    pub discord: Option<String>,
    pub stun: Option<String>,
    pub unknown_udp: Option<String>,
    pub unknown: Option<String>,
    pub syn_data: Option<String>,
    /// TLS decoy modifier: empty, `rnd` or `rndsni`
    pub tls_mod: String,
    /// TCP decoy modifier, passed through verbatim
    pub tcp_mod: String,
}

impl FakeSet {
    /// Whether any payload slot is bound
    pub fn any_payload(&self) -> bool {
        self.slots().iter().any(|(_, p)| p.is_some())
    }

    /// Payload paths currently bound, for invariant checks
    pub fn paths(&self) -> Vec<&str> {
        self.slots()
            .into_iter()
            .filter_map(|(_, p)| p.as_deref())
            .collect()
    }

    fn slots(&self) -> [(&'static str, &Option<String>); 10] {
        [
            ("tls", &self.tls),
            ("quic", &self.quic),
            ("http", &self.http),
            ("wireguard", &self.wireguard),
            ("dht", &self.dht),
            ("discord", &self.discord),
            ("stun", &self.stun),
            ("unknown-udp", &self.unknown_udp),
            ("unknown", &self.unknown),
            ("syndata", &self.syn_data),
        ]
    }

    fn slot_mut(&mut self, name: &str) -> Option<&mut Option<String>> {
        match name {
            "tls" => Some(&mut self.tls),
            "quic" => Some(&mut self.quic),
            "http" => Some(&mut self.http),
            "wireguard" => Some(&mut self.wireguard),
            "dht" => Some(&mut self.dht),
            "discord" => Some(&mut self.discord),
            "stun" => Some(&mut self.stun),
            "unknown-udp" => Some(&mut self.unknown_udp),
            "unknown" => Some(&mut self.unknown),
            "syndata" => Some(&mut self.syn_data),
            _ => None,
        }
    }
}

/// Split options shared by the segmenting modes
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitSet {
    /// Symbolic split position expression, e.g. `2,sniext+1`
    pub pos: String,
    /// Sequence overlap length; 0 disables the overlay
    pub seqovl: u32,
    /// Overlay pattern payload, only meaningful with `seqovl > 0`
    pub pattern: Option<String>,
    /// Decoy pattern for the fakedsplit variant
    pub faked_pattern: Option<String>,
    /// Position expression for the host-anchored variant
    pub host_pos: String,
    /// UDP fragmentation position for the ipfrag variant
    pub ipfrag_pos_udp: String,
}

impl SplitSet {
    /// Whether any split field is set
    pub fn any_set(&self) -> bool {
        !self.pos.is_empty()
            || self.seqovl > 0
            || self.pattern.is_some()
            || self.faked_pattern.is_some()
            || !self.host_pos.is_empty()
            || !self.ipfrag_pos_udp.is_empty()
    }
}

/// Fixed XOR automatic TTL for decoy packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlSet {
    /// Fixed TTL, 0 = unset
    pub fixed: u8,
    /// Auto-derived TTL delta, 0 = unset
    pub auto: u8,
}

impl TtlSet {
    /// Larger of the two settings, used by the complexity metric
    pub fn effective(&self) -> u8 {
        self.fixed.max(self.auto)
    }
}

/// TCP window-size clamping
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WssSet {
    pub enabled: bool,
    /// Clamp expression, defaults to `1:6` when enabled and empty
    pub value: String,
}

/// One strategy genome: a structured engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Strategy {
    pub mode: Mode,
    /// Desync repetition count, 1..=20; 1 is the engine default and omitted
    pub repeats: u8,
    pub any_protocol: bool,
    pub skip_no_sni: bool,
    pub cutoff: String,
    pub start: String,
    pub fwmark: String,
    pub fooling: FoolingSet,
    pub fake: FakeSet,
    pub split: SplitSet,
    pub ttl: TtlSet,
    pub wss: WssSet,
    /// Raw `--dpi-desync-udplen-*` flags, carried verbatim
    pub udp_len: Option<String>,
    /// Raw `--synack*` flags, carried verbatim
    pub tcp_flags: Option<String>,
    /// Raw host tamper flags (`--hostcase` family), carried verbatim
    pub tamper: Option<String>,
    /// Raw `--dup*` flags, carried verbatim
    pub dup: Option<String>,
    /// Raw `--orig-*` flags, carried verbatim
    pub orig: Option<String>,
}

static FLAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^--([A-Za-z0-9][A-Za-z0-9-]*?)(?:=(.*))?$").unwrap());

impl Strategy {
    /// Minimal valid strategy for the given mode
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            repeats: 1,
            ..Self::default()
        }
    }

    /// Deterministic, stable argv serializer.
    ///
    /// Flags are emitted in a fixed section order: main, fooling, fake,
    /// split, udp_len, ttl, tcp_flags, wss, tamper, dup, orig. Zero-valued
    /// fields are omitted; `repeats = 1` is the engine default and omitted.
    pub fn to_args(&self) -> String {
        let mut args: Vec<String> = Vec::new();

        // main
        args.push(format!("--dpi-desync={}", self.mode.as_str()));
        if self.repeats > 1 {
            args.push(format!("--dpi-desync-repeats={}", self.repeats));
        }
        if self.any_protocol {
            args.push("--dpi-desync-any-protocol".to_string());
        }
        if self.skip_no_sni {
            args.push("--dpi-desync-skip-nosni".to_string());
        }
        if !self.cutoff.is_empty() {
            args.push(format!("--dpi-desync-cutoff={}", self.cutoff));
        }
        if !self.start.is_empty() {
            args.push(format!("--dpi-desync-start={}", self.start));
        }
        if !self.fwmark.is_empty() {
            args.push(format!("--fwmark={}", self.fwmark));
        }

        // fooling
        let tokens = self.fooling.tokens();
        if !tokens.is_empty() {
            args.push(format!("--dpi-desync-fooling={}", tokens.join(",")));
        }
        if self.fooling.badseq_increment != 0 {
            args.push(format!(
                "--dpi-desync-badseq-increment={}",
                self.fooling.badseq_increment
            ));
        }
        if self.fooling.badack_increment != 0 {
            args.push(format!(
                "--dpi-desync-badack-increment={}",
                self.fooling.badack_increment
            ));
        }
        if self.fooling.ts_increment != 0 {
            args.push(format!(
                "--dpi-desync-ts-increment={}",
                self.fooling.ts_increment
            ));
        }

        // fake
        for (name, path) in self.fake.slots() {
            if let Some(path) = path {
                args.push(format!("--dpi-desync-fake-{name}={path}"));
            }
        }
        if (self.fake.tls.is_some() || self.fake.quic.is_some()) && !self.fake.tls_mod.is_empty() {
            args.push(format!("--dpi-desync-fake-tls-mod={}", self.fake.tls_mod));
        }
        if !self.fake.tcp_mod.is_empty() {
            args.push(format!("--dpi-desync-fake-tcp-mod={}", self.fake.tcp_mod));
        }

        // split
        if !self.split.pos.is_empty() {
            args.push(format!("--dpi-desync-split-pos={}", self.split.pos));
        }
        if self.split.seqovl > 0 {
            args.push(format!("--dpi-desync-split-seqovl={}", self.split.seqovl));
            if let Some(pattern) = &self.split.pattern {
                args.push(format!("--dpi-desync-split-seqovl-pattern={pattern}"));
            }
        }
        if let Some(pattern) = &self.split.faked_pattern {
            args.push(format!("--dpi-desync-fakedsplit-pattern={pattern}"));
        }
        if !self.split.host_pos.is_empty() {
            args.push(format!(
                "--dpi-desync-hostfakesplit-pos={}",
                self.split.host_pos
            ));
        }
        if !self.split.ipfrag_pos_udp.is_empty() {
            args.push(format!(
                "--dpi-desync-ipfrag-pos-udp={}",
                self.split.ipfrag_pos_udp
            ));
        }

        // udp_len
        if let Some(raw) = &self.udp_len {
            args.push(raw.clone());
        }

        // ttl
        if self.ttl.fixed > 0 {
            args.push(format!("--dpi-desync-ttl={}", self.ttl.fixed));
        } else if self.ttl.auto > 0 {
            args.push(format!("--dpi-desync-autottl={}", self.ttl.auto));
        }

        // tcp_flags
        if let Some(raw) = &self.tcp_flags {
            args.push(raw.clone());
        }

        // wss
        if self.wss.enabled {
            let value = if self.wss.value.is_empty() {
                "1:6"
            } else {
                &self.wss.value
            };
            args.push(format!("--wssize={value}"));
        }

        // tamper, dup, orig
        if let Some(raw) = &self.tamper {
            args.push(raw.clone());
        }
        if let Some(raw) = &self.dup {
            args.push(raw.clone());
        }
        if let Some(raw) = &self.orig {
            args.push(raw.clone());
        }

        args.join(" ")
    }

    /// Recover a genome from serialized args.
    ///
    /// Unknown flags are ignored; out-of-range numerics are clamped. Mode
    /// detection is substring-based with priority
    /// `multisplit > multidisorder > fakedsplit > ipfrag1 > hostfakesplit > fake`.
    pub fn parse(s: &str) -> Strategy {
        let mut st = Strategy::new(Mode::detect(s));

        for token in s.split_whitespace() {
            let Some(caps) = FLAG_RE.captures(token) else {
                continue;
            };
            let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let value = caps.get(2).map(|m| m.as_str()).unwrap_or_default();

            match name {
                "dpi-desync" => {} // handled by Mode::detect
                "dpi-desync-repeats" => {
                    st.repeats = clamp_u8(value, 1, MAX_REPEATS, 1);
                }
                "dpi-desync-any-protocol" => st.any_protocol = true,
                "dpi-desync-skip-nosni" => st.skip_no_sni = true,
                "dpi-desync-cutoff" => st.cutoff = value.to_string(),
                "dpi-desync-start" => st.start = value.to_string(),
                "fwmark" => st.fwmark = value.to_string(),
                "dpi-desync-fooling" => {
                    for tok in value.split(',') {
                        st.fooling.set_token(tok);
                    }
                }
                "dpi-desync-badseq-increment" => {
                    st.fooling.badseq_increment = value.parse().unwrap_or(0);
                }
                "dpi-desync-badack-increment" => {
                    st.fooling.badack_increment = value.parse().unwrap_or(0);
                }
                "dpi-desync-ts-increment" => {
                    st.fooling.ts_increment = value.parse().unwrap_or(0);
                }
                "dpi-desync-fake-tls-mod" => st.fake.tls_mod = value.to_string(),
                "dpi-desync-fake-tcp-mod" => st.fake.tcp_mod = value.to_string(),
                "dpi-desync-split-pos" => st.split.pos = value.to_string(),
                "dpi-desync-split-seqovl" => {
                    st.split.seqovl = value.parse().unwrap_or(0);
                }
                "dpi-desync-split-seqovl-pattern" => {
                    st.split.pattern = Some(value.to_string());
                }
                "dpi-desync-fakedsplit-pattern" => {
                    st.split.faked_pattern = Some(value.to_string());
                }
                "dpi-desync-hostfakesplit-pos" => st.split.host_pos = value.to_string(),
                "dpi-desync-ipfrag-pos-udp" => st.split.ipfrag_pos_udp = value.to_string(),
                "dpi-desync-ttl" => {
                    st.ttl.fixed = clamp_u8(value, 0, MAX_TTL, 0);
                }
                "dpi-desync-autottl" => {
                    st.ttl.auto = clamp_u8(value, 0, MAX_TTL, 0);
                }
                "wssize" => {
                    st.wss.enabled = true;
                    st.wss.value = value.to_string();
                }
                _ => {
                    if let Some(rest) = name.strip_prefix("dpi-desync-fake-") {
                        if let Some(slot) = st.fake.slot_mut(rest) {
                            *slot = Some(value.to_string());
                            continue;
                        }
                    }
                    if name.starts_with("dpi-desync-udplen") {
                        push_raw(&mut st.udp_len, token);
                    } else if name.starts_with("synack") {
                        push_raw(&mut st.tcp_flags, token);
                    } else if matches!(name, "hostcase" | "hostnospace" | "hostspell" | "domcase") {
                        push_raw(&mut st.tamper, token);
                    } else if name == "dup" || name.starts_with("dup-") {
                        push_raw(&mut st.dup, token);
                    } else if name.starts_with("orig-") {
                        push_raw(&mut st.orig, token);
                    }
                    // anything else: unknown flag, ignored
                }
            }
        }

        st
    }

    /// Enforce the grammar constraints, repairing where possible.
    ///
    /// - Fake mode clears split options; split modes clear fake options.
    /// - Fake mode without a payload gets a random one from the discovered
    ///   set (self-repair).
    /// - Fixed and auto TTL are mutually exclusive; fixed wins.
    /// - Payload references outside the discovered set are rebound.
    pub fn sanitize<R: Rng + ?Sized>(&mut self, payloads: &[String], rng: &mut R) {
        self.repeats = self.repeats.clamp(1, MAX_REPEATS);
        self.ttl.fixed = self.ttl.fixed.min(MAX_TTL);
        self.ttl.auto = self.ttl.auto.min(MAX_TTL);
        if self.ttl.fixed > 0 && self.ttl.auto > 0 {
            self.ttl.auto = 0;
        }

        if self.mode.is_fake() {
            self.split = SplitSet::default();
        } else {
            self.fake = FakeSet::default();
        }

        if self.split.seqovl == 0 {
            self.split.pattern = None;
        }

        // Modifiers ride on the TLS/QUIC carriers; the wss clamp always has
        // a concrete value once enabled. Both keep the serialized form and
        // the genome in lockstep.
        if self.fake.tls.is_none() && self.fake.quic.is_none() {
            self.fake.tls_mod.clear();
        }
        if self.wss.enabled && self.wss.value.is_empty() {
            self.wss.value = "1:6".to_string();
        }

        if !payloads.is_empty() {
            self.rebind_foreign_payloads(payloads, rng);
        }

        // Self-repair: a fake strategy with nothing to inject is dead weight
        if self.mode.is_fake() && !self.fake.any_payload() {
            if let Some(payload) = payloads.choose(rng) {
                match crate::seed::classify(payload) {
                    crate::seed::PayloadKind::Quic => self.fake.quic = Some(payload.clone()),
                    _ => self.fake.tls = Some(payload.clone()),
                }
            }
        }
    }

    fn rebind_foreign_payloads<R: Rng + ?Sized>(&mut self, payloads: &[String], rng: &mut R) {
        let known = |p: &String| payloads.iter().any(|k| k == p);
        for slot in [
            &mut self.fake.tls,
            &mut self.fake.quic,
            &mut self.fake.http,
            &mut self.fake.wireguard,
            &mut self.fake.dht,
            &mut self.fake.discord,
            &mut self.fake.stun,
            &mut self.fake.unknown_udp,
            &mut self.fake.unknown,
            &mut self.fake.syn_data,
            &mut self.split.pattern,
            &mut self.split.faked_pattern,
        ] {
            if let Some(path) = slot {
                if !known(path) {
                    *slot = payloads.choose(rng).cloned();
                }
            }
        }
    }

    /// Structural complexity used as the fitness penalty.
    ///
    /// Decoy injection costs 1, any split configuration 2, repeats scale
    /// super-linearly past 3 and 6, and the effective TTL adds its value.
    pub fn complexity(&self) -> u32 {
        let mut c = 0;
        if self.fake.any_payload() {
            c += 1;
        }
        if self.split.any_set() {
            c += 2;
        }
        let r = u32::from(self.repeats);
        c += if r <= 3 {
            r
        } else if r <= 6 {
            r * 2
        } else {
            r * 4
        };
        c + u32::from(self.ttl.effective())
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_args())
    }
}

fn clamp_u8(value: &str, min: u8, max: u8, fallback: u8) -> u8 {
    value
        .parse::<i64>()
        .map(|v| v.clamp(i64::from(min), i64::from(max)) as u8)
        .unwrap_or(fallback)
}

fn push_raw(slot: &mut Option<String>, token: &str) {
    match slot {
        Some(raw) => {
            raw.push(' ');
            raw.push_str(token);
        }
        None => *slot = Some(token.to_string()),
    }
}
