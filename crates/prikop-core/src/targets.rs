//! Canary target catalog
//!
//! Named probe groups the worker evaluators exercise through the engine.
//! Each group resolves to a list of probes; the verifier kind picks the
//! list and knows which transport the probes ride on.

/// Transport a probe uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Proto {
    #[default]
    Tcp,
    Udp,
    Quic,
    Stun,
}

/// One canary probe
#[derive(Debug, Clone)]
pub struct Target {
    /// URL for HTTP probes, `host:port` for STUN probes
    pub url: String,
    /// Bytes of body that must arrive for the probe to pass
    pub threshold: usize,
    pub proto: Proto,
    /// Accept any status code, not just 2xx/3xx
    pub ignore_status: bool,
    /// How many times the probe is attempted within one evaluation
    pub times: u32,
}

impl Target {
    fn http(url: &str, threshold: usize) -> Self {
        Self {
            url: url.to_string(),
            threshold,
            proto: Proto::Tcp,
            ignore_status: false,
            times: 1,
        }
    }

    fn quic(url: &str, threshold: usize) -> Self {
        Self {
            proto: Proto::Quic,
            ..Self::http(url, threshold)
        }
    }

    fn stun(addr: &str) -> Self {
        Self {
            url: addr.to_string(),
            threshold: 0,
            proto: Proto::Stun,
            ignore_status: true,
            times: 1,
        }
    }

    fn any_status(mut self) -> Self {
        self.ignore_status = true;
        self
    }
}

/// Body threshold for CDN-hosted binary assets
const BINARY_THRESHOLD: usize = 64 * 1024;
/// Body threshold for ordinary web pages
const WEB_THRESHOLD: usize = 1000;

/// Verifier selection by target group, dispatched to distinct probe lists
/// that share one execution contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifierKind {
    General,
    Google(String),
    Discord(String),
}

impl VerifierKind {
    /// Resolve a group name to its verifier.
    pub fn for_group(group: &str) -> Self {
        if group.contains("discord") {
            VerifierKind::Discord(group.to_string())
        } else if group.contains("google") {
            VerifierKind::Google(group.to_string())
        } else {
            VerifierKind::General
        }
    }

    /// Human-readable verifier name for logging
    pub fn name(&self) -> String {
        match self {
            VerifierKind::General => "General Verifier".to_string(),
            VerifierKind::Google(mode) => format!("Google/YT Verifier ({mode})"),
            VerifierKind::Discord(mode) => format!("Discord Verifier ({mode})"),
        }
    }

    /// The probe list for this verifier.
    pub fn targets(&self) -> Vec<Target> {
        match self {
            VerifierKind::General => general_targets(),
            VerifierKind::Google(mode) => google_targets(mode),
            VerifierKind::Discord(mode) => discord_targets(mode),
        }
    }
}

fn general_targets() -> Vec<Target> {
    [
        "https://img.wzstats.gg/cleaver/gunFullDisplay",
        "https://genshin.jmp.blue/characters/all#",
        "https://api.frankfurter.dev/v1/2000-01-01..2002-12-31",
        "https://www.bigcartel.com/",
        "https://genderize.io/",
        "https://j.dejure.org/jcg/doctrine/doctrine_banner.webp",
        "https://accesorioscelular.com/tienda/css/plugins.css",
        "https://251b5cd9.nip.io/1MB.bin",
        "https://nioges.com/libs/fontawesome/webfonts/fa-solid-900.woff2",
        "https://eu.api.ovh.com/console/rapidoc-min.js",
        "https://ovh.sfx.ovh/10M.bin",
        "https://oracle.sfx.ovh/10M.bin",
        "https://www.getscope.com/assets/fonts/fa-solid-900.woff2",
        "https://api.usercentrics.eu/gvl/v3/en.json",
        "https://www.jetblue.com/footer/footer-element-es2015.js",
        "https://ssl.p.jwpcdn.com/player/v/8.40.5/bidding.js",
        "https://cdn.eso.org/images/banner1920/eso2520a.jpg",
        "https://www.velivole.fr/img/header.jpg",
        "https://scontent-cdg4-2.cdninstagram.com",
    ]
    .iter()
    .map(|url| Target::http(url, BINARY_THRESHOLD).any_status())
    .collect()
}

fn google_targets(mode: &str) -> Vec<Target> {
    if mode == "google_udp" {
        return vec![
            Target::quic("https://rr3---sn-4g5ednsd.googlevideo.com", 1000).any_status(),
            Target::http("https://manifest.googlevideo.com/100MB", 100).any_status(),
            Target::quic("https://googlevideo.com", 1).any_status(),
            Target::quic("https://www.youtube.com", 1000),
        ];
    }
    // TCP: hosts that serve content and support range requests
    vec![
        Target::http("https://rr1---sn-gvnuxaxjvh-jx3z.googlevideo.com", 100).any_status(),
        Target::http("https://manifest.googlevideo.com/100MB", 100).any_status(),
        Target::http(
            "https://yt3.ggpht.com/ZaLC1ILAvz614xZii2tjAVsSI_7mpzB4akwdISkhWfxQy6-PW49VNwsjyTtbXY2Ea3nM-0ksQQ4=s88-c-k-c0x00ffffff-no-rj",
            100,
        ),
        Target::http(
            "https://i.ytimg.com/an_webp/16D-7yvJHAQ/mqdefault_6s.webp?du=3000&sqp=CJzcl8wG",
            100,
        ),
    ]
}

fn discord_targets(mode: &str) -> Vec<Target> {
    match mode {
        "discord_udp" => vec![
            Target::quic("https://discord.com", 1000),
            Target::quic("https://canary.discord.com", 1000),
        ],
        "discord_l7" => vec![
            Target::stun("stun.l.google.com:19302"),
            Target::stun("stun1.l.google.com:19302"),
            Target::stun("stun.cloudflare.com:3478"),
            Target::quic("https://discord.com", 1000),
        ],
        _ => vec![
            Target::http("https://discord.com", 5000),
            Target::http("https://discord.com/assets/b135ff6c8e091b43.mp3", 1000),
            Target::http(
                "https://cdn.discordapp.com/clan-badges/700478419527270430/dea97e909a0211e2479d75cd11c2ec41.png",
                1000,
            ),
            Target::http(
                "https://status.discord.com/api/v2/scheduled-maintenances/active.json",
                1000,
            ),
            Target::http("https://discord.gg", WEB_THRESHOLD),
        ],
    }
}
