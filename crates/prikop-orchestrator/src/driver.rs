//! Top-level driver
//!
//! Sequences the fixed phase list over one shared worker pool and prints
//! the merged final configuration. Cleanup runs on every exit path,
//! including SIGINT/SIGTERM.

use std::path::Path;
use std::sync::Arc;

use bollard::Docker;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use prikop_core::config::{Config, SearchConfig};

use crate::discover::discover_payloads;
use crate::error::OrchestratorError;
use crate::phase::{self, Phase};
use crate::pool::WorkerPool;
use crate::scout;

/// Run the whole optimization: discovery, pool, phases, final report.
pub async fn run(
    config: Config,
    fake_path: &Path,
    targets_path: &Path,
) -> Result<(), OrchestratorError> {
    let payloads = discover_payloads(fake_path)?;
    info!(count = payloads.len(), dir = %fake_path.display(), "discovered fake payloads");

    let docker = Docker::connect_with_local_defaults()
        .map_err(|e| OrchestratorError::RuntimeUnreachable(e.to_string()))?;

    let pool = Arc::new(WorkerPool::new(docker, config.pool.clone()));
    pool.start().await.map_err(OrchestratorError::PoolStart)?;

    let token = CancellationToken::new();
    spawn_signal_handler(token.clone());

    let blocks = run_phases(&pool, &token, &config, &payloads, targets_path).await;

    // The pool owns sandboxes and socket files; it shuts down whatever
    // path brought us here.
    pool.stop().await;

    if token.is_cancelled() {
        return Err(OrchestratorError::Cancelled);
    }

    print_final_config(&blocks);
    Ok(())
}

async fn run_phases(
    pool: &Arc<WorkerPool>,
    token: &CancellationToken,
    config: &Config,
    payloads: &[String],
    targets_path: &Path,
) -> Vec<String> {
    let mut blocks = Vec::new();

    for phase in phase_plan(&config.search, targets_path) {
        if token.is_cancelled() {
            break;
        }
        info!(phase = phase.name, filters = %phase.filters, "phase starting");

        let report = scout::run_scout(pool, token, phase.group).await;

        match phase::run_phase(pool, token, &config.search, &phase, payloads, &report).await {
            Some(best) => {
                info!(
                    phase = phase.name,
                    winner = %best.raw_args,
                    success = best.result.success_count,
                    total = best.result.total_count,
                    "phase finished"
                );
                blocks.push(format!("{} {}", phase.filters, best.raw_args));
            }
            None => warn!(phase = phase.name, "No working strategy found"),
        }
    }

    blocks
}

/// The fixed, ordered phase list.
pub fn phase_plan(search: &SearchConfig, targets_path: &Path) -> Vec<Phase> {
    let targets = targets_path.display();
    let google_hosts = format!("{targets}/google.txt");
    let discord_hosts = format!("{targets}/discord.txt");

    vec![
        Phase {
            name: "GENERAL TCP",
            group: "general",
            filters: "--filter-tcp=80,443".to_string(),
            max_gens: search.max_generations,
            target_success_rate: search.target_success_rate,
            seed_hints: Vec::new(),
        },
        Phase {
            name: "GOOGLE TCP",
            group: "google_tcp",
            filters: format!("--filter-tcp=80,443 --hostlist={google_hosts}"),
            max_gens: search.max_generations,
            target_success_rate: search.target_success_rate,
            seed_hints: Vec::new(),
        },
        Phase {
            name: "GOOGLE UDP (QUIC)",
            group: "google_udp",
            filters: format!("--filter-udp=443 --hostlist={google_hosts}"),
            max_gens: search.max_generations,
            target_success_rate: search.target_success_rate,
            seed_hints: vec![
                "--dpi-desync=fake --dpi-desync-repeats=2 --dpi-desync-any-protocol".to_string(),
            ],
        },
        Phase {
            name: "DISCORD TCP",
            group: "discord_tcp",
            filters: format!("--filter-tcp=80,443 --hostlist={discord_hosts}"),
            max_gens: search.max_generations,
            target_success_rate: search.target_success_rate,
            seed_hints: Vec::new(),
        },
        Phase {
            name: "DISCORD UDP (Voice)",
            group: "discord_udp",
            filters: format!("--filter-udp=50000-65535,443 --hostlist={discord_hosts}"),
            max_gens: search.max_generations,
            target_success_rate: search.target_success_rate,
            seed_hints: vec![
                "--dpi-desync=fake --dpi-desync-repeats=6 --dpi-desync-any-protocol \
                 --dpi-desync-cutoff=d2"
                    .to_string(),
                "--dpi-desync=ipfrag1 --dpi-desync-repeats=2".to_string(),
            ],
        },
        Phase {
            name: "DISCORD UDP (STUN)",
            group: "discord_l7",
            filters: format!(
                "--filter-udp=19294-19344 --filter-l7=discord,stun --hostlist={discord_hosts}"
            ),
            max_gens: search.max_generations,
            target_success_rate: search.target_success_rate,
            seed_hints: vec![
                "--dpi-desync=fake --dpi-desync-any-protocol".to_string(),
            ],
        },
    ]
}

/// Merge the per-phase winner blocks into the final engine configuration.
pub fn render_final_config(blocks: &[String]) -> String {
    if blocks.is_empty() {
        "# No working strategies found.".to_string()
    } else {
        blocks.join("\n--new\n")
    }
}

fn print_final_config(blocks: &[String]) {
    println!();
    println!("=======================================================");
    println!(">>> FINAL CONFIGURATION");
    println!("=======================================================");
    println!("{}", render_final_config(blocks));
    println!("=======================================================");
}

fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!("signal handler setup failed: {e}");
                let _ = tokio::signal::ctrl_c().await;
                token.cancel();
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
        info!("shutdown signal received, cancelling run");
        token.cancel();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_plan_order_and_groups() {
        let plan = phase_plan(&SearchConfig::default(), Path::new("/app/targets"));
        let groups: Vec<_> = plan.iter().map(|p| p.group).collect();
        assert_eq!(
            groups,
            vec![
                "general",
                "google_tcp",
                "google_udp",
                "discord_tcp",
                "discord_udp",
                "discord_l7"
            ]
        );
    }

    #[test]
    fn test_phase_plan_hostlists_use_targets_path() {
        let plan = phase_plan(&SearchConfig::default(), Path::new("/data/targets"));
        assert!(plan[1].filters.contains("--hostlist=/data/targets/google.txt"));
        assert!(plan[5].filters.contains("--hostlist=/data/targets/discord.txt"));
        assert!(plan[5].filters.contains("--filter-udp=19294-19344"));
    }

    #[test]
    fn test_render_final_config_joins_with_new_token() {
        let blocks = vec![
            "--filter-tcp=80,443 --dpi-desync=fake".to_string(),
            "--filter-udp=443 --dpi-desync=ipfrag1".to_string(),
        ];
        let rendered = render_final_config(&blocks);
        let lines: Vec<_> = rendered.lines().collect();
        assert_eq!(
            lines,
            vec![
                "--filter-tcp=80,443 --dpi-desync=fake",
                "--new",
                "--filter-udp=443 --dpi-desync=ipfrag1",
            ]
        );
    }

    #[test]
    fn test_render_final_config_empty() {
        assert!(render_final_config(&[]).starts_with('#'));
    }

    #[test]
    fn test_single_winner_has_no_separator() {
        let blocks = vec!["--filter-tcp=80,443 --dpi-desync=fake".to_string()];
        assert!(!render_final_config(&blocks).contains("--new"));
    }
}
