//! Configuration for the orchestrator and worker evaluators
//!
//! Provides a strongly-typed configuration system with TOML support.
//! Every timeout and search tunable has a sensible default; a config file
//! only needs to override what differs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Packet-engine invocation settings
    pub engine: EngineConfig,
    /// Worker sandbox pool settings
    pub pool: PoolConfig,
    /// Evolutionary search settings
    pub search: SearchConfig,
    /// Probe execution settings
    pub probes: ProbesConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| Error::ConfigNotFound {
            path: path.display().to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(Error::from)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.search.population == 0 {
            return Err(Error::config_value("search.population", "must be positive"));
        }
        if self.search.elites as usize >= self.search.population {
            return Err(Error::config_value(
                "search.elites",
                "must be smaller than the population size",
            ));
        }
        if !(0.1..=0.5).contains(&self.search.complexity_alpha) {
            return Err(Error::config_value(
                "search.complexity_alpha",
                "must be between 0.1 and 0.5",
            ));
        }
        if self.pool.size == 0 {
            return Err(Error::config_value("pool.size", "must be positive"));
        }
        if self.probes.max_parallel == 0 {
            return Err(Error::config_value("probes.max_parallel", "must be positive"));
        }
        Ok(())
    }
}

/// Packet-engine invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path to the packet-engine binary inside the worker sandbox
    pub binary: PathBuf,
    /// Netfilter queue number the engine and firewall rules agree on
    pub queue_num: u16,
    /// Delay before confirming the engine survived startup, in milliseconds
    pub settle_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/usr/bin/nfqws"),
            queue_num: 200,
            settle_delay_ms: 100,
        }
    }
}

impl EngineConfig {
    /// Settle delay as a [`Duration`]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Worker sandbox pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Sandbox image exposing the evaluator binary as entrypoint
    pub image: String,
    /// Number of long-lived worker sandboxes
    pub size: usize,
    /// Host directory bind-mounted into every sandbox for UNIX sockets
    pub host_socket_dir: PathBuf,
    /// Fixed mount point of the socket directory inside the sandbox
    pub sandbox_socket_dir: PathBuf,
    /// Maximum number of sandboxes provisioned concurrently during start
    pub startup_parallelism: usize,
    /// Seconds to wait for a worker's socket file to appear
    pub socket_wait_secs: u64,
    /// Per-sandbox grace period on stop, in seconds
    pub stop_grace_secs: u64,
    /// Socket dial timeout in seconds
    pub dial_timeout_secs: u64,
    /// Per-evaluation budget in seconds; socket deadline adds two seconds
    pub container_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            image: "prikop:latest".to_string(),
            size: 8,
            host_socket_dir: PathBuf::from("/tmp/prikop_sockets"),
            sandbox_socket_dir: PathBuf::from("/tmp/prikop_sockets"),
            startup_parallelism: 10,
            socket_wait_secs: 30,
            stop_grace_secs: 10,
            dial_timeout_secs: 1,
            container_timeout_secs: 15,
        }
    }
}

impl PoolConfig {
    /// Socket dial timeout
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    /// Per-evaluation budget
    pub fn container_timeout(&self) -> Duration {
        Duration::from_secs(self.container_timeout_secs)
    }

    /// Combined request/response deadline on the worker socket
    pub fn socket_deadline(&self) -> Duration {
        self.container_timeout() + Duration::from_secs(2)
    }

    /// How long to wait for a worker socket file during start
    pub fn socket_wait(&self) -> Duration {
        Duration::from_secs(self.socket_wait_secs)
    }

    /// Grace period per sandbox on stop
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

/// Evolutionary search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Exact population size after every evolution step
    pub population: usize,
    /// Individuals copied unchanged into the next generation
    pub elites: u8,
    /// Upper bound on concurrent evaluations within a batch
    pub max_workers: usize,
    /// Generations per phase
    pub max_generations: u32,
    /// Success percentage that terminates a phase early
    pub target_success_rate: u32,
    /// A perfect-scoring strategy this simple stops the phase after
    /// `ideal_min_generation` generations
    pub ideal_complexity_max: u32,
    /// Earliest generation at which the perfect-score early stop applies
    pub ideal_min_generation: u32,
    /// Complexity penalty weight in the fitness formula
    pub complexity_alpha: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            population: 50,
            elites: 5,
            max_workers: 50,
            max_generations: 10,
            target_success_rate: 80,
            ideal_complexity_max: 2,
            ideal_min_generation: 3,
            complexity_alpha: 0.5,
        }
    }
}

/// Probe execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbesConfig {
    /// Maximum number of probes in flight inside one evaluation
    pub max_parallel: usize,
    /// Hard timeout per probe, in seconds
    pub check_timeout_secs: u64,
}

impl Default for ProbesConfig {
    fn default() -> Self {
        Self {
            max_parallel: 12,
            check_timeout_secs: 4,
        }
    }
}

impl ProbesConfig {
    /// Hard timeout per probe
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }
}
