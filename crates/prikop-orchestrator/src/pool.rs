//! Worker sandbox pool
//!
//! Owns a fixed set of long-lived sandboxes, each running one evaluator
//! behind a per-worker UNIX socket. Idle workers live in a channel; a
//! checkout transfers use rights to one caller and a drop guard returns
//! the worker whatever happens to the request, so a crash or timeout can
//! never leak a slot.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::models::{HostConfig, Mount, MountTypeEnum};
use bollard::Docker;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use prikop_core::config::PoolConfig;
use prikop_core::protocol::{self, WorkerRequest, WorkerResult};

use crate::error::PoolError;

const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One provisioned evaluator sandbox
#[derive(Debug, Clone)]
pub struct Worker {
    /// Stable worker id, also the socket file stem
    pub id: String,
    /// Host-side path of the worker's socket
    pub socket_path: PathBuf,
}

/// Pool of long-lived worker sandboxes
pub struct WorkerPool {
    docker: Docker,
    config: PoolConfig,
    idle_tx: mpsc::Sender<Worker>,
    idle_rx: tokio::sync::Mutex<mpsc::Receiver<Worker>>,
    containers: Arc<Mutex<Vec<String>>>,
    socket_paths: Arc<Mutex<Vec<PathBuf>>>,
}

impl WorkerPool {
    /// Create an empty pool; `start` provisions the sandboxes.
    pub fn new(docker: Docker, config: PoolConfig) -> Self {
        let (idle_tx, idle_rx) = mpsc::channel(config.size.max(1));
        Self {
            docker,
            config,
            idle_tx,
            idle_rx: tokio::sync::Mutex::new(idle_rx),
            containers: Arc::new(Mutex::new(Vec::new())),
            socket_paths: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Provision all sandboxes in parallel and wait for their sockets.
    ///
    /// Any failure tears the whole pool down and reports the first error.
    pub async fn start(&self) -> Result<(), PoolError> {
        info!(
            size = self.config.size,
            socket_dir = %self.config.host_socket_dir.display(),
            "provisioning worker sandboxes"
        );
        std::fs::create_dir_all(&self.config.host_socket_dir)?;

        let semaphore = Arc::new(Semaphore::new(self.config.startup_parallelism.max(1)));
        let mut set: JoinSet<Result<Worker, PoolError>> = JoinSet::new();

        for index in 0..self.config.size {
            let docker = self.docker.clone();
            let config = self.config.clone();
            let containers = Arc::clone(&self.containers);
            let socket_paths = Arc::clone(&self.socket_paths);
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| PoolError::Closed)?;
                provision_worker(&docker, &config, index, &containers, &socket_paths).await
            });
        }

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(worker)) => {
                    // Capacity equals pool size, this send cannot block
                    let _ = self.idle_tx.try_send(worker);
                }
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(PoolError::Io(std::io::Error::other(e)));
                }
            }
        }

        if let Some(e) = first_error {
            self.stop().await;
            return Err(e);
        }
        info!(size = self.config.size, "worker pool ready");
        Ok(())
    }

    /// Run one evaluation on any idle worker.
    ///
    /// Blocks until a worker frees up or the token fires. The worker goes
    /// back to the idle set on every exit path.
    pub async fn exec(
        &self,
        token: &CancellationToken,
        request: &WorkerRequest,
    ) -> Result<WorkerResult, PoolError> {
        let worker = {
            let mut idle = self.idle_rx.lock().await;
            tokio::select! {
                _ = token.cancelled() => return Err(PoolError::Cancelled),
                worker = idle.recv() => worker.ok_or(PoolError::Closed)?,
            }
        };
        let _return_guard = IdleReturn {
            worker: Some(worker.clone()),
            tx: self.idle_tx.clone(),
        };

        let exchange = async {
            let stream = timeout(
                self.config.dial_timeout(),
                UnixStream::connect(&worker.socket_path),
            )
            .await
            .map_err(|_| PoolError::DialTimeout {
                worker: worker.id.clone(),
            })??;

            let mut framed = protocol::framed(stream);
            protocol::send(&mut framed, request).await?;
            let result: WorkerResult = protocol::recv(&mut framed).await?;
            Ok::<_, PoolError>(result)
        };

        tokio::select! {
            _ = token.cancelled() => Err(PoolError::Cancelled),
            result = timeout(self.config.socket_deadline(), exchange) => {
                result.map_err(|_| PoolError::Deadline { worker: worker.id.clone() })?
            }
        }
    }

    /// Force-remove every sandbox and unlink the socket files.
    pub async fn stop(&self) {
        let ids: Vec<String> = self.containers.lock().drain(..).collect();
        let grace = self.config.stop_grace();

        let mut set = JoinSet::new();
        for id in ids {
            let docker = self.docker.clone();
            set.spawn(async move {
                let removal = docker.remove_container(
                    &id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                );
                if timeout(grace, removal).await.is_err() {
                    warn!(container = %id, "sandbox removal exceeded the grace period");
                }
            });
        }
        while set.join_next().await.is_some() {}

        for path in self.socket_paths.lock().drain(..) {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(socket = %path.display(), "socket cleanup failed: {e}");
                }
            }
        }
        debug!("worker pool stopped");
    }

    /// Number of workers currently idle.
    pub fn idle_len(&self) -> usize {
        self.idle_tx.max_capacity() - self.idle_tx.capacity()
    }

    /// Pool with externally provisioned workers, used by tests that stand
    /// up stub evaluators on plain UNIX sockets.
    #[cfg(test)]
    pub(crate) fn with_workers(config: PoolConfig, workers: Vec<Worker>) -> Self {
        let docker = Docker::connect_with_local_defaults().expect("docker client");
        let pool = Self::new(docker, config);
        for worker in workers {
            pool.idle_tx.try_send(worker).expect("pool capacity");
        }
        pool
    }
}

/// Returns a checked-out worker to the idle channel on drop.
struct IdleReturn {
    worker: Option<Worker>,
    tx: mpsc::Sender<Worker>,
}

impl Drop for IdleReturn {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            // Capacity equals pool size, this cannot fail while the pool lives
            let _ = self.tx.try_send(worker);
        }
    }
}

async fn provision_worker(
    docker: &Docker,
    config: &PoolConfig,
    index: usize,
    containers: &Mutex<Vec<String>>,
    socket_paths: &Mutex<Vec<PathBuf>>,
) -> Result<Worker, PoolError> {
    let container_name = format!("prikop-worker-{index}");
    let worker_id = format!("worker_{index}");
    let socket_file = format!("{worker_id}.sock");
    let host_socket = config.host_socket_dir.join(&socket_file);
    let sandbox_socket = config.sandbox_socket_dir.join(&socket_file);

    // Track the socket for cleanup before anything can fail
    socket_paths.lock().push(host_socket.clone());

    // Clear leftovers from a previous run
    let _ = std::fs::remove_file(&host_socket);
    let _ = docker
        .remove_container(
            &container_name,
            Some(RemoveContainerOptions {
                force: true,
                ..Default::default()
            }),
        )
        .await;

    let container_config = ContainerConfig {
        image: Some(config.image.clone()),
        cmd: Some(vec![
            "--worker-socket".to_string(),
            sandbox_socket.display().to_string(),
        ]),
        tty: Some(false),
        host_config: Some(HostConfig {
            cap_add: Some(vec!["NET_ADMIN".to_string()]),
            auto_remove: Some(true),
            mounts: Some(vec![Mount {
                typ: Some(MountTypeEnum::BIND),
                source: Some(config.host_socket_dir.display().to_string()),
                target: Some(config.sandbox_socket_dir.display().to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    };

    let created = docker
        .create_container(
            Some(CreateContainerOptions {
                name: container_name,
                ..Default::default()
            }),
            container_config,
        )
        .await?;
    containers.lock().push(created.id.clone());

    docker
        .start_container(&created.id, None::<StartContainerOptions<String>>)
        .await?;

    wait_for_socket(docker, config, index, &host_socket, &created.id).await?;

    debug!(worker = %worker_id, socket = %host_socket.display(), "worker ready");
    Ok(Worker {
        id: worker_id,
        socket_path: host_socket,
    })
}

/// Poll for the socket file; if the container dies first, surface its logs.
async fn wait_for_socket(
    docker: &Docker,
    config: &PoolConfig,
    index: usize,
    socket_path: &PathBuf,
    container_id: &str,
) -> Result<(), PoolError> {
    let attempts = (config.socket_wait().as_millis() / SOCKET_POLL_INTERVAL.as_millis()).max(1);

    for attempt in 0..attempts {
        if socket_path.exists() {
            return Ok(());
        }

        if attempt % 10 == 0 {
            if let Ok(inspect) = docker.inspect_container(container_id, None).await {
                let running = inspect
                    .state
                    .as_ref()
                    .and_then(|s| s.running)
                    .unwrap_or(false);
                if !running {
                    let exit_code = inspect
                        .state
                        .as_ref()
                        .and_then(|s| s.exit_code)
                        .unwrap_or(-1);
                    return Err(PoolError::WorkerDied {
                        index,
                        exit_code,
                        logs: collect_logs(docker, container_id).await,
                    });
                }
            }
        }

        tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
    }

    Err(PoolError::SocketTimeout {
        path: socket_path.clone(),
    })
}

async fn collect_logs(docker: &Docker, container_id: &str) -> String {
    let mut stream = docker.logs(
        container_id,
        Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        }),
    );
    let mut buf = String::new();
    while let Some(Ok(chunk)) = stream.next().await {
        buf.push_str(&String::from_utf8_lossy(&chunk.into_bytes()));
    }
    buf
}
