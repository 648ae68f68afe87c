//! Packet-engine child process lifecycle
//!
//! The engine runs in its own process group so a kill reaches any helper
//! processes it forks. Stderr is drained continuously; the buffered tail
//! travels with crash reports.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::EvalError;

/// A running packet-engine instance
#[derive(Debug)]
pub struct Engine {
    child: Child,
    stderr: Arc<Mutex<Vec<u8>>>,
}

impl Engine {
    /// Spawn the engine with `--qnum=<queue>` followed by the strategy args.
    ///
    /// The args string is tokenized on whitespace and passed through
    /// without interpretation.
    pub fn spawn(binary: &Path, queue_num: u16, args: &str) -> Result<Engine, EvalError> {
        let mut cmd = Command::new(binary);
        cmd.arg(format!("--qnum={queue_num}"))
            .args(args.split_whitespace())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // New process group so the kill below reaches every descendant
        unsafe {
            cmd.pre_exec(|| {
                libc::setpgid(0, 0);
                Ok(())
            });
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| EvalError::EngineCrash(format!("spawn {}: {e}", binary.display())))?;

        let stderr = Arc::new(Mutex::new(Vec::new()));
        if let Some(mut pipe) = child.stderr.take() {
            let sink = Arc::clone(&stderr);
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                while let Ok(n) = pipe.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                    sink.lock().extend_from_slice(&buf[..n]);
                }
            });
        }

        debug!(binary = %binary.display(), queue_num, args, "engine started");
        Ok(Engine { child, stderr })
    }

    /// If the engine already exited, return its captured stderr.
    pub fn crashed(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                let tail = String::from_utf8_lossy(&self.stderr.lock()).trim().to_string();
                Some(format!("exited early ({status}): {tail}"))
            }
            Ok(None) => None,
            Err(e) => Some(format!("wait failed: {e}")),
        }
    }

    /// Kill the whole process group and reap the child.
    pub async fn kill(mut self) {
        if let Some(pid) = self.child.id() {
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
        }
        if let Err(e) = self.child.wait().await {
            warn!("engine reap failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_spawn_missing_binary_is_a_crash() {
        let err = Engine::spawn(Path::new("/nonexistent/engine"), 200, "--dpi-desync=fake")
            .expect_err("spawn should fail");
        assert!(err.message().starts_with("ENGINE_CRASH:"));
    }

    #[tokio::test]
    async fn test_immediate_exit_is_detected() {
        // `false` ignores its arguments and exits non-zero right away
        let mut engine =
            Engine::spawn(Path::new("false"), 200, "--dpi-desync=fake").expect("spawn false");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(engine.crashed().is_some());
        engine.kill().await;
    }
}
