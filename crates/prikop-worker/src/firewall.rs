//! Firewall redirection into the netfilter queue
//!
//! Each evaluation flushes the OUTPUT chain and installs NFQUEUE rules so
//! the engine sees the probe traffic. The UDP port set widens for the
//! Discord L7 group, whose voice and STUN flows ride dedicated ranges.

use tokio::process::Command;
use tracing::debug;

use crate::error::EvalError;

const TCP_PORTS: &str = "80,443";
const UDP_PORTS: &str = "443,50000:65535";
const UDP_PORTS_DISCORD_L7: &str = "443,19294:19344,50000:50100";

/// Apply the NFQUEUE redirection rules for the given target group.
pub async fn apply(group: &str, queue_num: u16) -> Result<(), EvalError> {
    // Drop whatever a previous evaluation left behind
    run(&["-F", "OUTPUT"]).await.ok();

    let queue = queue_num.to_string();

    let tcp_rule = [
        "-I", "OUTPUT", "-p", "tcp", "-m", "multiport", "--dports", TCP_PORTS,
        "-j", "NFQUEUE", "--queue-num", &queue, "--queue-bypass",
    ];
    run(&tcp_rule)
        .await
        .map_err(|out| EvalError::Firewall(format!("tcp rule: {out}")))?;

    let udp_ports = udp_ports_for(group);
    let udp_rule = [
        "-I", "OUTPUT", "-p", "udp", "-m", "multiport", "--dports", udp_ports,
        "-j", "NFQUEUE", "--queue-num", &queue, "--queue-bypass",
    ];
    run(&udp_rule)
        .await
        .map_err(|out| EvalError::Firewall(format!("udp rule: {out}")))?;

    debug!(group, queue_num, udp_ports, "firewall redirection applied");
    Ok(())
}

/// Flush both chains, returning the sandbox to a clean state.
pub async fn flush() {
    run(&["-F", "OUTPUT"]).await.ok();
    run(&["-F", "INPUT"]).await.ok();
}

async fn run(args: &[&str]) -> Result<(), String> {
    let output = Command::new("iptables")
        .args(args)
        .output()
        .await
        .map_err(|e| e.to_string())?;
    if output.status.success() {
        Ok(())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
    }
}

/// The UDP port expression used for a group, exposed for rule inspection.
pub fn udp_ports_for(group: &str) -> &'static str {
    if group == "discord_l7" {
        UDP_PORTS_DISCORD_L7
    } else {
        UDP_PORTS
    }
}
