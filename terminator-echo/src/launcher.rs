//! Starts several client processes for local testing.

use std::{net::SocketAddr, path::Path};

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::info;

/// Re-runs the current executable as `client <i>` for `i` in `1..=count`.
/// Returns the process ids; the children keep running after we exit.
pub fn launch_clients(count: u32, server: SocketAddr) -> Result<Vec<u32>> {
    let binary = std::env::current_exe().context("failed to locate current executable")?;

    let mut pids = Vec::new();
    for label in 1..=count {
        let child = client_command(&binary, label, server)
            .spawn()
            .with_context(|| format!("failed to spawn client {label}"))?;
        if let Some(pid) = child.id() {
            info!(label, pid, "client launched");
            pids.push(pid);
        }
    }
    Ok(pids)
}

fn client_command(binary: &Path, label: u32, server: SocketAddr) -> Command {
    let mut cmd = Command::new(binary);
    cmd.arg("client")
        .arg(label.to_string())
        .arg("--server")
        .arg(server.to_string());
    cmd
}
