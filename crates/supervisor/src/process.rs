//! Spawns and locates the Hub and Bot sibling binaries.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::net::UnixStream;
use tokio::process::{Child, Command};

use crate::error::SupervisorError;

/// How long to wait for the Hub's IPC socket to appear and accept a
/// connection before giving up on one start attempt.
pub const HUB_SOCKET_WAIT: Duration = Duration::from_secs(5);

fn sibling_binary(name: &str) -> PathBuf {
    let dir = std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf)).unwrap_or_else(|| PathBuf::from("."));
    dir.join(name)
}

pub fn spawn_hub(config_path: &Path) -> Result<Child, SupervisorError> {
    let bin = sibling_binary("hub");
    tracing::info!(bin = %bin.display(), "spawning hub");
    Command::new(bin)
        .env("KISSBOT_CONFIG", config_path)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(SupervisorError::from)
}

pub fn spawn_bot(config_path: &Path, channel: &str) -> Result<Child, SupervisorError> {
    let bin = sibling_binary("bot");
    tracing::info!(bin = %bin.display(), channel, "spawning bot");
    Command::new(bin)
        .arg(channel)
        .env("KISSBOT_CONFIG", config_path)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(SupervisorError::from)
}

/// Poll for the Hub's IPC socket to exist and accept a connection, up to
/// `HUB_SOCKET_WAIT`.
pub async fn wait_for_hub_socket(socket_path: &Path) -> bool {
    let deadline = tokio::time::Instant::now() + HUB_SOCKET_WAIT;
    loop {
        if UnixStream::connect(socket_path).await.is_ok() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
