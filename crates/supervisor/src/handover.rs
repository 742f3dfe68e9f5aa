//! Short-lived owner-only socket used to hand a bot process its starting
//! token bundle without ever putting a secret in an argv or environment
//! variable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio::net::UnixListener;

use fleet_ipc::write_frame;

use crate::error::SupervisorError;

/// How long the handover socket waits for the bot to connect before it is
/// torn down unclaimed.
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
pub struct SecretBundle<'a> {
    pub access_token: &'a str,
    pub refresh_token: &'a str,
    pub scope: &'a str,
    pub expires_at: i64,
}

/// Bind a fresh handover socket at `path`, restrict it to the owner, wait
/// for the first connection, write `bundle`, then unlink the socket
/// regardless of outcome. A timed-out wait is not an error: the caller
/// treats it as "nobody claimed the handover" and moves on.
pub async fn handover(path: &Path, bundle: &SecretBundle<'_>) -> Result<bool, SupervisorError> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(path)?;
    restrict_permissions(path)?;

    let claimed = match tokio::time::timeout(ACCEPT_TIMEOUT, listener.accept()).await {
        Ok(Ok((stream, _addr))) => {
            let (_read_half, mut write_half) = stream.into_split();
            write_frame(&mut write_half, bundle).await?;
            true
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, path = %path.display(), "handover accept failed");
            false
        }
        Err(_) => {
            tracing::debug!(path = %path.display(), "handover socket went unclaimed");
            false
        }
    };

    let _ = std::fs::remove_file(path);
    Ok(claimed)
}

pub fn handover_socket_path(runtime_dir: &Path, channel: &str) -> PathBuf {
    runtime_dir.join(format!("handover-{channel}.sock"))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;
    use tokio::net::UnixStream;

    #[tokio::test]
    async fn claimed_handover_delivers_the_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handover.sock");

        let connect_path = path.clone();
        let client = tokio::spawn(async move {
            loop {
                if let Ok(stream) = UnixStream::connect(&connect_path).await {
                    let mut reader = BufReader::new(stream);
                    let frame: SecretBundleOwned = fleet_ipc::read_frame(&mut reader).await.unwrap().unwrap();
                    return frame;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let bundle = SecretBundle { access_token: "at", refresh_token: "rt", scope: "chat:read", expires_at: 123 };
        let claimed = handover(&path, &bundle).await.unwrap();
        assert!(claimed);

        let received = client.await.unwrap();
        assert_eq!(received.access_token, "at");
        assert_eq!(received.expires_at, 123);
    }

    #[derive(Debug, serde::Deserialize)]
    struct SecretBundleOwned {
        access_token: String,
        #[allow(dead_code)]
        refresh_token: String,
        #[allow(dead_code)]
        scope: String,
        expires_at: i64,
    }
}
