use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use twitch_client::eventsub::EventSubCommand;

use crate::sessions::Sessions;

/// Shared state reachable from the IPC server, the reconciliation loop,
/// and the token-refresh loop.
pub struct HubState {
    pub db: token_store::Database,
    pub sessions: Sessions,
    pub eventsub_commands: mpsc::Sender<EventSubCommand>,
    pub reconcile_trigger: mpsc::Sender<()>,
    pub shutdown: CancellationToken,
}
