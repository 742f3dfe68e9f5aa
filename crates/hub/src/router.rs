//! Forwards incoming EventSub notifications to the bot session subscribed
//! to that channel, over the Hub IPC socket.

use std::sync::Arc;

use tokio::sync::mpsc;

use fleet_ipc::HubFrame;
use twitch_client::eventsub::EventSubEvent;

use crate::state::HubState;

pub async fn run(state: Arc<HubState>, mut events: mpsc::Receiver<EventSubEvent>) {
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                tracing::info!("event router stopping (shutdown)");
                return;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::warn!("eventsub event channel closed");
                    return;
                };
                state
                    .sessions
                    .route(
                        &event.channel_id,
                        HubFrame::Event { channel_id: event.channel_id.clone(), topic: event.topic, data: event.payload },
                    )
                    .await;
            }
        }
    }
}
