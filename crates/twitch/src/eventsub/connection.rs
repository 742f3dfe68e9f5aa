use std::collections::HashMap;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;

use super::*;
use crate::TwitchError;

#[derive(Debug, Deserialize)]
struct WsMessage {
    metadata: WsMetadata,
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WsMetadata {
    message_type: String,
    #[allow(dead_code)]
    message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WelcomePayload {
    session: SessionInfo,
}

#[derive(Debug, Deserialize)]
struct SessionInfo {
    id: String,
    #[allow(dead_code)]
    keepalive_timeout_seconds: Option<u64>,
}

enum MessageAction {
    Continue,
    Reconnect(String),
}

impl EventSubClient {
    #[allow(clippy::too_many_arguments)]
    pub(super) async fn connect_once(
        api: &TwitchApiClient,
        token: &mut Token,
        ws_url: &str,
        tracker: &mut HashMap<ChannelTopic, String>,
        event_tx: &mpsc::Sender<EventSubEvent>,
        status_tx: &mpsc::Sender<EventSubStatus>,
        command_rx: &mut mpsc::Receiver<EventSubCommand>,
        shutdown_rx: &mut mpsc::Receiver<()>,
    ) -> Result<Option<String>, TwitchError> {
        use tokio_tungstenite::tungstenite::Message as Msg;

        tracing::info!(ws_url = %ws_url, "connecting to EventSub WebSocket");
        let (mut ws, _) = connect_async(ws_url).await?;
        let session_id = Self::wait_for_welcome(&mut ws).await?;
        let _ = status_tx
            .send(EventSubStatus::SessionEstablished { session_id: session_id.clone() })
            .await;

        // Replay whatever we had tracked from the previous session. The old
        // subscription ids die with the old session; only the (channel,
        // topic) pairs carry over.
        let carried_over: Vec<ChannelTopic> = tracker.drain().map(|(k, _)| k).collect();
        for (channel_id, topic) in carried_over {
            Self::create_subscription(api, token, &channel_id, &topic, &session_id, tracker, status_tx)
                .await;
        }

        let frame_timeout = KEEPALIVE_TIMEOUT * 2;
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("EventSub shutdown during listen");
                    let _ = ws.close(None).await;
                    return Ok(None);
                }
                command = command_rx.recv() => {
                    match command {
                        Some(EventSubCommand::Subscribe { channel_id, topic }) => {
                            Self::create_subscription(api, token, &channel_id, &topic, &session_id, tracker, status_tx).await;
                        }
                        Some(EventSubCommand::Unsubscribe { channel_id, topic }) => {
                            Self::delete_subscription(api, token, &channel_id, &topic, tracker, status_tx).await;
                        }
                        Some(EventSubCommand::UpdateToken(new_token)) => {
                            tracing::info!("EventSub client received refreshed token");
                            *token = new_token;
                        }
                        None => {}
                    }
                }
                result = tokio::time::timeout(frame_timeout, ws.next()) => {
                    match result {
                        Ok(Some(Ok(Msg::Text(text)))) => {
                            match Self::handle_message(&text, tracker, event_tx, status_tx).await? {
                                MessageAction::Continue => {}
                                MessageAction::Reconnect(next_url) => {
                                    tracing::info!(next_url = %next_url, "EventSub session_reconnect received");
                                    let _ = ws.close(None).await;
                                    return Ok(Some(next_url));
                                }
                            }
                        }
                        Ok(Some(Ok(Msg::Ping(data)))) => {
                            let _ = ws.send(Msg::Pong(data)).await;
                        }
                        Ok(Some(Ok(Msg::Close(_)))) | Ok(None) => {
                            tracing::warn!("EventSub WebSocket closed by server");
                            return Err(TwitchError::EventSub("server closed".into()));
                        }
                        Ok(Some(Err(e))) => return Err(TwitchError::WebSocket(e)),
                        Ok(Some(Ok(_))) => {}
                        Err(_) => {
                            tracing::warn!("EventSub keepalive timeout");
                            return Err(TwitchError::Timeout);
                        }
                    }
                }
            }
        }
    }

    async fn wait_for_welcome(
        ws: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> Result<String, TwitchError> {
        use tokio_tungstenite::tungstenite::Message as Msg;
        loop {
            match tokio::time::timeout(KEEPALIVE_TIMEOUT, ws.next()).await {
                Ok(Some(Ok(Msg::Text(text)))) => {
                    let ws_msg: WsMessage = serde_json::from_str(&text)?;
                    if ws_msg.metadata.message_type == "session_welcome" {
                        let p: WelcomePayload = serde_json::from_value(ws_msg.payload)?;
                        tracing::info!(session_id = %p.session.id, "EventSub welcome");
                        return Ok(p.session.id);
                    }
                }
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(e))) => return Err(TwitchError::WebSocket(e)),
                Ok(None) => return Err(TwitchError::EventSub("connection closed".into())),
                Err(_) => return Err(TwitchError::Timeout),
            }
        }
    }

    async fn handle_message(
        text: &str,
        tracker: &mut HashMap<ChannelTopic, String>,
        event_tx: &mpsc::Sender<EventSubEvent>,
        status_tx: &mpsc::Sender<EventSubStatus>,
    ) -> Result<MessageAction, TwitchError> {
        let ws_msg: WsMessage = serde_json::from_str(text)?;
        match ws_msg.metadata.message_type.as_str() {
            "session_keepalive" => {
                tracing::trace!("EventSub keepalive received");
                Ok(MessageAction::Continue)
            }
            "notification" => {
                let Some((channel_id, topic)) = ws_msg
                    .payload
                    .get("subscription")
                    .and_then(|s| s.get("id"))
                    .and_then(|id| id.as_str())
                    .and_then(|sub_id| Self::channel_topic_for_subscription(tracker, sub_id))
                else {
                    tracing::warn!("EventSub notification for unknown subscription id");
                    return Ok(MessageAction::Continue);
                };
                let payload = ws_msg
                    .payload
                    .get("event")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                tracing::debug!(channel_id, topic, "EventSub notification");
                let _ = event_tx.send(EventSubEvent { channel_id, topic, payload }).await;
                Ok(MessageAction::Continue)
            }
            "session_reconnect" => {
                if let Some(next_url) = Self::parse_reconnect_url(&ws_msg.payload) {
                    Ok(MessageAction::Reconnect(next_url))
                } else {
                    Err(TwitchError::EventSub("session_reconnect missing reconnect_url".into()))
                }
            }
            "revocation" => {
                let sub_id = ws_msg
                    .payload
                    .get("subscription")
                    .and_then(|s| s.get("id"))
                    .and_then(|id| id.as_str())
                    .unwrap_or_default();
                if let Some((channel_id, topic)) = Self::channel_topic_for_subscription(tracker, sub_id) {
                    tracker.remove(&(channel_id.clone(), topic.clone()));
                    tracing::warn!(channel_id, topic, "EventSub subscription revoked");
                    let _ = status_tx
                        .send(EventSubStatus::SubscriptionRevoked { channel_id, topic })
                        .await;
                } else {
                    tracing::warn!(sub_id, "EventSub revocation for untracked subscription");
                }
                Ok(MessageAction::Continue)
            }
            other => {
                tracing::debug!(msg_type = other, "unhandled EventSub message");
                Ok(MessageAction::Continue)
            }
        }
    }

    pub(super) fn channel_topic_for_subscription(
        tracker: &HashMap<ChannelTopic, String>,
        subscription_id: &str,
    ) -> Option<ChannelTopic> {
        tracker
            .iter()
            .find(|(_, id)| id.as_str() == subscription_id)
            .map(|(key, _)| key.clone())
    }

    pub(super) fn parse_reconnect_url(payload: &serde_json::Value) -> Option<String> {
        payload
            .get("session")
            .and_then(|session| session.get("reconnect_url"))
            .and_then(|url| url.as_str())
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(ToOwned::to_owned)
    }

    async fn create_subscription(
        api: &TwitchApiClient,
        token: &Token,
        channel_id: &str,
        topic: &str,
        session_id: &str,
        tracker: &mut HashMap<ChannelTopic, String>,
        status_tx: &mpsc::Sender<EventSubStatus>,
    ) {
        let version = Self::event_version(topic);
        let condition = Self::build_condition(topic, channel_id);
        match api
            .create_eventsub_subscription(token, topic, version, condition, session_id)
            .await
        {
            Ok(sub) => {
                tracing::info!(channel_id, topic, subscription_id = %sub.id, "EventSub subscription created");
                tracker.insert((channel_id.to_string(), topic.to_string()), sub.id.clone());
                let _ = status_tx
                    .send(EventSubStatus::SubscriptionCreated {
                        channel_id: channel_id.to_string(),
                        topic: topic.to_string(),
                        subscription_id: sub.id,
                    })
                    .await;
            }
            Err(TwitchError::ApiError { status, message }) => {
                tracing::warn!(channel_id, topic, status, "EventSub subscription creation failed");
                let _ = status_tx
                    .send(EventSubStatus::SubscriptionFailed {
                        channel_id: channel_id.to_string(),
                        topic: topic.to_string(),
                        status,
                        message,
                    })
                    .await;
            }
            Err(e) => {
                tracing::warn!(channel_id, topic, error = %e, "EventSub subscription creation failed");
                let _ = status_tx
                    .send(EventSubStatus::SubscriptionFailed {
                        channel_id: channel_id.to_string(),
                        topic: topic.to_string(),
                        status: 0,
                        message: e.to_string(),
                    })
                    .await;
            }
        }
    }

    async fn delete_subscription(
        api: &TwitchApiClient,
        token: &Token,
        channel_id: &str,
        topic: &str,
        tracker: &mut HashMap<ChannelTopic, String>,
        status_tx: &mpsc::Sender<EventSubStatus>,
    ) {
        let Some(subscription_id) = tracker.remove(&(channel_id.to_string(), topic.to_string()))
        else {
            return;
        };
        match api.delete_eventsub_subscription(token, &subscription_id).await {
            Ok(()) => {
                tracing::info!(channel_id, topic, "EventSub subscription deleted");
                let _ = status_tx
                    .send(EventSubStatus::SubscriptionDeleted {
                        channel_id: channel_id.to_string(),
                        topic: topic.to_string(),
                    })
                    .await;
            }
            Err(e) => {
                tracing::warn!(channel_id, topic, error = %e, "EventSub subscription deletion failed");
            }
        }
    }
}
