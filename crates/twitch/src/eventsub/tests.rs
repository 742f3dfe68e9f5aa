use super::*;

#[test]
fn parse_reconnect_url_from_payload() {
    let payload = serde_json::json!({
        "session": {
            "reconnect_url": "wss://eventsub.wss.twitch.tv/ws?token=reconnect"
        }
    });
    assert_eq!(
        EventSubClient::parse_reconnect_url(&payload).as_deref(),
        Some("wss://eventsub.wss.twitch.tv/ws?token=reconnect")
    );
}

#[test]
fn parse_reconnect_url_missing_returns_none() {
    let payload = serde_json::json!({
        "session": {}
    });
    assert_eq!(EventSubClient::parse_reconnect_url(&payload), None);
}

#[test]
fn follow_events_use_version_two_others_use_version_one() {
    assert_eq!(EventSubClient::event_version(EVENT_CHANNEL_FOLLOW), "2");
    assert_eq!(EventSubClient::event_version(EVENT_STREAM_ONLINE), "1");
    assert_eq!(EventSubClient::event_version("some.unknown.topic"), "1");
}

#[test]
fn raid_condition_keys_on_the_receiving_broadcaster() {
    let condition = EventSubClient::build_condition(EVENT_CHANNEL_RAID, "123");
    assert_eq!(condition["to_broadcaster_user_id"], "123");
    assert!(condition.get("broadcaster_user_id").is_none());
}

#[test]
fn unknown_topic_falls_back_to_broadcaster_only_condition() {
    let condition = EventSubClient::build_condition("channel.ban", "456");
    assert_eq!(condition["broadcaster_user_id"], "456");
}

#[test]
fn channel_topic_for_subscription_finds_reverse_match() {
    let mut tracker = std::collections::HashMap::new();
    tracker.insert(("10".to_string(), EVENT_STREAM_ONLINE.to_string()), "sub-a".to_string());
    tracker.insert(("20".to_string(), EVENT_STREAM_OFFLINE.to_string()), "sub-b".to_string());

    let found = EventSubClient::channel_topic_for_subscription(&tracker, "sub-b");
    assert_eq!(found, Some(("20".to_string(), EVENT_STREAM_OFFLINE.to_string())));

    assert_eq!(EventSubClient::channel_topic_for_subscription(&tracker, "missing"), None);
}
