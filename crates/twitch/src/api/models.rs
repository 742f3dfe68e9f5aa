use serde::{Deserialize, Serialize};

/// Wrapper for Twitch Helix non-paginated responses.
#[derive(Debug, Deserialize)]
pub struct HelixResponse<T> {
    pub data: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct HelixPagination {
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HelixPaginatedResponse<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub pagination: Option<HelixPagination>,
}

/// User information from GET /helix/users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwitchUser {
    pub id: String,
    pub login: String,
    pub display_name: String,
    #[serde(default)]
    pub user_type: String,
    #[serde(default)]
    pub broadcaster_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub profile_image_url: String,
    #[serde(default)]
    pub created_at: String,
}

/// Transport descriptor for an EventSub subscription. This core only ever
/// uses the `websocket` method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSubTransport {
    pub method: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// An EventSub subscription as returned by the Helix subscriptions
/// endpoints (create, list).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSubSubscription {
    pub id: String,
    pub status: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub version: String,
    pub condition: serde_json::Value,
    pub transport: EventSubTransport,
    #[serde(default)]
    pub cost: u32,
}

/// Response shape for GET/POST /helix/eventsub/subscriptions, which carries
/// rate-limit accounting alongside the data page.
#[derive(Debug, Deserialize)]
pub struct EventSubSubscriptionsResponse {
    pub data: Vec<EventSubSubscription>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub total_cost: u64,
    #[serde(default)]
    pub max_total_cost: u64,
    #[serde(default)]
    pub pagination: Option<HelixPagination>,
}
