//! Twitch Helix REST API client.
//!
//! Provides typed access to the handful of Helix endpoints the control
//! plane needs (user lookup, EventSub subscription CRUD) with automatic
//! Bearer token + Client-Id header injection.

mod chat;
mod eventsub_subscriptions;
mod request;
mod users;

pub mod models;

pub use models::{
    EventSubSubscription, EventSubSubscriptionsResponse, EventSubTransport, HelixPaginatedResponse,
    HelixPagination, HelixResponse, TwitchUser,
};

use crate::{Token, TwitchError};

const HELIX_BASE: &str = "https://api.twitch.tv/helix";

/// Twitch Helix API client with automatic auth header injection.
pub struct TwitchApiClient {
    pub(super) http: reqwest::Client,
    pub(super) client_id: String,
}
