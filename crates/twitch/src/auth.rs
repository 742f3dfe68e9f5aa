//! OAuth token refresh for Twitch authentication.
//!
//! Authorization itself (turning a user's consent into the first access/
//! refresh token pair) happens in an external onboarding process; this
//! module only ever refreshes a token it was handed.

use chrono::Utc;
use serde::Deserialize;

use crate::{SCOPES, Token, TwitchError};

/// Twitch OAuth token response from the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    scope: Option<Vec<String>>,
}

/// Twitch OAuth error response.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

/// Refresh margin: a token within this many seconds of expiry is refreshed
/// eagerly rather than left to fail on next use.
const REFRESH_MARGIN_SECS: i64 = 30 * 60;

/// Refreshes Twitch OAuth tokens via the `refresh_token` grant.
pub struct TokenRefresher {
    client_id: String,
    client_secret: String,
    http: reqwest::Client,
}

impl TokenRefresher {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            client_id,
            client_secret,
            http: reqwest::Client::new(),
        }
    }

    /// Refresh an expired (or expiring) token using its refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Token, TwitchError> {
        tracing::info!("refreshing Twitch OAuth token");

        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let resp = self
            .http
            .post("https://id.twitch.tv/oauth2/token")
            .form(&params)
            .send()
            .await?;

        self.parse_token_response(resp).await
    }

    /// Refresh `current` if it is within [`REFRESH_MARGIN_SECS`] of expiry.
    ///
    /// Returns `Ok(None)` if no refresh was needed, `Ok(Some(token))` with
    /// the new token otherwise. The caller is responsible for persisting it.
    pub async fn refresh_if_needed(&self, current: &Token) -> Result<Option<Token>, TwitchError> {
        let now = Utc::now().timestamp();

        if now < current.expires_at - REFRESH_MARGIN_SECS {
            return Ok(None);
        }

        if current.refresh_token.is_empty() {
            return Err(TwitchError::AuthRequired);
        }

        tracing::info!(
            expires_in_secs = current.expires_at - now,
            "token expiring soon, refreshing"
        );

        let new_token = self.refresh(&current.refresh_token).await?;
        Ok(Some(new_token))
    }

    async fn parse_token_response(&self, resp: reqwest::Response) -> Result<Token, TwitchError> {
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let err: ErrorResponse = serde_json::from_str(&body).unwrap_or(ErrorResponse {
                error: Some(status.to_string()),
                error_description: Some(body.clone()),
            });
            return Err(TwitchError::TokenRefreshFailed(format!(
                "{}: {}",
                err.error.unwrap_or_default(),
                err.error_description.unwrap_or_default()
            )));
        }

        let token_resp: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            TwitchError::TokenRefreshFailed(format!("failed to parse response: {e}"))
        })?;

        let scope = token_resp
            .scope
            .map(|s| s.join(" "))
            .unwrap_or_else(|| SCOPES.join(" "));

        let expires_at = Utc::now().timestamp() + token_resp.expires_in;

        Ok(Token {
            access_token: token_resp.access_token,
            refresh_token: token_resp.refresh_token,
            scope,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn still_valid_token_is_not_refreshed() {
        let refresher = TokenRefresher::new("id".into(), "secret".into());
        let token = Token {
            access_token: "abc".into(),
            refresh_token: "def".into(),
            scope: "read".into(),
            expires_at: Utc::now().timestamp() + 7200,
        };

        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(refresher.refresh_if_needed(&token)).unwrap();
        assert!(result.is_none(), "should not refresh a token with plenty of margin left");
    }

    #[test]
    fn expiring_token_with_no_refresh_token_is_auth_required() {
        let refresher = TokenRefresher::new("id".into(), "secret".into());
        let token = Token {
            access_token: "abc".into(),
            refresh_token: String::new(),
            scope: "read".into(),
            expires_at: Utc::now().timestamp(),
        };

        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(refresher.refresh_if_needed(&token));
        assert!(matches!(result, Err(TwitchError::AuthRequired)));
    }
}
