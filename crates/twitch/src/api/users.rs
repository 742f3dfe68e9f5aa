use super::*;

impl TwitchApiClient {
    /// Get user profile by user ID.
    pub async fn get_user(&self, token: &Token, user_id: &str) -> Result<TwitchUser, TwitchError> {
        let url = format!("{HELIX_BASE}/users?id={user_id}");
        let body = self.authenticated_get(&url, token).await?;
        let resp: HelixResponse<TwitchUser> = serde_json::from_str(&body)?;

        resp.data
            .into_iter()
            .next()
            .ok_or_else(|| TwitchError::ApiError {
                status: 404,
                message: "user not found".into(),
            })
    }

    /// Get user profile by login name, used when onboarding a channel by
    /// its Twitch username rather than its numeric id.
    pub async fn get_user_by_login(
        &self,
        token: &Token,
        login: &str,
    ) -> Result<TwitchUser, TwitchError> {
        let url = format!("{HELIX_BASE}/users?login={login}");
        let body = self.authenticated_get(&url, token).await?;
        let resp: HelixResponse<TwitchUser> = serde_json::from_str(&body)?;

        resp.data
            .into_iter()
            .next()
            .ok_or_else(|| TwitchError::ApiError {
                status: 404,
                message: "user not found".into(),
            })
    }

    /// Get the user identified by the access token itself.
    pub async fn get_current_user(&self, token: &Token) -> Result<TwitchUser, TwitchError> {
        let url = format!("{HELIX_BASE}/users");
        let body = self.authenticated_get(&url, token).await?;
        let resp: HelixResponse<TwitchUser> = serde_json::from_str(&body)?;

        resp.data
            .into_iter()
            .next()
            .ok_or_else(|| TwitchError::ApiError {
                status: 404,
                message: "authenticated user not found".into(),
            })
    }

    /// Get users by user ID (up to 100 per call).
    pub async fn get_users_by_ids(
        &self,
        token: &Token,
        user_ids: &[String],
    ) -> Result<Vec<TwitchUser>, TwitchError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = user_ids
            .iter()
            .take(100)
            .map(|id| format!("id={id}"))
            .collect::<Vec<_>>()
            .join("&");
        let url = format!("{HELIX_BASE}/users?{query}");
        let body = self.authenticated_get(&url, token).await?;
        let resp: HelixResponse<TwitchUser> = serde_json::from_str(&body)?;
        Ok(resp.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_response_deserializes_without_optional_fields() {
        let body = r#"{
          "data": [{
            "id": "1",
            "login": "streamer",
            "display_name": "Streamer"
          }]
        }"#;

        let parsed: HelixResponse<TwitchUser> = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data[0].login, "streamer");
        assert_eq!(parsed.data[0].broadcaster_type, "");
    }
}
