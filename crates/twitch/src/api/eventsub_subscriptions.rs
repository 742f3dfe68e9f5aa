use serde::Serialize;

use super::*;

#[derive(Debug, Serialize)]
struct CreateSubscriptionRequest<'a> {
    #[serde(rename = "type")]
    event_type: &'a str,
    version: &'a str,
    condition: serde_json::Value,
    transport: EventSubTransport,
}

impl TwitchApiClient {
    /// Create an EventSub subscription bound to a live WebSocket session.
    ///
    /// On success returns the subscription as echoed back by Twitch
    /// (carrying the subscription id the caller must remember to delete
    /// or to match incoming notifications against).
    pub async fn create_eventsub_subscription(
        &self,
        token: &Token,
        event_type: &str,
        version: &str,
        condition: serde_json::Value,
        session_id: &str,
    ) -> Result<EventSubSubscription, TwitchError> {
        let url = format!("{HELIX_BASE}/eventsub/subscriptions");
        let req = CreateSubscriptionRequest {
            event_type,
            version,
            condition,
            transport: EventSubTransport {
                method: "websocket".into(),
                session_id: Some(session_id.into()),
            },
        };
        let body = self.authenticated_post(&url, token, &req).await?;
        let resp: EventSubSubscriptionsResponse = serde_json::from_str(&body)?;
        resp.data
            .into_iter()
            .next()
            .ok_or_else(|| TwitchError::ApiError {
                status: 502,
                message: "subscription create response carried no data".into(),
            })
    }

    /// Delete an EventSub subscription by id.
    pub async fn delete_eventsub_subscription(
        &self,
        token: &Token,
        subscription_id: &str,
    ) -> Result<(), TwitchError> {
        let url = format!("{HELIX_BASE}/eventsub/subscriptions?id={subscription_id}");
        self.authenticated_delete(&url, token).await
    }

    /// List one page of EventSub subscriptions, optionally filtered by
    /// status (e.g. `enabled`, `websocket_disconnected`).
    pub async fn list_eventsub_subscriptions_page(
        &self,
        token: &Token,
        status: Option<&str>,
        after: Option<&str>,
    ) -> Result<EventSubSubscriptionsResponse, TwitchError> {
        let mut url = format!("{HELIX_BASE}/eventsub/subscriptions");
        let mut sep = '?';
        if let Some(status) = status {
            url.push(sep);
            url.push_str("status=");
            url.push_str(status);
            sep = '&';
        }
        if let Some(cursor) = after.filter(|v| !v.is_empty()) {
            url.push(sep);
            url.push_str("after=");
            url.push_str(cursor);
        }
        let body = self.authenticated_get(&url, token).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// List every subscription by paging until the cursor is exhausted.
    pub async fn list_all_eventsub_subscriptions(
        &self,
        token: &Token,
        status: Option<&str>,
    ) -> Result<Vec<EventSubSubscription>, TwitchError> {
        let mut all = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let page = self
                .list_eventsub_subscriptions_page(token, status, after.as_deref())
                .await?;
            all.extend(page.data);
            match page.pagination.and_then(|p| p.cursor) {
                Some(cursor) if !cursor.is_empty() => after = Some(cursor),
                _ => break,
            }
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriptions_response_deserializes_rate_limit_fields() {
        let body = r#"{
          "data": [{
            "id": "sub-1",
            "status": "enabled",
            "type": "channel.follow",
            "version": "2",
            "condition": {},
            "transport": {"method": "websocket", "session_id": "s1"},
            "cost": 1
          }],
          "total": 1,
          "total_cost": 1,
          "max_total_cost": 10000
        }"#;

        let parsed: EventSubSubscriptionsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data.len(), 1);
        assert_eq!(parsed.data[0].id, "sub-1");
        assert_eq!(parsed.max_total_cost, 10000);
    }
}
