//! Reactive token refresh: triggered when the transport or a REST call
//! reports "unauthorized", not on a schedule (the Hub owns proactive
//! refresh for the shared bot identity; this is the per-channel
//! broadcaster token path).

use token_store::{Database, Severity, TokenKind, TokenRecord, tokens::REFRESH_FAILURE_THRESHOLD};
use twitch_client::Token;
use twitch_client::TwitchError;
use twitch_client::auth::TokenRefresher;

/// Outcome of a refresh attempt the caller must act on.
pub enum RefreshOutcome {
    Refreshed(Token),
    NeedsReauth,
}

pub async fn request_refresh(
    db: &Database,
    refresher: &TokenRefresher,
    user_id: &str,
    kind: TokenKind,
) -> Result<RefreshOutcome, anyhow::Error> {
    let _guard = db.acquire_refresh_lock(user_id).await;

    let Some(record) = db.get_tokens(user_id, kind)? else {
        anyhow::bail!("no token record for {user_id}");
    };
    if record.needs_reauth || record.revoked {
        return Ok(RefreshOutcome::NeedsReauth);
    }

    match refresher.refresh(&record.refresh_token).await {
        Ok(new_token) => {
            store_refreshed(db, user_id, kind, &new_token)?;
            db.clear_refresh_failures(user_id, kind)?;
            db.audit(Severity::Info, Some(user_id), "bot token refreshed")?;
            Ok(RefreshOutcome::Refreshed(new_token))
        }
        Err(TwitchError::TokenRefreshFailed(ref msg)) if msg.contains("invalid_grant") => {
            db.mark_revoked(user_id, kind)?;
            db.audit(Severity::Error, Some(user_id), "token revoked upstream (invalid_grant), marking revoked")?;
            Ok(RefreshOutcome::NeedsReauth)
        }
        Err(e) => {
            let failures = db.increment_refresh_failures(user_id, kind)?;
            db.audit(Severity::Warn, Some(user_id), &format!("token refresh attempt {failures} failed: {e}"))?;
            if failures >= REFRESH_FAILURE_THRESHOLD {
                db.audit(Severity::Error, Some(user_id), "token flagged needs_reauth after repeated refresh failures")?;
                Ok(RefreshOutcome::NeedsReauth)
            } else {
                Err(e.into())
            }
        }
    }
}

fn store_refreshed(db: &Database, user_id: &str, kind: TokenKind, token: &Token) -> Result<(), anyhow::Error> {
    let scopes: Vec<String> = token.scope.split(' ').filter(|s| !s.is_empty()).map(str::to_string).collect();
    let expires_at = chrono::DateTime::from_timestamp(token.expires_at, 0).unwrap_or_else(chrono::Utc::now);
    db.store_tokens(user_id, kind, &token.access_token, &token.refresh_token, &scopes, expires_at)?;
    Ok(())
}

pub fn as_token(record: &TokenRecord) -> Token {
    Token {
        access_token: record.access_token.clone(),
        refresh_token: record.refresh_token.clone(),
        scope: record.scopes.join(" "),
        expires_at: record.expires_at.timestamp(),
    }
}
