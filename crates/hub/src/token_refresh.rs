//! Keeps the fleet's shared bot token fresh for as long as the Hub runs:
//! a periodic check interval with exponential backoff on failure, reset
//! to the initial delay on success.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use token_store::{Database, Severity, TokenKind};
use twitch_client::Token;
use twitch_client::auth::TokenRefresher;
use twitch_client::eventsub::EventSubCommand;

const CHECK_INTERVAL: Duration = Duration::from_secs(30 * 60);
const INITIAL_BACKOFF_SECS: u64 = 30;
const MAX_BACKOFF_SECS: u64 = 30 * 60;

async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn run(
    db: Database,
    refresher: TokenRefresher,
    bot_user_id: String,
    refresh_margin_mins: i64,
    commands: mpsc::Sender<EventSubCommand>,
    shutdown: CancellationToken,
) {
    if bot_user_id.is_empty() {
        tracing::warn!("no twitch.bot_user_id configured, token refresh loop idle");
        return;
    }

    let mut backoff = INITIAL_BACKOFF_SECS;
    loop {
        match refresh_if_due(&db, &refresher, &bot_user_id, refresh_margin_mins, &commands).await {
            Ok(_) => backoff = INITIAL_BACKOFF_SECS,
            Err(e) => {
                tracing::warn!(error = %e, "hub token refresh failed, backing off");
                if sleep_or_cancel(&shutdown, Duration::from_secs(backoff)).await {
                    return;
                }
                backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
                continue;
            }
        }

        if sleep_or_cancel(&shutdown, CHECK_INTERVAL).await {
            return;
        }
    }
}

async fn refresh_if_due(
    db: &Database,
    refresher: &TokenRefresher,
    user_id: &str,
    margin_mins: i64,
    commands: &mpsc::Sender<EventSubCommand>,
) -> Result<(), anyhow::Error> {
    let _guard = db.acquire_refresh_lock(user_id).await;

    let Some(record) = db.get_tokens(user_id, TokenKind::Bot)? else {
        return Ok(());
    };
    if record.revoked || record.needs_reauth {
        return Ok(());
    }
    if record.expires_at - chrono::Utc::now() > chrono::Duration::minutes(margin_mins) {
        return Ok(());
    }

    tracing::info!(user_id, "hub bot token expiring soon, refreshing");
    match refresher.refresh(&record.refresh_token).await {
        Ok(new_token) => {
            store_refreshed(db, user_id, &new_token)?;
            db.clear_refresh_failures(user_id, TokenKind::Bot)?;
            db.audit(Severity::Info, Some(user_id), "hub bot token refreshed")?;
            let _ = commands.send(EventSubCommand::UpdateToken(new_token)).await;
            Ok(())
        }
        Err(e) => {
            let failures = db.increment_refresh_failures(user_id, TokenKind::Bot)?;
            db.audit(Severity::Warn, Some(user_id), &format!("token refresh attempt {failures} failed: {e}"))?;
            Err(e.into())
        }
    }
}

fn store_refreshed(db: &Database, user_id: &str, token: &Token) -> Result<(), anyhow::Error> {
    let scopes: Vec<String> = token.scope.split(' ').filter(|s| !s.is_empty()).map(str::to_string).collect();
    let expires_at = chrono::DateTime::from_timestamp(token.expires_at, 0).unwrap_or_else(chrono::Utc::now);
    db.store_tokens(user_id, TokenKind::Bot, &token.access_token, &token.refresh_token, &scopes, expires_at)?;
    Ok(())
}
