//! CRUD for the `tokens` table: per-user, per-kind OAuth credentials,
//! stored encrypted at rest and tracked for refresh-failure escalation.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::crypto::KeyRing;
use crate::error::StoreError;

/// Consecutive refresh failures after which a token is flagged
/// `needs_reauth` and the supervisor stops spawning a bot for it.
pub const REFRESH_FAILURE_THRESHOLD: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Bot,
    Broadcaster,
}

impl TokenKind {
    fn as_str(self) -> &'static str {
        match self {
            TokenKind::Bot => "bot",
            TokenKind::Broadcaster => "broadcaster",
        }
    }

    fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "bot" => Ok(TokenKind::Bot),
            "broadcaster" => Ok(TokenKind::Broadcaster),
            other => Err(StoreError::Corrupt(format!("unknown token_kind: {other}"))),
        }
    }
}

/// A decrypted token record, as handed to the Hub/Bot processes.
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub user_id: String,
    pub token_kind: TokenKind,
    pub access_token: String,
    pub refresh_token: String,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub refresh_failures: i64,
    pub needs_reauth: bool,
    pub revoked: bool,
}

/// Associated-data binding for a token ciphertext: the user and token kind
/// it belongs to, so ciphertexts cannot be swapped between rows.
fn aad(user_id: &str, kind: TokenKind, field: &str) -> Vec<u8> {
    format!("{user_id}:{}:{field}", kind.as_str()).into_bytes()
}

pub fn store_tokens(
    conn: &Connection,
    keys: &KeyRing,
    user_id: &str,
    kind: TokenKind,
    access_token: &str,
    refresh_token: &str,
    scopes: &[String],
    expires_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let access_ct = keys.encrypt(access_token, &aad(user_id, kind, "access"))?;
    let refresh_ct = keys.encrypt(refresh_token, &aad(user_id, kind, "refresh"))?;
    let now = Utc::now().to_rfc3339();
    let scopes_json = serde_json::to_string(scopes)
        .map_err(|e| StoreError::Internal(format!("failed to serialize scopes: {e}")))?;

    conn.execute(
        "INSERT INTO tokens (
            user_id, token_kind, access_ciphertext, refresh_ciphertext, key_version,
            scopes, expires_at, refresh_failures, needs_reauth, revoked, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 0, 0, ?8, ?8)
         ON CONFLICT(user_id, token_kind) DO UPDATE SET
            access_ciphertext = excluded.access_ciphertext,
            refresh_ciphertext = excluded.refresh_ciphertext,
            key_version = excluded.key_version,
            scopes = excluded.scopes,
            expires_at = excluded.expires_at,
            refresh_failures = 0,
            needs_reauth = 0,
            revoked = 0,
            updated_at = excluded.updated_at",
        params![
            user_id,
            kind.as_str(),
            access_ct,
            refresh_ct,
            keys.current_version(),
            scopes_json,
            expires_at.to_rfc3339(),
            now,
        ],
    )?;
    Ok(())
}

pub fn get_tokens(
    conn: &Connection,
    keys: &KeyRing,
    user_id: &str,
    kind: TokenKind,
) -> Result<Option<TokenRecord>, StoreError> {
    let row = conn
        .query_row(
            "SELECT access_ciphertext, refresh_ciphertext, key_version, scopes,
                    expires_at, refresh_failures, needs_reauth, revoked
             FROM tokens WHERE user_id = ?1 AND token_kind = ?2",
            params![user_id, kind.as_str()],
            |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            },
        )
        .optional()?;

    let Some((access_ct, refresh_ct, key_version, scopes_json, expires_at, failures, needs_reauth, revoked)) = row
    else {
        return Ok(None);
    };

    let access_token = keys.decrypt(&access_ct, key_version, &aad(user_id, kind, "access"))?;
    let refresh_token = keys.decrypt(&refresh_ct, key_version, &aad(user_id, kind, "refresh"))?;
    let scopes: Vec<String> = serde_json::from_str(&scopes_json)
        .map_err(|e| StoreError::Corrupt(format!("scopes column not valid json: {e}")))?;
    let expires_at = DateTime::parse_from_rfc3339(&expires_at)
        .map_err(|e| StoreError::Corrupt(format!("expires_at column not valid rfc3339: {e}")))?
        .with_timezone(&Utc);

    Ok(Some(TokenRecord {
        user_id: user_id.to_string(),
        token_kind: kind,
        access_token,
        refresh_token,
        scopes,
        expires_at,
        refresh_failures: failures,
        needs_reauth: needs_reauth != 0,
        revoked: revoked != 0,
    }))
}

/// Tokens whose `expires_at` falls within `margin` of now, not yet revoked
/// and not already flagged `needs_reauth`.
pub fn tokens_needing_refresh(
    conn: &Connection,
    margin: chrono::Duration,
) -> Result<Vec<(String, TokenKind)>, StoreError> {
    let cutoff = (Utc::now() + margin).to_rfc3339();
    let mut stmt = conn.prepare(
        "SELECT user_id, token_kind FROM tokens
         WHERE expires_at <= ?1 AND revoked = 0 AND needs_reauth = 0",
    )?;
    let rows = stmt.query_map(params![cutoff], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (user_id, kind) = row?;
        out.push((user_id, TokenKind::parse(&kind)?));
    }
    Ok(out)
}

/// Record a failed refresh attempt. Increments the monotonic counter and,
/// once it reaches [`REFRESH_FAILURE_THRESHOLD`], flags the token
/// `needs_reauth`. Returns the post-increment failure count.
pub fn increment_refresh_failures(
    conn: &Connection,
    user_id: &str,
    kind: TokenKind,
) -> Result<i64, StoreError> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE tokens SET
            refresh_failures = refresh_failures + 1,
            needs_reauth = CASE WHEN refresh_failures + 1 >= ?3 THEN 1 ELSE needs_reauth END,
            updated_at = ?4
         WHERE user_id = ?1 AND token_kind = ?2",
        params![user_id, kind.as_str(), REFRESH_FAILURE_THRESHOLD, now],
    )?;
    conn.query_row(
        "SELECT refresh_failures FROM tokens WHERE user_id = ?1 AND token_kind = ?2",
        params![user_id, kind.as_str()],
        |row| row.get(0),
    )
    .map_err(StoreError::from)
}

/// Reset the failure counter after a successful refresh.
pub fn clear_refresh_failures(conn: &Connection, user_id: &str, kind: TokenKind) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    let affected = conn.execute(
        "UPDATE tokens SET refresh_failures = 0, updated_at = ?3
         WHERE user_id = ?1 AND token_kind = ?2",
        params![user_id, kind.as_str(), now],
    )?;
    if affected == 0 {
        return Err(StoreError::NotFound(format!("token for user {user_id} kind {kind:?}")));
    }
    Ok(())
}

pub fn mark_revoked(conn: &Connection, user_id: &str, kind: TokenKind) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    let affected = conn.execute(
        "UPDATE tokens SET revoked = 1, updated_at = ?3
         WHERE user_id = ?1 AND token_kind = ?2",
        params![user_id, kind.as_str(), now],
    )?;
    if affected == 0 {
        return Err(StoreError::NotFound(format!("token for user {user_id} kind {kind:?}")));
    }
    Ok(())
}

/// Clear a stuck `needs_reauth` flag once an operator has re-linked the
/// account out of band. Resets the failure counter as well.
pub fn clear_needs_reauth(conn: &Connection, user_id: &str, kind: TokenKind) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    let affected = conn.execute(
        "UPDATE tokens SET needs_reauth = 0, refresh_failures = 0, updated_at = ?3
         WHERE user_id = ?1 AND token_kind = ?2",
        params![user_id, kind.as_str(), now],
    )?;
    if affected == 0 {
        return Err(StoreError::NotFound(format!("token for user {user_id} kind {kind:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::schema::run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO users (user_id, login, display_name, created_at, updated_at)
             VALUES ('1', 'alice', 'Alice', 'now', 'now')",
            [],
        )
        .unwrap();
        conn
    }

    fn keys() -> KeyRing {
        KeyRing::from_keys(vec![[0x42u8; 32]])
    }

    #[test]
    fn store_then_get_round_trips_plaintext() {
        let conn = conn();
        let keys = keys();
        let expires = Utc::now() + chrono::Duration::hours(1);
        store_tokens(
            &conn,
            &keys,
            "1",
            TokenKind::Bot,
            "access-xyz",
            "refresh-xyz",
            &["chat:read".to_string(), "chat:edit".to_string()],
            expires,
        )
        .unwrap();

        let got = get_tokens(&conn, &keys, "1", TokenKind::Bot).unwrap().unwrap();
        assert_eq!(got.access_token, "access-xyz");
        assert_eq!(got.refresh_token, "refresh-xyz");
        assert_eq!(got.scopes, vec!["chat:read", "chat:edit"]);
        assert_eq!(got.refresh_failures, 0);
        assert!(!got.needs_reauth);
        assert!(!got.revoked);
    }

    #[test]
    fn store_tokens_is_an_upsert_that_resets_failure_state() {
        let conn = conn();
        let keys = keys();
        let expires = Utc::now() + chrono::Duration::hours(1);
        store_tokens(&conn, &keys, "1", TokenKind::Bot, "a1", "r1", &[], expires).unwrap();
        increment_refresh_failures(&conn, "1", TokenKind::Bot).unwrap();
        store_tokens(&conn, &keys, "1", TokenKind::Bot, "a2", "r2", &[], expires).unwrap();

        let got = get_tokens(&conn, &keys, "1", TokenKind::Bot).unwrap().unwrap();
        assert_eq!(got.access_token, "a2");
        assert_eq!(got.refresh_failures, 0);
    }

    #[test]
    fn refresh_failures_escalate_to_needs_reauth_at_threshold() {
        let conn = conn();
        let keys = keys();
        let expires = Utc::now() + chrono::Duration::hours(1);
        store_tokens(&conn, &keys, "1", TokenKind::Bot, "a", "r", &[], expires).unwrap();

        assert_eq!(increment_refresh_failures(&conn, "1", TokenKind::Bot).unwrap(), 1);
        assert_eq!(increment_refresh_failures(&conn, "1", TokenKind::Bot).unwrap(), 2);
        let after_third = increment_refresh_failures(&conn, "1", TokenKind::Bot).unwrap();
        assert_eq!(after_third, REFRESH_FAILURE_THRESHOLD);

        let got = get_tokens(&conn, &keys, "1", TokenKind::Bot).unwrap().unwrap();
        assert!(got.needs_reauth);
    }

    #[test]
    fn successful_refresh_clears_failure_counter() {
        let conn = conn();
        let keys = keys();
        let expires = Utc::now() + chrono::Duration::hours(1);
        store_tokens(&conn, &keys, "1", TokenKind::Bot, "a", "r", &[], expires).unwrap();
        increment_refresh_failures(&conn, "1", TokenKind::Bot).unwrap();
        increment_refresh_failures(&conn, "1", TokenKind::Bot).unwrap();

        clear_refresh_failures(&conn, "1", TokenKind::Bot).unwrap();
        let got = get_tokens(&conn, &keys, "1", TokenKind::Bot).unwrap().unwrap();
        assert_eq!(got.refresh_failures, 0);
        assert!(!got.needs_reauth);
    }

    #[test]
    fn tokens_needing_refresh_respects_margin_and_flags() {
        let conn = conn();
        let keys = keys();
        store_tokens(
            &conn,
            &keys,
            "1",
            TokenKind::Bot,
            "a",
            "r",
            &[],
            Utc::now() + chrono::Duration::minutes(5),
        )
        .unwrap();

        let due = tokens_needing_refresh(&conn, chrono::Duration::minutes(10)).unwrap();
        assert_eq!(due, vec![("1".to_string(), TokenKind::Bot)]);

        let not_due = tokens_needing_refresh(&conn, chrono::Duration::minutes(1)).unwrap();
        assert!(not_due.is_empty());
    }

    #[test]
    fn revoked_or_needs_reauth_tokens_are_excluded_from_refresh_candidates() {
        let conn = conn();
        let keys = keys();
        store_tokens(
            &conn,
            &keys,
            "1",
            TokenKind::Bot,
            "a",
            "r",
            &[],
            Utc::now() - chrono::Duration::minutes(1),
        )
        .unwrap();
        mark_revoked(&conn, "1", TokenKind::Bot).unwrap();

        let due = tokens_needing_refresh(&conn, chrono::Duration::minutes(10)).unwrap();
        assert!(due.is_empty());
    }

    #[test]
    fn clear_needs_reauth_allows_reentry() {
        let conn = conn();
        let keys = keys();
        let expires = Utc::now() + chrono::Duration::hours(1);
        store_tokens(&conn, &keys, "1", TokenKind::Bot, "a", "r", &[], expires).unwrap();
        for _ in 0..REFRESH_FAILURE_THRESHOLD {
            increment_refresh_failures(&conn, "1", TokenKind::Bot).unwrap();
        }
        clear_needs_reauth(&conn, "1", TokenKind::Bot).unwrap();

        let got = get_tokens(&conn, &keys, "1", TokenKind::Bot).unwrap().unwrap();
        assert!(!got.needs_reauth);
        assert_eq!(got.refresh_failures, 0);
    }
}
