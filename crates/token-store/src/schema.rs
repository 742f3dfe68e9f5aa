//! SQL schema for the fleet token store and in-process migrations.

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    user_id         TEXT PRIMARY KEY,
    login           TEXT NOT NULL UNIQUE,
    display_name    TEXT NOT NULL,
    is_bot          INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tokens (
    user_id             TEXT NOT NULL,
    token_kind          TEXT NOT NULL,
    access_ciphertext   BLOB NOT NULL,
    refresh_ciphertext  BLOB NOT NULL,
    key_version         INTEGER NOT NULL,
    scopes              TEXT NOT NULL,
    expires_at          TEXT NOT NULL,
    refresh_failures    INTEGER NOT NULL DEFAULT 0,
    needs_reauth        INTEGER NOT NULL DEFAULT 0,
    revoked             INTEGER NOT NULL DEFAULT 0,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL,
    PRIMARY KEY (user_id, token_kind),
    FOREIGN KEY (user_id) REFERENCES users(user_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS instances (
    instance_id     TEXT PRIMARY KEY,
    role            TEXT NOT NULL,
    channel_id      TEXT,
    pid             INTEGER,
    status          TEXT NOT NULL DEFAULT 'stopped',
    started_at      TEXT NOT NULL,
    last_heartbeat  TEXT NOT NULL,
    FOREIGN KEY (channel_id) REFERENCES users(user_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS desired_subscriptions (
    channel_id  TEXT NOT NULL,
    topic       TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (channel_id, topic),
    FOREIGN KEY (channel_id) REFERENCES users(user_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS active_subscriptions (
    channel_id      TEXT NOT NULL,
    topic           TEXT NOT NULL,
    subscription_id TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    PRIMARY KEY (channel_id, topic),
    FOREIGN KEY (channel_id) REFERENCES users(user_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS audit_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    occurred_at TEXT NOT NULL,
    severity    TEXT NOT NULL,
    subject     TEXT,
    message     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS hub_state (
    key     TEXT PRIMARY KEY,
    value   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tokens_needs_reauth ON tokens(needs_reauth);
CREATE INDEX IF NOT EXISTS idx_instances_role ON instances(role);
CREATE INDEX IF NOT EXISTS idx_instances_status ON instances(status);
CREATE INDEX IF NOT EXISTS idx_audit_log_occurred_at ON audit_log(occurred_at);
"#;

/// Apply the schema. Every statement is `IF NOT EXISTS`, so this is safe
/// to run on every startup rather than tracking a migration version.
pub fn run_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}
