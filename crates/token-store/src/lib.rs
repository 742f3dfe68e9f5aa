//! SQLite-backed, encrypted-at-rest store for OAuth tokens and fleet
//! bookkeeping, shared by the supervisor, Hub and bot processes.

pub mod audit;
pub mod crypto;
pub mod error;
pub mod hub_state;
pub mod instances;
pub mod refresh_lock;
pub mod schema;
pub mod stats;
pub mod subscriptions;
pub mod tokens;
pub mod users;

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tokio::sync::OwnedMutexGuard;

pub use audit::{AuditEntry, Severity};
pub use crypto::KeyRing;
pub use error::StoreError;
pub use instances::{Instance, InstanceRole, InstanceStatus};
pub use refresh_lock::RefreshLocks;
pub use stats::FleetStats;
pub use subscriptions::{ActiveSubscription, DesiredSubscription};
pub use tokens::{TokenKind, TokenRecord};
pub use users::User;

/// Thread-safe handle to the fleet's SQLite database plus its active key
/// ring. Cheap to clone; every clone shares the same connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    keys: Arc<KeyRing>,
    refresh_locks: RefreshLocks,
}

impl Database {
    /// Open or create the database at `path`, loading the encryption key
    /// ring from `key_path`.
    pub fn open(path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let keys = KeyRing::load(key_path)?;
        Self::open_with_keys(path, keys)
    }

    pub fn open_with_keys(path: impl AsRef<Path>, keys: KeyRing) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            keys: Arc::new(keys),
            refresh_locks: RefreshLocks::new(),
        };
        db.configure()?;
        db.migrate()?;
        Ok(db)
    }

    /// In-memory database for tests and the interactive supervisor
    /// console's dry-run mode.
    pub fn open_in_memory(keys: KeyRing) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            keys: Arc::new(keys),
            refresh_locks: RefreshLocks::new(),
        };
        db.configure()?;
        db.migrate()?;
        Ok(db)
    }

    /// Acquire the per-user refresh lock. Hold the returned guard for the
    /// duration of the upstream refresh call and the subsequent
    /// `store_tokens` write, per the single-in-flight-refresh invariant.
    pub async fn acquire_refresh_lock(&self, user_id: &str) -> OwnedMutexGuard<()> {
        self.refresh_locks.acquire(user_id).await
    }

    /// Run `f` with shared access to the connection.
    pub fn with_conn<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&conn)
    }

    fn configure(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA busy_timeout=5000;
                 PRAGMA foreign_keys=ON;",
            )?;
            Ok(())
        })
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            schema::run_migrations(conn)?;
            Ok(())
        })
    }

    // -- users -----------------------------------------------------------

    pub fn put_user(&self, user: &User) -> Result<(), StoreError> {
        self.with_conn(|conn| users::put_user(conn, user))
    }

    pub fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        self.with_conn(|conn| users::get_user_by_id(conn, user_id))
    }

    pub fn get_user_by_login(&self, login: &str) -> Result<Option<User>, StoreError> {
        self.with_conn(|conn| users::get_user_by_login(conn, login))
    }

    pub fn list_users(&self) -> Result<Vec<User>, StoreError> {
        self.with_conn(users::list_users)
    }

    // -- tokens ------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn store_tokens(
        &self,
        user_id: &str,
        kind: TokenKind,
        access_token: &str,
        refresh_token: &str,
        scopes: &[String],
        expires_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            tokens::store_tokens(conn, &self.keys, user_id, kind, access_token, refresh_token, scopes, expires_at)
        })
    }

    pub fn get_tokens(&self, user_id: &str, kind: TokenKind) -> Result<Option<TokenRecord>, StoreError> {
        self.with_conn(|conn| tokens::get_tokens(conn, &self.keys, user_id, kind))
    }

    pub fn tokens_needing_refresh(&self, margin: chrono::Duration) -> Result<Vec<(String, TokenKind)>, StoreError> {
        self.with_conn(|conn| tokens::tokens_needing_refresh(conn, margin))
    }

    pub fn increment_refresh_failures(&self, user_id: &str, kind: TokenKind) -> Result<i64, StoreError> {
        self.with_conn(|conn| tokens::increment_refresh_failures(conn, user_id, kind))
    }

    pub fn clear_refresh_failures(&self, user_id: &str, kind: TokenKind) -> Result<(), StoreError> {
        self.with_conn(|conn| tokens::clear_refresh_failures(conn, user_id, kind))
    }

    pub fn mark_revoked(&self, user_id: &str, kind: TokenKind) -> Result<(), StoreError> {
        self.with_conn(|conn| tokens::mark_revoked(conn, user_id, kind))
    }

    pub fn clear_needs_reauth(&self, user_id: &str, kind: TokenKind) -> Result<(), StoreError> {
        self.with_conn(|conn| tokens::clear_needs_reauth(conn, user_id, kind))
    }

    // -- instances ---------------------------------------------------------

    pub fn register_instance(
        &self,
        instance_id: &str,
        role: InstanceRole,
        channel_id: Option<&str>,
        pid: Option<i64>,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| instances::register_instance(conn, instance_id, role, channel_id, pid))
    }

    pub fn heartbeat(&self, instance_id: &str, status: InstanceStatus) -> Result<(), StoreError> {
        self.with_conn(|conn| instances::heartbeat(conn, instance_id, status))
    }

    pub fn set_instance_status(&self, instance_id: &str, status: InstanceStatus) -> Result<(), StoreError> {
        self.with_conn(|conn| instances::set_status(conn, instance_id, status))
    }

    pub fn deregister_instance(&self, instance_id: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| instances::deregister_instance(conn, instance_id))
    }

    pub fn stale_instances(&self, max_age: chrono::Duration) -> Result<Vec<Instance>, StoreError> {
        self.with_conn(|conn| instances::stale_instances(conn, max_age))
    }

    pub fn list_instances(&self) -> Result<Vec<Instance>, StoreError> {
        self.with_conn(instances::list_instances)
    }

    // -- subscriptions -------------------------------------------------------

    pub fn put_desired_subscription(&self, channel_id: &str, topic: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| subscriptions::put_desired_subscription(conn, channel_id, topic))
    }

    pub fn remove_desired_subscription(&self, channel_id: &str, topic: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| subscriptions::remove_desired_subscription(conn, channel_id, topic))
    }

    pub fn list_desired_subscriptions(&self) -> Result<Vec<DesiredSubscription>, StoreError> {
        self.with_conn(subscriptions::list_desired_subscriptions)
    }

    pub fn record_active_subscription(
        &self,
        channel_id: &str,
        topic: &str,
        subscription_id: &str,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| subscriptions::record_active_subscription(conn, channel_id, topic, subscription_id))
    }

    pub fn forget_active_subscription(&self, channel_id: &str, topic: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| subscriptions::forget_active_subscription(conn, channel_id, topic))
    }

    pub fn list_active_subscriptions(&self) -> Result<Vec<ActiveSubscription>, StoreError> {
        self.with_conn(subscriptions::list_active_subscriptions)
    }

    // -- audit ---------------------------------------------------------------

    pub fn audit(&self, severity: Severity, subject: Option<&str>, message: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| audit::append(conn, severity, subject, message))
    }

    pub fn recent_audit(&self, limit: u32) -> Result<Vec<AuditEntry>, StoreError> {
        self.with_conn(|conn| audit::recent(conn, limit))
    }

    // -- hub_state -------------------------------------------------------------

    pub fn get_hub_state(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| hub_state::get(conn, key))
    }

    pub fn set_hub_state(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| hub_state::set(conn, key, value))
    }

    pub fn delete_hub_state(&self, key: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| hub_state::delete(conn, key))
    }

    // -- stats -----------------------------------------------------------------

    pub fn get_stats(&self) -> Result<FleetStats, StoreError> {
        self.with_conn(stats::get_stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory(KeyRing::from_keys(vec![[0x09u8; 32]])).expect("failed to create test db")
    }

    #[test]
    fn open_in_memory_runs_migrations() {
        let db = test_db();
        assert!(db.list_users().unwrap().is_empty());
        assert_eq!(db.get_stats().unwrap(), FleetStats::default());
    }

    #[test]
    fn end_to_end_user_and_token_lifecycle() {
        let db = test_db();
        db.put_user(&User {
            user_id: "10".into(),
            login: "streamer".into(),
            display_name: "Streamer".into(),
            is_bot: false,
        })
        .unwrap();

        db.store_tokens(
            "10",
            TokenKind::Broadcaster,
            "access-token",
            "refresh-token",
            &["channel:bot".to_string()],
            chrono::Utc::now() + chrono::Duration::hours(4),
        )
        .unwrap();

        let fetched = db.get_tokens("10", TokenKind::Broadcaster).unwrap().unwrap();
        assert_eq!(fetched.access_token, "access-token");

        db.increment_refresh_failures("10", TokenKind::Broadcaster).unwrap();
        let token = db.get_tokens("10", TokenKind::Broadcaster).unwrap().unwrap();
        assert_eq!(token.refresh_failures, 1);

        db.audit(Severity::Info, Some("10"), "token stored").unwrap();
        assert_eq!(db.recent_audit(10).unwrap().len(), 1);
    }

    #[test]
    fn hub_state_round_trips_session_id() {
        let db = test_db();
        db.set_hub_state("eventsub_session_id", "abc").unwrap();
        assert_eq!(db.get_hub_state("eventsub_session_id").unwrap(), Some("abc".into()));
    }

    #[test]
    fn reconciliation_diff_reflects_store_contents() {
        let db = test_db();
        db.put_user(&User {
            user_id: "10".into(),
            login: "streamer".into(),
            display_name: "Streamer".into(),
            is_bot: false,
        })
        .unwrap();
        db.put_desired_subscription("10", "channel.follow").unwrap();
        db.put_desired_subscription("10", "channel.chat.message").unwrap();
        db.record_active_subscription("10", "channel.follow", "sub-1").unwrap();

        let desired = db.list_desired_subscriptions().unwrap();
        let active = db.list_active_subscriptions().unwrap();
        let (to_subscribe, to_unsubscribe) = subscriptions::diff(&desired, &active);

        assert_eq!(to_subscribe, vec![("10".to_string(), "channel.chat.message".to_string())]);
        assert!(to_unsubscribe.is_empty());
    }
}
