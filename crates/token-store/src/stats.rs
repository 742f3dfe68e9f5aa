//! Aggregate counters derived from the rest of the schema, surfaced by the
//! supervisor's status console.

use rusqlite::Connection;

use crate::error::StoreError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetStats {
    pub total_users: i64,
    pub tokens_needing_reauth: i64,
    pub active_subscriptions: i64,
    pub running_instances: i64,
}

pub fn get_stats(conn: &Connection) -> Result<FleetStats, StoreError> {
    let total_users = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
    let tokens_needing_reauth = conn.query_row(
        "SELECT COUNT(*) FROM tokens WHERE needs_reauth = 1",
        [],
        |row| row.get(0),
    )?;
    let active_subscriptions = conn.query_row("SELECT COUNT(*) FROM active_subscriptions", [], |row| row.get(0))?;
    let running_instances = conn.query_row("SELECT COUNT(*) FROM instances WHERE status = 'running'", [], |row| row.get(0))?;

    Ok(FleetStats {
        total_users,
        tokens_needing_reauth,
        active_subscriptions,
        running_instances,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{instances::InstanceRole, tokens::TokenKind};
    use rusqlite::Connection;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::schema::run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn counts_reflect_fleet_state() {
        let conn = conn();
        let keys = crate::crypto::KeyRing::from_keys(vec![[0x01u8; 32]]);

        crate::users::put_user(
            &conn,
            &crate::users::User {
                user_id: "1".into(),
                login: "alice".into(),
                display_name: "Alice".into(),
                is_bot: false,
            },
        )
        .unwrap();
        crate::tokens::store_tokens(
            &conn,
            &keys,
            "1",
            TokenKind::Bot,
            "a",
            "r",
            &[],
            chrono::Utc::now() + chrono::Duration::hours(1),
        )
        .unwrap();
        for _ in 0..crate::tokens::REFRESH_FAILURE_THRESHOLD {
            crate::tokens::increment_refresh_failures(&conn, "1", TokenKind::Bot).unwrap();
        }
        crate::subscriptions::record_active_subscription(&conn, "1", "channel.follow", "sub-1").unwrap();
        crate::instances::register_instance(&conn, "bot-1", InstanceRole::Bot, Some("1"), Some(42)).unwrap();

        let stats = get_stats(&conn).unwrap();
        assert_eq!(
            stats,
            FleetStats {
                total_users: 1,
                tokens_needing_reauth: 1,
                active_subscriptions: 1,
                running_instances: 1,
            }
        );
    }
}
