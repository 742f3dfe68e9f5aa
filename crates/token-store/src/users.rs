//! CRUD for the `users` table: one row per Twitch channel the fleet knows
//! about, whether or not a bot is currently running for it.

use chrono::Utc;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub login: String,
    pub display_name: String,
    pub is_bot: bool,
}

pub fn put_user(conn: &Connection, user: &User) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    let result = conn.execute(
        "INSERT INTO users (user_id, login, display_name, is_bot, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(user_id) DO UPDATE SET
            login = excluded.login,
            display_name = excluded.display_name,
            is_bot = excluded.is_bot,
            updated_at = excluded.updated_at",
        params![user.user_id, user.login, user.display_name, user.is_bot, now],
    );
    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, Some(ref msg)))
            if err.code == ErrorCode::ConstraintViolation && msg.contains("users.login") =>
        {
            Err(StoreError::Duplicate(format!("login {}", user.login)))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get_user_by_id(conn: &Connection, user_id: &str) -> Result<Option<User>, StoreError> {
    conn.query_row(
        "SELECT user_id, login, display_name, is_bot FROM users WHERE user_id = ?1",
        params![user_id],
        row_to_user,
    )
    .optional()
    .map_err(StoreError::from)
}

pub fn get_user_by_login(conn: &Connection, login: &str) -> Result<Option<User>, StoreError> {
    conn.query_row(
        "SELECT user_id, login, display_name, is_bot FROM users WHERE login = ?1",
        params![login],
        row_to_user,
    )
    .optional()
    .map_err(StoreError::from)
}

pub fn list_users(conn: &Connection) -> Result<Vec<User>, StoreError> {
    let mut stmt = conn.prepare("SELECT user_id, login, display_name, is_bot FROM users ORDER BY login")?;
    let rows = stmt.query_map([], row_to_user)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

/// Deletes the user, cascading to tokens/instances/subscriptions via
/// foreign keys. The audit log has no foreign key to `users` on purpose:
/// entries must survive the user's deletion, but the raw user reference
/// must not, so `subject` is scrubbed first.
pub fn delete_user(conn: &Connection, user_id: &str) -> Result<(), StoreError> {
    conn.execute("UPDATE audit_log SET subject = NULL WHERE subject = ?1", params![user_id])?;
    let affected = conn.execute("DELETE FROM users WHERE user_id = ?1", params![user_id])?;
    if affected == 0 {
        return Err(StoreError::NotFound(format!("user {user_id}")));
    }
    Ok(())
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        user_id: row.get(0)?,
        login: row.get(1)?,
        display_name: row.get(2)?,
        is_bot: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::schema::run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn put_then_get_by_id_and_login() {
        let conn = conn();
        let user = User {
            user_id: "100".into(),
            login: "alice".into(),
            display_name: "Alice".into(),
            is_bot: false,
        };
        put_user(&conn, &user).unwrap();

        assert_eq!(get_user_by_id(&conn, "100").unwrap(), Some(user.clone()));
        assert_eq!(get_user_by_login(&conn, "alice").unwrap(), Some(user));
        assert_eq!(get_user_by_id(&conn, "missing").unwrap(), None);
    }

    #[test]
    fn put_user_is_an_upsert() {
        let conn = conn();
        let mut user = User {
            user_id: "100".into(),
            login: "alice".into(),
            display_name: "Alice".into(),
            is_bot: false,
        };
        put_user(&conn, &user).unwrap();
        user.display_name = "Alice2".into();
        put_user(&conn, &user).unwrap();

        let fetched = get_user_by_id(&conn, "100").unwrap().unwrap();
        assert_eq!(fetched.display_name, "Alice2");
        assert_eq!(list_users(&conn).unwrap().len(), 1);
    }

    #[test]
    fn put_user_rejects_login_collision_under_a_different_id() {
        let conn = conn();
        put_user(&conn, &User { user_id: "100".into(), login: "alice".into(), display_name: "Alice".into(), is_bot: false }).unwrap();

        let err = put_user(&conn, &User { user_id: "200".into(), login: "alice".into(), display_name: "Alice Two".into(), is_bot: false })
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        assert_eq!(list_users(&conn).unwrap().len(), 1);
    }

    #[test]
    fn delete_missing_user_is_not_found() {
        let conn = conn();
        let err = delete_user(&conn, "missing").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn delete_user_anonymizes_audit_subject_instead_of_deleting_the_entry() {
        let conn = conn();
        put_user(&conn, &User { user_id: "100".into(), login: "alice".into(), display_name: "Alice".into(), is_bot: false }).unwrap();
        crate::audit::append(&conn, crate::audit::Severity::Info, Some("100"), "token stored").unwrap();

        delete_user(&conn, "100").unwrap();

        let entries = crate::audit::recent(&conn, 10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].subject, None);
    }
}
