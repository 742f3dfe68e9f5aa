//! Small opaque key/value store for Hub state that must survive a Hub
//! restart without surviving a supervisor restart: the EventSub session id
//! and similar handshake artifacts.

use rusqlite::{Connection, OptionalExtension, params};

use crate::error::StoreError;

pub fn get(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
    conn.query_row("SELECT value FROM hub_state WHERE key = ?1", params![key], |row| row.get(0))
        .optional()
        .map_err(StoreError::from)
}

pub fn set(conn: &Connection, key: &str, value: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO hub_state (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, key: &str) -> Result<(), StoreError> {
    conn.execute("DELETE FROM hub_state WHERE key = ?1", params![key])?;
    Ok(())
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
    fn set_then_get_then_overwrite() {
        let conn = conn();
        assert_eq!(get(&conn, "session_id").unwrap(), None);
        set(&conn, "session_id", "abc123").unwrap();
        assert_eq!(get(&conn, "session_id").unwrap(), Some("abc123".into()));
        set(&conn, "session_id", "def456").unwrap();
        assert_eq!(get(&conn, "session_id").unwrap(), Some("def456".into()));
    }

    #[test]
    fn delete_clears_key() {
        let conn = conn();
        set(&conn, "session_id", "abc123").unwrap();
        delete(&conn, "session_id").unwrap();
        assert_eq!(get(&conn, "session_id").unwrap(), None);
    }
}
