//! Append-only audit trail for security-relevant events: reauth
//! transitions, token revocation, subscription churn.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl Severity {
    fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: i64,
    pub occurred_at: DateTime<Utc>,
    pub severity: Severity,
    pub subject: Option<String>,
    pub message: String,
}

pub fn append(
    conn: &Connection,
    severity: Severity,
    subject: Option<&str>,
    message: &str,
) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO audit_log (occurred_at, severity, subject, message) VALUES (?1, ?2, ?3, ?4)",
        params![now, severity.as_str(), subject, message],
    )?;
    Ok(())
}

/// Most recent entries first, capped at `limit`.
pub fn recent(conn: &Connection, limit: u32) -> Result<Vec<AuditEntry>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, occurred_at, severity, subject, message
         FROM audit_log ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        let occurred_at: String = row.get(1)?;
        let severity: String = row.get(2)?;
        Ok(AuditEntry {
            id: row.get(0)?,
            occurred_at: DateTime::parse_from_rfc3339(&occurred_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            severity: match severity.as_str() {
                "warn" => Severity::Warn,
                "error" => Severity::Error,
                _ => Severity::Info,
            },
            subject: row.get(3)?,
            message: row.get(4)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
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
    fn append_then_recent_is_newest_first() {
        let conn = conn();
        append(&conn, Severity::Info, Some("10"), "subscribed channel.follow").unwrap();
        append(&conn, Severity::Error, Some("10"), "needs_reauth threshold reached").unwrap();

        let entries = recent(&conn, 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "needs_reauth threshold reached");
        assert_eq!(entries[0].severity, Severity::Error);
        assert_eq!(entries[1].subject.as_deref(), Some("10"));
    }

    #[test]
    fn recent_respects_limit() {
        let conn = conn();
        for i in 0..5 {
            append(&conn, Severity::Info, None, &format!("event {i}")).unwrap();
        }
        assert_eq!(recent(&conn, 2).unwrap().len(), 2);
    }
}
