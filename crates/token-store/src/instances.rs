//! Tracks the Hub and Bot processes the supervisor has spawned, for
//! liveness reporting and stale-instance cleanup.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceRole {
    Hub,
    Bot,
}

impl InstanceRole {
    fn as_str(self) -> &'static str {
        match self {
            InstanceRole::Hub => "hub",
            InstanceRole::Bot => "bot",
        }
    }

    fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "hub" => Ok(InstanceRole::Hub),
            "bot" => Ok(InstanceRole::Bot),
            other => Err(StoreError::Corrupt(format!("unknown instance role: {other}"))),
        }
    }
}

/// Instance lifecycle status. The Supervisor owns transitions into
/// `Crashed` and `NeedsReauth`; a live bot owns the `Running` heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Stopped,
    Running,
    Crashed,
    NeedsReauth,
}

impl InstanceStatus {
    fn as_str(self) -> &'static str {
        match self {
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Running => "running",
            InstanceStatus::Crashed => "crashed",
            InstanceStatus::NeedsReauth => "needs_reauth",
        }
    }

    fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "stopped" => Ok(InstanceStatus::Stopped),
            "running" => Ok(InstanceStatus::Running),
            "crashed" => Ok(InstanceStatus::Crashed),
            "needs_reauth" => Ok(InstanceStatus::NeedsReauth),
            other => Err(StoreError::Corrupt(format!("unknown instance status: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Instance {
    pub instance_id: String,
    pub role: InstanceRole,
    pub channel_id: Option<String>,
    pub pid: Option<i64>,
    pub status: InstanceStatus,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

/// Registers a freshly spawned process, or re-registers one that the
/// Supervisor just respawned. Either way the process is live, so status
/// resets to `running`.
pub fn register_instance(
    conn: &Connection,
    instance_id: &str,
    role: InstanceRole,
    channel_id: Option<&str>,
    pid: Option<i64>,
) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO instances (instance_id, role, channel_id, pid, status, started_at, last_heartbeat)
         VALUES (?1, ?2, ?3, ?4, 'running', ?5, ?5)
         ON CONFLICT(instance_id) DO UPDATE SET
            role = excluded.role,
            channel_id = excluded.channel_id,
            pid = excluded.pid,
            status = excluded.status,
            started_at = excluded.started_at,
            last_heartbeat = excluded.last_heartbeat",
        params![instance_id, role.as_str(), channel_id, pid, now],
    )?;
    Ok(())
}

/// Bot-driven: bumps `last_heartbeat` and reports the bot's own view of its
/// status (normally `running`).
pub fn heartbeat(conn: &Connection, instance_id: &str, status: InstanceStatus) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    let affected = conn.execute(
        "UPDATE instances SET last_heartbeat = ?2, status = ?3 WHERE instance_id = ?1",
        params![instance_id, now, status.as_str()],
    )?;
    if affected == 0 {
        return Err(StoreError::NotFound(format!("instance {instance_id}")));
    }
    Ok(())
}

/// Supervisor-driven status transition (e.g. `crashed`, `needs_reauth`)
/// that does not imply a heartbeat was just received.
pub fn set_status(conn: &Connection, instance_id: &str, status: InstanceStatus) -> Result<(), StoreError> {
    let affected = conn.execute(
        "UPDATE instances SET status = ?2 WHERE instance_id = ?1",
        params![instance_id, status.as_str()],
    )?;
    if affected == 0 {
        return Err(StoreError::NotFound(format!("instance {instance_id}")));
    }
    Ok(())
}

pub fn deregister_instance(conn: &Connection, instance_id: &str) -> Result<(), StoreError> {
    conn.execute("DELETE FROM instances WHERE instance_id = ?1", params![instance_id])?;
    Ok(())
}

pub fn get_instance(conn: &Connection, instance_id: &str) -> Result<Option<Instance>, StoreError> {
    conn.query_row(
        "SELECT instance_id, role, channel_id, pid, status, started_at, last_heartbeat
         FROM instances WHERE instance_id = ?1",
        params![instance_id],
        row_to_instance,
    )
    .optional()
    .map_err(StoreError::from)
}

/// Running instances whose last heartbeat is older than `max_age`. A
/// `stopped` instance that hasn't heartbeated is expected, not stale.
pub fn stale_instances(conn: &Connection, max_age: chrono::Duration) -> Result<Vec<Instance>, StoreError> {
    let cutoff = (Utc::now() - max_age).to_rfc3339();
    let mut stmt = conn.prepare(
        "SELECT instance_id, role, channel_id, pid, status, started_at, last_heartbeat
         FROM instances WHERE last_heartbeat < ?1 AND status = 'running'",
    )?;
    let rows = stmt.query_map(params![cutoff], row_to_instance)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

pub fn list_instances(conn: &Connection) -> Result<Vec<Instance>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT instance_id, role, channel_id, pid, status, started_at, last_heartbeat
         FROM instances ORDER BY started_at",
    )?;
    let rows = stmt.query_map([], row_to_instance)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

fn row_to_instance(row: &rusqlite::Row) -> rusqlite::Result<Instance> {
    let role: String = row.get(1)?;
    let status: String = row.get(4)?;
    let started_at: String = row.get(5)?;
    let last_heartbeat: String = row.get(6)?;
    Ok(Instance {
        instance_id: row.get(0)?,
        role: InstanceRole::parse(&role).unwrap_or(InstanceRole::Bot),
        channel_id: row.get(2)?,
        pid: row.get(3)?,
        status: InstanceStatus::parse(&status).unwrap_or(InstanceStatus::Stopped),
        started_at: DateTime::parse_from_rfc3339(&started_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        last_heartbeat: DateTime::parse_from_rfc3339(&last_heartbeat)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
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
    fn register_then_heartbeat_then_get() {
        let conn = conn();
        register_instance(&conn, "hub-1", InstanceRole::Hub, None, Some(123)).unwrap();
        heartbeat(&conn, "hub-1", InstanceStatus::Running).unwrap();
        let instance = get_instance(&conn, "hub-1").unwrap().unwrap();
        assert_eq!(instance.role, InstanceRole::Hub);
        assert_eq!(instance.pid, Some(123));
        assert_eq!(instance.status, InstanceStatus::Running);
    }

    #[test]
    fn heartbeat_on_unknown_instance_is_not_found() {
        let conn = conn();
        let err = heartbeat(&conn, "missing", InstanceStatus::Running).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn stale_instances_uses_heartbeat_age_and_running_status() {
        let conn = conn();
        register_instance(&conn, "bot-1", InstanceRole::Bot, Some("10".into()), Some(1)).unwrap();
        conn.execute(
            "UPDATE instances SET last_heartbeat = ?1 WHERE instance_id = 'bot-1'",
            params![(Utc::now() - chrono::Duration::hours(2)).to_rfc3339()],
        )
        .unwrap();

        let stale = stale_instances(&conn, chrono::Duration::minutes(30)).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].instance_id, "bot-1");

        let fresh = stale_instances(&conn, chrono::Duration::hours(3)).unwrap();
        assert!(fresh.is_empty());

        set_status(&conn, "bot-1", InstanceStatus::Stopped).unwrap();
        let after_stop = stale_instances(&conn, chrono::Duration::minutes(30)).unwrap();
        assert!(after_stop.is_empty(), "a stopped instance must never be reported stale");
    }

    #[test]
    fn deregister_removes_instance() {
        let conn = conn();
        register_instance(&conn, "bot-1", InstanceRole::Bot, None, None).unwrap();
        deregister_instance(&conn, "bot-1").unwrap();
        assert!(get_instance(&conn, "bot-1").unwrap().is_none());
    }

    #[test]
    fn set_status_marks_crashed_without_touching_heartbeat() {
        let conn = conn();
        register_instance(&conn, "bot-1", InstanceRole::Bot, None, None).unwrap();
        set_status(&conn, "bot-1", InstanceStatus::Crashed).unwrap();
        let instance = get_instance(&conn, "bot-1").unwrap().unwrap();
        assert_eq!(instance.status, InstanceStatus::Crashed);
    }
}
