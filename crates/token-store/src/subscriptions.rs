//! Desired vs. active EventSub subscription bookkeeping, used by the Hub's
//! reconciliation loop to decide what to subscribe or unsubscribe.

use chrono::Utc;
use rusqlite::{Connection, params};

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredSubscription {
    pub channel_id: String,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSubscription {
    pub channel_id: String,
    pub topic: String,
    pub subscription_id: String,
}

pub fn put_desired_subscription(conn: &Connection, channel_id: &str, topic: &str) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO desired_subscriptions (channel_id, topic, created_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(channel_id, topic) DO NOTHING",
        params![channel_id, topic, now],
    )?;
    Ok(())
}

pub fn remove_desired_subscription(conn: &Connection, channel_id: &str, topic: &str) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM desired_subscriptions WHERE channel_id = ?1 AND topic = ?2",
        params![channel_id, topic],
    )?;
    Ok(())
}

pub fn list_desired_subscriptions(conn: &Connection) -> Result<Vec<DesiredSubscription>, StoreError> {
    let mut stmt = conn.prepare("SELECT channel_id, topic FROM desired_subscriptions ORDER BY channel_id, topic")?;
    let rows = stmt.query_map([], |row| {
        Ok(DesiredSubscription {
            channel_id: row.get(0)?,
            topic: row.get(1)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

pub fn record_active_subscription(
    conn: &Connection,
    channel_id: &str,
    topic: &str,
    subscription_id: &str,
) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO active_subscriptions (channel_id, topic, subscription_id, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(channel_id, topic) DO UPDATE SET subscription_id = excluded.subscription_id",
        params![channel_id, topic, subscription_id, now],
    )?;
    Ok(())
}

pub fn forget_active_subscription(conn: &Connection, channel_id: &str, topic: &str) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM active_subscriptions WHERE channel_id = ?1 AND topic = ?2",
        params![channel_id, topic],
    )?;
    Ok(())
}

pub fn list_active_subscriptions(conn: &Connection) -> Result<Vec<ActiveSubscription>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT channel_id, topic, subscription_id FROM active_subscriptions ORDER BY channel_id, topic",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(ActiveSubscription {
            channel_id: row.get(0)?,
            topic: row.get(1)?,
            subscription_id: row.get(2)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

/// Diff desired against active: `(to_subscribe, to_unsubscribe)` as
/// `(channel_id, topic)` pairs, the latter carrying the stale subscription
/// id so the caller can issue the Helix delete.
pub fn diff(
    desired: &[DesiredSubscription],
    active: &[ActiveSubscription],
) -> (Vec<(String, String)>, Vec<ActiveSubscription>) {
    use std::collections::HashSet;

    let desired_set: HashSet<(&str, &str)> = desired
        .iter()
        .map(|d| (d.channel_id.as_str(), d.topic.as_str()))
        .collect();
    let active_set: HashSet<(&str, &str)> = active
        .iter()
        .map(|a| (a.channel_id.as_str(), a.topic.as_str()))
        .collect();

    let to_subscribe = desired
        .iter()
        .filter(|d| !active_set.contains(&(d.channel_id.as_str(), d.topic.as_str())))
        .map(|d| (d.channel_id.clone(), d.topic.clone()))
        .collect();

    let to_unsubscribe = active
        .iter()
        .filter(|a| !desired_set.contains(&(a.channel_id.as_str(), a.topic.as_str())))
        .cloned()
        .collect();

    (to_subscribe, to_unsubscribe)
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
    fn desired_subscriptions_are_deduplicated() {
        let conn = conn();
        put_desired_subscription(&conn, "10", "channel.follow").unwrap();
        put_desired_subscription(&conn, "10", "channel.follow").unwrap();
        assert_eq!(list_desired_subscriptions(&conn).unwrap().len(), 1);
    }

    #[test]
    fn remove_then_list_is_empty() {
        let conn = conn();
        put_desired_subscription(&conn, "10", "channel.follow").unwrap();
        remove_desired_subscription(&conn, "10", "channel.follow").unwrap();
        assert!(list_desired_subscriptions(&conn).unwrap().is_empty());
    }

    #[test]
    fn active_subscription_update_replaces_id() {
        let conn = conn();
        record_active_subscription(&conn, "10", "channel.follow", "sub-1").unwrap();
        record_active_subscription(&conn, "10", "channel.follow", "sub-2").unwrap();
        let active = list_active_subscriptions(&conn).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].subscription_id, "sub-2");
    }

    #[test]
    fn diff_computes_additions_and_removals() {
        let desired = vec![
            DesiredSubscription { channel_id: "10".into(), topic: "channel.follow".into() },
            DesiredSubscription { channel_id: "10".into(), topic: "channel.chat.message".into() },
        ];
        let active = vec![ActiveSubscription {
            channel_id: "10".into(),
            topic: "channel.follow".into(),
            subscription_id: "sub-1".into(),
        }, ActiveSubscription {
            channel_id: "10".into(),
            topic: "channel.raid".into(),
            subscription_id: "sub-stale".into(),
        }];

        let (to_subscribe, to_unsubscribe) = diff(&desired, &active);
        assert_eq!(to_subscribe, vec![("10".to_string(), "channel.chat.message".to_string())]);
        assert_eq!(to_unsubscribe.len(), 1);
        assert_eq!(to_unsubscribe[0].subscription_id, "sub-stale");
    }

    #[test]
    fn diff_of_matching_sets_is_empty() {
        let desired = vec![DesiredSubscription { channel_id: "10".into(), topic: "channel.follow".into() }];
        let active = vec![ActiveSubscription {
            channel_id: "10".into(),
            topic: "channel.follow".into(),
            subscription_id: "sub-1".into(),
        }];
        let (to_subscribe, to_unsubscribe) = diff(&desired, &active);
        assert!(to_subscribe.is_empty());
        assert!(to_unsubscribe.is_empty());
    }
}
