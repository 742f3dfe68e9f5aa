//! Shared state for the Supervisor's child-process bookkeeping.

use std::collections::HashMap;
use std::time::Instant;

use tokio::process::Child;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use fleet_config::FleetConfig;
use token_store::Database;

/// First five restarts of a given process happen immediately; after that
/// each restart waits `RESTART_BACKOFF`.
pub const IMMEDIATE_RESTART_LIMIT: u32 = 5;
pub const RESTART_BACKOFF: std::time::Duration = std::time::Duration::from_secs(60);
/// A crash-free stretch this long resets a process's restart counter.
pub const CRASH_COOLDOWN: std::time::Duration = std::time::Duration::from_secs(5 * 60);
/// More restarts than this within one window and the Supervisor stops
/// auto-restarting; an operator has to intervene via the console.
pub const MAX_CRASH_COUNT: u32 = 10;

/// The restart-backoff bookkeeping for one tracked process, kept separate
/// from the live `Child` handle so the accounting logic is plain and
/// testable on its own.
#[derive(Debug, Default)]
pub struct RestartPolicy {
    pub restart_count: u32,
    pub last_crash_at: Option<Instant>,
    pub held: bool,
}

impl RestartPolicy {
    /// Called when the process is observed to have exited. Returns the
    /// delay to wait before respawning, or `None` if restarts should stop
    /// (the crash budget for this window is exhausted).
    pub fn record_crash(&mut self) -> Option<std::time::Duration> {
        let now = Instant::now();
        if let Some(last) = self.last_crash_at {
            if now.duration_since(last) > CRASH_COOLDOWN {
                self.restart_count = 0;
            }
        }
        self.restart_count += 1;
        self.last_crash_at = Some(now);

        if self.restart_count > MAX_CRASH_COUNT {
            self.held = true;
            return None;
        }
        if self.restart_count <= IMMEDIATE_RESTART_LIMIT {
            Some(std::time::Duration::ZERO)
        } else {
            Some(RESTART_BACKOFF)
        }
    }
}

pub struct TrackedProcess {
    pub child: Child,
    pub policy: RestartPolicy,
}

impl TrackedProcess {
    pub fn new(child: Child) -> Self {
        Self { child, policy: RestartPolicy::default() }
    }

    pub fn record_crash(&mut self) -> Option<std::time::Duration> {
        self.policy.record_crash()
    }

    pub fn restart_count(&self) -> u32 {
        self.policy.restart_count
    }

    pub fn is_held(&self) -> bool {
        self.policy.held
    }
}

pub struct Fleet {
    pub db: Database,
    pub config: FleetConfig,
    pub hub: Mutex<Option<TrackedProcess>>,
    pub bots: Mutex<HashMap<String, TrackedProcess>>,
    pub shutdown: CancellationToken,
}

impl Fleet {
    pub fn new(db: Database, config: FleetConfig) -> Self {
        Self { db, config, hub: Mutex::new(None), bots: Mutex::new(HashMap::new()), shutdown: CancellationToken::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_five_restarts_are_immediate() {
        let mut policy = RestartPolicy::default();
        for _ in 0..IMMEDIATE_RESTART_LIMIT {
            assert_eq!(policy.record_crash(), Some(std::time::Duration::ZERO));
        }
        assert!(!policy.held);
    }

    #[test]
    fn sixth_restart_in_a_burst_backs_off() {
        let mut policy = RestartPolicy::default();
        for _ in 0..IMMEDIATE_RESTART_LIMIT {
            policy.record_crash();
        }
        assert_eq!(policy.record_crash(), Some(RESTART_BACKOFF));
    }

    #[test]
    fn exceeding_max_crash_count_holds_the_process() {
        let mut policy = RestartPolicy::default();
        for _ in 0..MAX_CRASH_COUNT {
            policy.record_crash();
        }
        assert!(!policy.held);
        assert_eq!(policy.record_crash(), None);
        assert!(policy.held);
    }

    #[test]
    fn cooldown_resets_the_counter() {
        let mut policy = RestartPolicy::default();
        for _ in 0..IMMEDIATE_RESTART_LIMIT {
            policy.record_crash();
        }
        policy.last_crash_at = Some(Instant::now() - CRASH_COOLDOWN - std::time::Duration::from_secs(1));
        assert_eq!(policy.record_crash(), Some(std::time::Duration::ZERO));
        assert_eq!(policy.restart_count, 1);
    }
}
