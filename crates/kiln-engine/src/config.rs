use std::time::Duration;

/// Tunables for the dispatcher, status updater and watchdog.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How stale a running resource's heartbeat may get before the watchdog
    /// marks it Canceling.
    pub task_timeout: Duration,
    /// Interval between watchdog scans.
    pub watchdog_interval: Duration,
    /// Interval between log-tail flushes and heartbeat writes.
    pub last_seen_interval: Duration,
    /// Lines kept in the durable log archive.
    pub log_tail_lines: usize,
    /// How long a canceled task gets to persist its final condition.
    pub cancel_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            task_timeout: Duration::from_secs(10 * 60),
            watchdog_interval: Duration::from_secs(30),
            last_seen_interval: Duration::from_secs(5),
            log_tail_lines: 500,
            cancel_grace: Duration::from_secs(10),
        }
    }
}
