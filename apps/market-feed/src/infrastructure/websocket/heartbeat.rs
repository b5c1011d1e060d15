//! Heartbeat
//!
//! Keeps an idle connection honest: while connected a ping goes out every
//! `ping_interval`, and a connection that has produced nothing (no data,
//! no pong) for longer than `pong_timeout` is treated as dead.

use std::time::Duration;

use tokio::time::Instant;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
    /// Maximum silence before the connection is considered dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }
}

/// Timer and inbound-activity bookkeeping for one session.
#[derive(Debug)]
pub(super) struct HeartbeatTimer {
    deadline: Option<Instant>,
    last_inbound: Instant,
}

impl HeartbeatTimer {
    pub(super) fn new() -> Self {
        Self {
            deadline: None,
            last_inbound: Instant::now(),
        }
    }

    /// Fire once after `interval`.
    pub(super) fn arm(&mut self, interval: Duration) {
        self.deadline = Some(Instant::now() + interval);
    }

    pub(super) const fn cancel(&mut self) {
        self.deadline = None;
    }

    pub(super) const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Take the deadline once it has fired.
    pub(super) const fn fire(&mut self) {
        self.deadline = None;
    }

    pub(super) fn record_inbound(&mut self) {
        self.last_inbound = Instant::now();
    }

    pub(super) fn silence(&self) -> Duration {
        self.last_inbound.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.pong_timeout, Duration::from_secs(60));
    }

    #[test]
    fn arm_and_cancel() {
        let mut timer = HeartbeatTimer::new();
        assert!(timer.deadline().is_none());

        timer.arm(Duration::from_secs(30));
        assert!(timer.deadline().is_some());

        timer.cancel();
        assert!(timer.deadline().is_none());
    }

    #[test]
    fn inbound_resets_silence() {
        let mut timer = HeartbeatTimer::new();
        std::thread::sleep(Duration::from_millis(20));
        assert!(timer.silence() >= Duration::from_millis(20));
        timer.record_inbound();
        assert!(timer.silence() < Duration::from_millis(20));
    }
}
