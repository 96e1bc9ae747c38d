//! Configuration for the link manager.

use std::time::Duration;

use crate::reconnect::ReconnectPolicy;

/// Default interval between characteristic polling ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default interval between signal-strength refreshes.
pub const DEFAULT_RSSI_INTERVAL: Duration = Duration::from_secs(2);

/// Default delay before a batch of pending log entries becomes visible.
pub const DEFAULT_LOG_FLUSH_DELAY: Duration = Duration::from_millis(500);

/// Default maximum number of retained log entries.
///
/// Deployments that keep a long diagnostic trail raise this (200 000 has
/// been used); it is a knob, not a constant.
pub const DEFAULT_LOG_CAPACITY: usize = 1_000;

/// Configuration for the link manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Interval used when polling is started without an explicit one.
    pub poll_interval: Duration,
    /// Interval between signal-strength reads for connected devices.
    pub rssi_interval: Duration,
    /// Bounded automatic-reconnection policy.
    pub reconnect: ReconnectPolicy,
    /// Maximum retained log entries; oldest are dropped first on overflow.
    pub log_capacity: usize,
    /// Delay before pending log entries are flushed to the visible log.
    pub log_flush_delay: Duration,
    /// Broadcast event channel capacity.
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            rssi_interval: DEFAULT_RSSI_INTERVAL,
            reconnect: ReconnectPolicy::default(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            log_flush_delay: DEFAULT_LOG_FLUSH_DELAY,
            event_capacity: 100,
        }
    }
}

impl ManagerConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default polling interval.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the signal-strength refresh interval.
    #[must_use]
    pub fn rssi_interval(mut self, interval: Duration) -> Self {
        self.rssi_interval = interval;
        self
    }

    /// Set the reconnection policy.
    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set the maximum retained log entries.
    #[must_use]
    pub fn log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Set the log flush delay.
    #[must_use]
    pub fn log_flush_delay(mut self, delay: Duration) -> Self {
        self.log_flush_delay = delay;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.rssi_interval, Duration::from_secs(2));
        assert_eq!(config.log_capacity, 1_000);
        assert_eq!(config.log_flush_delay, Duration::from_millis(500));
    }

    #[test]
    fn builder_setters() {
        let config = ManagerConfig::new()
            .poll_interval(Duration::from_millis(250))
            .log_capacity(200_000);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.log_capacity, 200_000);
    }
}
