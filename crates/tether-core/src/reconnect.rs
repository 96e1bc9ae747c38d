//! Bounded automatic-reconnection policy.
//!
//! When a connected device drops its link without an explicit disconnect
//! command, the supervisor retries the connection a bounded number of times
//! before giving up. The bound avoids unbounded radio churn against an
//! unreachable device.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use tether_types::DeviceId;

/// Which unsolicited disconnects trigger automatic reconnection.
///
/// Observed deployments of this system disagree on the trigger, so it is an
/// explicit policy parameter rather than a constant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectScope {
    /// Retry any device in the connected set.
    #[default]
    AnyConnected,
    /// Retry only the currently selected device.
    SelectedOnly,
}

/// Bounded-retry policy applied to unsolicited disconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before reconnection is abandoned.
    pub max_attempts: u32,
    /// Which devices the policy applies to.
    pub scope: ReconnectScope,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            scope: ReconnectScope::default(),
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never retries.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Set the attempt bound.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the trigger scope.
    #[must_use]
    pub fn scope(mut self, scope: ReconnectScope) -> Self {
        self.scope = scope;
        self
    }
}

/// Outcome of consulting the policy after an unsolicited disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reissue the connect; this is attempt number `attempt` (1-based).
    Retry { attempt: u32 },
    /// The bound was reached after `attempts` tries; stop retrying.
    GiveUp { attempts: u32 },
}

/// Per-device counters of consecutive failed automatic reconnection
/// attempts.
///
/// A counter exists from the first manual connect (at zero) until the bound
/// is exceeded, at which point the entry is removed entirely, not merely
/// zeroed.
#[derive(Debug, Default)]
pub struct AttemptCounters {
    counts: HashMap<DeviceId, u32>,
}

impl AttemptCounters {
    /// Create an empty counter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset a device's counter to zero on a fresh manual connect.
    pub fn reset(&mut self, id: &DeviceId) {
        self.counts.insert(id.clone(), 0);
    }

    /// Drop a device's counter entirely.
    pub fn remove(&mut self, id: &DeviceId) {
        self.counts.remove(id);
    }

    /// The current count, if a counter exists for the device.
    pub fn get(&self, id: &DeviceId) -> Option<u32> {
        self.counts.get(id).copied()
    }

    /// Consult the policy after an unsolicited disconnect of `id`.
    ///
    /// While the counter is below the bound it is incremented and a retry is
    /// requested; once the bound is reached the counter is removed and the
    /// device is left disconnected.
    pub fn decide(&mut self, id: &DeviceId, policy: &ReconnectPolicy) -> RetryDecision {
        let count = self.counts.entry(id.clone()).or_insert(0);
        if *count < policy.max_attempts {
            *count += 1;
            RetryDecision::Retry { attempt: *count }
        } else {
            let attempts = *count;
            self.counts.remove(id);
            RetryDecision::GiveUp { attempts }
        }
    }

    /// Drop every counter (radio loss).
    pub fn clear(&mut self) {
        self.counts.clear();
    }
}
