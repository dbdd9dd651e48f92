//! Reconnect schedule for a lost hub connection.

use std::time::Duration;

use crate::constants::DEFAULT_RECONNECT_DELAYS_MS;

/// Fixed delay schedule: attempt `n` waits `delays[n]`; once the schedule
/// is exhausted the connection gives up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    delays: Vec<Duration>,
}

impl ReconnectPolicy {
    /// Policy with an explicit schedule. An empty schedule never reconnects.
    #[must_use]
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Policy that never reconnects.
    #[must_use]
    pub fn disabled() -> Self {
        Self { delays: Vec::new() }
    }

    /// Delay before the zero-based `attempt`, or `None` to give up.
    #[must_use]
    pub fn next_delay(&self, attempt: usize) -> Option<Duration> {
        self.delays.get(attempt).copied()
    }

    /// Number of attempts before giving up.
    #[must_use]
    pub fn max_attempts(&self) -> usize {
        self.delays.len()
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_RECONNECT_DELAYS_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        )
    }
}
