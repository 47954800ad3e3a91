use std::time::Duration;

use crate::decoder::StatusDecoder;
use crate::model::Position;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Shortest accepted polling period; shorter ones are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Real-time status query.
pub const STATUS_QUERY: &str = "?";

/// Periodic status polling and position tracking.
///
/// Polling and parsing are not correlated: any chunk carrying a status
/// frame updates the position, whichever poll it answers. While disabled
/// the poller neither asks nor listens.
#[derive(Clone, Debug)]
pub struct StatusPoller {
    interval: Duration,
    enabled: bool,
    decoder: StatusDecoder,
}

impl StatusPoller {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_POLL_INTERVAL),
            enabled: false,
            decoder: StatusDecoder,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Query to send on this tick, if any.
    pub fn poll(&self) -> Option<&'static str> {
        self.enabled.then_some(STATUS_QUERY)
    }

    pub fn observe(&self, chunk: &str) -> Option<Position> {
        if !self.enabled {
            return None;
        }
        self.decoder.decode(chunk)
    }
}

impl Default for StatusPoller {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}
