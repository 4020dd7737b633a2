//! Configuration surface, explicitly constructed and threaded through
//! constructors rather than read from process-wide state.

use std::time::Duration;

use crate::frame::{DEFAULT_HIGH_WATERMARK, DEFAULT_LOW_WATERMARK, DEFAULT_MAX_WATERMARK};
use crate::types::Credentials;

/// How many times the connection manager may attempt to reconnect after
/// a socket failure before giving up and entering `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectionBudget {
    Limited(u32),
    Infinite,
}

impl ReconnectionBudget {
    pub fn has_budget(&self, attempts_made: u32) -> bool {
        match self {
            Self::Infinite => true,
            Self::Limited(max) => attempts_made < *max,
        }
    }
}

/// The frame codec's backpressure watermarks, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackpressureSettings {
    pub low: usize,
    pub high: usize,
    pub max: usize,
}

impl Default for BackpressureSettings {
    fn default() -> Self {
        Self { low: DEFAULT_LOW_WATERMARK, high: DEFAULT_HIGH_WATERMARK, max: DEFAULT_MAX_WATERMARK }
    }
}

/// Full configuration for a [`crate::client::Client`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub host: String,
    pub port: u16,
    pub connection_timeout: Duration,
    pub max_reconnections: ReconnectionBudget,
    pub reconnection_delay_min: Duration,
    pub reconnection_delay_max: Duration,
    pub default_credentials: Option<Credentials>,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub operation_max_retries: u32,
    pub operation_timeout: Duration,
    pub resolve_link_tos: bool,
    pub require_master: bool,
    pub read_batch_size: u32,
    pub backpressure: BackpressureSettings,
    pub outbound_stash_capacity: usize,
}

impl ClientSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connection_timeout: Duration::from_secs(1),
            max_reconnections: ReconnectionBudget::Limited(100),
            reconnection_delay_min: Duration::from_millis(250),
            reconnection_delay_max: Duration::from_secs(10),
            default_credentials: None,
            heartbeat_interval: Duration::from_millis(500),
            heartbeat_timeout: Duration::from_secs(5),
            operation_max_retries: 10,
            operation_timeout: Duration::from_secs(30),
            resolve_link_tos: false,
            require_master: true,
            read_batch_size: 500,
            backpressure: BackpressureSettings::default(),
            // No teacher or spec default for this — see DESIGN.md's cap on
            // the reconnect-time outbound stash (redesign flag applied).
            outbound_stash_capacity: 4096,
        }
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_max_reconnections(mut self, budget: ReconnectionBudget) -> Self {
        self.max_reconnections = budget;
        self
    }

    pub fn with_reconnection_delay(mut self, min: Duration, max: Duration) -> Self {
        self.reconnection_delay_min = min;
        self.reconnection_delay_max = max;
        self
    }

    pub fn with_default_credentials(mut self, credentials: Credentials) -> Self {
        self.default_credentials = Some(credentials);
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_operation_policy(mut self, max_retries: u32, timeout: Duration) -> Self {
        self.operation_max_retries = max_retries;
        self.operation_timeout = timeout;
        self
    }

    pub fn with_resolve_link_tos(mut self, resolve: bool) -> Self {
        self.resolve_link_tos = resolve;
        self
    }

    pub fn with_require_master(mut self, require: bool) -> Self {
        self.require_master = require;
        self
    }

    pub fn with_read_batch_size(mut self, size: u32) -> Self {
        self.read_batch_size = size;
        self
    }

    pub fn with_backpressure(mut self, low: usize, high: usize, max: usize) -> Self {
        self.backpressure = BackpressureSettings { low, high, max };
        self
    }

    pub fn with_outbound_stash_capacity(mut self, capacity: usize) -> Self {
        self.outbound_stash_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let settings = ClientSettings::new("localhost", 1113);
        assert_eq!(settings.connection_timeout, Duration::from_secs(1));
        assert_eq!(settings.max_reconnections, ReconnectionBudget::Limited(100));
        assert_eq!(settings.heartbeat_interval, Duration::from_millis(500));
        assert_eq!(settings.heartbeat_timeout, Duration::from_secs(5));
        assert_eq!(settings.operation_max_retries, 10);
        assert_eq!(settings.read_batch_size, 500);
        assert!(!settings.resolve_link_tos);
        assert!(settings.require_master);
    }

    #[test]
    fn infinite_budget_always_has_budget() {
        assert!(ReconnectionBudget::Infinite.has_budget(1_000_000));
        assert!(!ReconnectionBudget::Limited(3).has_budget(3));
        assert!(ReconnectionBudget::Limited(3).has_budget(2));
    }
}
