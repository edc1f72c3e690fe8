use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Behaviour knobs of a [`Graph`](crate::Graph).
///
/// Durations are stored in milliseconds so the struct maps directly onto a
/// JSON document; missing fields fall back to [`Default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Ignore writes equal to the value already stored.
    pub update_only: bool,
    /// Delay before a node computes, unless its class sets one.
    pub trigger_delay_ms: u64,
    /// Least time between two queued runs of a node, unless its class sets one.
    pub min_trigger_interval_ms: u64,
    /// Width of the `triggered` pulse set when a node finishes.
    pub pulse_width_ms: u64,
    /// Upper bound for [`Graph::wait_idle`](crate::Graph::wait_idle).
    pub wait_timeout_ms: Option<u64>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            update_only: true,
            trigger_delay_ms: 0,
            min_trigger_interval_ms: 5,
            pulse_width_ms: 0,
            wait_timeout_ms: None,
        }
    }
}

impl GraphConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_update_only(mut self, update_only: bool) -> Self {
        self.update_only = update_only;
        self
    }

    pub fn with_trigger_delay(mut self, delay: Duration) -> Self {
        self.trigger_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_min_trigger_interval(mut self, interval: Duration) -> Self {
        self.min_trigger_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_pulse_width(mut self, width: Duration) -> Self {
        self.pulse_width_ms = width.as_millis() as u64;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn trigger_delay(&self) -> Duration {
        Duration::from_millis(self.trigger_delay_ms)
    }

    pub fn min_trigger_interval(&self) -> Duration {
        Duration::from_millis(self.min_trigger_interval_ms)
    }

    pub fn pulse_width(&self) -> Duration {
        Duration::from_millis(self.pulse_width_ms)
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = GraphConfig::from_json(r#"{"trigger_delay_ms": 25}"#).unwrap();
        assert!(config.update_only);
        assert_eq!(config.trigger_delay(), Duration::from_millis(25));
        assert_eq!(config.min_trigger_interval(), Duration::from_millis(5));
        assert_eq!(config.wait_timeout(), None);
    }

    #[test]
    fn test_builders() {
        let config = GraphConfig::default()
            .with_update_only(false)
            .with_min_trigger_interval(Duration::ZERO)
            .with_wait_timeout(Duration::from_secs(2));
        assert!(!config.update_only);
        assert_eq!(config.wait_timeout_ms, Some(2000));
        assert_eq!(config.min_trigger_interval_ms, 0);
    }
}
