//! Broker configuration

use std::time::Duration;

/// Configuration for a broker
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Bounded wait applied to subscribe/unsubscribe/introspection calls.
    /// Acks wait unboundedly.
    pub call_timeout: Duration,

    /// Rows fetched per storage read during catch-up and reconciliation.
    /// Kept small to cap worker memory.
    pub batch_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            batch_size: 10,
        }
    }
}

impl BrokerConfig {
    /// Set the bounded call timeout
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the catch-up read batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.call_timeout, Duration::from_secs(5));
        assert_eq!(config.batch_size, 10);
    }

    #[test]
    fn test_builders() {
        let config = BrokerConfig::default()
            .with_call_timeout(Duration::from_millis(100))
            .with_batch_size(50);
        assert_eq!(config.call_timeout, Duration::from_millis(100));
        assert_eq!(config.batch_size, 50);
    }
}
