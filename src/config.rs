use serde_derive::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    BUCKET_REFRESH_INTERVAL, CONCURRENCY_PARAM, DEFAULT_THRESHOLD_RATIO, LOOKUP_TIMEOUT,
    REQUEST_TIMEOUT, VANISH_REFRESH_IDLE,
};

/// Runtime tunables of a node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Address the UDP listener binds to. Must be reachable by peers since it becomes the
    /// node's advertised contact.
    pub bind_addr: String,
    pub request_timeout_ms: u64,
    pub lookup_timeout_ms: u64,
    /// Number of concurrent probes per lookup round.
    pub concurrency: usize,
    pub bucket_refresh_interval_secs: u64,
    pub threshold_ratio: f64,
    pub vanish_refresh_idle_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "127.0.0.1:0".to_string(),
            request_timeout_ms: REQUEST_TIMEOUT,
            lookup_timeout_ms: LOOKUP_TIMEOUT,
            concurrency: CONCURRENCY_PARAM,
            bucket_refresh_interval_secs: BUCKET_REFRESH_INTERVAL,
            threshold_ratio: DEFAULT_THRESHOLD_RATIO,
            vanish_refresh_idle_ms: VANISH_REFRESH_IDLE,
        }
    }
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn bucket_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.bucket_refresh_interval_secs)
    }

    pub fn vanish_refresh_idle(&self) -> Duration {
        Duration::from_millis(self.vanish_refresh_idle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::Config;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.lookup_timeout(), Duration::from_secs(5));
        assert!((config.threshold_ratio - 0.5).abs() < std::f64::EPSILON);
    }
}
