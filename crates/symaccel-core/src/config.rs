//! Engine configuration

use crate::error::InitError;
use crate::{MAX_DEQ_RETRIES, MAX_SESSIONS, NB_DESC_PER_QUEUE_PAIR, NB_MBUF};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Session pool capacity (at most `MAX_SESSIONS`)
    pub max_sessions: usize,

    /// Queue pairs per device (defaults to the number of CPUs, capped by
    /// the device maximum)
    pub queue_pairs: Option<u16>,

    /// Descriptors configured on each queue pair
    pub descriptors_per_queue_pair: u32,

    /// Operation descriptor pool size
    pub descriptor_pool_size: usize,

    /// Objects in each per-socket native session mempool
    pub session_mempool_size: usize,

    /// Empty dequeue attempts before an operation times out
    pub dequeue_retries: u32,

    /// Wait between dequeue attempts, in nanoseconds
    pub retry_delay_ns: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_sessions: MAX_SESSIONS,
            queue_pairs: None,
            descriptors_per_queue_pair: NB_DESC_PER_QUEUE_PAIR,
            descriptor_pool_size: NB_MBUF,
            session_mempool_size: NB_MBUF,
            dequeue_retries: MAX_DEQ_RETRIES,
            retry_delay_ns: 1_000,
        }
    }
}

impl EngineConfig {
    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `InitError::InvalidConfig` naming the first bad field.
    pub fn validate(&self) -> Result<(), InitError> {
        let bad = |msg: String| Err(InitError::InvalidConfig(msg));

        if self.max_sessions == 0 || self.max_sessions > MAX_SESSIONS {
            return bad(format!(
                "max_sessions must be in 1..={MAX_SESSIONS}, got {}",
                self.max_sessions
            ));
        }
        if self.queue_pairs == Some(0) {
            return bad("queue_pairs must be at least 1".into());
        }
        if self.descriptors_per_queue_pair == 0 {
            return bad("descriptors_per_queue_pair must be at least 1".into());
        }
        if self.descriptor_pool_size == 0 {
            return bad("descriptor_pool_size must be at least 1".into());
        }
        if self.session_mempool_size == 0 {
            return bad("session_mempool_size must be at least 1".into());
        }
        if self.retry_delay_ns > 1_000_000_000 {
            return bad(format!(
                "retry_delay_ns must not exceed one second, got {}",
                self.retry_delay_ns
            ));
        }
        Ok(())
    }

    /// Queue pairs to configure on a device supporting at most `device_max`.
    #[must_use]
    pub fn queue_pairs_for(&self, device_max: u16) -> u16 {
        let wanted = self
            .queue_pairs
            .unwrap_or_else(|| u16::try_from(num_cpus::get()).unwrap_or(u16::MAX));
        wanted.min(device_max).max(1)
    }

    /// Wait between dequeue attempts.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_nanos(self.retry_delay_ns)
    }

    /// Upper bound of the time one operation may block in the poll loop.
    #[must_use]
    pub fn max_poll_time(&self) -> Duration {
        self.retry_delay() * self.dequeue_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_sessions, 2048);
        assert_eq!(config.dequeue_retries, 100_000);
        assert_eq!(config.retry_delay(), Duration::from_micros(1));
        assert_eq!(config.max_poll_time(), Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects() {
        let config = EngineConfig {
            max_sessions: MAX_SESSIONS + 1,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(InitError::InvalidConfig(_))));

        let config = EngineConfig {
            queue_pairs: Some(0),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            descriptor_pool_size: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_queue_pairs_capped_by_device() {
        let config = EngineConfig {
            queue_pairs: Some(16),
            ..EngineConfig::default()
        };
        assert_eq!(config.queue_pairs_for(4), 4);
        assert_eq!(config.queue_pairs_for(32), 16);

        let auto = EngineConfig::default();
        assert!(auto.queue_pairs_for(2) >= 1);
        assert!(auto.queue_pairs_for(2) <= 2);
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"dequeue_retries": 10}"#).unwrap();
        assert_eq!(config.dequeue_retries, 10);
        assert_eq!(config.max_sessions, MAX_SESSIONS);
    }
}
