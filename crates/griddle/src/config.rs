//! # Configuration
//!
//! [`BatcherConfig`] carries every knob the scheduler reads. It can be built in
//! code with the `with_*` setters or loaded from JSON, where durations are
//! written as integer milliseconds:
//!
//! ```
//! use griddle::BatcherConfig;
//!
//! let config = BatcherConfig::from_json_str(r#"{
//!     "max_batch_size": 8,
//!     "max_latency_ms": 20,
//!     "queue_capacity": 256
//! }"#).unwrap();
//!
//! assert_eq!(config.max_batch_size, 8);
//! assert_eq!(config.max_latency.as_millis(), 20);
//! ```

use std::time::Duration;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Semaphore;
use crate::error::ConfigError;
use crate::params::GenerationParams;

/// Shutdown reclaims every dispatch slot in one `acquire_many`, which takes a `u32`.
const MAX_CONCURRENT_BATCHES_LIMIT: usize = u32::MAX as usize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    /// Largest batch handed to the backend in one call.
    pub max_batch_size: usize,

    /// Longest a batch may keep filling, measured from its first request's arrival.
    #[serde(rename = "max_latency_ms", with = "duration_ms")]
    pub max_latency: Duration,

    /// Ingress queue bound. Submissions beyond it are rejected as overloaded.
    pub queue_capacity: usize,

    /// How long [`infer`](crate::DynamicBatcher::infer) waits for a result.
    #[serde(rename = "wait_timeout_ms", with = "duration_ms")]
    pub wait_timeout: Duration,

    /// How long an unretrieved result is kept before it is reaped.
    #[serde(rename = "result_ttl_ms", with = "duration_ms")]
    pub result_ttl: Duration,

    /// How often the reaper sweeps the registry.
    #[serde(rename = "reap_interval_ms", with = "duration_ms")]
    pub reap_interval: Duration,

    /// Batches allowed to run against the backend at once.
    pub max_concurrent_batches: usize,

    /// Merged beneath every request's own params.
    pub default_params: GenerationParams,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        let default_params = match json!({"max_tokens": 100, "echo": false, "top_k": 1}) {
            serde_json::Value::Object(map) => GenerationParams::from(map),
            _ => GenerationParams::new(),
        };
        Self {
            max_batch_size: 4,
            max_latency: Duration::from_millis(50),
            queue_capacity: 1024,
            wait_timeout: Duration::from_secs(30),
            result_ttl: Duration::from_secs(60),
            reap_interval: Duration::from_secs(1),
            max_concurrent_batches: 2,
            default_params,
        }
    }
}

impl BatcherConfig {
    /// Parses and validates a JSON document. Missing fields take their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: BatcherConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field against what the scheduler can run with.
    ///
    /// # Returns
    ///
    /// * [`ConfigError::Zero`] for the first field left at zero
    /// * [`ConfigError::TooLarge`] when `queue_capacity` or
    ///   `max_concurrent_batches` exceed what a tokio channel or semaphore holds
    ///
    /// Durations have no upper bound: one too large to add to the clock is
    /// treated as "never".
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("max_batch_size", self.max_batch_size == 0),
            ("max_latency", self.max_latency.is_zero()),
            ("queue_capacity", self.queue_capacity == 0),
            ("wait_timeout", self.wait_timeout.is_zero()),
            ("result_ttl", self.result_ttl.is_zero()),
            ("reap_interval", self.reap_interval.is_zero()),
            ("max_concurrent_batches", self.max_concurrent_batches == 0),
        ];
        if let Some((field, _)) = checks.iter().find(|(_, zero)| *zero) {
            return Err(ConfigError::Zero { field: *field });
        }

        if self.queue_capacity > Semaphore::MAX_PERMITS {
            return Err(ConfigError::TooLarge {
                field: "queue_capacity",
                max: Semaphore::MAX_PERMITS,
            });
        }
        let max_slots = MAX_CONCURRENT_BATCHES_LIMIT.min(Semaphore::MAX_PERMITS);
        if self.max_concurrent_batches > max_slots {
            return Err(ConfigError::TooLarge {
                field: "max_concurrent_batches",
                max: max_slots,
            });
        }
        Ok(())
    }

    /// Sets [`max_batch_size`](Self::max_batch_size).
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Sets [`max_latency`](Self::max_latency).
    pub fn with_max_latency(mut self, max_latency: Duration) -> Self {
        self.max_latency = max_latency;
        self
    }

    /// Sets [`queue_capacity`](Self::queue_capacity).
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Sets [`wait_timeout`](Self::wait_timeout).
    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    /// Sets [`result_ttl`](Self::result_ttl).
    pub fn with_result_ttl(mut self, result_ttl: Duration) -> Self {
        self.result_ttl = result_ttl;
        self
    }

    /// Sets [`reap_interval`](Self::reap_interval).
    pub fn with_reap_interval(mut self, reap_interval: Duration) -> Self {
        self.reap_interval = reap_interval;
        self
    }

    /// Sets [`max_concurrent_batches`](Self::max_concurrent_batches).
    pub fn with_max_concurrent_batches(mut self, max_concurrent_batches: usize) -> Self {
        self.max_concurrent_batches = max_concurrent_batches;
        self
    }

    /// Replaces the params merged beneath every request's own.
    pub fn with_default_params(mut self, default_params: GenerationParams) -> Self {
        self.default_params = default_params;
        self
    }
}

mod duration_ms {
    use std::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
