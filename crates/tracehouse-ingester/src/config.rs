//! Ingester Configuration
//!
//! Controls trace cut policy, block rollover, and the flush loop cadence:
//!
//! - **max_idle_time**: a live trace with no new fragments for this long is
//!   cut to the head block (default: 10s)
//! - **max_block_bytes / max_block_duration**: head block rollover thresholds
//!   (defaults: 1GB / 1h)
//! - **complete_block_timeout**: how long a flushed block stays on local disk
//!   before it is cleared (default: 15m)
//! - **flush_check_period**: flush loop tick (default: 10s)

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngesterConfig {
    /// Cut a live trace after this long without new fragments.
    #[serde(default = "default_max_idle_time", with = "duration_ms")]
    pub max_idle_time: Duration,

    /// Seal the head block once its WAL reaches this many bytes.
    #[serde(default = "default_max_block_bytes")]
    pub max_block_bytes: usize,

    /// Seal the head block once it is this old, even if not full.
    #[serde(default = "default_max_block_duration", with = "duration_ms")]
    pub max_block_duration: Duration,

    /// Keep a flushed block on local disk this long before clearing it.
    #[serde(default = "default_complete_block_timeout", with = "duration_ms")]
    pub complete_block_timeout: Duration,

    /// Flush loop tick.
    #[serde(default = "default_flush_check_period", with = "duration_ms")]
    pub flush_check_period: Duration,
}

impl Default for IngesterConfig {
    fn default() -> Self {
        Self {
            max_idle_time: default_max_idle_time(),
            max_block_bytes: default_max_block_bytes(),
            max_block_duration: default_max_block_duration(),
            complete_block_timeout: default_complete_block_timeout(),
            flush_check_period: default_flush_check_period(),
        }
    }
}

fn default_max_idle_time() -> Duration {
    Duration::from_secs(10)
}

fn default_max_block_bytes() -> usize {
    1024 * 1024 * 1024 // 1GB
}

fn default_max_block_duration() -> Duration {
    Duration::from_secs(60 * 60) // 1 hour
}

fn default_complete_block_timeout() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_flush_check_period() -> Duration {
    Duration::from_secs(10)
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
