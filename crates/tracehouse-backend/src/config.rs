//! Backend Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Upload chunk size. Writes larger than `buffer_size * max_buffers`
    /// stream through a multipart upload in chunks of this size.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Number of upload buffers; with `buffer_size` this sets the multipart
    /// threshold.
    #[serde(default = "default_max_buffers")]
    pub max_buffers: usize,

    /// How long a read waits before issuing its hedge request.
    #[serde(default = "default_hedge_delay", with = "duration_ms")]
    pub hedge_delay: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            max_buffers: default_max_buffers(),
            hedge_delay: default_hedge_delay(),
        }
    }
}

fn default_buffer_size() -> usize {
    3 * 1024 * 1024 // 3MB
}

fn default_max_buffers() -> usize {
    4
}

fn default_hedge_delay() -> Duration {
    Duration::from_millis(500)
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
