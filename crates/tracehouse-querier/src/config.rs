//! Querier Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerierConfig {
    /// Delay before querying replicas beyond the quorum requirement; they
    /// hedge slow replicas instead of adding steady-state load.
    #[serde(default, with = "duration_ms")]
    pub extra_query_delay: Duration,

    /// Bound on concurrently executing fan-outs.
    #[serde(default = "default_max_concurrent_queries")]
    pub max_concurrent_queries: usize,
}

impl Default for QuerierConfig {
    fn default() -> Self {
        Self {
            extra_query_delay: Duration::ZERO,
            max_concurrent_queries: default_max_concurrent_queries(),
        }
    }
}

fn default_max_concurrent_queries() -> usize {
    20
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
