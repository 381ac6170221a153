//! Per-Tenant Ingest Limiter
//!
//! Enforces three limits at push time:
//!
//! - **Ingest rate** (bytes/sec): token bucket, refilled on demand. The
//!   configured rate is a *global* per-tenant rate; each ingester takes its
//!   share, scaled by `replication_factor / live_instance_count` so the
//!   tenant's effective limit stays constant as ingesters come and go.
//! - **Per-trace size**: a single trace may not grow past
//!   `max_bytes_per_trace`.
//! - **Live trace count**: at most `max_traces_per_instance` concurrent
//!   live traces.
//!
//! Token acquisition is lock-free (compare-and-swap over milli-token units);
//! rejected pushes never mutate state.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// View of ring membership the limiter needs: how many ingesters currently
/// share the tenant's load. The ring itself is an external collaborator.
pub trait RingCount: Send + Sync {
    fn healthy_instance_count(&self) -> usize;
}

/// Fixed-count ring, for single-node deployments and tests.
#[derive(Debug, Clone)]
pub struct StaticRingCount {
    pub count: usize,
}

impl RingCount for StaticRingCount {
    fn healthy_instance_count(&self) -> usize {
        self.count
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    /// Maximum concurrent live traces per tenant instance.
    #[serde(default = "default_max_traces_per_instance")]
    pub max_traces_per_instance: usize,

    /// Maximum accumulated bytes for one trace.
    #[serde(default = "default_max_bytes_per_trace")]
    pub max_bytes_per_trace: usize,

    /// Global per-tenant ingest rate in bytes/sec; 0 disables rate limiting.
    #[serde(default)]
    pub ingest_rate_bytes: f64,

    /// Burst capacity of the rate bucket in bytes.
    #[serde(default = "default_ingest_burst_bytes")]
    pub ingest_burst_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_traces_per_instance: default_max_traces_per_instance(),
            max_bytes_per_trace: default_max_bytes_per_trace(),
            ingest_rate_bytes: 0.0,
            ingest_burst_bytes: default_ingest_burst_bytes(),
        }
    }
}

fn default_max_traces_per_instance() -> usize {
    10_000
}

fn default_max_bytes_per_trace() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_ingest_burst_bytes() -> usize {
    20 * 1024 * 1024 // 20MB
}

/// Tokens are stored at 1000x precision so fractional refill amounts are not
/// lost between calls.
const TOKEN_SCALE: u64 = 1000;

struct TokenBucket {
    tokens: AtomicU64,
    last_refill_micros: AtomicU64,
    capacity: u64,
}

impl TokenBucket {
    fn new(capacity_bytes: usize) -> Self {
        let capacity = capacity_bytes as u64 * TOKEN_SCALE;
        Self {
            tokens: AtomicU64::new(capacity),
            last_refill_micros: AtomicU64::new(Self::now_micros()),
            capacity,
        }
    }

    fn now_micros() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64
    }

    fn refill(&self, rate_bytes_per_sec: f64) {
        let now = Self::now_micros();
        let last = self.last_refill_micros.swap(now, Ordering::AcqRel);
        let elapsed_micros = now.saturating_sub(last);
        if elapsed_micros == 0 {
            return;
        }

        let new_tokens =
            (elapsed_micros as f64 / 1_000_000.0 * rate_bytes_per_sec * TOKEN_SCALE as f64) as u64;
        if new_tokens == 0 {
            return;
        }

        let mut current = self.tokens.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(new_tokens).min(self.capacity);
            match self.tokens.compare_exchange(
                current,
                next,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    fn try_consume(&self, bytes: usize, rate_bytes_per_sec: f64) -> bool {
        self.refill(rate_bytes_per_sec);

        let want = bytes as u64 * TOKEN_SCALE;
        let mut current = self.tokens.load(Ordering::Acquire);
        loop {
            if current < want {
                return false;
            }
            match self.tokens.compare_exchange(
                current,
                current - want,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

pub struct Limiter {
    limits: Limits,
    ring: Arc<dyn RingCount>,
    replication_factor: usize,
    bucket: Option<TokenBucket>,
}

impl Limiter {
    pub fn new(limits: Limits, ring: Arc<dyn RingCount>, replication_factor: usize) -> Self {
        let bucket = (limits.ingest_rate_bytes > 0.0)
            .then(|| TokenBucket::new(limits.ingest_burst_bytes));
        Self {
            limits,
            ring,
            replication_factor,
            bucket,
        }
    }

    /// Charge `bytes` against the tenant's rate. Always true when rate
    /// limiting is disabled.
    pub fn allow_bytes(&self, bytes: usize) -> bool {
        match &self.bucket {
            None => true,
            Some(bucket) => bucket.try_consume(bytes, self.local_rate()),
        }
    }

    /// This ingester's share of the global rate.
    fn local_rate(&self) -> f64 {
        let instances = self.ring.healthy_instance_count().max(1);
        self.limits.ingest_rate_bytes * self.replication_factor as f64 / instances as f64
    }

    pub fn max_bytes_per_trace(&self) -> usize {
        self.limits.max_bytes_per_trace
    }

    pub fn max_traces_per_instance(&self) -> usize {
        self.limits.max_traces_per_instance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(rate: f64, burst: usize) -> Limiter {
        Limiter::new(
            Limits {
                ingest_rate_bytes: rate,
                ingest_burst_bytes: burst,
                ..Default::default()
            },
            Arc::new(StaticRingCount { count: 1 }),
            1,
        )
    }

    #[test]
    fn test_disabled_rate_always_allows() {
        let l = limiter(0.0, 0);
        assert!(l.allow_bytes(usize::MAX / 2));
    }

    #[test]
    fn test_burst_is_consumed_then_rejected() {
        let l = limiter(1.0, 100);
        assert!(l.allow_bytes(60));
        assert!(l.allow_bytes(40));
        // Bucket is empty and refill at 1 byte/sec is far too slow.
        assert!(!l.allow_bytes(50));
    }

    #[test]
    fn test_rate_scales_with_ring_count() {
        let ring = Arc::new(StaticRingCount { count: 4 });
        let l = Limiter::new(
            Limits {
                ingest_rate_bytes: 1000.0,
                ..Default::default()
            },
            ring,
            3,
        );
        assert_eq!(l.local_rate(), 750.0);
    }
}
