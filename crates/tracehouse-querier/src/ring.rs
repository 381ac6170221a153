//! Replication Set and Quorum Fan-Out
//!
//! A [`ReplicationSet`] is the ordered list of ingester addresses owning one
//! tenant's replicas, plus the error budget. [`ReplicationSet::do_requests`]
//! runs one request per replica in parallel and applies quorum:
//!
//! - returns as soon as `replicas - max_errors` successes are collected
//!   (remaining requests are dropped);
//! - fails as soon as failures exceed `max_errors`;
//! - optionally delays the requests beyond the quorum requirement so they
//!   hedge slow replicas rather than always adding load.
//!
//! The fan-out is generic over the reply type, so callers get typed
//! responses without a catch-all variant.

use crate::error::{Error, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ReplicaDesc {
    pub addr: String,
}

#[derive(Debug, Clone)]
pub struct ReplicationSet {
    pub replicas: Vec<ReplicaDesc>,
    pub max_errors: usize,
}

/// A successful reply, tagged with the replica that produced it.
#[derive(Debug, Clone)]
pub struct ReplicaResponse<R> {
    pub addr: String,
    pub response: R,
}

impl ReplicationSet {
    /// Successes needed before the fan-out returns.
    pub fn required_successes(&self) -> usize {
        self.replicas.len().saturating_sub(self.max_errors).max(1)
    }

    /// Run `f` against every replica in parallel under quorum rules.
    pub async fn do_requests<R, F, Fut>(
        &self,
        extra_delay: Duration,
        f: F,
    ) -> Result<Vec<ReplicaResponse<R>>>
    where
        F: Fn(ReplicaDesc) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        if self.replicas.is_empty() {
            return Err(Error::NoHealthyReplicas);
        }
        let required = self.required_successes();

        let mut in_flight = FuturesUnordered::new();
        for (i, replica) in self.replicas.iter().enumerate() {
            let addr = replica.addr.clone();
            let delay = if i >= required { extra_delay } else { Duration::ZERO };
            let fut = f(replica.clone());
            in_flight.push(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                (addr, fut.await)
            });
        }

        let mut responses = Vec::with_capacity(required);
        let mut failures = 0usize;
        let mut last_error = String::new();

        while let Some((addr, result)) = in_flight.next().await {
            match result {
                Ok(response) => {
                    responses.push(ReplicaResponse { addr, response });
                    if responses.len() >= required {
                        // Quorum met; outstanding requests are dropped.
                        return Ok(responses);
                    }
                }
                Err(err) => {
                    warn!(addr = %addr, error = %err, "replica request failed");
                    failures += 1;
                    last_error = err.to_string();
                    if failures > self.max_errors {
                        return Err(Error::QuorumFailed {
                            failures,
                            max_errors: self.max_errors,
                            last_error,
                        });
                    }
                }
            }
        }

        // All requests finished without exceeding the error budget.
        debug!(
            successes = responses.len(),
            failures, "fan-out complete under error budget"
        );
        Ok(responses)
    }
}

/// Membership view the querier reads replica sets from. The hash ring and
/// its gossip are external; this trait is their seam.
pub trait ReadRing: Send + Sync {
    fn replication_set_for_read(&self) -> Result<ReplicationSet>;
}

/// Fixed replica set, for single-node deployments and tests.
#[derive(Debug, Clone)]
pub struct StaticRing {
    pub replicas: Vec<String>,
    pub max_errors: usize,
}

impl ReadRing for StaticRing {
    fn replication_set_for_read(&self) -> Result<ReplicationSet> {
        Ok(ReplicationSet {
            replicas: self
                .replicas
                .iter()
                .map(|addr| ReplicaDesc { addr: addr.clone() })
                .collect(),
            max_errors: self.max_errors,
        })
    }
}
