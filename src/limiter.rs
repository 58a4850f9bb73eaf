//! Limiter capability and the partitioned resolver.
//!
//! Concrete limiting algorithms live outside this crate; a [`Limiter`] is an
//! opaque admission authority for one partition, supplied per named policy
//! or as the single global limiter. The [`PartitionedLimiter`] maps each
//! request to a partition key and lazily creates-and-caches the limiter for
//! that key, including a pass-through sentinel for routes with no policy.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tower::BoxError;

use crate::error::Result;
use crate::lease::Lease;

/// Error from the suspending wait path.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    /// The caller's cancellation signal fired before a permit freed up.
    #[error("wait for a permit was canceled")]
    Canceled,
    /// The limiter itself failed.
    #[error(transparent)]
    Limiter(#[from] BoxError),
}

/// External admission authority for one partition.
///
/// Implementations must be safe for concurrent `try_acquire`/`wait` calls;
/// the middleware performs no locking of its own. A denied lease is a normal
/// outcome; an `Err` is a limiter fault.
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Non-suspending acquisition attempt.
    fn try_acquire(&self, permits: u32) -> std::result::Result<Box<dyn Lease>, BoxError>;

    /// Suspend until a permit frees up, the limiter gives up (denied lease,
    /// e.g. a full queue), or `cancel` fires.
    async fn wait(
        &self,
        permits: u32,
        cancel: CancellationToken,
    ) -> std::result::Result<Box<dyn Lease>, WaitError>;
}

impl std::fmt::Debug for dyn Limiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Limiter")
    }
}

/// A partition picked by a partitioner: the key identifying which
/// independent counter the request maps to, plus the factory used to create
/// that counter's limiter the first time the key is seen.
pub struct RateLimitPartition {
    key: String,
    factory: Arc<dyn Fn() -> Arc<dyn Limiter> + Send + Sync>,
}

impl RateLimitPartition {
    pub fn new<F>(key: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Limiter> + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            factory: Arc::new(factory),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Namespace the partition under its owning policy so distinct policies
    /// never collide in the limiter cache.
    pub(crate) fn into_resolved(self, policy: &str) -> ResolvedPartition {
        ResolvedPartition {
            key: PartitionKey::Policy {
                policy: policy.to_string(),
                partition: self.key,
            },
            factory: self.factory,
        }
    }
}

/// Cache key for limiter instances. The pass-through sentinel participates
/// in the same lookup and caching as real partitions, so downstream code
/// never special-cases the "no policy" path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum PartitionKey {
    PassThrough,
    Policy { policy: String, partition: String },
}

/// A partition with its cache key fully determined.
pub(crate) struct ResolvedPartition {
    pub(crate) key: PartitionKey,
    pub(crate) factory: Arc<dyn Fn() -> Arc<dyn Limiter> + Send + Sync>,
}

impl ResolvedPartition {
    pub(crate) fn pass_through() -> Self {
        Self {
            key: PartitionKey::PassThrough,
            factory: Arc::new(|| Arc::new(PassThrough)),
        }
    }
}

pub(crate) type Partitioner =
    Box<dyn Fn(&Request) -> Result<ResolvedPartition> + Send + Sync>;

/// Maps requests to partitions and caches one limiter instance per key for
/// the process lifetime. Shared across all in-flight requests; the cached
/// limiters own all synchronization.
pub(crate) struct PartitionedLimiter {
    partitioner: Partitioner,
    limiters: DashMap<PartitionKey, Arc<dyn Limiter>>,
}

impl PartitionedLimiter {
    pub(crate) fn new(partitioner: Partitioner) -> Self {
        Self {
            partitioner,
            limiters: DashMap::new(),
        }
    }

    /// Resolve the limiter that applies to this request, creating it on the
    /// first sighting of its partition key.
    pub(crate) fn resolve(&self, request: &Request) -> Result<Arc<dyn Limiter>> {
        let partition = (self.partitioner)(request)?;
        let limiter = self
            .limiters
            .entry(partition.key)
            .or_insert_with(|| (partition.factory)())
            .clone();
        Ok(limiter)
    }
}

/// Always-admit limiter backing the pass-through sentinel.
pub struct PassThrough;

struct PassLease;

impl Lease for PassLease {
    fn is_acquired(&self) -> bool {
        true
    }
}

#[async_trait]
impl Limiter for PassThrough {
    fn try_acquire(&self, _permits: u32) -> std::result::Result<Box<dyn Lease>, BoxError> {
        Ok(Box::new(PassLease))
    }

    async fn wait(
        &self,
        _permits: u32,
        cancel: CancellationToken,
    ) -> std::result::Result<Box<dyn Lease>, WaitError> {
        if cancel.is_cancelled() {
            return Err(WaitError::Canceled);
        }
        Ok(Box::new(PassLease))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FloodgateError;
    use crate::testing::TestLimiter;
    use axum::body::Body;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(path: &str) -> Request {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    fn keyed(policy: &str, partition: &str) -> PartitionKey {
        PartitionKey::Policy {
            policy: policy.to_string(),
            partition: partition.to_string(),
        }
    }

    #[test]
    fn limiters_are_created_once_per_partition_key() {
        let created = Arc::new(AtomicUsize::new(0));
        let created_in_factory = created.clone();

        let partitioned = PartitionedLimiter::new(Box::new(move |request| {
            let created = created_in_factory.clone();
            Ok(ResolvedPartition {
                key: keyed("api", request.uri().path()),
                factory: Arc::new(move || {
                    created.fetch_add(1, Ordering::SeqCst);
                    let limiter: Arc<dyn Limiter> = TestLimiter::admitting();
                    limiter
                }),
            })
        }));

        partitioned.resolve(&request("/a")).unwrap();
        partitioned.resolve(&request("/a")).unwrap();
        partitioned.resolve(&request("/b")).unwrap();

        // One limiter per distinct key, reused thereafter.
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn pass_through_sentinel_shares_one_cached_limiter() {
        let partitioned =
            PartitionedLimiter::new(Box::new(|_request| Ok(ResolvedPartition::pass_through())));

        let first = partitioned.resolve(&request("/a")).unwrap();
        let second = partitioned.resolve(&request("/b")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let lease = first.try_acquire(1).unwrap();
        assert!(lease.is_acquired());
    }

    #[tokio::test]
    async fn pass_through_wait_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = PassThrough.wait(1, cancel).await;
        assert!(matches!(result, Err(WaitError::Canceled)));
    }

    #[test]
    fn partitioner_errors_propagate() {
        let partitioned = PartitionedLimiter::new(Box::new(|_request| {
            Err(FloodgateError::UnknownPolicy("ghost".to_string()))
        }));

        let err = partitioned.resolve(&request("/a")).unwrap_err();
        assert!(matches!(err, FloodgateError::UnknownPolicy(_)));
    }
}
