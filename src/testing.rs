//! Test doubles for exercising the admission middleware.
//!
//! [`TestLimiter`] is a scriptable limiter that counts acquisition attempts
//! and lease releases, so tests can assert the engine's short-circuit and
//! cleanup behavior without a real limiting algorithm behind it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tokio_util::sync::CancellationToken;
use tower::BoxError;

use crate::lease::Lease;
use crate::limiter::{Limiter, RateLimitPartition, WaitError};
use crate::policy::{rejection_handler, OnRejected, RateLimitPolicy};

/// How a [`TestLimiter`] answers acquisition attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestBehavior {
    /// Every attempt is granted.
    Admit,
    /// Every attempt is denied with a denied lease, not a fault.
    Deny,
    /// Every attempt fails with a limiter fault.
    Fail,
    /// `try_acquire` denies and `wait` suspends until canceled.
    Pend,
}

/// Scriptable limiter that records acquire calls and lease releases.
pub struct TestLimiter {
    behavior: TestBehavior,
    retry_after: Option<Duration>,
    acquire_calls: AtomicUsize,
    releases: Arc<AtomicUsize>,
}

impl TestLimiter {
    pub fn new(behavior: TestBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            retry_after: None,
            acquire_calls: AtomicUsize::new(0),
            releases: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn admitting() -> Arc<Self> {
        Self::new(TestBehavior::Admit)
    }

    pub fn denying() -> Arc<Self> {
        Self::new(TestBehavior::Deny)
    }

    /// Denies every attempt with a retry-after hint on the lease.
    pub fn denying_with_retry_after(retry_after: Duration) -> Arc<Self> {
        Arc::new(Self {
            behavior: TestBehavior::Deny,
            retry_after: Some(retry_after),
            acquire_calls: AtomicUsize::new(0),
            releases: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Number of `try_acquire` and `wait` calls, combined.
    pub fn acquire_calls(&self) -> usize {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    /// Number of leases this limiter handed out that have been released.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Upcast helper for APIs taking `Arc<dyn Limiter>`.
    pub fn as_limiter(self: &Arc<Self>) -> Arc<dyn Limiter> {
        self.clone()
    }

    fn lease(&self, acquired: bool) -> Box<dyn Lease> {
        Box::new(TestLease {
            acquired,
            retry_after: self.retry_after,
            releases: self.releases.clone(),
        })
    }
}

/// Lease that bumps a shared counter when dropped.
pub struct TestLease {
    acquired: bool,
    retry_after: Option<Duration>,
    releases: Arc<AtomicUsize>,
}

impl Lease for TestLease {
    fn is_acquired(&self) -> bool {
        self.acquired
    }

    fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

impl Drop for TestLease {
    fn drop(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Limiter for TestLimiter {
    fn try_acquire(&self, _permits: u32) -> Result<Box<dyn Lease>, BoxError> {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            TestBehavior::Admit => Ok(self.lease(true)),
            TestBehavior::Deny | TestBehavior::Pend => Ok(self.lease(false)),
            TestBehavior::Fail => Err("limiter exploded".into()),
        }
    }

    async fn wait(
        &self,
        _permits: u32,
        cancel: CancellationToken,
    ) -> Result<Box<dyn Lease>, WaitError> {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            TestBehavior::Admit => Ok(self.lease(true)),
            TestBehavior::Deny => Ok(self.lease(false)),
            TestBehavior::Fail => Err(WaitError::Limiter("limiter exploded".into())),
            TestBehavior::Pend => {
                cancel.cancelled().await;
                Err(WaitError::Canceled)
            }
        }
    }
}

/// Policy that maps every request to one shared [`TestLimiter`] partition
/// and answers rejections with a fixed status code.
pub struct TestPolicy {
    key: String,
    status: StatusCode,
    limiter: Arc<TestLimiter>,
}

impl TestPolicy {
    pub fn new(key: impl Into<String>, status: StatusCode, limiter: Arc<TestLimiter>) -> Self {
        Self {
            key: key.into(),
            status,
            limiter,
        }
    }
}

impl RateLimitPolicy for TestPolicy {
    fn partition(&self, _request: &Request) -> RateLimitPartition {
        let limiter = self.limiter.clone();
        RateLimitPartition::new(self.key.clone(), move || limiter.as_limiter())
    }

    fn on_rejected(&self) -> Option<OnRejected> {
        let status = self.status;
        Some(rejection_handler(move |_context| async move {
            status.into_response()
        }))
    }
}
