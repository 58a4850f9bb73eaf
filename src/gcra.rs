//! GCRA-backed limiter adapter over the governor crate.
//!
//! Governor provides a lock-free GCRA rate limiter; this adapter exposes a
//! direct (single-partition) instance of it through the [`Limiter`]
//! capability. GCRA grants are not held resources, so leases carry no
//! release side effect; denied leases expose the not-until gap as a
//! retry-after hint.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use tokio_util::sync::CancellationToken;
use tower::BoxError;

use crate::lease::Lease;
use crate::limiter::{Limiter, WaitError};

/// Direct (single-partition) GCRA limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// [`Limiter`] over governor's GCRA state.
///
/// One instance guards one partition; partitioners hand out a fresh instance
/// per partition key through their factory.
pub struct GovernorLimiter {
    limiter: DirectLimiter,
    clock: DefaultClock,
}

impl GovernorLimiter {
    pub fn new(quota: Quota) -> Arc<Self> {
        Arc::new(Self {
            limiter: RateLimiter::direct(quota),
            clock: DefaultClock::default(),
        })
    }

    /// `max_requests` per `window`, with the full amount available as burst.
    pub fn per_window(max_requests: u32, window: Duration) -> Arc<Self> {
        let burst = NonZeroU32::new(max_requests.max(1)).expect("burst is clamped to at least 1");
        let quota = Quota::with_period(window)
            .expect("window must be non-zero")
            .allow_burst(burst);
        Self::new(quota)
    }
}

struct GovernorLease {
    acquired: bool,
    retry_after: Option<Duration>,
}

impl Lease for GovernorLease {
    fn is_acquired(&self) -> bool {
        self.acquired
    }

    fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

#[async_trait]
impl Limiter for GovernorLimiter {
    // The middleware charges one permit per request; GCRA cells map one to
    // one, so the permit count is not forwarded.
    fn try_acquire(&self, _permits: u32) -> Result<Box<dyn Lease>, BoxError> {
        match self.limiter.check() {
            Ok(()) => Ok(Box::new(GovernorLease {
                acquired: true,
                retry_after: None,
            })),
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                Ok(Box::new(GovernorLease {
                    acquired: false,
                    retry_after: Some(wait),
                }))
            }
        }
    }

    async fn wait(
        &self,
        _permits: u32,
        cancel: CancellationToken,
    ) -> Result<Box<dyn Lease>, WaitError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(WaitError::Canceled),
            _ = self.limiter.until_ready() => Ok(Box::new(GovernorLease {
                acquired: true,
                retry_after: None,
            })),
        }
    }
}
