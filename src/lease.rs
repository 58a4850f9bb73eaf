//! Lease model for admission decisions.
//!
//! A lease is the result of one acquisition attempt against a limiter.
//! Release is tied to `Drop`, so every exit path (early return, downstream
//! error, panic) releases each lease exactly once.

use std::time::Duration;

/// Outcome of one acquisition attempt: grant-or-deny plus a release
/// obligation. Owned by whoever acquired it; dropping it releases it.
pub trait Lease: Send {
    /// Whether a permit was granted.
    fn is_acquired(&self) -> bool;

    /// Hint for how long the caller should back off before retrying.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Composite lease over the global and endpoint tiers.
///
/// Acquired iff both members are acquired. Dropping releases the endpoint
/// lease first, then the global one, the reverse of acquisition order.
pub struct CombinedLease {
    // Field order is load-bearing: endpoint must drop before global.
    endpoint: Box<dyn Lease>,
    global: Box<dyn Lease>,
}

impl CombinedLease {
    pub fn new(global: Box<dyn Lease>, endpoint: Box<dyn Lease>) -> Self {
        Self { endpoint, global }
    }
}

impl Lease for CombinedLease {
    fn is_acquired(&self) -> bool {
        self.global.is_acquired() && self.endpoint.is_acquired()
    }

    fn retry_after(&self) -> Option<Duration> {
        // Surface the larger hint when both tiers provide one.
        match (self.global.retry_after(), self.endpoint.retry_after()) {
            (Some(global), Some(endpoint)) => Some(global.max(endpoint)),
            (global, endpoint) => global.or(endpoint),
        }
    }
}

/// Which tier denied the request, when one did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectedBy {
    /// The process-wide limiter denied the request; the endpoint tier was
    /// never consulted.
    Global,
    /// The per-route limiter denied the request.
    Endpoint,
    /// The caller's cancellation signal fired while waiting for a permit.
    RequestCanceled,
}

/// Result of a combined acquisition: the (possibly denied) lease plus the
/// tier that denied it. Consumed once by the middleware to pick the
/// rejection handler.
pub struct LeaseContext {
    pub lease: Box<dyn Lease>,
    pub rejected_by: Option<RejectedBy>,
}

impl std::fmt::Debug for LeaseContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseContext")
            .field("acquired", &self.lease.is_acquired())
            .field("rejected_by", &self.rejected_by)
            .finish()
    }
}

impl LeaseContext {
    pub(crate) fn acquired(lease: Box<dyn Lease>) -> Self {
        Self {
            lease,
            rejected_by: None,
        }
    }

    pub(crate) fn rejected(lease: Box<dyn Lease>, tier: RejectedBy) -> Self {
        Self {
            lease,
            rejected_by: Some(tier),
        }
    }

    pub(crate) fn canceled() -> Self {
        Self::rejected(Box::new(DeniedLease), RejectedBy::RequestCanceled)
    }

    pub fn is_acquired(&self) -> bool {
        self.rejected_by.is_none() && self.lease.is_acquired()
    }
}

/// Lease for requests that never reached a grant, e.g. a canceled wait.
pub(crate) struct DeniedLease;

impl Lease for DeniedLease {
    fn is_acquired(&self) -> bool {
        false
    }
}
