//! Combined acquisition engine: one atomic admission decision across the
//! global and endpoint tiers.
//!
//! The global tier is always evaluated first and a global denial
//! short-circuits, so endpoint permits are never charged for requests that
//! would fail the global ceiling anyway. Leases are locals here, which
//! means every early return and error path releases whatever was already
//! held before the caller observes the outcome.

use std::sync::Arc;

use axum::extract::Request;
use tokio_util::sync::CancellationToken;

use crate::error::{FloodgateError, Result};
use crate::lease::{CombinedLease, Lease, LeaseContext, RejectedBy};
use crate::limiter::{Limiter, PartitionedLimiter, ResolvedPartition, WaitError};
use crate::metadata::{metadata_for, RateLimitMeta, RouteTable};
use crate::policy::PolicyRegistry;

/// Each admission decision charges one permit per tier.
const PERMITS_PER_REQUEST: u32 = 1;

pub(crate) struct AcquisitionEngine {
    global: Option<Arc<dyn Limiter>>,
    endpoint: PartitionedLimiter,
}

impl AcquisitionEngine {
    pub(crate) fn new(global: Option<Arc<dyn Limiter>>, endpoint: PartitionedLimiter) -> Self {
        Self { global, endpoint }
    }

    /// Two-phase acquisition: the non-suspending fast path first, then the
    /// suspending slow path only when the fast path was denied. Faults never
    /// fall through to the slow path.
    pub(crate) async fn acquire(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> (Request, Result<LeaseContext>) {
        let context = match self.combined_try_acquire(&request) {
            Ok(context) => context,
            Err(err) => return (request, Err(err)),
        };
        if context.is_acquired() {
            return (request, Ok(context));
        }
        // Release the fast path's denied lease before queuing on the slow path.
        drop(context);
        self.combined_wait(request, cancel).await
    }

    fn combined_try_acquire(&self, request: &Request) -> Result<LeaseContext> {
        let mut global_lease: Option<Box<dyn Lease>> = None;

        if let Some(global) = &self.global {
            let lease = global
                .try_acquire(PERMITS_PER_REQUEST)
                .map_err(FloodgateError::Limiter)?;
            if !lease.is_acquired() {
                // Short-circuit: the endpoint limiter is never consulted.
                return Ok(LeaseContext::rejected(lease, RejectedBy::Global));
            }
            global_lease = Some(lease);
        }

        // From here on, any `?` drops `global_lease` before the caller sees
        // the error, so no lease leaks on a fault.
        let limiter = self.endpoint.resolve(request)?;
        let endpoint_lease = limiter
            .try_acquire(PERMITS_PER_REQUEST)
            .map_err(FloodgateError::Limiter)?;
        if !endpoint_lease.is_acquired() {
            drop(global_lease);
            return Ok(LeaseContext::rejected(endpoint_lease, RejectedBy::Endpoint));
        }

        Ok(match global_lease {
            Some(global) => {
                LeaseContext::acquired(Box::new(CombinedLease::new(global, endpoint_lease)))
            }
            None => LeaseContext::acquired(endpoint_lease),
        })
    }

    async fn combined_wait(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> (Request, Result<LeaseContext>) {
        let mut global_lease: Option<Box<dyn Lease>> = None;

        if let Some(global) = &self.global {
            match global.wait(PERMITS_PER_REQUEST, cancel.clone()).await {
                Ok(lease) if !lease.is_acquired() => {
                    return (request, Ok(LeaseContext::rejected(lease, RejectedBy::Global)));
                }
                Ok(lease) => global_lease = Some(lease),
                Err(WaitError::Canceled) => return (request, Ok(LeaseContext::canceled())),
                Err(WaitError::Limiter(err)) => {
                    return (request, Err(FloodgateError::Limiter(err)))
                }
            }
        }

        let limiter = match self.endpoint.resolve(&request) {
            Ok(limiter) => limiter,
            Err(err) => return (request, Err(err)),
        };
        let result = match limiter.wait(PERMITS_PER_REQUEST, cancel.clone()).await {
            Ok(lease) if !lease.is_acquired() => {
                drop(global_lease);
                Ok(LeaseContext::rejected(lease, RejectedBy::Endpoint))
            }
            Ok(lease) => Ok(match global_lease {
                Some(global) => LeaseContext::acquired(Box::new(CombinedLease::new(global, lease))),
                None => LeaseContext::acquired(lease),
            }),
            Err(WaitError::Canceled) => {
                // The held global lease is released before the cancellation
                // surfaces, and the outcome is a cancellation, not an
                // endpoint rejection.
                drop(global_lease);
                Ok(LeaseContext::canceled())
            }
            Err(WaitError::Limiter(err)) => Err(FloodgateError::Limiter(err)),
        };
        (request, result)
    }
}

/// Build the endpoint tier from the policy registry and route table.
///
/// Routes with no metadata resolve to the cached pass-through sentinel; a
/// metadata name missing from the registry is a configuration fault, never a
/// silent pass-through.
pub(crate) fn endpoint_limiter(
    policies: Arc<PolicyRegistry>,
    routes: Arc<RouteTable>,
) -> PartitionedLimiter {
    PartitionedLimiter::new(Box::new(move |request| {
        match metadata_for(&routes, request) {
            Some(RateLimitMeta::Policy(name)) => {
                policies.resolve(name, request).ok_or_else(|| {
                    tracing::warn!(policy = %name, "endpoint requires an unregistered rate limiting policy");
                    FloodgateError::UnknownPolicy(name.clone())
                })
            }
            // Disabled endpoints are bypassed before acquisition; anything
            // else shares the pass-through sentinel.
            _ => Ok(ResolvedPartition::pass_through()),
        }
    }))
}
