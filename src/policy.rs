//! Named policies: partitioner + optional rejection handler.
//!
//! The registry is built once at startup and read-only afterwards; per
//! request the middleware only looks names up in it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::Response;
use futures::future::BoxFuture;

use crate::error::{FloodgateError, Result};
use crate::limiter::{RateLimitPartition, ResolvedPartition};

/// Everything a rejection handler gets to see. Built on the cold rejection
/// path from the denied request and lease.
pub struct RejectionContext {
    /// Status the middleware would answer with; the handler's own response
    /// wins over it.
    pub status: StatusCode,
    /// Back-off hint carried by the denied lease, if any.
    pub retry_after: Option<Duration>,
    /// Name of the policy the endpoint carries, when it carries one.
    pub policy: Option<String>,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

/// Handler invoked when a request is denied. It builds the full rejection
/// response, so whatever status it sets overrides the configured default.
pub type OnRejected =
    Arc<dyn Fn(RejectionContext) -> BoxFuture<'static, Response> + Send + Sync>;

/// Wrap an async closure into an [`OnRejected`] handler.
pub fn rejection_handler<H, F>(handler: H) -> OnRejected
where
    H: Fn(RejectionContext) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |context| {
        let fut: BoxFuture<'static, Response> = Box::pin(handler(context));
        fut
    })
}

/// Partitioning function: request -> partition (key + limiter factory).
///
/// Must be pure with respect to the request's stable identity fields;
/// bounding partition cardinality is the external limiter's concern.
pub type PartitionFn = Arc<dyn Fn(&Request) -> RateLimitPartition + Send + Sync>;

/// A pluggable policy object: the second registration shape, for policies
/// that carry their own state or dependencies.
pub trait RateLimitPolicy: Send + Sync {
    /// The partition that applies to this request.
    fn partition(&self, request: &Request) -> RateLimitPartition;

    /// Handler for requests this policy rejects.
    fn on_rejected(&self) -> Option<OnRejected> {
        None
    }
}

struct RegisteredPolicy {
    partitioner: PartitionFn,
    on_rejected: Option<OnRejected>,
}

/// Maps policy names to their partitioner and rejection handler.
///
/// Each name may be registered at most once; duplicates and empty names are
/// configuration errors.
#[derive(Default)]
pub struct PolicyRegistry {
    policies: HashMap<String, RegisteredPolicy>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an inline partitioner with an optional rejection handler.
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        partitioner: F,
        on_rejected: Option<OnRejected>,
    ) -> Result<()>
    where
        F: Fn(&Request) -> RateLimitPartition + Send + Sync + 'static,
    {
        self.insert(
            name.into(),
            RegisteredPolicy {
                partitioner: Arc::new(partitioner),
                on_rejected,
            },
        )
    }

    /// Register a pluggable policy object under a name.
    pub fn register_policy(
        &mut self,
        name: impl Into<String>,
        policy: Arc<dyn RateLimitPolicy>,
    ) -> Result<()> {
        let on_rejected = policy.on_rejected();
        let partitioner: PartitionFn = Arc::new(move |request| policy.partition(request));
        self.insert(
            name.into(),
            RegisteredPolicy {
                partitioner,
                on_rejected,
            },
        )
    }

    fn insert(&mut self, name: String, policy: RegisteredPolicy) -> Result<()> {
        if name.is_empty() {
            return Err(FloodgateError::InvalidPolicyName);
        }
        if self.policies.contains_key(&name) {
            return Err(FloodgateError::DuplicatePolicy(name));
        }
        self.policies.insert(name, policy);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.policies.contains_key(name)
    }

    /// Run the named policy's partitioner for this request. `None` when the
    /// name is unknown; the caller decides whether that is a fault.
    pub(crate) fn resolve(&self, name: &str, request: &Request) -> Option<ResolvedPartition> {
        let policy = self.policies.get(name)?;
        Some((policy.partitioner)(request).into_resolved(name))
    }

    pub(crate) fn on_rejected(&self, name: &str) -> Option<OnRejected> {
        self.policies.get(name).and_then(|policy| policy.on_rejected.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::{Limiter, PartitionKey};
    use crate::testing::TestLimiter;
    use axum::body::Body;

    fn ip_partitioner(request: &Request) -> RateLimitPartition {
        let key = request
            .headers()
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        RateLimitPartition::new(key, || {
            let limiter: Arc<dyn Limiter> = TestLimiter::admitting();
            limiter
        })
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = PolicyRegistry::new();
        registry.register("api", ip_partitioner, None).unwrap();

        let err = registry.register("api", ip_partitioner, None).unwrap_err();
        assert!(matches!(err, FloodgateError::DuplicatePolicy(name) if name == "api"));
    }

    #[test]
    fn empty_names_are_rejected() {
        let mut registry = PolicyRegistry::new();
        let err = registry.register("", ip_partitioner, None).unwrap_err();
        assert!(matches!(err, FloodgateError::InvalidPolicyName));
    }

    #[test]
    fn resolve_namespaces_partitions_by_policy_name() {
        let mut registry = PolicyRegistry::new();
        registry.register("api", ip_partitioner, None).unwrap();

        let request = Request::builder()
            .uri("/x")
            .header("x-real-ip", "10.0.0.9")
            .body(Body::empty())
            .unwrap();

        let resolved = registry.resolve("api", &request).unwrap();
        assert_eq!(
            resolved.key,
            PartitionKey::Policy {
                policy: "api".to_string(),
                partition: "10.0.0.9".to_string(),
            }
        );
    }

    #[test]
    fn resolve_unknown_name_returns_none() {
        let registry = PolicyRegistry::new();
        let request = Request::builder().uri("/x").body(Body::empty()).unwrap();
        assert!(registry.resolve("ghost", &request).is_none());
    }
}
