//! Configuration surface for the admission middleware.
//!
//! All policy and route registration flows through the builder and is
//! validated at [`build`](AdmissionConfigBuilder::build), so configuration
//! defects fail application startup instead of surfacing mid-traffic.

use std::future::Future;
use std::sync::Arc;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::Response;

use crate::error::Result;
use crate::limiter::{Limiter, RateLimitPartition};
use crate::metadata::{RateLimitMeta, RouteTable};
use crate::policy::{rejection_handler, OnRejected, PartitionFn, PolicyRegistry, RateLimitPolicy, RejectionContext};

/// Status answered for rejected requests unless a handler overrides it.
pub const DEFAULT_REJECTION_STATUS: StatusCode = StatusCode::SERVICE_UNAVAILABLE;

/// Validated configuration for [`AdmissionLayer`](crate::AdmissionLayer).
pub struct AdmissionConfig {
    pub(crate) rejection_status_code: StatusCode,
    pub(crate) default_on_rejected: Option<OnRejected>,
    pub(crate) global_limiter: Option<Arc<dyn Limiter>>,
    pub(crate) policies: PolicyRegistry,
    pub(crate) routes: RouteTable,
}

impl std::fmt::Debug for AdmissionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionConfig")
            .field("rejection_status_code", &self.rejection_status_code)
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

impl AdmissionConfig {
    pub fn builder() -> AdmissionConfigBuilder {
        AdmissionConfigBuilder::new()
    }

    pub fn rejection_status_code(&self) -> StatusCode {
        self.rejection_status_code
    }

    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }
}

enum PendingPolicy {
    Inline {
        name: String,
        partitioner: PartitionFn,
        on_rejected: Option<OnRejected>,
    },
    Instance {
        name: String,
        policy: Arc<dyn RateLimitPolicy>,
    },
    /// Activated exactly once, at build time, never per request.
    Deferred {
        name: String,
        factory: Box<dyn FnOnce() -> Arc<dyn RateLimitPolicy> + Send>,
    },
}

/// Builder for [`AdmissionConfig`].
#[must_use = "builder does nothing until you call build()"]
pub struct AdmissionConfigBuilder {
    rejection_status_code: StatusCode,
    default_on_rejected: Option<OnRejected>,
    global_limiter: Option<Arc<dyn Limiter>>,
    policies: Vec<PendingPolicy>,
    routes: Vec<(String, RateLimitMeta)>,
}

impl AdmissionConfigBuilder {
    pub fn new() -> Self {
        Self {
            rejection_status_code: DEFAULT_REJECTION_STATUS,
            default_on_rejected: None,
            global_limiter: None,
            policies: Vec::new(),
            routes: Vec::new(),
        }
    }

    /// Status for rejected requests. A rejection handler's response wins
    /// over this.
    pub fn rejection_status_code(mut self, status: StatusCode) -> Self {
        self.rejection_status_code = status;
        self
    }

    /// Default handler for rejected requests, used when the rejecting
    /// policy does not define its own.
    pub fn on_rejected<H, F>(mut self, handler: H) -> Self
    where
        H: Fn(RejectionContext) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.default_on_rejected = Some(rejection_handler(handler));
        self
    }

    /// Process-wide limiter consulted before any endpoint policy.
    pub fn global_limiter(mut self, limiter: Arc<dyn Limiter>) -> Self {
        self.global_limiter = Some(limiter);
        self
    }

    /// Register a named policy from an inline partitioner.
    pub fn policy<F>(mut self, name: impl Into<String>, partitioner: F) -> Self
    where
        F: Fn(&Request) -> RateLimitPartition + Send + Sync + 'static,
    {
        self.policies.push(PendingPolicy::Inline {
            name: name.into(),
            partitioner: Arc::new(partitioner),
            on_rejected: None,
        });
        self
    }

    /// Register a named policy from an inline partitioner plus its own
    /// rejection handler.
    pub fn policy_with_handler<F, H, Fut>(
        mut self,
        name: impl Into<String>,
        partitioner: F,
        handler: H,
    ) -> Self
    where
        F: Fn(&Request) -> RateLimitPartition + Send + Sync + 'static,
        H: Fn(RejectionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.policies.push(PendingPolicy::Inline {
            name: name.into(),
            partitioner: Arc::new(partitioner),
            on_rejected: Some(rejection_handler(handler)),
        });
        self
    }

    /// Register a pluggable policy object under a name.
    pub fn policy_instance(
        mut self,
        name: impl Into<String>,
        policy: Arc<dyn RateLimitPolicy>,
    ) -> Self {
        self.policies.push(PendingPolicy::Instance {
            name: name.into(),
            policy,
        });
        self
    }

    /// Register a policy produced by a factory. The factory runs exactly
    /// once, when the configuration is built.
    pub fn policy_factory<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: FnOnce() -> Arc<dyn RateLimitPolicy> + Send + 'static,
    {
        self.policies.push(PendingPolicy::Deferred {
            name: name.into(),
            factory: Box::new(factory),
        });
        self
    }

    /// Tag a route template with a named policy.
    pub fn require_policy(mut self, route: impl Into<String>, policy: impl Into<String>) -> Self {
        self.routes
            .push((route.into(), RateLimitMeta::Policy(policy.into())));
        self
    }

    /// Disable rate limiting for a route template entirely; neither tier is
    /// consulted for it.
    pub fn disable(mut self, route: impl Into<String>) -> Self {
        self.routes.push((route.into(), RateLimitMeta::Disabled));
        self
    }

    /// Validate all registrations. Duplicate or empty policy names and
    /// duplicate routes fail here, at startup.
    pub fn build(self) -> Result<AdmissionConfig> {
        let mut policies = PolicyRegistry::new();
        for pending in self.policies {
            match pending {
                PendingPolicy::Inline {
                    name,
                    partitioner,
                    on_rejected,
                } => {
                    let partitioner: PartitionFn = partitioner;
                    policies.register(name, move |request| partitioner(request), on_rejected)?;
                }
                PendingPolicy::Instance { name, policy } => {
                    policies.register_policy(name, policy)?;
                }
                PendingPolicy::Deferred { name, factory } => {
                    policies.register_policy(name, factory())?;
                }
            }
        }

        let mut routes = RouteTable::new();
        for (route, meta) in self.routes {
            routes.insert(route, meta)?;
        }

        Ok(AdmissionConfig {
            rejection_status_code: self.rejection_status_code,
            default_on_rejected: self.default_on_rejected,
            global_limiter: self.global_limiter,
            policies,
            routes,
        })
    }
}

impl Default for AdmissionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
