//! Floodgate - dual-tier request admission for Axum services
//!
//! Floodgate combines a global limiter and per-route policy limiters into a
//! single admission decision, applied as a Tower layer. A request is admitted
//! only when both tiers grant a lease; admitted requests hold their leases for
//! the duration of the inner handler and release them when the response is
//! produced.
//!
//! # Features
//!
//! - **Dual-tier admission**: one global limiter, checked first, plus a
//!   named policy per route
//! - **Atomic leases**: the global lease is released whenever the endpoint
//!   tier denies, faults, or is canceled
//! - **Two-phase acquire**: a synchronous fast path, then a cancellable
//!   queued wait
//! - **Rejection handlers**: per-policy or default async handlers build the
//!   rejection response, with a JSON fallback and `Retry-After` hint
//! - **Route metadata**: routes opt into a policy, or out of limiting
//!   entirely, through a lookup table keyed by route template
//! - **Testing**: scripted limiters and policies for exercising admission
//!   paths in tests
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use axum::{routing::get, Router};
//! use floodgate::{AdmissionConfig, AdmissionLayer, Limiter, RateLimitPartition};
//! use floodgate::gcra::GovernorLimiter;
//!
//! #[tokio::main]
//! async fn main() {
//!     let global: Arc<dyn Limiter> = GovernorLimiter::per_window(1000, Duration::from_secs(1));
//!
//!     let config = AdmissionConfig::builder()
//!         .global_limiter(global)
//!         .policy("api", |_req| {
//!             RateLimitPartition::new("all", || {
//!                 let limiter: Arc<dyn Limiter> =
//!                     GovernorLimiter::per_window(100, Duration::from_secs(1));
//!                 limiter
//!             })
//!         })
//!         .require_policy("/todos", "api")
//!         .disable("/health")
//!         .build()
//!         .unwrap();
//!
//!     let app = Router::new()
//!         .route("/todos", get(|| async { "ok" }))
//!         .route("/health", get(|| async { "up" }))
//!         .layer(AdmissionLayer::new(config));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

mod config;
mod engine;
mod error;
#[cfg(feature = "governor")]
pub mod gcra;
mod layer;
mod lease;
mod limiter;
mod metadata;
mod policy;
pub mod testing;

pub use config::{AdmissionConfig, AdmissionConfigBuilder, DEFAULT_REJECTION_STATUS};
pub use error::{FloodgateError, Result};
pub use layer::{AdmissionLayer, AdmissionService};
pub use lease::{CombinedLease, Lease, LeaseContext, RejectedBy};
pub use limiter::{Limiter, PassThrough, RateLimitPartition, WaitError};
pub use metadata::{RateLimitMeta, RouteTable};
pub use policy::{
    rejection_handler, OnRejected, PartitionFn, PolicyRegistry, RateLimitPolicy, RejectionContext,
};

// Handlers signal client disconnects to the admission layer through this
// token in the request extensions.
pub use tokio_util::sync::CancellationToken;

#[cfg(feature = "governor")]
pub use gcra::GovernorLimiter;
