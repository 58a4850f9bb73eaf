//! Tests for policy and route registration validation

use std::sync::Arc;

use axum::extract::Request;
use axum::http::StatusCode;
use floodgate::testing::TestLimiter;
use floodgate::{
    AdmissionConfig, FloodgateError, RateLimitPartition, RateLimitPolicy, RejectionContext,
};

fn fixed_partition(_request: &Request) -> RateLimitPartition {
    RateLimitPartition::new("fixed", || TestLimiter::admitting().as_limiter())
}

struct NoopPolicy;

impl RateLimitPolicy for NoopPolicy {
    fn partition(&self, request: &Request) -> RateLimitPartition {
        fixed_partition(request)
    }
}

#[test]
fn test_registered_policies_are_resolvable_by_name() {
    let config = AdmissionConfig::builder()
        .policy("api", fixed_partition)
        .policy_instance("per-user", Arc::new(NoopPolicy))
        .build()
        .unwrap();

    assert!(config.policies().contains("api"));
    assert!(config.policies().contains("per-user"));
    assert!(!config.policies().contains("missing"));
}

#[test]
fn test_duplicate_inline_policy_name_fails() {
    let err = AdmissionConfig::builder()
        .policy("api", fixed_partition)
        .policy("api", fixed_partition)
        .build()
        .unwrap_err();

    assert!(matches!(err, FloodgateError::DuplicatePolicy(name) if name == "api"));
}

#[test]
fn test_duplicate_name_across_registration_styles_fails() {
    let err = AdmissionConfig::builder()
        .policy("api", fixed_partition)
        .policy_instance("api", Arc::new(NoopPolicy))
        .build()
        .unwrap_err();

    assert!(matches!(err, FloodgateError::DuplicatePolicy(name) if name == "api"));
}

#[test]
fn test_empty_policy_name_fails() {
    let err = AdmissionConfig::builder()
        .policy_instance("", Arc::new(NoopPolicy))
        .build()
        .unwrap_err();

    assert!(matches!(err, FloodgateError::InvalidPolicyName));
}

#[test]
fn test_policy_with_handler_registers_both_parts() {
    async fn too_many(_context: RejectionContext) -> axum::response::Response {
        use axum::response::IntoResponse;
        StatusCode::TOO_MANY_REQUESTS.into_response()
    }

    let config = AdmissionConfig::builder()
        .policy_with_handler("api", fixed_partition, too_many)
        .build()
        .unwrap();

    assert!(config.policies().contains("api"));
}

#[test]
fn test_conflicting_route_metadata_fails() {
    let err = AdmissionConfig::builder()
        .policy("api", fixed_partition)
        .require_policy("/todos", "api")
        .disable("/todos")
        .build()
        .unwrap_err();

    assert!(matches!(err, FloodgateError::DuplicateRoute(route) if route == "/todos"));
}

#[test]
fn test_routes_may_reference_policies_registered_later() {
    // Registration order between routes and policies does not matter;
    // only the built configuration is validated.
    let config = AdmissionConfig::builder()
        .require_policy("/todos", "api")
        .policy("api", fixed_partition)
        .build()
        .unwrap();

    assert!(config.policies().contains("api"));
    assert!(!config.routes().is_empty());
}
