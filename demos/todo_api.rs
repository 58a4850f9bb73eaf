//! Todo API Example
//!
//! A small todo service with dual-tier admission: a process-wide ceiling,
//! a shared policy for the todo routes, a per-client policy with its own
//! rejection handler, and an unlimited health endpoint.
//!
//! Run with: cargo run --example todo_api

use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use floodgate::gcra::GovernorLimiter;
use floodgate::{
    rejection_handler, AdmissionConfig, AdmissionLayer, Limiter, OnRejected, RateLimitPartition,
    RateLimitPolicy,
};

/// Partitions by the `x-real-ip` header so each client gets its own bucket.
struct PerClientPolicy {
    max_per_second: u32,
}

impl RateLimitPolicy for PerClientPolicy {
    fn partition(&self, request: &Request) -> RateLimitPartition {
        let client = request
            .headers()
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        let max = self.max_per_second;
        RateLimitPartition::new(client, move || {
            let limiter: Arc<dyn Limiter> = GovernorLimiter::per_window(max, Duration::from_secs(1));
            limiter
        })
    }

    fn on_rejected(&self) -> Option<OnRejected> {
        Some(rejection_handler(|context| async move {
            let retry = context.retry_after.map(|hint| hint.as_secs().max(1));
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": "slow_down",
                    "retry_after": retry,
                })),
            )
                .into_response()
        }))
    }
}

async fn list_todos() -> Json<serde_json::Value> {
    Json(json!({ "todos": ["write docs", "ship it"] }))
}

async fn account() -> Response {
    Json(json!({ "plan": "free" })).into_response()
}

async fn health() -> &'static str {
    "up"
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,floodgate=debug".into()),
        )
        .init();

    let global: Arc<dyn Limiter> = GovernorLimiter::per_window(1000, Duration::from_secs(1));

    let config = AdmissionConfig::builder()
        .global_limiter(global)
        // All todo traffic shares one bucket.
        .policy("todos", |_request| {
            RateLimitPartition::new("all", || {
                let limiter: Arc<dyn Limiter> =
                    GovernorLimiter::per_window(100, Duration::from_secs(1));
                limiter
            })
        })
        .policy_instance("per-client", Arc::new(PerClientPolicy { max_per_second: 5 }))
        .require_policy("/todos", "todos")
        .require_policy("/account", "per-client")
        .disable("/health")
        .build()
        .expect("admission configuration is valid");

    let app = Router::new()
        .route("/todos", get(list_todos))
        .route("/account", get(account))
        .route("/health", get(health))
        .layer(AdmissionLayer::new(config));

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000")
        .await
        .expect("port 3000 is free");
    tracing::info!("listening on http://0.0.0.0:3000");
    axum::serve(listener, app).await.expect("server runs");
}
