//! Admission middleware: the request-pipeline entry point.
//!
//! A tower layer/service pair that runs the combined acquisition engine for
//! every request, holds the resulting lease across the downstream call, and
//! on rejection picks exactly one rejection handler: the rejecting policy's
//! own handler for endpoint-tier denials, else the configured default, else
//! a bare status response.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Request,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service};

use crate::config::AdmissionConfig;
use crate::engine::{endpoint_limiter, AcquisitionEngine};
use crate::lease::{LeaseContext, RejectedBy};
use crate::metadata::{metadata_for, RateLimitMeta, RouteTable};
use crate::policy::{OnRejected, PolicyRegistry, RejectionContext};

/// Convention for "client closed the request" (no IANA status exists).
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Shared middleware state, cheap to clone into request futures.
struct AdmissionState {
    engine: AcquisitionEngine,
    policies: Arc<PolicyRegistry>,
    routes: Arc<RouteTable>,
    rejection_status: StatusCode,
    default_on_rejected: Option<OnRejected>,
}

/// Tower layer applying dual-tier request admission.
#[derive(Clone)]
pub struct AdmissionLayer {
    state: Arc<AdmissionState>,
}

impl AdmissionLayer {
    pub fn new(config: AdmissionConfig) -> Self {
        let policies = Arc::new(config.policies);
        let routes = Arc::new(config.routes);
        let engine = AcquisitionEngine::new(
            config.global_limiter,
            endpoint_limiter(policies.clone(), routes.clone()),
        );

        Self {
            state: Arc::new(AdmissionState {
                engine,
                policies,
                routes,
                rejection_status: config.rejection_status_code,
                default_on_rejected: config.default_on_rejected,
            }),
        }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            state: self.state.clone(),
        }
    }
}

/// Tower service wrapping the downstream stage with an admission check.
#[derive(Clone)]
pub struct AdmissionService<S> {
    inner: S,
    state: Arc<AdmissionState>,
}

impl<S> Service<Request> for AdmissionService<S>
where
    S: Service<Request> + Clone + Send + 'static,
    S::Response: IntoResponse,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let state = self.state.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            // Disabled endpoints bypass both tiers entirely.
            if matches!(
                metadata_for(&state.routes, &req),
                Some(RateLimitMeta::Disabled)
            ) {
                let response = inner.call(req).await?;
                return Ok(response.into_response());
            }

            let cancel = req
                .extensions()
                .get::<CancellationToken>()
                .cloned()
                .unwrap_or_else(CancellationToken::new);

            let (req, result) = state.engine.acquire(req, &cancel).await;
            let context = match result {
                Ok(context) => context,
                Err(err) => {
                    // Configuration and limiter faults are server errors,
                    // never silently treated as allow or deny.
                    tracing::error!(
                        error = %err,
                        path = %req.uri().path(),
                        "request admission failed"
                    );
                    return Ok(err.into_response());
                }
            };

            if context.is_acquired() {
                // Held across the downstream call; dropped (released) on
                // every exit, including a downstream error.
                let _lease = context.lease;
                let response = inner.call(req).await?;
                return Ok(response.into_response());
            }

            Ok(reject(&state, req, context).await)
        })
    }
}

async fn reject(state: &AdmissionState, request: Request, context: LeaseContext) -> Response {
    tracing::debug!(
        path = %request.uri().path(),
        rejected_by = ?context.rejected_by,
        "rate limits exceeded, rejecting this request"
    );

    if context.rejected_by == Some(RejectedBy::RequestCanceled) {
        // The engine already released everything it held; no handler runs
        // for a request whose caller is gone.
        let status = StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
            .expect("499 is within the valid status code range");
        return status.into_response();
    }

    let policy_name = match metadata_for(&state.routes, &request) {
        Some(RateLimitMeta::Policy(name)) => Some(name.clone()),
        _ => None,
    };

    // The policy's own handler applies only when that policy did the
    // rejecting; a global denial uses the default handler.
    let mut handler = state.default_on_rejected.clone();
    if context.rejected_by == Some(RejectedBy::Endpoint) {
        if let Some(name) = &policy_name {
            if let Some(policy_handler) = state.policies.on_rejected(name) {
                handler = Some(policy_handler);
            }
        }
    }

    let status = state.rejection_status;
    let retry_after = context.lease.retry_after();
    match handler {
        // The handler's response wins over the configured status code.
        Some(handler) => {
            handler(RejectionContext {
                status,
                retry_after,
                policy: policy_name,
                method: request.method().clone(),
                uri: request.uri().clone(),
                headers: request.headers().clone(),
            })
            .await
        }
        None => rejection_response(status, retry_after),
    }
}

/// Default rejection body.
#[derive(Serialize)]
struct RejectionBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

fn rejection_response(status: StatusCode, retry_after: Option<Duration>) -> Response {
    let retry_secs = retry_after.map(|hint| hint.as_secs().max(1));
    let body = Json(RejectionBody {
        error: "rate_limit_exceeded",
        message: match retry_secs {
            Some(secs) => format!("Rate limit exceeded. Please try again in {} seconds", secs),
            None => "Rate limit exceeded.".to_string(),
        },
        retry_after: retry_secs,
    });

    match retry_secs {
        Some(secs) => (status, [("Retry-After", secs.to_string())], body).into_response(),
        None => (status, body).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_response_carries_retry_after_header() {
        let response =
            rejection_response(StatusCode::SERVICE_UNAVAILABLE, Some(Duration::from_secs(7)));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "7");
    }

    #[test]
    fn rejection_response_without_hint_has_no_header() {
        let response = rejection_response(StatusCode::TOO_MANY_REQUESTS, None);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get("Retry-After").is_none());
    }

    #[test]
    fn sub_second_hints_round_up_to_one_second() {
        let response =
            rejection_response(StatusCode::SERVICE_UNAVAILABLE, Some(Duration::from_millis(120)));
        assert_eq!(response.headers().get("Retry-After").unwrap(), "1");
    }
}
