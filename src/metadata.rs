//! Endpoint metadata: which policy, if any, applies to a route.
//!
//! Metadata is an explicit typed lookup table built at registration time and
//! read per request via a plain key lookup on the matched route template.
//! A `RateLimitMeta` placed directly in request extensions wins over the
//! table, which lets route-scoped layers and tests attach metadata without
//! registering a route.

use std::collections::HashMap;

use axum::extract::{MatchedPath, Request};

use crate::error::{FloodgateError, Result};

/// Read-only rate-limit annotation for a routed endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitMeta {
    /// Apply the named policy.
    Policy(String),
    /// Rate limiting is disabled for this endpoint; neither tier is
    /// consulted.
    Disabled,
}

impl RateLimitMeta {
    pub fn policy(name: impl Into<String>) -> Self {
        Self::Policy(name.into())
    }
}

/// Route template -> metadata, immutable after construction.
///
/// Keys are axum route templates (`/todos/:id`), matched against the
/// request's `MatchedPath`.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<String, RateLimitMeta>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, route: impl Into<String>, meta: RateLimitMeta) -> Result<()> {
        let route = route.into();
        if self.routes.contains_key(&route) {
            return Err(FloodgateError::DuplicateRoute(route));
        }
        self.routes.insert(route, meta);
        Ok(())
    }

    pub fn get(&self, route: &str) -> Option<&RateLimitMeta> {
        self.routes.get(route)
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// The metadata that applies to this request, if any.
///
/// Falls back to the raw URI path for services mounted outside an axum
/// router, where no `MatchedPath` exists.
pub(crate) fn metadata_for<'a>(
    table: &'a RouteTable,
    request: &'a Request,
) -> Option<&'a RateLimitMeta> {
    if let Some(meta) = request.extensions().get::<RateLimitMeta>() {
        return Some(meta);
    }
    if let Some(matched) = request.extensions().get::<MatchedPath>() {
        return table.get(matched.as_str());
    }
    table.get(request.uri().path())
}
