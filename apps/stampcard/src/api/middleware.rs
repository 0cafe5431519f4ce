//! # Request Limiting
//!
//! One global token bucket in front of every route, sized from
//! `http.rate_limit` (or `STAMPCARD_RATE_LIMIT`) in requests per second.
//! A rate of 0 builds no limiter at all.
//!
//! Rejected requests get 429 with a `Retry-After` header and an error body
//! of kind `rate_limited`.

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::ErrorResponse;
use crate::config::HttpConfig;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Shared request limiter for the whole router.
#[derive(Clone)]
pub struct RequestLimiter {
    limiter: Arc<DirectLimiter>,
    clock: DefaultClock,
    per_second: NonZeroU32,
}

impl std::fmt::Debug for RequestLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLimiter")
            .field("per_second", &self.per_second)
            .finish_non_exhaustive()
    }
}

impl RequestLimiter {
    /// Build the limiter for `http`, or `None` when rate limiting is off.
    pub fn from_config(http: &HttpConfig) -> Option<Self> {
        let per_second = NonZeroU32::new(http.rate_limit)?;
        Some(Self {
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
            clock: DefaultClock::default(),
            per_second,
        })
    }

    pub fn per_second(&self) -> u32 {
        self.per_second.get()
    }

    /// Take one request from the bucket. On rejection, returns how long until
    /// the next request would be admitted.
    pub fn admit(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}

/// Whole seconds for `Retry-After`, never less than 1.
fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

fn too_many_requests(wait: Duration) -> Response {
    let retry_after = retry_after_secs(wait);
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ErrorResponse {
            kind: "rate_limited".to_string(),
            message: format!("too many requests, retry in {}s", retry_after),
        }),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

/// Admit the request or answer 429.
pub async fn rate_limit_middleware(
    State(limiter): State<RequestLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match limiter.admit() {
        Ok(()) => next.run(request).await,
        Err(wait) => {
            tracing::warn!(
                event = "rate_limited",
                path = %request.uri().path(),
                retry_after_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                "request rejected by rate limiter"
            );
            too_many_requests(wait)
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
