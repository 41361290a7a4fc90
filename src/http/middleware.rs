//! Admission middleware for axum routers.
//!
//! Extracts a caller key from the peer address (or `X-Forwarded-For` when
//! behind a proxy), runs it through the gate, and short-circuits denied
//! requests with `429 Too Many Requests` plus a retry hint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::ratelimit::RateLimiter;

/// Response body sent when a request is rejected by the gate.
#[derive(Debug, Serialize)]
pub struct RateLimitedBody {
    pub error: &'static str,
    pub message: &'static str,
    /// Wall-clock time at which the block lifts
    pub blocked_until: DateTime<Utc>,
    /// Seconds until the block lifts
    pub retry_after: u64,
}

/// Gate a request on the caller's network address.
///
/// Attach with [`axum::middleware::from_fn_with_state`] and a shared
/// [`RateLimiter`]. The router must be served with
/// `into_make_service_with_connect_info::<SocketAddr>()` so the peer address
/// is available; requests with neither peer address nor forwarding header are
/// admitted and logged rather than dropped.
pub async fn admission(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let key = match client_key(&request) {
        Some(key) => key,
        None => {
            warn!("No client address available, admitting unkeyed request");
            return next.run(request).await;
        }
    };

    if limiter.allow(&key) {
        return next.run(request).await;
    }

    let (retry_after, blocked_until) =
        block_hint(&limiter, &key).unwrap_or_else(|| (0, Utc::now()));
    info!(key = %key, retry_after, "Request rate limited");

    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, retry_after.to_string())],
        Json(RateLimitedBody {
            error: "Too many requests",
            message: "You have exceeded the rate limit. Please try again later.",
            blocked_until,
            retry_after,
        }),
    )
        .into_response()
}

/// Caller key for a request: first `X-Forwarded-For` hop when present,
/// otherwise the peer address.
fn client_key(request: &Request) -> Option<String> {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(forwarded) = forwarded {
        return Some(forwarded.to_string());
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

/// Seconds until the block on `key` lifts plus the wall-clock moment it
/// does, or `None` when the key is not blocked.
pub(crate) fn block_hint(limiter: &RateLimiter, key: &str) -> Option<(u64, DateTime<Utc>)> {
    let until = limiter.blocked_until(key)?;
    let remaining = until.saturating_duration_since(Instant::now());
    let wall = Utc::now()
        + chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero());
    Some((remaining.as_secs(), wall))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with(forwarded: Option<&str>, peer: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/");
        if let Some(forwarded) = forwarded {
            builder = builder.header("x-forwarded-for", forwarded);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        if let Some(peer) = peer {
            let addr: SocketAddr = peer.parse().unwrap();
            request.extensions_mut().insert(ConnectInfo(addr));
        }
        request
    }

    #[test]
    fn test_client_key_prefers_forwarded_header() {
        let request = request_with(Some("203.0.113.7, 10.0.0.1"), Some("192.168.1.5:4242"));
        assert_eq!(client_key(&request).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn test_client_key_falls_back_to_peer_address() {
        let request = request_with(None, Some("192.168.1.5:4242"));
        assert_eq!(client_key(&request).as_deref(), Some("192.168.1.5"));

        let request = request_with(Some("   "), Some("192.168.1.5:4242"));
        assert_eq!(client_key(&request).as_deref(), Some("192.168.1.5"));
    }

    #[test]
    fn test_client_key_absent() {
        let request = request_with(None, None);
        assert_eq!(client_key(&request), None);
    }
}
