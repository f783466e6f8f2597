//! Sliding-window rate limiting.
//!
//! [`SlidingWindowLimiter`] keeps a log of hit times per key and is shared by the API
//! rate limit middleware and the outbound HTTP client budget. The middleware buckets
//! requests by `{client_ip}:{category}` where the category is `auth` for paths under the
//! auth prefix and `api` otherwise.

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, Request},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::warn;

use super::Middleware;
use crate::{
    config::{RateLimit, RateLimitConfig},
    errors::Error,
    routing::{Blueprint, blueprint_of},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { limit: usize, remaining: usize },
    Limited { limit: usize, retry_after: Duration },
}

#[derive(Debug)]
struct Window {
    span: Duration,
    hits: VecDeque<Instant>,
}

impl Window {
    fn evict(&mut self, now: Instant) {
        while let Some(oldest) = self.hits.front() {
            if now.duration_since(*oldest) >= self.span {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Per-key sliding window log.
#[derive(Debug, Default)]
pub struct SlidingWindowLimiter {
    windows: DashMap<String, Window>,
}

impl SlidingWindowLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hit for `key` unless it would exceed `limit`.
    pub fn check(&self, key: &str, limit: RateLimit) -> RateDecision {
        self.check_at(key, limit, Instant::now())
    }

    fn check_at(&self, key: &str, limit: RateLimit, now: Instant) -> RateDecision {
        let mut window = self.windows.entry(key.to_string()).or_insert_with(|| Window {
            span: limit.window,
            hits: VecDeque::new(),
        });
        window.span = limit.window;
        window.evict(now);

        if window.hits.len() >= limit.max_requests {
            let retry_after = window
                .hits
                .front()
                .map(|oldest| limit.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(limit.window);
            return RateDecision::Limited {
                limit: limit.max_requests,
                retry_after,
            };
        }

        window.hits.push_back(now);
        RateDecision::Allowed {
            limit: limit.max_requests,
            remaining: limit.max_requests - window.hits.len(),
        }
    }

    /// Drop keys whose windows have emptied. Returns the number of keys removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            window.evict(now);
            !window.hits.is_empty()
        });
        before - self.windows.len()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Resolve the client address: first `X-Forwarded-For` hop, `X-Real-IP`, the socket
/// address, then `unknown`.
pub fn client_ip(headers: &HeaderMap, socket: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    socket.map(|addr| addr.ip().to_string()).unwrap_or_else(|| "unknown".to_string())
}

pub fn request_client_ip(request: &Request) -> String {
    let socket = request.extensions().get::<ConnectInfo<SocketAddr>>().map(|ci| ci.0);
    client_ip(request.headers(), socket)
}

/// Limits `api` blueprint requests per client.
pub struct RateLimitMiddleware {
    config: RateLimitConfig,
    limiter: Arc<SlidingWindowLimiter>,
}

impl RateLimitMiddleware {
    pub fn new(config: RateLimitConfig, limiter: Arc<SlidingWindowLimiter>) -> Self {
        Self { config, limiter }
    }

    pub fn limiter(&self) -> &Arc<SlidingWindowLimiter> {
        &self.limiter
    }

    fn category(&self, path: &str) -> (&'static str, RateLimit) {
        if path.starts_with(&self.config.auth_prefix) {
            ("auth", self.config.auth)
        } else {
            ("api", self.config.api)
        }
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &str {
        "rate_limit"
    }

    async fn handle(&self, request: Request, next: Next) -> Response {
        if !self.config.enabled || blueprint_of(request.extensions()) != Blueprint::Api {
            return next.run(request).await;
        }

        let ip = request_client_ip(&request);
        let (category, limit) = self.category(request.uri().path());
        let key = format!("{ip}:{category}");

        match self.limiter.check(&key, limit) {
            RateDecision::Limited { limit, retry_after } => {
                let retry_secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                warn!(
                    client_ip = %ip,
                    path = %request.uri().path(),
                    category,
                    limit,
                    retry_after = retry_secs,
                    "Rate limit exceeded"
                );
                let mut response = Error::TooManyRequests {
                    message: format!(
                        "Too many requests. Limit: {limit} requests per {} seconds",
                        self.category(request.uri().path()).1.window.as_secs()
                    ),
                    retry_after: Some(retry_secs),
                }
                .into_response();
                set_limit_headers(&mut response, limit, 0);
                response
            }
            RateDecision::Allowed { limit, remaining } => {
                let mut response = next.run(request).await;
                set_limit_headers(&mut response, limit, remaining);
                response
            }
        }
    }
}

fn set_limit_headers(response: &mut Response, limit: usize, remaining: usize) {
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
}
