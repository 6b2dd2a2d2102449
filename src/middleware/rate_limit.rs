use crate::error::SoulConnectError;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use moka::future::Cache;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fixed-window request counter per client. A window opens on the first
/// request from a client and closes `window` later.
#[derive(Clone)]
pub struct RateLimiter {
    counters: Cache<String, Arc<AtomicU32>>,
    limit: u32,
    trust_proxy_headers: bool,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            counters: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(window)
                .build(),
            limit,
            trust_proxy_headers: false,
        }
    }

    /// Keys clients on the forwarding headers instead of the peer address.
    /// Those headers are client supplied unless a proxy overwrites them.
    pub fn trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    /// Counts one request for `key`; false once the window is exhausted.
    pub async fn check(&self, key: &str) -> bool {
        let counter = self
            .counters
            .get_with(key.to_string(), async { Arc::new(AtomicU32::new(0)) })
            .await;
        counter.fetch_add(1, Ordering::Relaxed) < self.limit
    }
}

fn client_key(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
    trust_proxy_headers: bool,
) -> String {
    if trust_proxy_headers {
        if let Some(ip) = forwarded_ip(headers) {
            return ip;
        }
    }

    connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "anonymous".to_string())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
        .map(str::to_string)
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(
        request.headers(),
        request.extensions().get::<ConnectInfo<SocketAddr>>(),
        limiter.trust_proxy_headers,
    );

    if !limiter.check(&key).await {
        tracing::warn!(client = %key, path = %request.uri().path(), "Rate limit exceeded");
        return SoulConnectError::RateLimitExceeded.into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{HeaderValue, StatusCode},
        middleware::from_fn_with_state,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_limit_per_key() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check("1.2.3.4").await);
        assert!(limiter.check("1.2.3.4").await);
        assert!(!limiter.check("1.2.3.4").await);
        assert!(limiter.check("5.6.7.8").await);
    }

    #[tokio::test]
    async fn test_window_expires() {
        let limiter = RateLimiter::new(1, Duration::from_millis(50));
        assert!(limiter.check("a").await);
        assert!(!limiter.check("a").await);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(limiter.check("a").await);
    }

    #[test]
    fn test_client_key_ignores_forwarding_headers_by_default() {
        let mut headers = HeaderMap::new();
        let peer = ConnectInfo("9.9.9.9:4000".parse::<SocketAddr>().unwrap());
        assert_eq!(client_key(&headers, Some(&peer), false), "9.9.9.9");
        assert_eq!(client_key(&headers, None, false), "anonymous");

        headers.insert("x-real-ip", HeaderValue::from_static("8.8.8.8"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("7.7.7.7"));
        assert_eq!(client_key(&headers, Some(&peer), false), "9.9.9.9");
    }

    #[test]
    fn test_client_key_precedence_behind_proxy() {
        let mut headers = HeaderMap::new();
        let peer = ConnectInfo("9.9.9.9:4000".parse::<SocketAddr>().unwrap());
        assert_eq!(client_key(&headers, Some(&peer), true), "9.9.9.9");

        headers.insert("x-real-ip", HeaderValue::from_static("8.8.8.8"));
        assert_eq!(client_key(&headers, Some(&peer), true), "8.8.8.8");

        headers.insert("x-forwarded-for", HeaderValue::from_static("7.7.7.7, 10.0.0.1"));
        assert_eq!(client_key(&headers, Some(&peer), true), "7.7.7.7");
    }

    async fn allowed_with_rotating_forwarded_for(limiter: RateLimiter) -> usize {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(from_fn_with_state(limiter, rate_limit_middleware));
        let peer: SocketAddr = "9.9.9.9:4000".parse().unwrap();

        let mut allowed = 0;
        for i in 0..20 {
            let mut request = axum::http::Request::builder()
                .uri("/")
                .header("x-forwarded-for", format!("10.0.0.{}", i))
                .body(Body::empty())
                .unwrap();
            request.extensions_mut().insert(ConnectInfo(peer));
            let response = app.clone().oneshot(request).await.unwrap();
            if response.status() == StatusCode::OK {
                allowed += 1;
            }
        }
        allowed
    }

    #[tokio::test]
    async fn test_spoofed_forwarded_for_does_not_bypass_limit() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert_eq!(allowed_with_rotating_forwarded_for(limiter).await, 1);
    }

    #[tokio::test]
    async fn test_forwarded_for_is_used_when_trusted() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60)).trust_proxy_headers(true);
        assert_eq!(allowed_with_rotating_forwarded_for(limiter).await, 20);
    }
}
