//! Rate-limit middleware: per-principal sliding window, keyed off the
//! bearer credential when present. Wraps [`fleet_harness::rate_limiter`]
//! the way [`fleet_harness::auth::AuthLayer`] wraps the API-key store —
//! same `Layer`/`Service` shape, so the two compose in either order.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderValue, Request, Response, StatusCode},
    response::IntoResponse,
};
use fleet_harness::rate_limiter::{RateLimitError, RateLimiter};
use tower::{Layer, Service};

#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }

    /// Spawns the background eviction task. The returned handle is not
    /// awaited by callers — the task must not block process shutdown, so
    /// daemons hold it only to abort on drop if they choose to.
    pub fn spawn_eviction(&self) -> tokio::task::JoinHandle<()> {
        let limiter = self.limiter.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                limiter.evict_empty_buckets();
            }
        })
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitMiddleware {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitMiddleware<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
}

fn rate_limit_key(req: &Request<Body>) -> String {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| format!("bearer:{token}"))
        .unwrap_or_else(|| "__anonymous__".to_string())
}

fn header(name: &'static str, value: impl std::fmt::Display) -> (&'static str, HeaderValue) {
    (name, HeaderValue::from_str(&value.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0")))
}

impl<S> Service<Request<Body>> for RateLimitMiddleware<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let key = rate_limit_key(&req);
        let limiter = self.limiter.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match limiter.check(&key) {
                Ok(outcome) => {
                    let mut resp = inner.call(req).await?;
                    let headers = resp.headers_mut();
                    headers.insert("X-RateLimit-Limit", header("X-RateLimit-Limit", outcome.limit).1);
                    headers.insert("X-RateLimit-Remaining", header("X-RateLimit-Remaining", outcome.remaining).1);
                    headers.insert("X-RateLimit-Reset", header("X-RateLimit-Reset", outcome.reset_unix).1);
                    Ok(resp)
                }
                Err(RateLimitError::Exceeded {
                    retry_after_secs,
                    limit,
                    reset_unix,
                    ..
                }) => {
                    let mut resp = (
                        StatusCode::TOO_MANY_REQUESTS,
                        axum::Json(serde_json::json!({"error": "rate limit exceeded", "retryAfter": retry_after_secs})),
                    )
                        .into_response();
                    let headers = resp.headers_mut();
                    headers.insert("Retry-After", header("Retry-After", retry_after_secs).1);
                    headers.insert("X-RateLimit-Limit", header("X-RateLimit-Limit", limit).1);
                    headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
                    headers.insert("X-RateLimit-Reset", header("X-RateLimit-Reset", reset_unix).1);
                    Ok(resp)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use fleet_harness::rate_limiter::RateLimitConfig;
    use tower::ServiceExt;

    fn app(max: u32) -> Router {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::new(max, Duration::from_secs(60))));
        Router::new().route("/ping", get(|| async { "pong" })).layer(RateLimitLayer::new(limiter))
    }

    #[tokio::test]
    async fn requests_within_limit_pass_with_headers() {
        let app = app(5);
        let req = Request::builder().uri("/ping").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("X-RateLimit-Limit").unwrap(), "5");
    }

    #[tokio::test]
    async fn exceeding_limit_returns_429_with_retry_after() {
        let app = app(1);
        let req1 = Request::builder().uri("/ping").body(Body::empty()).unwrap();
        app.clone().oneshot(req1).await.unwrap();

        let req2 = Request::builder().uri("/ping").body(Body::empty()).unwrap();
        let resp = app.oneshot(req2).await.unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(resp.headers().contains_key("Retry-After"));
        assert_eq!(resp.headers().get("X-RateLimit-Remaining").unwrap(), "0");
    }

    #[tokio::test]
    async fn distinct_bearer_tokens_get_independent_buckets() {
        let app = app(1);
        let req1 = Request::builder().uri("/ping").header("Authorization", "Bearer t1").body(Body::empty()).unwrap();
        app.clone().oneshot(req1).await.unwrap();

        let req2 = Request::builder().uri("/ping").header("Authorization", "Bearer t2").body(Body::empty()).unwrap();
        let resp = app.oneshot(req2).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
