//! Bearer-token authentication middleware.
//!
//! Two acceptance paths, in order: an exact (constant-time) match against
//! the `AUTH_TOKEN` env-configured admin token, then a lookup through the
//! API-key store. Absent both a configured token and a matching key, or a
//! header that isn't `Bearer <credential>` at all, the request is
//! rejected with 401.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
    response::IntoResponse,
};
use subtle::ConstantTimeEq;
use tower::{Layer, Service};

use crate::api_keys::ApiKeyStore;

#[derive(Clone)]
pub struct AuthLayer {
    auth_token: Option<Arc<String>>,
    api_keys: Option<Arc<ApiKeyStore>>,
}

impl AuthLayer {
    pub fn new(auth_token: Option<String>, api_keys: Option<Arc<ApiKeyStore>>) -> Self {
        Self {
            auth_token: auth_token.map(Arc::new),
            api_keys,
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            auth_token: self.auth_token.clone(),
            api_keys: self.api_keys.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    auth_token: Option<Arc<String>>,
    api_keys: Option<Arc<ApiKeyStore>>,
}

fn unauthorized() -> Response<Body> {
    (
        StatusCode::UNAUTHORIZED,
        axum::Json(serde_json::json!({"error": "unauthorized"})),
    )
        .into_response()
}

impl<S> Service<Request<Body>> for AuthMiddleware<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let auth_token = self.auth_token.clone();
        let api_keys = self.api_keys.clone();
        let mut inner = self.inner.clone();

        let bearer = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|s| s.to_string());

        Box::pin(async move {
            let Some(credential) = bearer else {
                return Ok(unauthorized());
            };

            if let Some(expected) = &auth_token {
                if bool::from(credential.as_bytes().ct_eq(expected.as_bytes())) {
                    return inner.call(req).await;
                }
            }

            if let Some(store) = &api_keys {
                if let Ok(Some(_key)) = store.verify(&credential).await {
                    return inner.call(req).await;
                }
            }

            Ok(unauthorized())
        })
    }
}
