//! `/ui/manifest` — the list of mounted service bundles and their UI
//! hints, computed once at startup from the [`ServiceLoader`] registry
//! before it's consumed by `mount`.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::loader::UiManifest;

pub fn router(manifest: Arc<UiManifest>) -> Router {
    Router::new().route("/manifest", get(get_manifest)).with_state(manifest)
}

async fn get_manifest(State(manifest): State<Arc<UiManifest>>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(&*manifest).unwrap_or(serde_json::Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn manifest_serializes_registered_services() {
        let manifest = Arc::new(UiManifest {
            services: vec![crate::loader::ServiceDescriptor {
                name: "board".into(),
                description: "task board".into(),
                ui: None,
            }],
        });
        let app = router(manifest);
        let req = Request::builder().uri("/manifest").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["services"][0]["name"], "board");
    }
}
