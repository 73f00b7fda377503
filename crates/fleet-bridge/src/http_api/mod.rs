//! Assembles every feature family into one [`ServiceLoader`] registry and
//! mounts it behind the auth and rate-limit middleware layers.

pub mod auth_keys;
pub mod board;
pub mod commits;
pub mod config;
pub mod feed;
pub mod registry;
pub mod reports;
pub mod skills;
pub mod text;
pub mod ui;
pub mod usage;

use std::sync::Arc;

use axum::{routing::post, Router};

use crate::ingress::twilio::{handle_webhook, TwilioIngress};
use crate::loader::{AuthLayerFactory, Bundle, LoaderError, UiManifest};
use crate::state::AppState;

/// Registers every feature bundle and mounts the whole surface, returning
/// the router alongside the UI manifest computed just before the
/// bundle list is consumed.
pub async fn build(state: AppState, auth: Arc<AuthLayerFactory>, twilio: Option<TwilioIngress>) -> Result<(Router, Arc<UiManifest>), LoaderError> {
    let mut loader = crate::loader::ServiceLoader::new();

    loader.register(Bundle::new("board", "Task board", "/board", board::router(state.clone())).with_ui(serde_json::json!({"icon": "board"})));
    loader.register(Bundle::new("feed", "Agent activity feed", "/feed", feed::router(state.clone())).with_ui(serde_json::json!({"icon": "feed"})));
    loader.register(Bundle::new("registry", "VM registry", "/registry", registry::router(state.clone())).with_ui(serde_json::json!({"icon": "server"})));
    loader.register(Bundle::new("reports", "Authored reports", "/reports", reports::router(state.clone())).with_ui(serde_json::json!({"icon": "file-text"})));
    loader.register(Bundle::new("reports-share", "Public report sharing", "/reports", reports::public_router(state.clone())).without_auth());
    loader.register(Bundle::new("skills", "Skill and extension hub", "/skills", skills::router(state.clone())).with_ui(serde_json::json!({"icon": "package"})));
    loader.register(Bundle::new("journal", "Journal", "/journal", text::journal_router(state.clone())).with_ui(serde_json::json!({"icon": "book"})));
    loader.register(Bundle::new("log", "Log", "/log", text::log_router(state.clone())).with_ui(serde_json::json!({"icon": "list"})));
    loader.register(Bundle::new("commits", "Commit ledger", "/commits", commits::router(state.clone())).with_ui(serde_json::json!({"icon": "git-commit"})));
    loader.register(Bundle::new("config", "Configuration", "/config", config::router(state.clone())).with_ui(serde_json::json!({"icon": "settings"})));
    loader.register(Bundle::new("usage", "Usage analytics", "/usage", usage::router(state.clone())).with_ui(serde_json::json!({"icon": "bar-chart"})));
    loader.register(Bundle::new("auth-keys", "API keys", "/auth/keys", auth_keys::router(state.api_keys.clone())).with_ui(serde_json::json!({"icon": "key"})));

    if let Some(twilio) = twilio {
        let sms_router = Router::new().route("/sms", post(handle_webhook)).with_state(twilio);
        loader.register(Bundle::new("sms-ingress", "Inbound SMS webhook", "/ingress", sms_router).without_auth());
    }

    let manifest = Arc::new(loader.ui_manifest());
    let router = loader.mount(auth).await?;

    // `/ui/manifest` is served unauthenticated, outside the loader, since
    // it describes the mounted surface rather than being part of it.
    let router = router.merge(ui::router(manifest.clone()));

    Ok((router, manifest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::tempdir;
    use tower::ServiceExt;

    #[tokio::test]
    async fn build_mounts_every_family_behind_auth() {
        let dir = tempdir().unwrap();
        let state = AppState::open(&crate::state::DataLayout::new(dir.path())).await.unwrap();
        let auth = Arc::new(AuthLayerFactory::new(Some("t".into()), None));
        let (router, _manifest) = build(state, auth, None).await.unwrap();

        let req = Request::builder().uri("/board/tasks").header("Authorization", "Bearer t").body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);

        let req = Request::builder().uri("/ui/manifest").body(Body::empty()).unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
    }
}
