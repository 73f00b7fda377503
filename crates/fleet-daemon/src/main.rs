//! fleet-daemon — process entry point for the agent fleet control plane.
//!
//! Reads configuration from the environment, opens every durable store
//! under the data directory, mounts the feature bundles behind the auth
//! and rate-limit middleware, and serves until a shutdown signal arrives.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use fleet_bridge::ingress::twilio::TwilioIngress;
use fleet_bridge::loader::AuthLayerFactory;
use fleet_bridge::state::{AppState, DataLayout};
use fleet_harness::rate_limiter::{RateLimitConfig, RateLimiter};
use fleet_harness::shutdown::ShutdownSignal;
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod config;

#[tokio::main]
async fn main() -> Result<()> {
    fleet_telemetry::logging::init_logging("fleet-daemon", "info");

    let cfg = config::FleetConfig::from_env().context("failed to read configuration from environment")?;
    info!(host = %cfg.host, port = cfg.port, data_dir = %cfg.data_dir.display(), "fleet-daemon starting");

    std::fs::create_dir_all(&cfg.data_dir).with_context(|| format!("failed to create data directory {}", cfg.data_dir.display()))?;

    let layout = DataLayout::new(cfg.data_dir.clone());
    let state = AppState::open(&layout).await.context("failed to open durable stores")?;

    let auth = Arc::new(AuthLayerFactory::new(cfg.auth_token.clone(), Some(state.api_keys.clone())));

    let twilio = cfg.twilio_auth_token.clone().map(|token| TwilioIngress {
        auth_token: Some(Arc::new(token)),
        webhook_url: cfg.twilio_webhook_url.clone().unwrap_or_default(),
        allowed_numbers: cfg.twilio_allowed_numbers.clone(),
        journal: state.journal.clone(),
        log: state.log.clone(),
        board: state.board.clone(),
    });

    let (router, _manifest) = fleet_bridge::http_api::build(state.clone(), auth, twilio)
        .await
        .map_err(|e| anyhow::anyhow!("failed to mount service bundles: {e}"))?;

    let limiter = Arc::new(RateLimiter::new(RateLimitConfig::new(cfg.rate_limit_max_requests, cfg.rate_limit_window)));
    let rate_limit_layer = fleet_bridge::rate_limit_middleware::RateLimitLayer::new(limiter);
    let eviction_handle = rate_limit_layer.spawn_eviction();

    let router = router
        .layer(rate_limit_layer)
        .layer(axum::middleware::from_fn(fleet_telemetry::middleware::metrics_middleware))
        .layer(axum::middleware::from_fn(fleet_telemetry::tracing_setup::request_id_middleware));

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse().context("invalid host/port")?;
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    let shutdown = ShutdownSignal::new();
    let mut shutdown_rx = shutdown.subscribe();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            shutdown.trigger();
        }
    });

    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .context("server error")?;

    eviction_handle.abort();
    state.flush_all().await.context("failed to flush stores on shutdown")?;
    info!("fleet-daemon stopped");
    Ok(())
}
