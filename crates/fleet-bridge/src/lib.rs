//! Bridge layer — the HTTP surface of the fleet control plane.
//!
//! Wires the durable stores in [`stores`] and [`usage`] to Axum routes,
//! fronted by the authentication and rate-limit middleware from
//! `fleet_harness`, coordinated by the [`loader`] service registry, and
//! fanned out over [`event_bus`] to SSE subscribers via [`sse`].

pub mod api_error;
pub mod event_bus;
pub mod http_api;
pub mod ingress;
pub mod loader;
pub mod rate_limit_middleware;
pub mod sse;
pub mod state;
pub mod stores;
pub mod usage;
