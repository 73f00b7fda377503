//! Harness — the cross-cutting request-processing primitives every route
//! sits behind: bearer authentication, the sliding-window rate limiter,
//! the API-key store, and graceful shutdown coordination.

pub mod api_keys;
pub mod auth;
pub mod rate_limiter;
pub mod shutdown;
