//! Core library for the fleet control plane — shared error taxonomy, atomic
//! file I/O, and the two generic durable-storage primitives (whole-document
//! map store, append-only log store) that every feature store builds on.

pub mod atomic_io;
pub mod error;
pub mod ids;
pub mod log_store;
pub mod map_store;
pub mod types;

pub use error::{CoreError, CoreResult};
