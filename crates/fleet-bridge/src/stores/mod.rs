//! Feature stores — each one is a `fleet_core::map_store::MapStore` or
//! `fleet_core::log_store::LogStore` instance plus the schema/validation
//! rules and workflow operations specific to that feature.

pub mod board;
pub mod commits;
pub mod config;
pub mod feed;
pub mod journal_log;
pub mod registry;
pub mod reports;
pub mod skills;
