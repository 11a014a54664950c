//! Shared utilities

pub mod auth_cache;
pub mod error;
pub mod logging;
