//! Infrastructure layer module
//!
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)
//!
//! Persistence adapters live under [`crate::adapters`].

pub mod config;
pub mod logging;
