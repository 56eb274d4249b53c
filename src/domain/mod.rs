//! Domain layer for the convergence engine
//!
//! This module contains the session state machine's data, the port traits for
//! external collaborators, and the error type.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{EngineError, EngineResult, StepError};
