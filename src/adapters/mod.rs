//! Adapters implementing the engine's ports.

pub mod memory;
pub mod scripted;
pub mod sqlite;
