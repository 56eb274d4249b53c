//! In-memory persistence adapters for tests and embedded use.

pub mod checkpoint_repository;
pub mod session_log;

pub use checkpoint_repository::InMemoryCheckpointRepository;
pub use session_log::InMemorySessionLog;
