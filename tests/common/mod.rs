//! Common test utilities for integration tests
//!
//! Shared fixtures for driving a [`ConvergenceController`] against the
//! scripted executors.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use convergent::adapters::scripted::{FixLedger, ScriptedFixExecutor, ScriptedMethodologyExecutor, StaticSubject};
use convergent::domain::models::{
    ConvergenceSession, EngineConfig, Methodology, MethodologyPool, PassRecord, RateLimitStrategy, SessionEvent,
};
use convergent::services::ConvergenceController;

/// Create a temporary test database
///
/// Returns the path to a SQLite database file in a temporary directory.
pub fn temp_db_path() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("sessions.db");
    (dir, db_path)
}

/// Setup test logging
///
/// Initializes a tracing subscriber writing through the test harness.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Engine config with fast retries and a fixed seed.
pub fn test_config(required: u32, max_iterations: u32) -> EngineConfig {
    EngineConfig {
        required_clean_passes: required,
        max_iterations,
        max_concurrent: 4,
        fan_out: 1,
        rate_limit_strategy: RateLimitStrategy::Fixed,
        max_retries: 1,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        task_timeout_secs: 5,
        rng_seed: Some(42),
        ..EngineConfig::default()
    }
}

/// Pool of plain methodologies named `m0..mN`; indices in `priority` are
/// flagged as priority.
pub fn numbered_pool(size: usize, priority: &[usize]) -> MethodologyPool {
    MethodologyPool::new(
        (0..size)
            .map(|i| {
                let m = Methodology::new(format!("m{i}"), "general");
                if priority.contains(&i) {
                    m.with_priority()
                } else {
                    m
                }
            })
            .collect(),
    )
    .expect("valid pool")
}

/// Scripted world shared between executors and the controller.
pub struct Harness {
    pub ledger: FixLedger,
    pub subject: Arc<StaticSubject>,
    pub checks: Arc<ScriptedMethodologyExecutor>,
    pub fixer: Arc<ScriptedFixExecutor>,
}

impl Harness {
    /// Every methodology passes clean; the fixer repairs everything.
    pub fn clean() -> Self {
        Self::with(|checks| checks, |fixer| fixer)
    }

    pub fn with(
        checks: impl FnOnce(ScriptedMethodologyExecutor) -> ScriptedMethodologyExecutor,
        fixer: impl FnOnce(ScriptedFixExecutor) -> ScriptedFixExecutor,
    ) -> Self {
        let ledger = FixLedger::new();
        let subject = Arc::new(StaticSubject::new("subject-under-review"));
        let checks = Arc::new(checks(ScriptedMethodologyExecutor::new(ledger.clone())));
        let fixer = Arc::new(fixer(ScriptedFixExecutor::new(ledger.clone()).with_subject(subject.clone())));
        Self {
            ledger,
            subject,
            checks,
            fixer,
        }
    }

    pub fn controller(&self, config: EngineConfig) -> ConvergenceController {
        ConvergenceController::new(config, self.subject.clone(), self.checks.clone(), self.fixer.clone())
    }
}

/// The last `n` pass records.
pub fn tail(session: &ConvergenceSession, n: usize) -> &[PassRecord] {
    let len = session.history.len();
    &session.history[len.saturating_sub(n)..]
}

pub fn pool_resets(events: &[SessionEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SessionEvent::PoolReset { .. }))
        .count()
}
