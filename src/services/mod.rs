//! Engine services.
//!
//! Each service owns one concern of a convergence session; the
//! [`ConvergenceController`] composes them.

pub mod budget_monitor;
pub mod convergence_controller;
pub mod dependency_scheduler;
pub mod fix_coordinator;
pub mod issue_registry;
pub mod loop_breaker;
pub mod methodology_pool;
pub mod retry_policy;

pub use budget_monitor::BudgetMonitor;
pub use convergence_controller::{ConvergenceController, ConvergenceReport, StepOutcome};
pub use dependency_scheduler::{DependencyScheduler, SchedulerConfig, TaskNode, TaskOutcome, WaveResult};
pub use fix_coordinator::{FixCoordinator, FixRunReport, FixSchedule};
pub use issue_registry::{Ingested, IssueRegistry};
pub use loop_breaker::LoopBreaker;
pub use methodology_pool::{PoolManager, Selection};
pub use retry_policy::RetryPolicy;
