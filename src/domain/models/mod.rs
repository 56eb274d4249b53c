//! Domain models for the convergence engine.

pub mod budget;
pub mod checkpoint;
pub mod config;
pub mod evidence;
pub mod fix;
pub mod issue;
pub mod loop_state;
pub mod methodology;
pub mod pass_record;
pub mod session;
pub mod wave;

pub use budget::ResourceBudget;
pub use checkpoint::{Checkpoint, CheckpointReason};
pub use config::{
    CustomMode, DatabaseConfig, EngineConfig, LoggingConfig, ModePreset, PriorityCoverageScope,
    QuickMode, RateLimitStrategy, SelectionWeighting, StandardMode, ThoroughMode,
};
pub use evidence::{CleanClaim, EvidenceItem, MethodologyReport, PassContext, SubjectSnapshot};
pub use fix::{FixOutcome, FixStatus, FixStrategy, FixTask};
pub use issue::{Antipattern, Issue, IssueStatus, ResourceId, Severity};
pub use loop_state::{AttemptOutcome, LoopBreakerSnapshot, LoopEntry, LoopVerdict};
pub use methodology::{Methodology, MethodologyPool, Tier};
pub use pass_record::{NonCleanCause, PassOutcome, PassRecord, SessionEvent, SessionLogEntry};
pub use session::{ConvergenceSession, FailureReason, LogSlot, SessionStatus};
pub use wave::{ConflictPhase, ExecutionWave, ResourceConflict, TaskRef};
