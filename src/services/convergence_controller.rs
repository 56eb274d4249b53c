//! Convergence controller.
//!
//! Top-level state machine for a review session:
//!
//! ```text
//! running --clean pass--------------------> running (streak + 1)
//! running --issues------------------------> running (streak reset, fixes run)
//! running --streak == required------------> converged
//! running --max iterations / abandonment--> failed
//! running --budget checkpoint (suspend)---> suspended --resume--> running
//! ```
//!
//! Each [`ConvergenceController::step`] consumes the session value and
//! returns the next one; a step that fails hands the session back inside a
//! [`StepError`]. Workers inside a wave only ever see a snapshot of the
//! subject and an immutable [`PassContext`]; the controller applies their
//! results between waves, in completion order.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::memory::{InMemoryCheckpointRepository, InMemorySessionLog};
use crate::domain::errors::{EngineError, EngineResult, StepError, StepResult};
use crate::domain::models::{
    Antipattern, AttemptOutcome, Checkpoint, CheckpointReason, CleanClaim, ConvergenceSession, EngineConfig,
    EvidenceItem, ExecutionWave, FailureReason, FixTask, Issue, IssueStatus, LoopVerdict, Methodology,
    MethodologyPool, MethodologyReport, NonCleanCause, PassContext, PassRecord, ResourceConflict, SessionEvent,
    SessionStatus, SubjectSnapshot, TaskRef,
};
use crate::domain::ports::{
    CheckpointRepository, EvidenceVerifier, FixExecutor, FixStrategyAdvisor, GenericAlternativeAdvisor,
    MethodologyExecutor, NullPatternStore, PatternStore, RequireAnyEvidence, SessionLogRepository, Subject,
};
use crate::services::budget_monitor::BudgetMonitor;
use crate::services::dependency_scheduler::{DependencyScheduler, TaskNode, TaskOutcome};
use crate::services::fix_coordinator::{FixCoordinator, FixSchedule};
use crate::services::issue_registry::IssueRegistry;
use crate::services::loop_breaker::LoopBreaker;
use crate::services::methodology_pool::PoolManager;

/// Result of one controller step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Passes recorded during this step, in completion order.
    pub passes: Vec<PassRecord>,
    /// Checkpoints written during this step.
    pub checkpoints: Vec<Uuid>,
    pub session: ConvergenceSession,
}

/// Terminal (or suspended) summary handed back to the caller.
#[derive(Debug, Clone)]
pub struct ConvergenceReport {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub failure_reason: Option<FailureReason>,
    pub iterations: u32,
    pub history: Vec<PassRecord>,
    pub events: Vec<SessionEvent>,
    pub conflict_log: Vec<ResourceConflict>,
    pub abandoned_issues: Vec<Issue>,
    pub open_issues: Vec<Issue>,
    pub unverified_issues: Vec<Issue>,
    pub checkpoints_written: Vec<Uuid>,
}

impl ConvergenceReport {
    pub fn converged(&self) -> bool {
        self.status == SessionStatus::Converged
    }
}

/// Work of the current selection not yet dispatched.
#[derive(Debug, Clone, Default)]
struct PendingWork {
    methodology_waves: Vec<Vec<String>>,
    fix_tasks: Vec<FixTask>,
    fix_waves: Vec<ExecutionWave>,
}

impl PendingWork {
    fn from_checkpoint(waves: &[ExecutionWave], fix_tasks: Vec<FixTask>) -> Self {
        let methodology_waves = waves
            .iter()
            .map(ExecutionWave::methodology_names)
            .filter(|names| !names.is_empty())
            .collect();
        let fix_waves = waves
            .iter()
            .filter(|w| !w.fix_ids().is_empty())
            .cloned()
            .collect();
        Self {
            methodology_waves,
            fix_tasks,
            fix_waves,
        }
    }

    fn is_empty(&self) -> bool {
        self.methodology_waves.is_empty() && self.fix_tasks.is_empty() && self.fix_waves.is_empty()
    }

    /// Remaining work as checkpointable waves plus the fix tasks they name.
    fn to_checkpoint(&self) -> (Vec<ExecutionWave>, Vec<FixTask>) {
        let mut waves: Vec<ExecutionWave> = self
            .methodology_waves
            .iter()
            .map(|names| names.iter().cloned().map(TaskRef::Methodology).collect::<Vec<TaskRef>>())
            .chain(self.fix_waves.iter().map(|w| w.tasks.clone()))
            .enumerate()
            .map(|(index, tasks)| ExecutionWave::new(index, tasks))
            .collect();
        waves.retain(|w| !w.is_empty());

        let fix_tasks = if self.fix_waves.is_empty() {
            self.fix_tasks.clone()
        } else {
            let pending: BTreeSet<Uuid> = self.fix_waves.iter().flat_map(ExecutionWave::fix_ids).collect();
            self.fix_tasks
                .iter()
                .filter(|t| pending.contains(&t.id))
                .cloned()
                .collect()
        };
        (waves, fix_tasks)
    }
}

/// Outcome of judging one methodology report.
enum Judgement {
    Clean,
    NotClean(NonCleanCause),
}

pub struct ConvergenceController {
    config: EngineConfig,
    subject: Arc<dyn Subject>,
    methodology_executor: Arc<dyn MethodologyExecutor>,
    fix_executor: Arc<dyn FixExecutor>,
    verifier: Arc<dyn EvidenceVerifier>,
    pattern_store: Arc<dyn PatternStore>,
    checkpoints: Arc<dyn CheckpointRepository>,
    session_log: Arc<dyn SessionLogRepository>,
    pool_manager: PoolManager,
    scheduler: DependencyScheduler,
    fix_coordinator: FixCoordinator,
    loop_breaker: LoopBreaker,
    budget: BudgetMonitor,
    registry: IssueRegistry,
    pending: Option<PendingWork>,
    carried_evidence: Vec<EvidenceItem>,
    checkpoints_written: Vec<Uuid>,
    /// Session and journal position already appended to the session log.
    flushed: Option<(Uuid, usize)>,
}

impl ConvergenceController {
    pub fn new(
        config: EngineConfig,
        subject: Arc<dyn Subject>,
        methodology_executor: Arc<dyn MethodologyExecutor>,
        fix_executor: Arc<dyn FixExecutor>,
    ) -> Self {
        let fix_coordinator = FixCoordinator::new(
            fix_executor.clone(),
            Arc::new(GenericAlternativeAdvisor),
            config.max_concurrent,
        );
        Self {
            pool_manager: PoolManager::from_engine_config(&config),
            scheduler: DependencyScheduler::from_engine_config(&config),
            loop_breaker: LoopBreaker::from_engine_config(&config),
            budget: BudgetMonitor::from_engine_config(&config),
            fix_coordinator,
            config,
            subject,
            methodology_executor,
            fix_executor,
            verifier: Arc::new(RequireAnyEvidence),
            pattern_store: Arc::new(NullPatternStore),
            checkpoints: Arc::new(InMemoryCheckpointRepository::new()),
            session_log: Arc::new(InMemorySessionLog::new()),
            registry: IssueRegistry::new(),
            pending: None,
            carried_evidence: Vec::new(),
            checkpoints_written: Vec::new(),
            flushed: None,
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn EvidenceVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_pattern_store(mut self, store: Arc<dyn PatternStore>) -> Self {
        self.pattern_store = store;
        self
    }

    pub fn with_fix_advisor(mut self, advisor: Arc<dyn FixStrategyAdvisor>) -> Self {
        self.fix_coordinator = FixCoordinator::new(self.fix_executor.clone(), advisor, self.config.max_concurrent);
        self
    }

    pub fn with_checkpoint_repository(mut self, repository: Arc<dyn CheckpointRepository>) -> Self {
        self.checkpoints = repository;
        self
    }

    pub fn with_session_log(mut self, log: Arc<dyn SessionLogRepository>) -> Self {
        self.session_log = log;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn budget(&self) -> &BudgetMonitor {
        &self.budget
    }

    pub fn issues(&self) -> &IssueRegistry {
        &self.registry
    }

    pub fn loop_breaker(&self) -> &LoopBreaker {
        &self.loop_breaker
    }

    /// A fresh session over the configured mode's methodology pool.
    pub fn new_session(&self) -> EngineResult<ConvergenceSession> {
        let pool = self.config.mode.default_pool()?;
        Ok(self.session_with_pool(pool))
    }

    pub fn session_with_pool(&self, pool: MethodologyPool) -> ConvergenceSession {
        let session = ConvergenceSession::new(
            self.subject.id(),
            pool,
            self.config.required_clean_passes,
            self.config.max_iterations,
        );
        info!(
            session_id = %session.id,
            subject = %session.subject_id,
            mode = self.config.mode.name(),
            pool = session.pool.len(),
            required = session.required_clean_passes,
            "convergence session created"
        );
        session
    }

    /// Run steps until the session converges, fails or is suspended.
    pub async fn run(&mut self, session: ConvergenceSession) -> StepResult<ConvergenceReport> {
        let mut session = session;
        while session.status == SessionStatus::Running {
            session = self.step(session).await?.session;
        }
        info!(
            session_id = %session.id,
            status = %session.status,
            iterations = session.iterations(),
            "convergence run finished"
        );
        Ok(self.report(&session))
    }

    /// Advance by exactly one selection: its methodology waves, then the fix
    /// waves for whatever they reported. While fixes from earlier steps are
    /// still outstanding, the step retries those instead of selecting.
    ///
    /// On error the session comes back inside the [`StepError`] with every
    /// pass recorded so far; stepping it again continues where it stopped.
    pub async fn step(&mut self, session: ConvergenceSession) -> StepResult<StepOutcome> {
        if session.status != SessionStatus::Running {
            return Ok(StepOutcome {
                passes: Vec::new(),
                checkpoints: Vec::new(),
                session,
            });
        }

        let history_mark = session.history.len();
        let checkpoint_mark = self.checkpoints_written.len();

        let session = self.advance(session).await?;
        if let Err(e) = self.flush_log(&session).await {
            return Err(StepError::new(session, e));
        }

        Ok(StepOutcome {
            passes: session.history[history_mark..].to_vec(),
            checkpoints: self.checkpoints_written[checkpoint_mark..].to_vec(),
            session,
        })
    }

    /// Resume a suspended session from a stored checkpoint.
    pub async fn resume(&mut self, checkpoint_id: Uuid) -> EngineResult<ConvergenceSession> {
        let checkpoint = self
            .checkpoints
            .get(checkpoint_id)
            .await?
            .ok_or(EngineError::CheckpointNotFound(checkpoint_id))?;
        self.restore(checkpoint)
    }

    /// Resume from the most recent checkpoint of `session_id`.
    pub async fn resume_latest(&mut self, session_id: Uuid) -> EngineResult<ConvergenceSession> {
        let checkpoint = self
            .checkpoints
            .latest_for_session(session_id)
            .await?
            .ok_or(EngineError::CheckpointNotFound(session_id))?;
        self.restore(checkpoint)
    }

    pub fn report(&self, session: &ConvergenceSession) -> ConvergenceReport {
        let conflict_log = session
            .events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::ResourceConflict(conflict) => Some(conflict.clone()),
                _ => None,
            })
            .collect();
        ConvergenceReport {
            session_id: session.id,
            status: session.status,
            failure_reason: session.failure_reason.clone(),
            iterations: session.iterations(),
            history: session.history.clone(),
            events: session.events.clone(),
            conflict_log,
            abandoned_issues: self.registry.with_status(IssueStatus::Abandoned),
            open_issues: self.registry.with_status(IssueStatus::Open),
            unverified_issues: self.registry.with_status(IssueStatus::Unverified),
            checkpoints_written: self.checkpoints_written.clone(),
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) -> EngineResult<ConvergenceSession> {
        let logged = checkpoint.session.log_len();
        let session = match checkpoint.session.status {
            SessionStatus::Suspended => checkpoint.session.transition(SessionStatus::Running)?,
            SessionStatus::Running => checkpoint.session,
            other => {
                return Err(EngineError::InvalidStateTransition {
                    from: other.to_string(),
                    to: SessionStatus::Running.to_string(),
                })
            }
        };

        self.registry = IssueRegistry::restore(checkpoint.issues);
        self.loop_breaker = LoopBreaker::restore(&checkpoint.loop_breaker);
        self.budget = BudgetMonitor::from_budget(&checkpoint.budget);
        self.budget.reset_segment();
        self.carried_evidence = checkpoint.carried_evidence;
        self.flushed = Some((session.id, logged));

        let pending = PendingWork::from_checkpoint(&checkpoint.pending_waves, checkpoint.pending_fix_tasks);
        info!(
            session_id = %session.id,
            checkpoint_id = %checkpoint.id,
            pending_methodology_waves = pending.methodology_waves.len(),
            pending_fix_waves = pending.fix_waves.len(),
            "session resumed from checkpoint"
        );
        self.pending = (!pending.is_empty()).then_some(pending);
        Ok(session)
    }

    async fn advance(&mut self, session: ConvergenceSession) -> StepResult<ConvergenceSession> {
        let mut session = session;

        if session.remaining_iterations() == 0 {
            let iterations = session.iterations();
            return self.finish_failed(session, FailureReason::MaxIterations { iterations }).await;
        }

        let mut work = match self.pending.take() {
            Some(work) if !work.is_empty() => work,
            _ => {
                let outstanding = self
                    .fix_coordinator
                    .build_fix_tasks(&self.registry.with_status(IssueStatus::Open));
                if outstanding.is_empty() {
                    let (next, selection) = self.pool_manager.select_next(session);
                    session = next;
                    let nodes: Vec<TaskNode> = selection.candidates.iter().map(TaskNode::for_methodology).collect();
                    let waves = match self.scheduler.plan(&nodes) {
                        Ok(waves) => waves,
                        Err(e) => return Err(StepError::new(session, e)),
                    };
                    PendingWork {
                        methodology_waves: waves.iter().map(ExecutionWave::methodology_names).collect(),
                        ..PendingWork::default()
                    }
                } else {
                    debug!(
                        session_id = %session.id,
                        fixes = outstanding.len(),
                        "retrying outstanding fixes before selecting methodologies"
                    );
                    PendingWork {
                        fix_tasks: outstanding,
                        ..PendingWork::default()
                    }
                }
            }
        };

        let result = self.drive(session, &mut work).await;
        if result.is_err() && !work.is_empty() {
            self.pending = Some(work);
        }
        result
    }

    /// Dispatch the waves of `work` until it is drained or the budget
    /// suspends the session. Waves are taken off `work` only once dispatched.
    async fn drive(&mut self, session: ConvergenceSession, work: &mut PendingWork) -> StepResult<ConvergenceSession> {
        let mut session = session;

        while let Some(names) = work.methodology_waves.first().cloned() {
            let (next, suspended) = self.budget_gate(session, work).await?;
            session = next;
            if suspended {
                return Ok(session);
            }

            let (next, issues_found) = self.run_methodology_wave(session, names, work).await?;
            session = next;
            work.methodology_waves.remove(0);

            if issues_found && !work.methodology_waves.is_empty() {
                debug!(
                    session_id = %session.id,
                    dropped = work.methodology_waves.len(),
                    "streak reset, dropping remaining methodology waves"
                );
                work.methodology_waves.clear();
            }
        }

        if !work.fix_tasks.is_empty() && work.fix_waves.is_empty() {
            let tasks = std::mem::take(&mut work.fix_tasks);
            let (tasks, events) = self
                .fix_coordinator
                .prepare(tasks, &mut self.registry, &mut self.loop_breaker)
                .await;
            let schedule = self.fix_coordinator.schedule(&tasks);
            session = events
                .into_iter()
                .chain(schedule.conflicts.into_iter().map(SessionEvent::ResourceConflict))
                .fold(session, ConvergenceSession::with_event);
            work.fix_tasks = tasks;
            work.fix_waves = schedule.waves;
        }

        while let Some(wave) = work.fix_waves.first().cloned() {
            let (next, suspended) = self.budget_gate(session, work).await?;
            session = next;
            if suspended {
                return Ok(session);
            }

            work.fix_waves.remove(0);
            let tasks = FixSchedule::wave_tasks(&wave, &work.fix_tasks);
            debug!(session_id = %session.id, wave = wave.index, fixes = tasks.len(), "dispatching fix wave");
            let report = self
                .fix_coordinator
                .run_wave(&self.scheduler, tasks, &mut self.registry, &mut self.loop_breaker)
                .await;
            self.budget.record(report.attempts);
            session = report.events.into_iter().fold(session, ConvergenceSession::with_event);
        }
        work.fix_tasks.clear();

        self.settle(session).await
    }

    /// Apply session-level terminal conditions after a step.
    async fn settle(&mut self, session: ConvergenceSession) -> StepResult<ConvergenceSession> {
        if session.status != SessionStatus::Running {
            return Ok(session);
        }

        let abandoned = self.registry.abandoned_ids();
        if !abandoned.is_empty() {
            return self
                .finish_failed(session, FailureReason::IssuesAbandoned { issue_ids: abandoned })
                .await;
        }

        if session.remaining_iterations() == 0 && !session.is_converged() {
            let iterations = session.iterations();
            return self.finish_failed(session, FailureReason::MaxIterations { iterations }).await;
        }

        Ok(session)
    }

    async fn run_methodology_wave(
        &mut self,
        session: ConvergenceSession,
        names: Vec<String>,
        work: &mut PendingWork,
    ) -> StepResult<(ConvergenceSession, bool)> {
        let mut session = session;
        let methodologies: Vec<Methodology> = names.iter().filter_map(|n| session.pool.get(n).cloned()).collect();
        if methodologies.is_empty() {
            return Ok((session, false));
        }

        let snapshot = match self.subject.snapshot().await {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => return Err(StepError::new(session, e)),
        };
        let carried = if self.config.mode.clears_context() {
            Vec::new()
        } else {
            self.carried_evidence.clone()
        };
        let context = Arc::new(PassContext {
            iteration: session.next_iteration(),
            history: Arc::new(session.history.clone()),
            carried_evidence: Arc::new(carried),
        });

        debug!(
            session_id = %session.id,
            iteration = context.iteration,
            methodologies = ?names,
            revision = snapshot.revision,
            "dispatching methodology wave"
        );

        let executor = self.methodology_executor.clone();
        let (wave_snapshot, wave_context) = (snapshot.clone(), context.clone());
        let results = self
            .scheduler
            .run_wave(methodologies, move |methodology: Methodology| {
                let executor = executor.clone();
                let snapshot = wave_snapshot.clone();
                let context = wave_context.clone();
                async move { executor.execute(&snapshot, &methodology, &context).await }
            })
            .await;

        let mut issues_found = false;
        for result in results {
            let methodology = result.key;
            let iteration = session.next_iteration();

            let (report, judgement) = match result.outcome {
                TaskOutcome::Completed { value, attempts } => {
                    let units = if value.units_consumed > 0 {
                        value.units_consumed
                    } else {
                        u64::from(attempts)
                    };
                    self.budget.record(units);
                    let judgement = self.judge(&methodology, iteration, &snapshot, &value).await;
                    (value, judgement)
                }
                TaskOutcome::SyntheticFailure { error, attempts } => {
                    warn!(
                        session_id = %session.id,
                        iteration,
                        methodology = %methodology.name,
                        attempts,
                        error = %error,
                        "methodology pass failed, recording as non-clean"
                    );
                    self.budget.record(u64::from(attempts));
                    (MethodologyReport::default(), Judgement::NotClean(NonCleanCause::ExecutorFailure))
                }
            };

            if !self.config.mode.clears_context() {
                self.carried_evidence.extend(report.evidence.iter().cloned());
            }
            let evidence_ref = report.evidence_summary();

            match judgement {
                Judgement::Clean => {
                    info!(
                        session_id = %session.id,
                        iteration,
                        methodology = %methodology.name,
                        streak = session.consecutive_clean + 1,
                        "clean pass"
                    );
                    session = session.with_clean_pass(PassRecord::clean(iteration, &methodology.name, evidence_ref));
                    for issue_id in self.registry.confirm_fixed(&methodology.name) {
                        self.loop_breaker.record_attempt(issue_id, AttemptOutcome::Success);
                        session = session.with_event(SessionEvent::IssueFixed { issue_id });
                    }
                }
                Judgement::NotClean(cause) => {
                    issues_found = true;
                    info!(
                        session_id = %session.id,
                        iteration,
                        methodology = %methodology.name,
                        issues = report.issues.len(),
                        cause = ?cause,
                        lost_streak = session.consecutive_clean,
                        "non-clean pass, streak reset"
                    );
                    if cause == NonCleanCause::VerificationRejected {
                        session = session.with_event(SessionEvent::VerificationDowngraded {
                            iteration,
                            methodology: methodology.name.clone(),
                        });
                    }
                    session = session.with_issue_pass(PassRecord::with_issues(
                        iteration,
                        &methodology.name,
                        report.issues.len(),
                        cause,
                        evidence_ref,
                    ));
                    if !report.issues.is_empty() {
                        session = self.register_issues(session, &methodology.name, report.issues, work);
                    }
                }
            }
        }

        Ok((session, issues_found))
    }

    async fn judge(
        &self,
        methodology: &Methodology,
        iteration: u32,
        snapshot: &SubjectSnapshot,
        report: &MethodologyReport,
    ) -> Judgement {
        if !report.issues.is_empty() {
            return Judgement::NotClean(NonCleanCause::Reported);
        }
        if !report.clean_claimed {
            return Judgement::NotClean(NonCleanCause::Unclaimed);
        }
        let claim = CleanClaim {
            methodology: methodology.name.clone(),
            iteration,
            subject_revision: snapshot.revision,
        };
        if self.verifier.verify(&claim, &report.evidence).await {
            Judgement::Clean
        } else {
            warn!(
                iteration,
                methodology = %methodology.name,
                evidence = report.evidence.len(),
                "clean claim rejected by evidence verifier"
            );
            Judgement::NotClean(NonCleanCause::VerificationRejected)
        }
    }

    /// Ingest reported issues, count regressions against the loop breaker,
    /// queue fix tasks and hand antipatterns to the pattern store.
    fn register_issues(
        &mut self,
        session: ConvergenceSession,
        methodology: &str,
        issues: Vec<Issue>,
        work: &mut PendingWork,
    ) -> ConvergenceSession {
        let mut session = session;
        let ingested = self.registry.ingest(methodology, issues);

        for issue_id in &ingested.regressions {
            self.registry.record_attempt(*issue_id);
            let verdict = self.loop_breaker.record_attempt(*issue_id, AttemptOutcome::Failure);
            debug!(issue_id = %issue_id, verdict = ?verdict, "issue reported again after fix");
            if verdict == LoopVerdict::Abandoned {
                self.registry.set_status(*issue_id, IssueStatus::Abandoned);
                let attempts = self.registry.get(*issue_id).map_or(0, |i| i.fix_attempts);
                session = session.with_event(SessionEvent::IssueAbandoned {
                    issue_id: *issue_id,
                    attempts,
                });
            }
        }

        let queued: BTreeSet<Uuid> = work.fix_tasks.iter().map(|t| t.issue_id).collect();
        let reported: Vec<Issue> = ingested
            .needs_fix
            .iter()
            .filter(|id| !queued.contains(*id))
            .filter_map(|id| self.registry.get(*id).cloned())
            .collect();
        work.fix_tasks.extend(self.fix_coordinator.build_fix_tasks(&reported));

        self.record_patterns(&reported);
        session
    }

    /// Fire-and-forget hand-off to the pattern store.
    fn record_patterns(&self, issues: &[Issue]) {
        if issues.is_empty() {
            return;
        }
        let antipatterns: Vec<Antipattern> = issues.iter().map(Antipattern::from).collect();
        let prevention: Vec<String> = issues
            .iter()
            .filter(|i| !i.target_resources.is_empty())
            .map(|i| {
                let resources: Vec<&str> = i.target_resources.iter().map(String::as_str).collect();
                format!("run {} on changes to {}", i.methodology, resources.join(", "))
            })
            .collect();

        let store = self.pattern_store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.record(antipatterns, prevention).await {
                warn!(error = %e, "pattern store rejected antipatterns");
            }
        });
    }

    /// Checkpoint when the budget says so. Returns `true` when the session
    /// was suspended and nothing more may be dispatched.
    async fn budget_gate(
        &mut self,
        session: ConvergenceSession,
        work: &PendingWork,
    ) -> StepResult<(ConvergenceSession, bool)> {
        if !self.budget.should_checkpoint() {
            return Ok((session, false));
        }

        let exhausted = self.budget.is_exhausted();
        let reason = if exhausted {
            CheckpointReason::BudgetExhausted
        } else {
            CheckpointReason::ThresholdCrossed
        };

        if exhausted || self.config.suspend_on_checkpoint {
            let suspended = match session.clone().transition(SessionStatus::Suspended) {
                Ok(suspended) => suspended,
                Err(e) => return Err(StepError::new(session, e)),
            };
            // Stay running until the checkpoint is durable.
            let event = match self.write_checkpoint(&suspended, reason, Some(work)).await {
                Ok(event) => event,
                Err(e) => return Err(StepError::new(session, e)),
            };
            let session = suspended.with_event(event);
            info!(
                session_id = %session.id,
                reason = reason.as_str(),
                consumed = self.budget.snapshot().consumed,
                "session suspended"
            );
            return Ok((session, true));
        }

        match self.write_checkpoint(&session, reason, Some(work)).await {
            Ok(event) => {
                self.budget.reset_segment();
                Ok((session.with_event(event), false))
            }
            Err(e) => Err(StepError::new(session, e)),
        }
    }

    /// Persist a checkpoint of `session`. Returns the event to record.
    async fn write_checkpoint(
        &mut self,
        session: &ConvergenceSession,
        reason: CheckpointReason,
        work: Option<&PendingWork>,
    ) -> EngineResult<SessionEvent> {
        let (waves, fix_tasks) = work.map(PendingWork::to_checkpoint).unwrap_or_default();
        let checkpoint = Checkpoint::new(
            reason,
            session.clone(),
            self.registry.all(),
            waves,
            self.budget.snapshot(),
            self.loop_breaker.snapshot(),
        )
        .with_pending_fix_tasks(fix_tasks)
        .with_carried_evidence(self.carried_evidence.clone());

        self.checkpoints.save(&checkpoint).await?;
        self.checkpoints_written.push(checkpoint.id);
        info!(
            session_id = %session.id,
            checkpoint_id = %checkpoint.id,
            reason = reason.as_str(),
            pending_waves = checkpoint.pending_waves.len(),
            "checkpoint written"
        );

        Ok(SessionEvent::CheckpointWritten {
            checkpoint_id: checkpoint.id,
            consumed_units: checkpoint.budget.consumed,
        })
    }

    async fn finish_failed(
        &mut self,
        session: ConvergenceSession,
        reason: FailureReason,
    ) -> StepResult<ConvergenceSession> {
        warn!(session_id = %session.id, reason = ?reason, iterations = session.iterations(), "session failed");
        let failed = match session.clone().fail(reason) {
            Ok(failed) => failed,
            Err(e) => return Err(StepError::new(session, e)),
        };
        match self.write_checkpoint(&failed, CheckpointReason::Terminal, None).await {
            Ok(event) => Ok(failed.with_event(event)),
            Err(e) => Err(StepError::new(session, e)),
        }
    }

    /// Append every journal entry not yet in the session log, in the order
    /// it happened. Stops at the first failed append; the next flush resumes
    /// from there.
    async fn flush_log(&mut self, session: &ConvergenceSession) -> EngineResult<()> {
        let mut mark = match self.flushed {
            Some((id, mark)) if id == session.id => mark,
            _ => 0,
        };
        for entry in session.log_entries_from(mark) {
            self.session_log.append(session.id, &entry).await?;
            mark += 1;
            self.flushed = Some((session.id, mark));
        }
        Ok(())
    }
}
