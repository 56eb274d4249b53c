//! Fix coordinator.
//!
//! Turns open issues into fix tasks, partitions them into conflict-free
//! waves, and runs each wave through the dependency scheduler. Two tasks
//! conflict iff their declared target resources intersect; such pairs never
//! share a wave. Conflicts the declarations missed are caught after the fact
//! from the executors' reported resource deltas: the later-completing fix is
//! marked conflicted and re-run alone once the wave finishes.

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::models::{
    AttemptOutcome, ConflictPhase, ExecutionWave, FixOutcome, FixStatus, FixStrategy, FixTask, Issue,
    IssueStatus, LoopVerdict, ResourceConflict, ResourceId, SessionEvent, TaskRef,
};
use crate::domain::ports::{FixExecutor, FixStrategyAdvisor};
use crate::services::dependency_scheduler::{DependencyScheduler, TaskOutcome, WaveResult};
use crate::services::issue_registry::IssueRegistry;
use crate::services::loop_breaker::LoopBreaker;

/// Conflict-aware partition of fix tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixSchedule {
    pub waves: Vec<ExecutionWave>,
    /// Pairs separated at schedule time.
    pub conflicts: Vec<ResourceConflict>,
}

impl FixSchedule {
    /// The tasks of `wave`, looked up in `tasks`.
    pub fn wave_tasks(wave: &ExecutionWave, tasks: &[FixTask]) -> Vec<FixTask> {
        wave.fix_ids()
            .into_iter()
            .filter_map(|id| tasks.iter().find(|t| t.id == id).cloned())
            .collect()
    }
}

/// What running fix waves did to the issues involved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixRunReport {
    /// Issues whose fix was applied (now unverified).
    pub applied: Vec<Uuid>,
    /// Issues whose fix attempt failed.
    pub failed: Vec<Uuid>,
    /// Issues abandoned by the loop breaker during this run.
    pub abandoned: Vec<Uuid>,
    /// Pivot, conflict and abandonment events, in occurrence order.
    pub events: Vec<SessionEvent>,
    /// Executor attempts made, retries included.
    pub attempts: u64,
}

impl FixRunReport {
    fn merge(&mut self, other: Self) {
        self.applied.extend(other.applied);
        self.failed.extend(other.failed);
        self.abandoned.extend(other.abandoned);
        self.events.extend(other.events);
        self.attempts += other.attempts;
    }
}

pub struct FixCoordinator {
    executor: Arc<dyn FixExecutor>,
    advisor: Arc<dyn FixStrategyAdvisor>,
    max_concurrent: usize,
}

impl FixCoordinator {
    pub fn new(executor: Arc<dyn FixExecutor>, advisor: Arc<dyn FixStrategyAdvisor>, max_concurrent: usize) -> Self {
        Self {
            executor,
            advisor,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// One task per issue that still needs a fix.
    pub fn build_fix_tasks(&self, issues: &[Issue]) -> Vec<FixTask> {
        issues
            .iter()
            .filter(|i| i.status.needs_fix())
            .map(FixTask::for_issue)
            .collect()
    }

    /// Swap in an alternative strategy for every task whose issue has an
    /// armed pivot, and drop tasks for abandoned issues.
    pub async fn prepare(
        &self,
        tasks: Vec<FixTask>,
        registry: &mut IssueRegistry,
        breaker: &mut LoopBreaker,
    ) -> (Vec<FixTask>, Vec<SessionEvent>) {
        let mut prepared = Vec::with_capacity(tasks.len());
        let mut events = Vec::new();

        for mut task in tasks {
            if breaker.is_abandoned(task.issue_id) {
                registry.set_status(task.issue_id, IssueStatus::Abandoned);
                continue;
            }
            let Some(pivot) = breaker.take_pivot(task.issue_id) else {
                prepared.push(task);
                continue;
            };
            let Some(issue) = registry.get(task.issue_id).cloned() else {
                continue;
            };

            let strategy = match self.advisor.alternative(&issue, pivot).await {
                Ok(strategy) => strategy,
                Err(e) => {
                    warn!(issue_id = %issue.id, pivot, error = %e, "fix strategy advisor failed, using generic pivot");
                    FixStrategy::Alternative {
                        pivot,
                        description: format!("pivot {pivot}"),
                    }
                }
            };
            info!(issue_id = %issue.id, pivot, strategy = strategy.describe(), "pivoting fix strategy");
            events.push(SessionEvent::Pivot {
                issue_id: issue.id,
                pivot,
                strategy: strategy.describe().to_string(),
            });
            registry.set_strategy(issue.id, strategy.clone());
            task.strategy = strategy;
            prepared.push(task);
        }

        (prepared, events)
    }

    /// Partition tasks into waves. Tasks are placed by severity (highest
    /// first) then discovery order, each into the earliest wave after every
    /// conflicting task that has room under the concurrency limit.
    pub fn schedule(&self, tasks: &[FixTask]) -> FixSchedule {
        let mut ordered: Vec<&FixTask> = tasks.iter().collect();
        ordered.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(a.discovery_seq.cmp(&b.discovery_seq))
                .then(a.id.cmp(&b.id))
        });

        let mut waves: Vec<Vec<&FixTask>> = Vec::new();
        let mut conflicts = Vec::new();

        for task in ordered {
            let mut earliest = 0;
            for (index, wave) in waves.iter().enumerate() {
                for placed in wave.iter().filter(|p| p.conflicts_with(task)) {
                    earliest = earliest.max(index + 1);
                    conflicts.push(ResourceConflict {
                        winner: placed.id,
                        deferred: task.id,
                        resources: overlap(&placed.target_resources, &task.target_resources),
                        phase: ConflictPhase::Schedule,
                        detected_at: Utc::now(),
                    });
                }
            }

            let slot = (earliest..)
                .find(|&i| waves.get(i).map_or(true, |w| w.len() < self.max_concurrent))
                .unwrap_or(waves.len());
            while waves.len() <= slot {
                waves.push(Vec::new());
            }
            waves[slot].push(task);
        }

        if !conflicts.is_empty() {
            debug!(conflicts = conflicts.len(), waves = waves.len(), "fix conflicts serialized");
        }

        FixSchedule {
            waves: waves
                .into_iter()
                .enumerate()
                .map(|(index, wave)| ExecutionWave::new(index, wave.iter().map(|t| TaskRef::Fix(t.id)).collect()))
                .collect(),
            conflicts,
        }
    }

    /// Apply one wave of fixes, then re-run any that raced, one at a time.
    pub async fn run_wave(
        &self,
        scheduler: &DependencyScheduler,
        tasks: Vec<FixTask>,
        registry: &mut IssueRegistry,
        breaker: &mut LoopBreaker,
    ) -> FixRunReport {
        let mut report = FixRunReport::default();

        let keyed: Vec<(FixTask, Issue)> = tasks
            .into_iter()
            .filter_map(|task| {
                let issue = registry.get(task.issue_id)?;
                issue.status.needs_fix().then(|| (task, issue.clone()))
            })
            .collect();
        if keyed.is_empty() {
            return report;
        }

        let results = self.dispatch(scheduler, keyed).await;

        let mut touched: Vec<(Uuid, BTreeSet<ResourceId>)> = Vec::new();
        let mut reruns: Vec<(FixTask, Issue)> = Vec::new();

        for result in results {
            let (task, issue) = result.key;
            report.attempts += u64::from(result.outcome.attempts());

            let outcome = match result.outcome {
                TaskOutcome::Completed { value, .. } => value,
                TaskOutcome::SyntheticFailure { error, attempts } => {
                    warn!(issue_id = %issue.id, attempts, error = %error, "fix attempt failed");
                    settle(&task, false, registry, breaker, &mut report);
                    continue;
                }
            };

            if outcome.applied {
                let raced = touched.iter().find_map(|(winner, delta)| {
                    let resources = overlap(delta, &outcome.resource_delta);
                    (!resources.is_empty()).then_some((*winner, resources))
                });
                if let Some((winner, resources)) = raced {
                    warn!(
                        fix_id = %task.id,
                        winner = %winner,
                        resources = ?resources,
                        "fixes raced on shared resources, re-running later fix serialized"
                    );
                    report.events.push(SessionEvent::ResourceConflict(ResourceConflict {
                        winner,
                        deferred: task.id,
                        resources,
                        phase: ConflictPhase::Race,
                        detected_at: Utc::now(),
                    }));
                    let task = FixTask {
                        status: FixStatus::Conflicted,
                        ..task
                    };
                    reruns.push((task, issue));
                    continue;
                }
                touched.push((task.id, outcome.resource_delta.clone()));
            }
            settle(&task, outcome.applied, registry, breaker, &mut report);
        }

        for (task, _) in reruns {
            let (prepared, events) = self.prepare(vec![task], registry, breaker).await;
            report.events.extend(events);
            let keyed: Vec<(FixTask, Issue)> = prepared
                .into_iter()
                .filter_map(|task| registry.get(task.issue_id).cloned().map(|issue| (task, issue)))
                .collect();
            let results = self.dispatch(scheduler, keyed).await;
            for result in results {
                let (task, _) = result.key;
                report.attempts += u64::from(result.outcome.attempts());
                let applied = matches!(&result.outcome, TaskOutcome::Completed { value, .. } if value.applied);
                settle(&task, applied, registry, breaker, &mut report);
            }
        }

        report
    }

    /// Prepare, schedule and run every wave for `tasks`.
    pub async fn run(
        &self,
        scheduler: &DependencyScheduler,
        tasks: Vec<FixTask>,
        registry: &mut IssueRegistry,
        breaker: &mut LoopBreaker,
    ) -> FixRunReport {
        let (tasks, events) = self.prepare(tasks, registry, breaker).await;
        let schedule = self.schedule(&tasks);

        let mut report = FixRunReport {
            events,
            ..FixRunReport::default()
        };
        report.events.extend(schedule.conflicts.iter().cloned().map(SessionEvent::ResourceConflict));

        for wave in &schedule.waves {
            let wave_tasks = FixSchedule::wave_tasks(wave, &tasks);
            report.merge(self.run_wave(scheduler, wave_tasks, registry, breaker).await);
        }
        report
    }

    async fn dispatch(
        &self,
        scheduler: &DependencyScheduler,
        keyed: Vec<(FixTask, Issue)>,
    ) -> Vec<WaveResult<(FixTask, Issue), FixOutcome>> {
        let executor = self.executor.clone();
        scheduler
            .run_wave(keyed, move |(task, issue): (FixTask, Issue)| {
                let executor = executor.clone();
                async move { executor.apply(&issue, &task).await }
            })
            .await
    }
}

fn overlap(a: &BTreeSet<ResourceId>, b: &BTreeSet<ResourceId>) -> BTreeSet<ResourceId> {
    a.intersection(b).cloned().collect()
}

/// Record one finished attempt against the registry and loop breaker.
fn settle(
    task: &FixTask,
    applied: bool,
    registry: &mut IssueRegistry,
    breaker: &mut LoopBreaker,
    report: &mut FixRunReport,
) {
    let issue_id = task.issue_id;
    registry.record_attempt(issue_id);

    if applied {
        registry.set_status(issue_id, IssueStatus::Unverified);
        report.applied.push(issue_id);
        debug!(issue_id = %issue_id, strategy = task.strategy.describe(), "fix applied");
        return;
    }

    report.failed.push(issue_id);
    if breaker.record_attempt(issue_id, AttemptOutcome::Failure) == LoopVerdict::Abandoned {
        registry.set_status(issue_id, IssueStatus::Abandoned);
        let attempts = registry.get(issue_id).map_or(0, |i| i.fix_attempts);
        report.abandoned.push(issue_id);
        report.events.push(SessionEvent::IssueAbandoned { issue_id, attempts });
    }
}
