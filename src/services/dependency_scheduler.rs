//! Dependency scheduler for wave-based parallel execution.
//!
//! [`DependencyScheduler::plan`] layers a task graph into waves where every
//! task depends only on tasks in earlier waves. [`DependencyScheduler::run_wave`]
//! dispatches one wave onto a bounded worker pool, retrying transient failures
//! through the [`RetryPolicy`] and turning exhausted retries into synthetic
//! failures instead of errors.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{EngineConfig, ExecutionWave, Methodology, TaskRef};
use crate::services::retry_policy::RetryPolicy;

/// Configuration for the dependency scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum concurrent tasks per wave.
    pub max_concurrent: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}

impl SchedulerConfig {
    pub fn from_engine_config(config: &EngineConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent.max(1),
        }
    }
}

/// A schedulable task and the tasks it waits for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNode {
    pub task: TaskRef,
    pub depends_on: BTreeSet<TaskRef>,
}

impl TaskNode {
    pub fn new(task: TaskRef) -> Self {
        Self {
            task,
            depends_on: BTreeSet::new(),
        }
    }

    pub fn depends_on(mut self, dependency: TaskRef) -> Self {
        self.depends_on.insert(dependency);
        self
    }

    /// Node for a methodology, carrying its declared dependencies.
    pub fn for_methodology(methodology: &Methodology) -> Self {
        Self {
            task: TaskRef::Methodology(methodology.name.clone()),
            depends_on: methodology
                .dependencies
                .iter()
                .cloned()
                .map(TaskRef::Methodology)
                .collect(),
        }
    }
}

/// Terminal outcome of one task in a wave.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Completed { value: T, attempts: u32 },
    /// Retries exhausted or a permanent failure. Never counts as success.
    SyntheticFailure { error: EngineError, attempts: u32 },
}

impl<T> TaskOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Completed { attempts, .. } | Self::SyntheticFailure { attempts, .. } => *attempts,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Result of a task together with its position in completion order.
#[derive(Debug)]
pub struct WaveResult<K, T> {
    pub key: K,
    pub outcome: TaskOutcome<T>,
    /// 0-based completion order within the wave.
    pub completion_seq: u64,
}

pub struct DependencyScheduler {
    config: SchedulerConfig,
    retry: RetryPolicy,
}

impl DependencyScheduler {
    pub fn new(config: SchedulerConfig, retry: RetryPolicy) -> Self {
        Self { config, retry }
    }

    pub fn from_engine_config(config: &EngineConfig) -> Self {
        Self::new(
            SchedulerConfig::from_engine_config(config),
            RetryPolicy::from_engine_config(config),
        )
    }

    pub fn max_concurrent(&self) -> usize {
        self.config.max_concurrent
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Partition `nodes` into dependency-ordered waves.
    ///
    /// Dependencies on tasks outside `nodes` are treated as already resolved.
    /// Tasks inside a wave are in `TaskRef` order.
    pub fn plan(&self, nodes: &[TaskNode]) -> EngineResult<Vec<ExecutionWave>> {
        let mut deps: BTreeMap<&TaskRef, BTreeSet<&TaskRef>> = BTreeMap::new();
        for node in nodes {
            deps.entry(&node.task).or_default();
        }
        for node in nodes {
            let internal: BTreeSet<&TaskRef> = node
                .depends_on
                .iter()
                .filter(|d| deps.contains_key(d))
                .collect();
            if let Some(entry) = deps.get_mut(&node.task) {
                entry.extend(internal);
            }
        }

        let mut waves = Vec::new();
        let mut done: BTreeSet<&TaskRef> = BTreeSet::new();

        while done.len() < deps.len() {
            let ready: Vec<&TaskRef> = deps
                .iter()
                .filter(|(task, _)| !done.contains(*task))
                .filter(|(_, d)| d.iter().all(|dep| done.contains(dep)))
                .map(|(task, _)| *task)
                .collect();

            if ready.is_empty() {
                return Err(EngineError::DependencyCycle(find_cycle(&deps, &done)));
            }

            done.extend(ready.iter().copied());
            waves.push(ExecutionWave::new(
                waves.len(),
                ready.into_iter().cloned().collect(),
            ));
        }

        tracing::debug!(tasks = nodes.len(), waves = waves.len(), "execution plan built");
        Ok(waves)
    }

    /// Run every task in `tasks` on the bounded worker pool.
    ///
    /// Returns once all tasks reach a terminal outcome, ordered by completion.
    pub async fn run_wave<K, F, Fut, T>(&self, tasks: Vec<K>, run: F) -> Vec<WaveResult<K, T>>
    where
        K: Clone + Send + Sync + 'static,
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let run = Arc::new(run);
        let order = Arc::new(AtomicU64::new(0));
        let mut pending = FuturesUnordered::new();
        let task_count = tasks.len();

        for key in tasks {
            let semaphore = semaphore.clone();
            let run = run.clone();
            let retry = self.retry.clone();
            let order = order.clone();
            let task_key = key.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let outcome = match retry.execute(|| (*run)(task_key.clone())).await {
                    Ok(done) => TaskOutcome::Completed {
                        value: done.value,
                        attempts: done.attempts,
                    },
                    Err(failed) => TaskOutcome::SyntheticFailure {
                        error: failed.value,
                        attempts: failed.attempts,
                    },
                };
                (outcome, order.fetch_add(1, Ordering::SeqCst))
            });
            pending.push(async move { (key, handle.await) });
        }

        let mut results = Vec::with_capacity(task_count);
        while let Some((key, joined)) = pending.next().await {
            match joined {
                Ok((outcome, completion_seq)) => results.push(WaveResult {
                    key,
                    outcome,
                    completion_seq,
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "wave worker aborted");
                    results.push(WaveResult {
                        key,
                        outcome: TaskOutcome::SyntheticFailure {
                            error: EngineError::ExecutorFailed(format!("worker aborted: {e}")),
                            attempts: 1,
                        },
                        completion_seq: order.fetch_add(1, Ordering::SeqCst),
                    });
                }
            }
        }

        results.sort_by_key(|r| r.completion_seq);
        results
    }
}

/// Walk unresolved dependencies until a task repeats, returning that cycle.
fn find_cycle(deps: &BTreeMap<&TaskRef, BTreeSet<&TaskRef>>, done: &BTreeSet<&TaskRef>) -> Vec<String> {
    let Some(start) = deps.keys().find(|t| !done.contains(*t)) else {
        return Vec::new();
    };

    let mut path: Vec<&TaskRef> = vec![*start];
    let mut current: &TaskRef = start;
    loop {
        let next = deps
            .get(&current)
            .and_then(|d| d.iter().find(|dep| !done.contains(*dep)).copied());
        let Some(next) = next else {
            return path.iter().map(ToString::to_string).collect();
        };
        if let Some(pos) = path.iter().position(|t| *t == next) {
            let mut cycle: Vec<String> = path[pos..].iter().map(ToString::to_string).collect();
            cycle.push(next.to_string());
            return cycle;
        }
        path.push(next);
        current = next;
    }
}
