//! Execution waves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use super::issue::ResourceId;

/// Reference to a schedulable task.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TaskRef {
    Methodology(String),
    Fix(Uuid),
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Methodology(name) => write!(f, "methodology:{name}"),
            Self::Fix(id) => write!(f, "fix:{id}"),
        }
    }
}

/// A set of tasks with no unresolved dependency and no resource overlap,
/// eligible to run concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionWave {
    /// Zero-based position in its plan.
    pub index: usize,
    pub tasks: Vec<TaskRef>,
}

impl ExecutionWave {
    pub fn new(index: usize, tasks: Vec<TaskRef>) -> Self {
        Self { index, tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn methodology_names(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter_map(|t| match t {
                TaskRef::Methodology(name) => Some(name.clone()),
                TaskRef::Fix(_) => None,
            })
            .collect()
    }

    pub fn fix_ids(&self) -> Vec<Uuid> {
        self.tasks
            .iter()
            .filter_map(|t| match t {
                TaskRef::Fix(id) => Some(*id),
                TaskRef::Methodology(_) => None,
            })
            .collect()
    }
}

/// When a conflict between two fixes was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPhase {
    /// Found while partitioning fixes into waves; resolved by ordering.
    Schedule,
    /// Observed after execution from overlapping resource deltas.
    Race,
}

/// Entry in the resource-conflict log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConflict {
    /// The fix that keeps its place.
    pub winner: Uuid,
    /// The fix that was deferred or re-run.
    pub deferred: Uuid,
    pub resources: BTreeSet<ResourceId>,
    pub phase: ConflictPhase,
    pub detected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wave_accessors() {
        let fix = Uuid::new_v4();
        let wave = ExecutionWave::new(
            0,
            vec![TaskRef::Methodology("security".into()), TaskRef::Fix(fix)],
        );
        assert_eq!(wave.len(), 2);
        assert_eq!(wave.methodology_names(), vec!["security".to_string()]);
        assert_eq!(wave.fix_ids(), vec![fix]);
    }

    #[test]
    fn test_task_ref_display() {
        assert_eq!(TaskRef::Methodology("style".into()).to_string(), "methodology:style");
    }
}
