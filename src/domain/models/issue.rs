//! Issue domain model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::fix::FixStrategy;

/// Identifier of a resource within the subject (a file, a section, a table).
///
/// Conflict detection is whole-resource: two fixes conflict if they name the
/// same resource at all.
pub type ResourceId = String;

/// Issue severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Lifecycle status of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    #[default]
    Open,
    /// A clean pass of the originating methodology confirmed the fix.
    Fixed,
    /// A fix was applied but not yet confirmed by a later pass.
    Unverified,
    /// The loop breaker gave up; requires external intervention.
    Abandoned,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Fixed => "fixed",
            Self::Unverified => "unverified",
            Self::Abandoned => "abandoned",
        }
    }

    /// Whether the coordinator should still attempt a fix.
    pub fn needs_fix(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// A problem reported by a methodology pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: Uuid,
    /// Name of the methodology that reported it.
    pub methodology: String,
    pub severity: Severity,
    pub description: String,
    /// Resources a fix is expected to touch. Declared, never inferred.
    pub target_resources: BTreeSet<ResourceId>,
    pub fix_attempts: u32,
    pub status: IssueStatus,
    /// Session-wide discovery order, used as the secondary fix ordering key.
    #[serde(default)]
    pub discovery_seq: u64,
    /// Approach the next fix attempt will use. Changes only on a pivot.
    #[serde(default)]
    pub fix_strategy: FixStrategy,
}

impl Issue {
    pub fn new(
        methodology: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            methodology: methodology.into(),
            severity,
            description: description.into(),
            target_resources: BTreeSet::new(),
            fix_attempts: 0,
            status: IssueStatus::Open,
            discovery_seq: 0,
            fix_strategy: FixStrategy::Standard,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<ResourceId>) -> Self {
        self.target_resources.insert(resource.into());
        self
    }

    pub fn with_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ResourceId>,
    {
        self.target_resources.extend(resources.into_iter().map(Into::into));
        self
    }

    /// Identity of the underlying problem, stable across re-reports by later
    /// passes of the same methodology.
    pub fn fingerprint(&self) -> String {
        let resources: Vec<&str> = self.target_resources.iter().map(String::as_str).collect();
        format!("{}|{}|{}", self.methodology, self.description.trim(), resources.join(","))
    }
}

/// Something learned from an issue-bearing pass, handed to the pattern store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Antipattern {
    pub methodology: String,
    pub severity: Severity,
    pub description: String,
}

impl From<&Issue> for Antipattern {
    fn from(issue: &Issue) -> Self {
        Self {
            methodology: issue.methodology.clone(),
            severity: issue.severity,
            description: issue.description.clone(),
        }
    }
}
