//! Session-wide issue registry.
//!
//! Issues reported by successive passes are deduplicated by
//! [`Issue::fingerprint`]: a re-report keeps the original id, discovery order
//! and attempt count. The registry also drives the issue lifecycle:
//! open -> unverified (fix applied) -> fixed (originating methodology passes
//! clean), with abandonment set by the loop breaker.

use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

use crate::domain::models::{FixStrategy, Issue, IssueStatus};

/// What ingesting a batch of reported issues produced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Ingested {
    /// Issues that now need a fix (new, still open, or reopened).
    pub needs_fix: Vec<Uuid>,
    /// Issues re-reported after a fix had been applied.
    pub regressions: Vec<Uuid>,
}

#[derive(Debug, Default, Clone)]
pub struct IssueRegistry {
    issues: BTreeMap<Uuid, Issue>,
    by_fingerprint: HashMap<String, Uuid>,
    next_seq: u64,
}

impl IssueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from checkpointed issues.
    pub fn restore(issues: Vec<Issue>) -> Self {
        let mut registry = Self::new();
        for issue in issues {
            registry.next_seq = registry.next_seq.max(issue.discovery_seq + 1);
            registry.by_fingerprint.insert(issue.fingerprint(), issue.id);
            registry.issues.insert(issue.id, issue);
        }
        registry
    }

    /// Register the issues of one pass, attributing them to `methodology`.
    pub fn ingest(&mut self, methodology: &str, reported: Vec<Issue>) -> Ingested {
        let mut result = Ingested::default();

        for mut issue in reported {
            issue.methodology = methodology.to_string();
            let fingerprint = issue.fingerprint();

            if let Some(id) = self.by_fingerprint.get(&fingerprint).copied() {
                let Some(known) = self.issues.get_mut(&id) else {
                    continue;
                };
                known.severity = known.severity.max(issue.severity);
                match known.status {
                    IssueStatus::Open => result.needs_fix.push(id),
                    IssueStatus::Unverified => {
                        known.status = IssueStatus::Open;
                        result.regressions.push(id);
                        result.needs_fix.push(id);
                    }
                    IssueStatus::Fixed => {
                        tracing::info!(issue_id = %id, methodology, "fixed issue reported again, reopening");
                        known.status = IssueStatus::Open;
                        result.needs_fix.push(id);
                    }
                    IssueStatus::Abandoned => {}
                }
                continue;
            }

            issue.discovery_seq = self.next_seq;
            issue.status = IssueStatus::Open;
            issue.fix_attempts = 0;
            self.next_seq += 1;
            self.by_fingerprint.insert(fingerprint, issue.id);
            result.needs_fix.push(issue.id);
            self.issues.insert(issue.id, issue);
        }

        let mut seen = HashSet::new();
        result.needs_fix.retain(|id| seen.insert(*id));
        result
    }

    pub fn get(&self, id: Uuid) -> Option<&Issue> {
        self.issues.get(&id)
    }

    pub fn record_attempt(&mut self, id: Uuid) {
        if let Some(issue) = self.issues.get_mut(&id) {
            issue.fix_attempts += 1;
        }
    }

    pub fn set_status(&mut self, id: Uuid, status: IssueStatus) {
        if let Some(issue) = self.issues.get_mut(&id) {
            issue.status = status;
        }
    }

    pub fn set_strategy(&mut self, id: Uuid, strategy: FixStrategy) {
        if let Some(issue) = self.issues.get_mut(&id) {
            issue.fix_strategy = strategy;
        }
    }

    /// A clean pass of `methodology` no longer reports its earlier issues:
    /// mark its open and unverified issues fixed, returning their ids.
    pub fn confirm_fixed(&mut self, methodology: &str) -> Vec<Uuid> {
        let mut confirmed = Vec::new();
        for issue in self.issues.values_mut() {
            if issue.methodology == methodology
                && matches!(issue.status, IssueStatus::Open | IssueStatus::Unverified)
            {
                issue.status = IssueStatus::Fixed;
                confirmed.push(issue.id);
            }
        }
        confirmed
    }

    pub fn with_status(&self, status: IssueStatus) -> Vec<Issue> {
        let mut list: Vec<Issue> = self
            .issues
            .values()
            .filter(|i| i.status == status)
            .cloned()
            .collect();
        list.sort_by_key(|i| i.discovery_seq);
        list
    }

    pub fn abandoned_ids(&self) -> Vec<Uuid> {
        self.with_status(IssueStatus::Abandoned)
            .into_iter()
            .map(|i| i.id)
            .collect()
    }

    /// All issues in discovery order.
    pub fn all(&self) -> Vec<Issue> {
        let mut list: Vec<Issue> = self.issues.values().cloned().collect();
        list.sort_by_key(|i| i.discovery_seq);
        list
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Severity;

    fn issue(desc: &str) -> Issue {
        Issue::new("ignored", Severity::Medium, desc).with_resource("src/lib.rs")
    }

    #[test]
    fn test_dedup_keeps_first_id_and_order() {
        let mut registry = IssueRegistry::new();
        let first = registry.ingest("security", vec![issue("sql injection"), issue("xss")]);
        let again = registry.ingest("security", vec![issue("sql injection")]);

        assert_eq!(registry.len(), 2);
        assert_eq!(again.needs_fix, vec![first.needs_fix[0]]);
        assert_eq!(registry.get(first.needs_fix[1]).unwrap().discovery_seq, 1);
    }

    #[test]
    fn test_same_description_different_methodology_is_distinct() {
        let mut registry = IssueRegistry::new();
        registry.ingest("security", vec![issue("unchecked input")]);
        registry.ingest("correctness", vec![issue("unchecked input")]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_regression_after_apply() {
        let mut registry = IssueRegistry::new();
        let id = registry.ingest("style", vec![issue("long line")]).needs_fix[0];
        registry.set_status(id, IssueStatus::Unverified);

        let again = registry.ingest("style", vec![issue("long line")]);
        assert_eq!(again.regressions, vec![id]);
        assert_eq!(registry.get(id).unwrap().status, IssueStatus::Open);
    }

    #[test]
    fn test_confirm_fixed_only_touches_originating_methodology() {
        let mut registry = IssueRegistry::new();
        let a = registry.ingest("style", vec![issue("a")]).needs_fix[0];
        let b = registry.ingest("security", vec![issue("b")]).needs_fix[0];
        registry.set_status(a, IssueStatus::Unverified);
        registry.set_status(b, IssueStatus::Unverified);

        assert_eq!(registry.confirm_fixed("style"), vec![a]);
        assert_eq!(registry.get(a).unwrap().status, IssueStatus::Fixed);
        assert_eq!(registry.get(b).unwrap().status, IssueStatus::Unverified);
    }

    #[test]
    fn test_abandoned_not_reopened() {
        let mut registry = IssueRegistry::new();
        let id = registry.ingest("style", vec![issue("x")]).needs_fix[0];
        registry.set_status(id, IssueStatus::Abandoned);
        let again = registry.ingest("style", vec![issue("x")]);
        assert!(again.needs_fix.is_empty());
        assert_eq!(registry.abandoned_ids(), vec![id]);
    }

    #[test]
    fn test_restore_continues_sequence() {
        let mut registry = IssueRegistry::new();
        registry.ingest("style", vec![issue("a"), issue("b")]);
        let mut restored = IssueRegistry::restore(registry.all());
        let id = restored.ingest("style", vec![issue("c")]).needs_fix[0];
        assert_eq!(restored.get(id).unwrap().discovery_seq, 2);
        assert!(restored.ingest("style", vec![issue("a")]).regressions.is_empty());
        assert_eq!(restored.len(), 3);
    }
}
