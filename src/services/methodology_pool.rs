//! Methodology pool manager.
//!
//! Chooses which methodologies run next. Selection honours three rules:
//!
//! 1. A methodology already used in the current streak is not eligible, and
//!    neither is one whose dependencies have not contributed a clean pass.
//! 2. When nothing is eligible the pool is exhausted: the used set is cleared,
//!    a reset event is logged, and eligibility is recomputed.
//! 3. Priority coverage: if no priority methodology has appeared in the
//!    streak and the remaining slots are down to the number still needed to
//!    reach one, selection is narrowed to priority methodologies (and any
//!    unsatisfied dependencies standing in their way).
//!
//! Among eligible candidates the choice is random, drawn over a lexically
//! ordered list so that a fixed seed reproduces the same sequence.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::domain::models::{
    ConvergenceSession, EngineConfig, Methodology, MethodologyPool, PriorityCoverageScope,
    SelectionWeighting, SessionEvent,
};

/// Result of one selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Chosen methodologies, in pick order.
    pub candidates: Vec<Methodology>,
    /// The pool was exhausted and reset before picking.
    pub pool_reset: bool,
    /// At least one pick was narrowed by the priority-coverage rule.
    pub priority_restricted: bool,
}

impl Selection {
    pub fn names(&self) -> Vec<String> {
        self.candidates.iter().map(|m| m.name.clone()).collect()
    }
}

pub struct PoolManager {
    fan_out: usize,
    weighting: SelectionWeighting,
    coverage: PriorityCoverageScope,
    rng: StdRng,
}

impl PoolManager {
    pub fn new(
        fan_out: usize,
        weighting: SelectionWeighting,
        coverage: PriorityCoverageScope,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            fan_out: fan_out.max(1),
            weighting,
            coverage,
            rng,
        }
    }

    pub fn from_engine_config(config: &EngineConfig) -> Self {
        Self::new(
            config.fan_out,
            config.selection_weighting,
            config.priority_coverage,
            config.rng_seed,
        )
    }

    /// Methodologies not in `used` whose dependencies are all in `satisfied`,
    /// in lexical order.
    pub fn eligible<'a>(
        pool: &'a MethodologyPool,
        used: &BTreeSet<String>,
        satisfied: &BTreeSet<String>,
    ) -> Vec<&'a Methodology> {
        pool.iter()
            .filter(|m| !used.contains(&m.name))
            .filter(|m| m.dependencies_satisfied(satisfied))
            .collect()
    }

    /// Pick the next candidates for `session`.
    ///
    /// Returns the session (with a pool-reset or priority-restriction event
    /// appended when one happened) and the selection. The candidate count is
    /// bounded by the fan-out, the clean passes still required, and the
    /// iterations left.
    pub fn select_next(&mut self, session: ConvergenceSession) -> (ConvergenceSession, Selection) {
        let mut session = session;
        let mut pool_reset = false;

        let mut eligible: Vec<Methodology> =
            Self::eligible(&session.pool, &session.used_in_streak, &session.clean_contributors)
                .into_iter()
                .cloned()
                .collect();

        if eligible.is_empty() {
            info!(
                session_id = %session.id,
                used = session.used_in_streak.len(),
                "methodology pool exhausted, resetting streak usage"
            );
            let clear_priority = self.coverage == PriorityCoverageScope::ResetWithPool;
            session = session.with_pool_reset(clear_priority);
            pool_reset = true;
            eligible = Self::eligible(&session.pool, &session.used_in_streak, &session.clean_contributors)
                .into_iter()
                .cloned()
                .collect();
        }

        let required_remaining = session.required_remaining().max(1) as usize;
        let limit = self
            .fan_out
            .min(required_remaining)
            .min(session.remaining_iterations().max(1) as usize);

        let mut picked: Vec<Methodology> = Vec::with_capacity(limit);
        let mut priority_restricted = false;

        while picked.len() < limit && !eligible.is_empty() {
            let slots_remaining = required_remaining - picked.len();
            let pool_for_pick = match self.coverage_restriction(&session, &picked, &eligible, slots_remaining) {
                Some(restricted) => {
                    priority_restricted = true;
                    restricted
                }
                None => eligible.clone(),
            };

            let Some(choice) = self.choose(&pool_for_pick, &session.issue_yield) else {
                break;
            };
            eligible.retain(|m| m.name != choice.name);
            picked.push(choice);
        }

        if priority_restricted {
            let iteration = session.next_iteration();
            session = session.with_event(SessionEvent::PriorityRestricted {
                iteration,
                candidates: picked.iter().map(|m| m.name.clone()).collect(),
            });
        }

        debug!(
            session_id = %session.id,
            candidates = ?picked.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
            pool_reset,
            priority_restricted,
            "methodologies selected"
        );

        let selection = Selection {
            candidates: picked,
            pool_reset,
            priority_restricted,
        };
        (session, selection)
    }

    /// The narrowed candidate list when the priority-coverage rule applies.
    fn coverage_restriction(
        &self,
        session: &ConvergenceSession,
        picked: &[Methodology],
        eligible: &[Methodology],
        slots_remaining: usize,
    ) -> Option<Vec<Methodology>> {
        let pool = &session.pool;
        if !pool.has_priority() {
            return None;
        }
        let priority_seen = session.priority_seen || picked.iter().any(|m| m.priority);
        if priority_seen {
            return None;
        }

        let taken: BTreeSet<&str> = session
            .used_in_streak
            .iter()
            .map(String::as_str)
            .chain(picked.iter().map(|m| m.name.as_str()))
            .collect();
        let unused_priority: Vec<&Methodology> = pool
            .iter()
            .filter(|m| m.priority && !taken.contains(m.name.as_str()))
            .collect();
        if unused_priority.is_empty() {
            return None;
        }

        let mut satisfied = session.clean_contributors.clone();
        satisfied.extend(picked.iter().map(|m| m.name.clone()));

        // Slots needed to land the cheapest priority methodology, counting
        // dependencies that still have to pass first.
        let mut path_members: BTreeSet<String> = BTreeSet::new();
        let mut cheapest = usize::MAX;
        for p in &unused_priority {
            let missing = unsatisfied_dependencies(pool, p, &satisfied);
            cheapest = cheapest.min(missing.len() + 1);
            path_members.insert(p.name.clone());
            path_members.extend(missing);
        }

        let threshold = unused_priority.len().max(cheapest);
        if slots_remaining > threshold {
            return None;
        }

        let restricted: Vec<Methodology> = eligible
            .iter()
            .filter(|m| path_members.contains(&m.name))
            .cloned()
            .collect();
        if restricted.is_empty() {
            warn!(
                session_id = %session.id,
                "priority coverage required but no priority methodology is eligible"
            );
            return None;
        }
        Some(restricted)
    }

    fn choose(&mut self, candidates: &[Methodology], yields: &BTreeMap<String, u64>) -> Option<Methodology> {
        let mut ordered: Vec<&Methodology> = candidates.iter().collect();
        ordered.sort_by(|a, b| a.name.cmp(&b.name));

        let chosen = match self.weighting {
            SelectionWeighting::Uniform => ordered.choose(&mut self.rng).copied(),
            SelectionWeighting::IssueYield => ordered
                .choose_weighted(&mut self.rng, |m| 1 + yields.get(&m.name).copied().unwrap_or(0))
                .ok()
                .copied()
                .or_else(|| ordered.first().copied()),
        };
        chosen.cloned()
    }
}

/// Transitive dependencies of `methodology` not yet in `satisfied`.
fn unsatisfied_dependencies(
    pool: &MethodologyPool,
    methodology: &Methodology,
    satisfied: &BTreeSet<String>,
) -> BTreeSet<String> {
    let mut missing = BTreeSet::new();
    let mut stack: Vec<&String> = methodology.dependencies.iter().collect();
    while let Some(dep) = stack.pop() {
        if satisfied.contains(dep) || !missing.insert(dep.clone()) {
            continue;
        }
        if let Some(m) = pool.get(dep) {
            stack.extend(m.dependencies.iter());
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{NonCleanCause, PassRecord};

    fn pool(methodologies: Vec<Methodology>) -> MethodologyPool {
        MethodologyPool::new(methodologies).unwrap()
    }

    fn manager(fan_out: usize, seed: u64) -> PoolManager {
        PoolManager::new(
            fan_out,
            SelectionWeighting::Uniform,
            PriorityCoverageScope::Independent,
            Some(seed),
        )
    }

    fn clean(session: ConvergenceSession, name: &str) -> ConvergenceSession {
        let iteration = session.next_iteration();
        session.with_clean_pass(PassRecord::clean(iteration, name, None))
    }

    #[test]
    fn test_excludes_used_and_unsatisfied() {
        let p = pool(vec![
            Methodology::new("a", "x"),
            Methodology::new("b", "x").depends_on("a"),
            Methodology::new("c", "x"),
        ]);
        let used: BTreeSet<String> = ["c".to_string()].into();
        let names: Vec<_> = PoolManager::eligible(&p, &used, &BTreeSet::new())
            .iter()
            .map(|m| m.name.clone())
            .collect();
        assert_eq!(names, vec!["a".to_string()]);
    }

    #[test]
    fn test_exhaustion_resets_once() {
        let p = pool(vec![Methodology::new("a", "x"), Methodology::new("b", "x")]);
        let mut mgr = manager(1, 7);
        let mut session = ConvergenceSession::new("s", p, 3, 10);

        let mut resets = 0;
        for _ in 0..3 {
            let (s, selection) = mgr.select_next(session);
            resets += usize::from(selection.pool_reset);
            session = clean(s, &selection.candidates[0].name);
        }
        assert_eq!(resets, 1);
        assert!(session.is_converged());
    }

    #[test]
    fn test_priority_restriction_on_last_slot() {
        let p = pool(vec![
            Methodology::new("a", "x"),
            Methodology::new("b", "x"),
            Methodology::new("c", "x"),
            Methodology::new("d", "x"),
            Methodology::new("p", "x").with_priority(),
        ]);
        let mut session = ConvergenceSession::new("s", p, 3, 10);
        session = clean(session, "a");
        session = clean(session, "b");

        let mut mgr = manager(1, 1);
        let (session, selection) = mgr.select_next(session);
        assert!(selection.priority_restricted);
        assert_eq!(selection.names(), vec!["p".to_string()]);
        let restricted = session.events.iter().find_map(|e| match e {
            SessionEvent::PriorityRestricted { iteration, candidates } => Some((*iteration, candidates.clone())),
            _ => None,
        });
        assert_eq!(restricted, Some((3, vec!["p".to_string()])));
    }

    #[test]
    fn test_priority_restriction_follows_dependencies() {
        let p = pool(vec![
            Methodology::new("d", "x"),
            Methodology::new("p", "x").with_priority().depends_on("d"),
            Methodology::new("x", "x"),
        ]);
        let mut session = ConvergenceSession::new("s", p, 2, 10);
        let mut mgr = manager(1, 3);

        let (s, selection) = mgr.select_next(session);
        assert!(selection.priority_restricted);
        assert_eq!(selection.names(), vec!["d".to_string()]);
        session = clean(s, "d");

        let (_, selection) = mgr.select_next(session);
        assert_eq!(selection.names(), vec!["p".to_string()]);
    }

    #[test]
    fn test_fan_out_bounded_by_required_remaining() {
        let p = pool((0..6).map(|i| Methodology::new(format!("m{i}"), "x")).collect());
        let session = clean(ConvergenceSession::new("s", p, 3, 10), "m0");
        let mut mgr = manager(5, 11);

        let (_, selection) = mgr.select_next(session);
        assert_eq!(selection.candidates.len(), 2);
        let distinct: BTreeSet<_> = selection.names().into_iter().collect();
        assert_eq!(distinct.len(), 2);
        assert!(!distinct.contains("m0"));
    }

    #[test]
    fn test_fan_out_with_priority_includes_priority() {
        let p = pool(vec![
            Methodology::new("a", "x"),
            Methodology::new("b", "x"),
            Methodology::new("c", "x"),
            Methodology::new("p", "x").with_priority(),
        ]);
        for seed in 0..20 {
            let session = ConvergenceSession::new("s", p.clone(), 3, 10);
            let mut mgr = manager(3, seed);
            let (_, selection) = mgr.select_next(session);
            assert!(selection.names().contains(&"p".to_string()), "seed {seed}");
        }
    }

    #[test]
    fn test_seeded_selection_is_reproducible() {
        let p = pool((0..8).map(|i| Methodology::new(format!("m{i}"), "x")).collect());
        let run = |seed| {
            let mut mgr = manager(1, seed);
            let mut session = ConvergenceSession::new("s", p.clone(), 4, 20);
            let mut names = Vec::new();
            for _ in 0..4 {
                let (s, selection) = mgr.select_next(session);
                let name = selection.candidates[0].name.clone();
                session = clean(s, &name);
                names.push(name);
            }
            names
        };
        assert_eq!(run(99), run(99));
    }

    #[test]
    fn test_issue_yield_weighting_prefers_productive() {
        let p = pool(vec![Methodology::new("quiet", "x"), Methodology::new("noisy", "x")]);
        let mut session = ConvergenceSession::new("s", p, 1, 1_000);
        session = session.with_issue_pass(PassRecord::with_issues(1, "noisy", 200, NonCleanCause::Reported, None));

        let mut mgr = PoolManager::new(
            1,
            SelectionWeighting::IssueYield,
            PriorityCoverageScope::Independent,
            Some(5),
        );
        let mut noisy = 0;
        for _ in 0..50 {
            let (s, selection) = mgr.select_next(session);
            session = s;
            if selection.candidates[0].name == "noisy" {
                noisy += 1;
            }
        }
        assert!(noisy > 40, "noisy chosen {noisy} times");
    }

    #[test]
    fn test_reset_with_pool_clears_priority_seen() {
        let p = pool(vec![Methodology::new("a", "x").with_priority(), Methodology::new("b", "x")]);
        let mut session = ConvergenceSession::new("s", p, 3, 10);
        session = clean(session, "a");
        session = clean(session, "b");

        let mut mgr = PoolManager::new(
            1,
            SelectionWeighting::Uniform,
            PriorityCoverageScope::ResetWithPool,
            Some(0),
        );
        let (session, selection) = mgr.select_next(session);
        assert!(selection.pool_reset);
        assert!(selection.priority_restricted);
        assert_eq!(selection.names(), vec!["a".to_string()]);
        assert_eq!(session.consecutive_clean, 2);
    }
}
