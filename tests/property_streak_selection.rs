//! Property-based tests for streak selection over whole sessions
//!
//! Tests the following properties:
//! 1. No methodology contributes two clean passes to a streak between resets
//! 2. A converged session ends on `required` consecutive clean passes
//! 3. When the pool has a priority methodology, the converged streak holds one
//! 4. With enough methodologies, the converged streak is fully distinct

mod common;

use common::{numbered_pool, test_config, Harness};
use convergent::adapters::scripted::ScriptedResponse;
use convergent::domain::models::{Issue, SessionEvent, Severity};
use convergent::ConvergenceReport;
use proptest::prelude::*;
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
struct Scenario {
    pool_size: usize,
    priority: Vec<usize>,
    required: u32,
    seed: u64,
    /// (methodology index, how many of its passes report an issue)
    dirty: Vec<(usize, usize)>,
}

fn scenario_strategy() -> impl Strategy<Value = Scenario> {
    (1usize..7, 1u32..5, any::<u64>())
        .prop_flat_map(|(pool_size, required, seed)| {
            (
                Just(pool_size),
                prop::collection::btree_set(0..pool_size, 0..=2),
                Just(required),
                Just(seed),
                prop::collection::vec((0..pool_size, 1usize..3), 0..3),
            )
        })
        .prop_map(|(pool_size, priority, required, seed, dirty)| Scenario {
            pool_size,
            priority: priority.into_iter().collect(),
            required,
            seed,
            dirty,
        })
}

fn run_scenario(scenario: &Scenario) -> ConvergenceReport {
    let harness = Harness::clean();
    let mut config = test_config(scenario.required, 200);
    config.rng_seed = Some(scenario.seed);
    let mut controller = harness.controller(config);
    let session = controller.session_with_pool(numbered_pool(scenario.pool_size, &scenario.priority));

    tokio_test::block_on(async {
        for (index, (methodology, times)) in scenario.dirty.iter().enumerate() {
            let name = format!("m{methodology}");
            let responses = (0..*times)
                .map(|n| {
                    let issue = Issue::new(&name, Severity::Medium, format!("defect {index}.{n}"))
                        .with_resource(format!("file{index}.rs"));
                    ScriptedResponse::Issues(vec![issue])
                })
                .collect();
            harness.checks.enqueue(&name, responses).await;
        }
        controller.run(session).await.unwrap()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: between a streak reset or a pool reset, clean passes never
    /// repeat a methodology
    #[test]
    fn prop_no_reuse_within_streak(scenario in scenario_strategy()) {
        let report = run_scenario(&scenario);

        let mut used: BTreeSet<String> = BTreeSet::new();
        for record in &report.history {
            let reset_before = report.events.iter().any(|e| {
                matches!(e, SessionEvent::PoolReset { after_iteration, .. } if *after_iteration + 1 == record.iteration)
            });
            if reset_before {
                used.clear();
            }
            if record.is_clean() {
                prop_assert!(
                    used.insert(record.methodology.clone()),
                    "{} reused at iteration {}", record.methodology, record.iteration
                );
            } else {
                used.clear();
            }
        }
    }

    /// Property: every scenario converges on a clean tail of the required
    /// length that honours priority coverage
    #[test]
    fn prop_converged_tail(scenario in scenario_strategy()) {
        let report = run_scenario(&scenario);
        prop_assert!(report.converged(), "status {:?}", report.status);

        let required = scenario.required as usize;
        let tail = &report.history[report.history.len() - required..];
        prop_assert!(tail.iter().all(|r| r.is_clean()));
        if report.history.len() > required {
            prop_assert!(!report.history[report.history.len() - required - 1].is_clean());
        }

        if !scenario.priority.is_empty() {
            let priority: BTreeSet<String> = scenario.priority.iter().map(|i| format!("m{i}")).collect();
            prop_assert!(tail.iter().any(|r| priority.contains(&r.methodology)));
        }

        if required <= scenario.pool_size {
            let names: BTreeSet<&str> = tail.iter().map(|r| r.methodology.as_str()).collect();
            prop_assert_eq!(names.len(), required);
        }
    }
}
