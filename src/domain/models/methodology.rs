//! Methodology domain model.
//!
//! A methodology is a named, pluggable check run against the subject under
//! review. The pool is validated once at construction and never mutated.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::domain::errors::{EngineError, EngineResult};

/// Execution tier of a methodology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Cheap, quick checks.
    #[default]
    Fast,
    /// Slower, more thorough checks.
    HighFidelity,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::HighFidelity => "high_fidelity",
        }
    }
}

/// A named check task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Methodology {
    /// Unique name within a pool.
    pub name: String,
    /// Free-form category tag (e.g. `security`, `style`).
    pub category: String,
    /// Priority methodologies must appear at least once in every streak.
    #[serde(default)]
    pub priority: bool,
    #[serde(default)]
    pub tier: Tier,
    /// Methodologies that must have contributed a clean pass before this one
    /// is eligible.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
}

impl Methodology {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            priority: false,
            tier: Tier::Fast,
            dependencies: BTreeSet::new(),
        }
    }

    pub fn with_priority(mut self) -> Self {
        self.priority = true;
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.dependencies.insert(name.into());
        self
    }

    /// Whether every declared dependency is in `satisfied`.
    pub fn dependencies_satisfied(&self, satisfied: &BTreeSet<String>) -> bool {
        self.dependencies.iter().all(|d| satisfied.contains(d))
    }
}

/// Validated, immutable set of methodologies keyed by name.
///
/// Iteration order is lexical on name, which keeps selection reproducible
/// under a seeded RNG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Methodology>", into = "Vec<Methodology>")]
pub struct MethodologyPool {
    methodologies: BTreeMap<String, Methodology>,
}

impl MethodologyPool {
    /// Build a pool, rejecting duplicate names, unknown dependencies and
    /// dependency cycles.
    pub fn new(methodologies: Vec<Methodology>) -> EngineResult<Self> {
        if methodologies.is_empty() {
            return Err(EngineError::EmptyPool);
        }

        let mut map = BTreeMap::new();
        for methodology in methodologies {
            if map.contains_key(&methodology.name) {
                return Err(EngineError::DuplicateMethodology(methodology.name));
            }
            map.insert(methodology.name.clone(), methodology);
        }

        for methodology in map.values() {
            for dep in &methodology.dependencies {
                if !map.contains_key(dep) {
                    return Err(EngineError::UnknownDependency {
                        methodology: methodology.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let pool = Self { methodologies: map };
        if let Some(cycle) = pool.detect_cycle() {
            return Err(EngineError::DependencyCycle(cycle));
        }
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.methodologies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methodologies.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Methodology> {
        self.methodologies.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methodologies.contains_key(name)
    }

    /// Methodologies in lexical name order.
    pub fn iter(&self) -> impl Iterator<Item = &Methodology> {
        self.methodologies.values()
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.methodologies.keys().cloned().collect()
    }

    pub fn priority_names(&self) -> BTreeSet<String> {
        self.methodologies
            .values()
            .filter(|m| m.priority)
            .map(|m| m.name.clone())
            .collect()
    }

    pub fn has_priority(&self) -> bool {
        self.methodologies.values().any(|m| m.priority)
    }

    fn detect_cycle(&self) -> Option<Vec<String>> {
        fn visit<'a>(
            node: &'a str,
            pool: &'a MethodologyPool,
            visited: &mut HashSet<&'a str>,
            stack: &mut Vec<&'a str>,
            on_stack: &mut HashMap<&'a str, usize>,
        ) -> Option<Vec<String>> {
            visited.insert(node);
            on_stack.insert(node, stack.len());
            stack.push(node);

            if let Some(methodology) = pool.get(node) {
                for dep in &methodology.dependencies {
                    if let Some(&start) = on_stack.get(dep.as_str()) {
                        let mut cycle: Vec<String> =
                            stack[start..].iter().map(|s| (*s).to_string()).collect();
                        cycle.push(dep.clone());
                        return Some(cycle);
                    }
                    if !visited.contains(dep.as_str()) {
                        if let Some(cycle) = visit(dep, pool, visited, stack, on_stack) {
                            return Some(cycle);
                        }
                    }
                }
            }

            stack.pop();
            on_stack.remove(node);
            None
        }

        let mut visited = HashSet::new();
        for name in self.methodologies.keys() {
            if !visited.contains(name.as_str()) {
                let mut stack = Vec::new();
                let mut on_stack = HashMap::new();
                if let Some(cycle) = visit(name, self, &mut visited, &mut stack, &mut on_stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }
}

impl TryFrom<Vec<Methodology>> for MethodologyPool {
    type Error = EngineError;

    fn try_from(value: Vec<Methodology>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MethodologyPool> for Vec<Methodology> {
    fn from(pool: MethodologyPool) -> Self {
        pool.methodologies.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_rejects_duplicates() {
        let result = MethodologyPool::new(vec![
            Methodology::new("security", "security"),
            Methodology::new("security", "style"),
        ]);
        assert!(matches!(result, Err(EngineError::DuplicateMethodology(name)) if name == "security"));
    }

    #[test]
    fn test_pool_rejects_unknown_dependency() {
        let result = MethodologyPool::new(vec![Methodology::new("style", "style").depends_on("lint")]);
        assert!(matches!(result, Err(EngineError::UnknownDependency { .. })));
    }

    #[test]
    fn test_pool_rejects_cycle() {
        let result = MethodologyPool::new(vec![
            Methodology::new("a", "x").depends_on("b"),
            Methodology::new("b", "x").depends_on("c"),
            Methodology::new("c", "x").depends_on("a"),
        ]);
        match result {
            Err(EngineError::DependencyCycle(path)) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_pool_rejects_empty() {
        assert!(matches!(MethodologyPool::new(vec![]), Err(EngineError::EmptyPool)));
    }

    #[test]
    fn test_pool_iterates_lexically() {
        let pool = MethodologyPool::new(vec![
            Methodology::new("zeta", "x"),
            Methodology::new("alpha", "x").with_priority(),
            Methodology::new("mid", "x"),
        ])
        .unwrap();

        let names: Vec<_> = pool.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
        assert_eq!(pool.priority_names().len(), 1);
        assert!(pool.has_priority());
    }

    #[test]
    fn test_dependencies_satisfied() {
        let m = Methodology::new("deep", "x").depends_on("shallow");
        let mut satisfied = BTreeSet::new();
        assert!(!m.dependencies_satisfied(&satisfied));
        satisfied.insert("shallow".to_string());
        assert!(m.dependencies_satisfied(&satisfied));
    }

    #[test]
    fn test_pool_serde_validates() {
        let json = r#"[{"name":"a","category":"x","dependencies":["missing"]}]"#;
        let parsed: Result<MethodologyPool, _> = serde_json::from_str(json);
        assert!(parsed.is_err());
    }
}
