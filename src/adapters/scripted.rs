//! Scripted collaborators for testing and dry runs.
//!
//! [`ScriptedMethodologyExecutor`] answers each methodology from a queue of
//! canned responses, or from a set of planted defects that stay reported until
//! [`ScriptedFixExecutor`] repairs them. Both share a [`FixLedger`].

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{
    Antipattern, EvidenceItem, FixOutcome, FixTask, Issue, Methodology, MethodologyReport, PassContext,
    SubjectSnapshot,
};
use crate::domain::ports::{FixExecutor, MethodologyExecutor, PatternStore, Subject};

/// Canned response for one methodology pass.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Clean claim backed by one evidence item.
    Clean,
    /// Clean claim with no evidence.
    CleanWithoutEvidence,
    /// No issues, but no clean claim either.
    Unclaimed,
    Issues(Vec<Issue>),
    /// Fails with a retryable error.
    Transient(String),
    /// Fails with a permanent error.
    Fail(String),
}

impl ScriptedResponse {
    fn into_result(self, methodology: &str, iteration: u32) -> EngineResult<MethodologyReport> {
        match self {
            Self::Clean => Ok(MethodologyReport::clean(vec![EvidenceItem::new(
                "scripted",
                format!("{methodology}@{iteration}"),
            )])),
            Self::CleanWithoutEvidence => Ok(MethodologyReport::clean(Vec::new())),
            Self::Unclaimed => Ok(MethodologyReport::default()),
            Self::Issues(issues) => Ok(MethodologyReport::with_issues(issues)),
            Self::Transient(msg) => Err(EngineError::ExecutorTransient(msg)),
            Self::Fail(msg) => Err(EngineError::ExecutorFailed(msg)),
        }
    }
}

/// Descriptions of defects repaired so far.
#[derive(Debug, Clone, Default)]
pub struct FixLedger {
    fixed: Arc<RwLock<HashSet<String>>>,
}

impl FixLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark_fixed(&self, description: &str) {
        self.fixed.write().await.insert(description.to_string());
    }

    pub async fn is_fixed(&self, description: &str) -> bool {
        self.fixed.read().await.contains(description)
    }

    pub async fn len(&self) -> usize {
        self.fixed.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.fixed.read().await.is_empty()
    }
}

/// One recorded methodology invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodologyCall {
    pub methodology: String,
    pub iteration: u32,
    pub revision: u64,
    pub carried_evidence: usize,
}

pub struct ScriptedMethodologyExecutor {
    default_response: ScriptedResponse,
    scripts: RwLock<HashMap<String, VecDeque<ScriptedResponse>>>,
    defects: HashMap<String, Vec<Issue>>,
    ledger: FixLedger,
    delays: HashMap<String, Duration>,
    units_per_pass: u64,
    calls: RwLock<Vec<MethodologyCall>>,
}

impl ScriptedMethodologyExecutor {
    /// Every methodology passes clean with evidence unless scripted otherwise.
    pub fn new(ledger: FixLedger) -> Self {
        Self {
            default_response: ScriptedResponse::Clean,
            scripts: RwLock::new(HashMap::new()),
            defects: HashMap::new(),
            ledger,
            delays: HashMap::new(),
            units_per_pass: 0,
            calls: RwLock::new(Vec::new()),
        }
    }

    pub fn with_default_response(mut self, response: ScriptedResponse) -> Self {
        self.default_response = response;
        self
    }

    /// Queue responses for `methodology`, consumed one per call.
    pub fn script(mut self, methodology: &str, responses: Vec<ScriptedResponse>) -> Self {
        self.scripts
            .get_mut()
            .entry(methodology.to_string())
            .or_default()
            .extend(responses);
        self
    }

    /// Queue responses on a running executor.
    pub async fn enqueue(&self, methodology: &str, responses: Vec<ScriptedResponse>) {
        self.scripts
            .write()
            .await
            .entry(methodology.to_string())
            .or_default()
            .extend(responses);
    }

    /// Plant defects that `methodology` reports until the ledger marks them fixed.
    pub fn with_defects(mut self, methodology: &str, issues: Vec<Issue>) -> Self {
        self.defects.entry(methodology.to_string()).or_default().extend(issues);
        self
    }

    pub fn with_delay(mut self, methodology: &str, delay: Duration) -> Self {
        self.delays.insert(methodology.to_string(), delay);
        self
    }

    pub fn with_units_per_pass(mut self, units: u64) -> Self {
        self.units_per_pass = units;
        self
    }

    pub async fn calls(&self) -> Vec<MethodologyCall> {
        self.calls.read().await.clone()
    }

    pub async fn call_names(&self) -> Vec<String> {
        self.calls.read().await.iter().map(|c| c.methodology.clone()).collect()
    }

    async fn next_response(&self, methodology: &str) -> ScriptedResponse {
        if let Some(response) = self
            .scripts
            .write()
            .await
            .get_mut(methodology)
            .and_then(VecDeque::pop_front)
        {
            return response;
        }

        if let Some(defects) = self.defects.get(methodology) {
            let mut open = Vec::new();
            for issue in defects {
                if !self.ledger.is_fixed(&issue.description).await {
                    open.push(issue.clone());
                }
            }
            if !open.is_empty() {
                return ScriptedResponse::Issues(open);
            }
        }

        self.default_response.clone()
    }
}

#[async_trait]
impl MethodologyExecutor for ScriptedMethodologyExecutor {
    async fn execute(
        &self,
        subject: &SubjectSnapshot,
        methodology: &Methodology,
        context: &PassContext,
    ) -> EngineResult<MethodologyReport> {
        self.calls.write().await.push(MethodologyCall {
            methodology: methodology.name.clone(),
            iteration: context.iteration,
            revision: subject.revision,
            carried_evidence: context.carried_evidence.len(),
        });

        if let Some(delay) = self.delays.get(&methodology.name) {
            tokio::time::sleep(*delay).await;
        }

        let response = self.next_response(&methodology.name).await;
        response
            .into_result(&methodology.name, context.iteration)
            .map(|report| report.with_units(self.units_per_pass))
    }
}

/// Repairs planted defects by recording them in the shared ledger.
pub struct ScriptedFixExecutor {
    ledger: FixLedger,
    subject: Option<Arc<StaticSubject>>,
    /// Descriptions whose fixes never take effect, mapped to whether the
    /// executor still claims success.
    ineffective: HashMap<String, bool>,
    failures_remaining: RwLock<HashMap<String, u32>>,
    delays: HashMap<String, Duration>,
    calls: RwLock<Vec<(String, FixTask)>>,
}

impl ScriptedFixExecutor {
    pub fn new(ledger: FixLedger) -> Self {
        Self {
            ledger,
            subject: None,
            ineffective: HashMap::new(),
            failures_remaining: RwLock::new(HashMap::new()),
            delays: HashMap::new(),
            calls: RwLock::new(Vec::new()),
        }
    }

    /// Bump the subject revision after each applied fix.
    pub fn with_subject(mut self, subject: Arc<StaticSubject>) -> Self {
        self.subject = Some(subject);
        self
    }

    /// The fix for `description` errors every time.
    pub fn always_failing(mut self, description: &str) -> Self {
        self.ineffective.insert(description.to_string(), false);
        self
    }

    /// The fix for `description` claims success but the defect remains.
    pub fn ineffective(mut self, description: &str) -> Self {
        self.ineffective.insert(description.to_string(), true);
        self
    }

    /// The first `times` attempts at `description` error.
    pub fn failing_times(mut self, description: &str, times: u32) -> Self {
        self.failures_remaining.get_mut().insert(description.to_string(), times);
        self
    }

    pub fn with_delay(mut self, description: &str, delay: Duration) -> Self {
        self.delays.insert(description.to_string(), delay);
        self
    }

    pub async fn calls(&self) -> Vec<(String, FixTask)> {
        self.calls.read().await.clone()
    }
}

#[async_trait]
impl FixExecutor for ScriptedFixExecutor {
    async fn apply(&self, issue: &Issue, task: &FixTask) -> EngineResult<FixOutcome> {
        self.calls.write().await.push((issue.description.clone(), task.clone()));

        if let Some(delay) = self.delays.get(&issue.description) {
            tokio::time::sleep(*delay).await;
        }

        match self.ineffective.get(&issue.description) {
            Some(false) => return Err(EngineError::ExecutorFailed(format!("cannot fix {}", issue.description))),
            Some(true) => return Ok(FixOutcome::applied(task.target_resources.iter().cloned())),
            None => {}
        }

        {
            let mut failures = self.failures_remaining.write().await;
            if let Some(remaining) = failures.get_mut(&issue.description) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(EngineError::ExecutorFailed(format!("fix for {} did not apply", issue.description)));
                }
            }
        }

        self.ledger.mark_fixed(&issue.description).await;
        if let Some(subject) = &self.subject {
            subject.bump();
        }
        Ok(FixOutcome::applied(task.target_resources.iter().cloned()))
    }
}

/// Subject with an id and a revision counter.
#[derive(Debug)]
pub struct StaticSubject {
    id: String,
    revision: AtomicU64,
}

impl StaticSubject {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            revision: AtomicU64::new(0),
        }
    }

    pub fn bump(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Subject for StaticSubject {
    fn id(&self) -> &str {
        &self.id
    }

    async fn snapshot(&self) -> EngineResult<SubjectSnapshot> {
        Ok(SubjectSnapshot {
            subject_id: self.id.clone(),
            revision: self.revision(),
            content_ref: None,
        })
    }
}

/// Pattern store that keeps everything it is handed.
#[derive(Debug, Default)]
pub struct RecordingPatternStore {
    antipatterns: RwLock<Vec<Antipattern>>,
    prevention: RwLock<Vec<String>>,
}

impl RecordingPatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn antipatterns(&self) -> Vec<Antipattern> {
        self.antipatterns.read().await.clone()
    }

    pub async fn prevention_measures(&self) -> Vec<String> {
        self.prevention.read().await.clone()
    }
}

#[async_trait]
impl PatternStore for RecordingPatternStore {
    async fn record(&self, antipatterns: Vec<Antipattern>, prevention_measures: Vec<String>) -> EngineResult<()> {
        self.antipatterns.write().await.extend(antipatterns);
        self.prevention.write().await.extend(prevention_measures);
        Ok(())
    }
}
