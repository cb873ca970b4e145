//! In-memory registry of pipeline runs, keyed by domain.
//!
//! Holds at most one run per domain. A run stays in the registry after it
//! finishes so status queries can report its outcome and logs; the next
//! trigger replaces it.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use sitecast_shared::{DomainId, LogEntry, LogLevel};

use crate::pipeline::StepId;

/// Maximum log entries kept per run; older entries are evicted first.
pub const LOG_CAPACITY: usize = 100;

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
    Done,
    Error,
}

/// Status of one step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl From<RunStatus> for StepStatus {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Running => StepStatus::Running,
            RunStatus::Error => StepStatus::Error,
            RunStatus::Idle | RunStatus::Done => StepStatus::Done,
        }
    }
}

/// Snapshot of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    pub domain_id: DomainId,
    pub status: RunStatus,
    pub current_step: Option<StepId>,
    pub error: Option<String>,
    pub steps: BTreeMap<StepId, StepStatus>,
    pub logs: VecDeque<LogEntry>,
}

impl PipelineRun {
    fn started(domain_id: DomainId) -> Self {
        Self {
            domain_id,
            status: RunStatus::Running,
            current_step: Some(StepId::Crawl),
            error: None,
            steps: BTreeMap::from([(StepId::Crawl, StepStatus::Running)]),
            logs: VecDeque::new(),
        }
    }

    fn idle(domain_id: DomainId) -> Self {
        Self {
            domain_id,
            status: RunStatus::Idle,
            current_step: None,
            error: None,
            steps: BTreeMap::new(),
            logs: VecDeque::new(),
        }
    }

    fn push_log(&mut self, entry: LogEntry) {
        self.logs.push_back(entry);
        while self.logs.len() > LOG_CAPACITY {
            self.logs.pop_front();
        }
    }
}

/// Result of an atomic check-and-begin.
#[derive(Debug, Clone, PartialEq)]
pub enum BeginOutcome {
    /// A fresh run was registered.
    Started(PipelineRun),
    /// A run was already in progress; nothing changed.
    AlreadyRunning(PipelineRun),
}

struct RunSlot {
    run: PipelineRun,
    cancel: Option<CancellationToken>,
}

/// Shared registry of pipeline runs.
#[derive(Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<DomainId, RunSlot>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DomainId, RunSlot>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the domain's current run, if any.
    pub fn get(&self, domain_id: &DomainId) -> Option<PipelineRun> {
        self.lock().get(domain_id).map(|slot| slot.run.clone())
    }

    /// Register a fresh run unless one is already running for this domain.
    ///
    /// The check and the insert happen under one lock, so two concurrent
    /// triggers can never both start a run.
    pub fn try_begin(&self, domain_id: &DomainId) -> BeginOutcome {
        let mut runs = self.lock();
        if let Some(slot) = runs.get(domain_id).filter(|s| s.run.status == RunStatus::Running) {
            return BeginOutcome::AlreadyRunning(slot.run.clone());
        }

        let run = PipelineRun::started(*domain_id);
        runs.insert(
            *domain_id,
            RunSlot {
                run: run.clone(),
                cancel: None,
            },
        );
        BeginOutcome::Started(run)
    }

    /// Attach the cancellation token of the task driving this run.
    pub fn attach_cancel(&self, domain_id: &DomainId, token: CancellationToken) {
        if let Some(slot) = self.lock().get_mut(domain_id) {
            slot.cancel = Some(token);
        }
    }

    /// Request cancellation of a running run. Returns `false` when no run
    /// is in progress.
    pub fn cancel(&self, domain_id: &DomainId) -> bool {
        let runs = self.lock();
        match runs.get(domain_id) {
            Some(RunSlot {
                run,
                cancel: Some(token),
            }) if run.status == RunStatus::Running => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Set the current step, run status, and error, creating the run if
    /// absent. When a step is given its status follows the run status.
    /// A non-empty error is also appended to the log.
    pub fn update(
        &self,
        domain_id: &DomainId,
        step: Option<StepId>,
        status: RunStatus,
        error: Option<String>,
    ) {
        let mut runs = self.lock();
        let slot = runs.entry(*domain_id).or_insert_with(|| RunSlot {
            run: PipelineRun::idle(*domain_id),
            cancel: None,
        });

        slot.run.current_step = step;
        slot.run.status = status;
        if let Some(step) = step {
            slot.run.steps.insert(step, StepStatus::from(status));
        }
        if let Some(message) = error.as_deref().filter(|m| !m.is_empty()) {
            error!(domain_id = %domain_id, "{message}");
            slot.run.push_log(LogEntry::now(LogLevel::Error, message));
        }
        slot.run.error = error;
    }

    /// Mark one step done while the run as a whole keeps running.
    pub fn complete_step(&self, domain_id: &DomainId, step: StepId) {
        if let Some(slot) = self.lock().get_mut(domain_id) {
            slot.run.steps.insert(step, StepStatus::Done);
        }
    }

    /// Append a log entry to the domain's run. No-op when no run exists.
    pub fn log(&self, domain_id: &DomainId, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Error => error!(domain_id = %domain_id, "{message}"),
            LogLevel::Info | LogLevel::Success => info!(domain_id = %domain_id, "{message}"),
        }
        if let Some(slot) = self.lock().get_mut(domain_id) {
            slot.run.push_log(LogEntry::now(level, message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_registers_fresh_run() {
        let registry = RunRegistry::new();
        let id = DomainId::new();

        let BeginOutcome::Started(run) = registry.try_begin(&id) else {
            panic!("expected a fresh run");
        };
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.current_step, Some(StepId::Crawl));
        assert_eq!(run.steps.get(&StepId::Crawl), Some(&StepStatus::Running));
        assert!(run.logs.is_empty());
    }

    #[test]
    fn second_begin_while_running_is_rejected() {
        let registry = RunRegistry::new();
        let id = DomainId::new();
        registry.try_begin(&id);
        registry.log(&id, LogLevel::Info, "Step 1/7: Crawling website");

        match registry.try_begin(&id) {
            BeginOutcome::AlreadyRunning(run) => {
                assert_eq!(run.logs.len(), 1);
                assert_eq!(run.status, RunStatus::Running);
            }
            BeginOutcome::Started(_) => panic!("must not start a second run"),
        }
    }

    #[test]
    fn finished_run_is_replaced_on_next_begin() {
        let registry = RunRegistry::new();
        let id = DomainId::new();
        registry.try_begin(&id);
        registry.log(&id, LogLevel::Info, "old");
        registry.update(&id, None, RunStatus::Done, None);

        let BeginOutcome::Started(run) = registry.try_begin(&id) else {
            panic!("finished run should not block a new one");
        };
        assert!(run.logs.is_empty());
    }

    #[test]
    fn update_maps_step_status_and_logs_errors() {
        let registry = RunRegistry::new();
        let id = DomainId::new();
        registry.try_begin(&id);

        registry.update(&id, Some(StepId::SiteAnalysis), RunStatus::Running, None);
        registry.complete_step(&id, StepId::SiteAnalysis);
        registry.update(
            &id,
            Some(StepId::CompetitorResearch),
            RunStatus::Error,
            Some("LLM call failed (HTTP 401): bad key".into()),
        );

        let run = registry.get(&id).unwrap();
        assert_eq!(run.status, RunStatus::Error);
        assert_eq!(run.current_step, Some(StepId::CompetitorResearch));
        assert_eq!(run.steps[&StepId::SiteAnalysis], StepStatus::Done);
        assert_eq!(run.steps[&StepId::CompetitorResearch], StepStatus::Error);
        assert_eq!(run.logs.back().unwrap().level, LogLevel::Error);
        assert!(run.error.as_deref().unwrap().contains("401"));
    }

    #[test]
    fn update_creates_missing_run() {
        let registry = RunRegistry::new();
        let id = DomainId::new();
        registry.update(&id, None, RunStatus::Done, None);
        assert_eq!(registry.get(&id).unwrap().status, RunStatus::Done);
    }

    #[test]
    fn log_without_run_is_noop() {
        let registry = RunRegistry::new();
        let id = DomainId::new();
        registry.log(&id, LogLevel::Info, "nobody listening");
        assert!(registry.get(&id).is_none());
    }

    #[test]
    fn log_keeps_most_recent_entries() {
        let registry = RunRegistry::new();
        let id = DomainId::new();
        registry.try_begin(&id);
        for i in 0..130 {
            registry.log(&id, LogLevel::Info, format!("entry {i}"));
        }

        let run = registry.get(&id).unwrap();
        assert_eq!(run.logs.len(), LOG_CAPACITY);
        assert_eq!(run.logs.front().unwrap().message, "entry 30");
        assert_eq!(run.logs.back().unwrap().message, "entry 129");
    }

    #[test]
    fn cancel_only_affects_running_runs() {
        let registry = RunRegistry::new();
        let id = DomainId::new();
        assert!(!registry.cancel(&id));

        registry.try_begin(&id);
        let token = CancellationToken::new();
        registry.attach_cancel(&id, token.clone());
        assert!(registry.cancel(&id));
        assert!(token.is_cancelled());

        registry.update(&id, None, RunStatus::Error, Some("pipeline cancelled".into()));
        assert!(!registry.cancel(&id));
    }

    #[test]
    fn run_serializes_with_camel_case_keys() {
        let registry = RunRegistry::new();
        let id = DomainId::new();
        registry.try_begin(&id);
        registry.update(&id, Some(StepId::SiteAnalysis), RunStatus::Running, None);

        let json = serde_json::to_value(registry.get(&id).unwrap()).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["currentStep"], "siteAnalysis");
        assert_eq!(json["steps"]["crawl"], "running");
        assert_eq!(json["steps"]["siteAnalysis"], "running");
    }
}
