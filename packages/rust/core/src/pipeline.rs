//! Marketing pipeline: a fixed seven-step task graph driven per domain.
//!
//! crawl → site analysis → competitor research → positioning → content
//! strategy → campaign calendar → post drafts. Each step reads the artifacts of the
//! steps before it from storage, so a run can be resumed from the
//! persisted state of an earlier one.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, instrument};

use sitecast_shared::{
    ArtifactKind, DomainId, DomainRecord, LogEntry, LogLevel, PipelineConfig, Result,
    SitecastError,
};
use sitecast_storage::Storage;

use crate::llm::LlmClient;
use crate::registry::{BeginOutcome, PipelineRun, RunRegistry, RunStatus, StepStatus};
use crate::steps::MarketingSteps;

/// Identifier of one pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepId {
    Crawl,
    SiteAnalysis,
    CompetitorResearch,
    Positioning,
    ContentStrategy,
    CampaignCalendar,
    PostDrafts,
}

impl StepId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crawl => "crawl",
            Self::SiteAnalysis => "siteAnalysis",
            Self::CompetitorResearch => "competitorResearch",
            Self::Positioning => "positioning",
            Self::ContentStrategy => "contentStrategy",
            Self::CampaignCalendar => "campaignCalendar",
            Self::PostDrafts => "postDrafts",
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of one step.
#[derive(Debug, Clone, Copy)]
pub struct TaskDef {
    pub id: StepId,
    pub title: &'static str,
    pub depends_on: &'static [StepId],
    /// Steps that call the LLM are spaced out by the step delay.
    pub calls_llm: bool,
}

pub static TASKS: [TaskDef; 7] = [
    TaskDef {
        id: StepId::Crawl,
        title: "Crawling website",
        depends_on: &[],
        calls_llm: false,
    },
    TaskDef {
        id: StepId::SiteAnalysis,
        title: "Analyzing brand & site",
        depends_on: &[StepId::Crawl],
        calls_llm: true,
    },
    TaskDef {
        id: StepId::CompetitorResearch,
        title: "Researching competitors",
        depends_on: &[StepId::SiteAnalysis],
        calls_llm: true,
    },
    TaskDef {
        id: StepId::Positioning,
        title: "Defining positioning",
        depends_on: &[StepId::SiteAnalysis, StepId::CompetitorResearch],
        calls_llm: true,
    },
    TaskDef {
        id: StepId::ContentStrategy,
        title: "Building content strategy",
        depends_on: &[StepId::Positioning],
        calls_llm: true,
    },
    TaskDef {
        id: StepId::CampaignCalendar,
        title: "Generating 30-day campaign calendar",
        depends_on: &[StepId::ContentStrategy],
        calls_llm: true,
    },
    TaskDef {
        id: StepId::PostDrafts,
        title: "Storing post drafts",
        depends_on: &[StepId::CampaignCalendar],
        calls_llm: false,
    },
];

/// Lifecycle of a task within one graph execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Todo,
    InProgress,
    Done,
    Blocked,
}

/// Per-run limits, resolved from trigger options and config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub max_pages: usize,
    pub max_depth: u32,
    pub generate_drafts: bool,
}

/// Caller overrides for one trigger; unset fields fall back to config.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerOptions {
    pub max_pages: Option<usize>,
    pub max_depth: Option<u32>,
    pub generate_drafts: Option<bool>,
}

impl TriggerOptions {
    pub fn resolve(&self, config: &PipelineConfig) -> RunOptions {
        RunOptions {
            max_pages: self.max_pages.unwrap_or(config.max_pages),
            max_depth: self.max_depth.unwrap_or(config.max_depth),
            generate_drafts: self.generate_drafts.unwrap_or(config.generate_drafts),
        }
    }
}

/// Everything a step needs to know about the run it belongs to.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub domain: DomainRecord,
    pub options: RunOptions,
    pub cancel: CancellationToken,
}

/// What a successful step reports to the run log.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub level: LogLevel,
    pub message: String,
}

impl StepOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Success,
            message: message.into(),
        }
    }

    /// The step completed but something non-fatal went wrong.
    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Error,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Info,
            message: message.into(),
        }
    }
}

/// Executes the action behind each step.
pub trait StepRunner: Send + Sync {
    fn execute(
        &self,
        step: StepId,
        ctx: &RunContext,
    ) -> impl Future<Output = Result<StepOutcome>> + Send;
}

/// The step that stopped a graph execution and why.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFailure {
    pub step: StepId,
    pub message: String,
}

/// Final task states of one graph execution.
#[derive(Debug, Clone)]
pub struct TaskGraphReport {
    pub states: Vec<(StepId, TaskState)>,
    pub failure: Option<TaskFailure>,
    pub cancelled: bool,
}

impl TaskGraphReport {
    pub fn state(&self, step: StepId) -> Option<TaskState> {
        self.states
            .iter()
            .find(|(id, _)| *id == step)
            .map(|(_, state)| *state)
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
            && !self.cancelled
            && self.states.iter().all(|(_, s)| *s == TaskState::Done)
    }
}

const CANCELLED_MESSAGE: &str = "pipeline cancelled";

/// Execute `tasks` in declaration order.
///
/// A task runs only when every dependency is `done`; otherwise it becomes
/// `blocked` without executing. The first failure blocks the failing task
/// and leaves the rest `todo`. The cancellation token is checked before
/// each step and raced against the running one.
pub async fn run_task_graph<R: StepRunner>(
    tasks: &[TaskDef],
    runner: &R,
    ctx: &RunContext,
    registry: &RunRegistry,
    step_delay: Duration,
) -> TaskGraphReport {
    let domain_id = ctx.domain.id;
    let total = tasks.len();
    let mut states: Vec<(StepId, TaskState)> =
        tasks.iter().map(|t| (t.id, TaskState::Todo)).collect();
    let mut failure = None;
    let mut cancelled = false;
    let mut last_called_llm = false;

    for (index, task) in tasks.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            cancelled = true;
            break;
        }

        let ready = task.depends_on.iter().all(|dep| {
            states
                .iter()
                .any(|(id, state)| id == dep && *state == TaskState::Done)
        });
        if !ready {
            states[index].1 = TaskState::Blocked;
            registry.log(
                &domain_id,
                LogLevel::Info,
                format!("Skipping {}: dependencies not done", task.title),
            );
            continue;
        }

        if task.calls_llm && last_called_llm && !step_delay.is_zero() {
            let interrupted = tokio::select! {
                _ = ctx.cancel.cancelled() => true,
                _ = tokio::time::sleep(step_delay) => false,
            };
            if interrupted {
                cancelled = true;
                break;
            }
        }

        states[index].1 = TaskState::InProgress;
        registry.update(&domain_id, Some(task.id), RunStatus::Running, None);
        registry.log(
            &domain_id,
            LogLevel::Info,
            format!("Step {}/{}: {}...", index + 1, total, task.title),
        );

        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => None,
            result = runner
                .execute(task.id, ctx)
                .instrument(info_span!("step", step = %task.id)) => Some(result),
        };

        match result {
            Some(Ok(outcome)) => {
                states[index].1 = TaskState::Done;
                registry.complete_step(&domain_id, task.id);
                registry.log(&domain_id, outcome.level, outcome.message);
                last_called_llm = task.calls_llm;
            }
            Some(Err(e)) => {
                states[index].1 = TaskState::Blocked;
                let message = e.to_string();
                registry.update(
                    &domain_id,
                    Some(task.id),
                    RunStatus::Error,
                    Some(message.clone()),
                );
                failure = Some(TaskFailure {
                    step: task.id,
                    message,
                });
                break;
            }
            None => {
                states[index].1 = TaskState::Blocked;
                cancelled = true;
                failure = Some(TaskFailure {
                    step: task.id,
                    message: CANCELLED_MESSAGE.into(),
                });
                break;
            }
        }
    }

    if cancelled {
        let step = failure.as_ref().map(|f| f.step);
        registry.update(
            &domain_id,
            step,
            RunStatus::Error,
            Some(CANCELLED_MESSAGE.into()),
        );
    }

    TaskGraphReport {
        states,
        failure,
        cancelled,
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Result of a trigger request.
#[derive(Debug)]
pub enum TriggerResponse {
    /// A new run was spawned.
    Started {
        domain_id: DomainId,
        handle: JoinHandle<TaskGraphReport>,
    },
    /// A run was already in progress; its snapshot is returned unchanged.
    AlreadyRunning(PipelineRun),
}

/// Status of one LLM step in the status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSnapshot {
    pub done: bool,
    pub status: StepStatus,
}

/// Status of the crawl step in the status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlSnapshot {
    pub done: bool,
    pub page_count: usize,
    pub status: StepStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSteps {
    pub crawl: CrawlSnapshot,
    pub site_analysis: StepSnapshot,
    pub competitor_research: StepSnapshot,
    pub positioning: StepSnapshot,
    pub content_strategy: StepSnapshot,
    pub campaign_calendar: StepSnapshot,
}

/// Point-in-time view of a domain's pipeline, merging the registry with
/// what is already persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    pub domain_id: DomainId,
    /// Site URL.
    pub domain: String,
    pub domain_name: String,
    pub pipeline_status: RunStatus,
    pub current_step: Option<StepId>,
    pub error: Option<String>,
    pub logs: Vec<LogEntry>,
    pub steps: StatusSteps,
    pub draft_count: usize,
}

/// Drives pipeline runs for any number of domains.
#[derive(Clone)]
pub struct Orchestrator {
    storage: Arc<Storage>,
    llm: Arc<LlmClient>,
    registry: Arc<RunRegistry>,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(
        storage: Arc<Storage>,
        llm: Arc<LlmClient>,
        registry: Arc<RunRegistry>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            storage,
            llm,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Start a run for the domain unless one is already in progress.
    ///
    /// Returns as soon as the run is registered; the steps execute on a
    /// detached task.
    #[instrument(skip_all, fields(domain_id = %domain_id))]
    pub async fn trigger(
        &self,
        domain_id: &DomainId,
        options: TriggerOptions,
    ) -> Result<TriggerResponse> {
        let domain = self
            .storage
            .get_domain(domain_id)
            .await?
            .ok_or_else(|| SitecastError::NotFound(format!("domain {domain_id}")))?;

        match self.registry.try_begin(domain_id) {
            BeginOutcome::AlreadyRunning(run) => {
                info!("pipeline already running");
                Ok(TriggerResponse::AlreadyRunning(run))
            }
            BeginOutcome::Started(_) => {
                let token = CancellationToken::new();
                self.registry.attach_cancel(domain_id, token.clone());

                let run_options = options.resolve(&self.config);
                let orchestrator = self.clone();
                let handle = tokio::spawn(async move {
                    orchestrator
                        .run_to_completion(domain, run_options, token)
                        .await
                });

                info!("pipeline started");
                Ok(TriggerResponse::Started {
                    domain_id: *domain_id,
                    handle,
                })
            }
        }
    }

    /// Execute every step for `domain` and record the final run status.
    #[instrument(skip_all, fields(domain_id = %domain.id))]
    pub async fn run_to_completion(
        &self,
        domain: DomainRecord,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> TaskGraphReport {
        let domain_id = domain.id;
        let tasks: Vec<TaskDef> = TASKS
            .iter()
            .filter(|t| options.generate_drafts || t.id != StepId::PostDrafts)
            .copied()
            .collect();

        let runner = MarketingSteps::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.llm),
            self.config.crawl.clone(),
        );
        let ctx = RunContext {
            domain,
            options,
            cancel,
        };

        let report =
            run_task_graph(&tasks, &runner, &ctx, &self.registry, self.config.step_delay).await;

        if report.succeeded() {
            self.registry.update(&domain_id, None, RunStatus::Done, None);
            self.registry.log(
                &domain_id,
                LogLevel::Success,
                "Pipeline complete! All steps finished successfully.",
            );
        } else if let Some(failure) = report.failure.as_ref().filter(|_| !report.cancelled) {
            self.registry.log(
                &domain_id,
                LogLevel::Error,
                format!("Pipeline failed at {}: {}", failure.step, failure.message),
            );
        } else if !report.cancelled {
            self.registry.update(
                &domain_id,
                None,
                RunStatus::Error,
                Some("pipeline stopped with blocked steps".into()),
            );
        }

        report
    }

    /// Status snapshot for the domain, falling back to stored artifacts
    /// for steps the registry knows nothing about.
    pub async fn status(&self, domain_id: &DomainId) -> Result<PipelineStatus> {
        let domain = self
            .storage
            .get_domain(domain_id)
            .await?
            .ok_or_else(|| SitecastError::NotFound(format!("domain {domain_id}")))?;

        let page_count = self.storage.count_crawled_pages(domain_id).await?;
        let draft_count = self.storage.list_post_drafts(domain_id).await?.len();
        let run = self.registry.get(domain_id);

        let step_status = |step: StepId, present: bool| {
            run.as_ref()
                .and_then(|r| r.steps.get(&step).copied())
                .unwrap_or(if present {
                    StepStatus::Done
                } else {
                    StepStatus::Pending
                })
        };

        let snapshot = |step: StepId, present: bool| StepSnapshot {
            done: present,
            status: step_status(step, present),
        };
        let profile = self.has_artifact(domain_id, ArtifactKind::DomainProfile).await?;
        let competitors = self.has_artifact(domain_id, ArtifactKind::CompetitorSet).await?;
        let positioning = self
            .has_artifact(domain_id, ArtifactKind::PositioningSummary)
            .await?;
        let strategy = self.has_artifact(domain_id, ArtifactKind::ContentStrategy).await?;
        let calendar = self.has_artifact(domain_id, ArtifactKind::CampaignCalendar).await?;

        Ok(PipelineStatus {
            domain_id: *domain_id,
            domain: domain.url,
            domain_name: domain.name,
            pipeline_status: run.as_ref().map_or(RunStatus::Idle, |r| r.status),
            current_step: run.as_ref().and_then(|r| r.current_step),
            error: run.as_ref().and_then(|r| r.error.clone()),
            logs: run
                .as_ref()
                .map(|r| r.logs.iter().cloned().collect())
                .unwrap_or_default(),
            steps: StatusSteps {
                crawl: CrawlSnapshot {
                    done: page_count > 0,
                    page_count,
                    status: step_status(StepId::Crawl, page_count > 0),
                },
                site_analysis: snapshot(StepId::SiteAnalysis, profile),
                competitor_research: snapshot(StepId::CompetitorResearch, competitors),
                positioning: snapshot(StepId::Positioning, positioning),
                content_strategy: snapshot(StepId::ContentStrategy, strategy),
                campaign_calendar: snapshot(StepId::CampaignCalendar, calendar),
            },
            draft_count,
        })
    }

    async fn has_artifact(&self, domain_id: &DomainId, kind: ArtifactKind) -> Result<bool> {
        Ok(self.storage.get_artifact(domain_id, kind).await?.is_some())
    }

    /// Request cancellation of the domain's running pipeline.
    pub fn cancel(&self, domain_id: &DomainId) -> bool {
        self.registry.cancel(domain_id)
    }
}
