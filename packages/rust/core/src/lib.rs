//! Pipeline orchestration for sitecast.
//!
//! Ties the crawler, the LLM adapter, and storage together into the
//! per-domain marketing pipeline, and tracks runs in an in-memory registry.

pub mod llm;
pub mod pipeline;
pub mod registry;
pub mod steps;

#[cfg(test)]
mod testing;

pub use llm::{CompletionOptions, LlmClient, ProviderConfig, resolve_provider};
pub use pipeline::{
    Orchestrator, PipelineStatus, RunContext, RunOptions, StepId, StepOutcome, StepRunner, TASKS,
    TaskDef, TaskGraphReport, TaskState, TriggerOptions, TriggerResponse, run_task_graph,
};
pub use registry::{BeginOutcome, PipelineRun, RunRegistry, RunStatus, StepStatus};
pub use steps::MarketingSteps;
