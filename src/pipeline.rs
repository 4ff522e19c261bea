//! Run orchestration: run directory, stage seams and the orchestrator.

pub mod orchestrator;
pub mod run;
pub mod stages;

pub use orchestrator::{
    CountrySummary, LabelOrigin, PipelineBuilder, PipelineOrchestrator, PipelineStages, RunSummary,
};
pub use run::{RunContext, RunDir, SUCCESS_MARKER, scan_abandoned};
