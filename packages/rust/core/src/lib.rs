//! Agents and orchestration for the K-Hive content pipeline.
//!
//! Each agent turns the files in its input directory into files in its
//! output directory. The [`orchestrator`] chains them through the stage
//! engine in [`pipeline`], one agent run per stage.

pub mod agent;
pub mod capture;
pub mod coordinator;
pub mod executive;
pub mod hooks;
pub mod micro;
pub mod orchestrator;
pub mod pipeline;
pub mod quality;
pub mod selector;
pub mod vertical;

#[cfg(test)]
mod testutil;

pub use agent::{AgentOptions, AgentOutcome, SocialMode, run_agent};
pub use orchestrator::Mode;
pub use pipeline::{
    InProcessRunner, PipelineObserver, PipelineRun, StageRecord, StageRunner, StageState,
    SubprocessRunner, TransferMode,
};
