pub mod config;
pub mod context;
pub mod instruction;
pub mod orchestrator;
pub mod phase_trait;
pub mod phases;
pub mod plan;
pub mod planner;
pub mod simulate;
pub mod stage_context;

pub use config::PipelineConfig;
pub use context::{BuildSession, PipelineContext};
pub use instruction::Instruction;
pub use orchestrator::PipelineOrchestrator;
pub use plan::{BuildPlan, Stage, StageRole};
pub use planner::PipelinePlanner;
pub use simulate::{SimulationReport, Simulator};
pub use stage_context::StageContext;
