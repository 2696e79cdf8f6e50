pub mod dockerfile;
pub mod schema;

pub use dockerfile::DockerfileRenderer;
pub use schema::{BuildTool, ExecutionIdentity, LaunchSpec, PipelineSpec};
