use super::context::{BuildSession, PipelineContext};
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait WorkflowPhase: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, pipeline: &PipelineContext, session: &mut BuildSession) -> Result<()>;
}
