use crate::pipeline::context::{BuildSession, PipelineContext};
use crate::pipeline::phase_trait::WorkflowPhase;
use crate::source::SourceTree;
use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Validates the definition and reads the source tree: packaging metadata,
/// lock file coverage, source layout and interpreter compatibility
pub struct InspectPhase;

#[async_trait]
impl WorkflowPhase for InspectPhase {
    fn name(&self) -> &'static str {
        "InspectPhase"
    }

    async fn execute(&self, pipeline: &PipelineContext, session: &mut BuildSession) -> Result<()> {
        pipeline.validator.validate(&session.spec)?;

        let tree = SourceTree::inspect(
            pipeline.file_system.as_ref(),
            &session.root,
            &session.spec,
        )?;
        tree.check_interpreter(&session.spec.runtime.base)?;

        session.spec = session.spec.clone().resolve_with(&tree.metadata);
        let artifact = tree.artifact(&session.spec.builder.artifact_dir);
        info!(
            project = %tree.metadata.name,
            version = %tree.metadata.version,
            lock = %tree.lock.format,
            packages = tree.lock.packages.len(),
            artifact = %artifact.file_name,
            "Source tree accepted"
        );

        session.artifact = Some(artifact);
        session.tree = Some(tree);
        Ok(())
    }
}
