use crate::engine::inspect::{LOCK_HASH_LABEL, PLAN_DIGEST_LABEL, TITLE_LABEL, VERSION_LABEL};
use crate::output::DockerfileRenderer;
use crate::pipeline::context::{BuildSession, PipelineContext};
use crate::pipeline::phase_trait::WorkflowPhase;
use crate::pipeline::planner::PipelinePlanner;
use crate::progress::ProgressEvent;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

/// Lowers the definition into a plan, checks it against the plan rules,
/// renders the Dockerfile and derives the plan digest and image labels
pub struct PlanPhase;

#[async_trait]
impl WorkflowPhase for PlanPhase {
    fn name(&self) -> &'static str {
        "PlanPhase"
    }

    async fn execute(&self, pipeline: &PipelineContext, session: &mut BuildSession) -> Result<()> {
        let tree = session
            .tree
            .as_ref()
            .context("PlanPhase requires an inspected source tree")?;

        let plan = PipelinePlanner::plan(&session.spec);
        let findings = pipeline.validator.check_plan(&plan);
        pipeline.emit(ProgressEvent::ValidationComplete {
            findings: findings.len(),
        });
        pipeline.validator.validate_plan(&plan)?;

        let digest = plan.digest(&tree.lock.content_hash);
        let dockerfile = DockerfileRenderer::new()
            .with_header(format!(
                "{} {}",
                tree.metadata.name, tree.metadata.version
            ))
            .render(&plan);
        debug!(lines = dockerfile.lines().count(), "Rendered Dockerfile");

        session.labels.insert(PLAN_DIGEST_LABEL.to_string(), digest.clone());
        session
            .labels
            .insert(LOCK_HASH_LABEL.to_string(), tree.lock.content_hash.clone());
        session
            .labels
            .insert(TITLE_LABEL.to_string(), tree.metadata.name.clone());
        session
            .labels
            .insert(VERSION_LABEL.to_string(), tree.metadata.version.clone());

        let tag = pipeline
            .config
            .tag
            .clone()
            .unwrap_or_else(|| session.spec.image_tag());
        info!(digest = %digest, tag = %tag, stages = plan.stages.len(), "Plan ready");

        session.tag = Some(tag);
        session.digest = Some(digest);
        session.dockerfile = Some(dockerfile);
        session.plan = Some(plan);
        Ok(())
    }
}
