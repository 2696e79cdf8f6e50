use crate::engine::{package_context, BuildRequest};
use crate::error::PipelineError;
use crate::pipeline::context::{BuildSession, PipelineContext};
use crate::pipeline::phase_trait::WorkflowPhase;
use crate::pipeline::simulate::Simulator;
use crate::progress::ProgressEvent;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Instant;
use tracing::{debug, info};

/// Simulates the builder stage, requires exactly the expected wheel, then
/// builds the builder target on the engine
pub struct BuilderPhase;

#[async_trait]
impl WorkflowPhase for BuilderPhase {
    fn name(&self) -> &'static str {
        "BuilderPhase"
    }

    async fn execute(&self, pipeline: &PipelineContext, session: &mut BuildSession) -> Result<()> {
        let plan = session.plan.as_ref().context("BuilderPhase requires a plan")?;
        let artifact = session
            .artifact
            .as_ref()
            .context("BuilderPhase requires the expected artifact")?;
        let stage = plan
            .builder()
            .ok_or_else(|| PipelineError::Packaging("plan has no builder stage".to_string()))?;

        let simulator = Simulator::new(&artifact.file_name);
        let ctx = simulator.run_stage(stage, &session.stages)?;
        let artifacts = simulator.check_builder(&ctx)?;
        if artifacts != [artifact.path()] {
            return Err(PipelineError::Packaging(format!(
                "builder produces {} instead of {}",
                artifacts.join(", "),
                artifact.path()
            ))
            .into());
        }
        pipeline.emit(ProgressEvent::StageSimulated {
            stage: stage.name.clone(),
            user: ctx.user.clone(),
            artifacts: artifacts.len(),
        });
        let target = stage.name.clone();
        session.stages.insert(stage.name.clone(), ctx);
        session.builder_artifacts = artifacts;

        let Some(engine) = pipeline.active_engine() else {
            debug!("No engine; builder stage simulated only");
            return Ok(());
        };

        let dockerfile = session
            .dockerfile
            .as_deref()
            .context("BuilderPhase requires a rendered Dockerfile")?;
        let context = package_context(&session.root, &pipeline.config.dockerfile_name, dockerfile)
            .context("Failed to package build context")?;
        let context = Bytes::from(context);
        session.build_context = Some(context.clone());

        let tag = format!(
            "{}-{}",
            session.tag.as_deref().unwrap_or("asgipack:latest"),
            target
        );
        pipeline.emit(ProgressEvent::BuildStarted {
            target: target.clone(),
            tag: tag.clone(),
        });
        let start = Instant::now();
        let outcome = engine
            .build(BuildRequest {
                context,
                dockerfile: pipeline.config.dockerfile_name.clone(),
                tag,
                target: Some(target.clone()),
                labels: session.labels.clone(),
                no_cache: pipeline.config.no_cache,
                pull: pipeline.config.pull,
            })
            .await?;
        pipeline.emit(ProgressEvent::BuildComplete {
            target,
            image_id: outcome.image_id.clone(),
            duration: start.elapsed(),
        });
        info!(image = %outcome.image_id, "Builder stage built");
        session.builder_image = Some(outcome.image_id);
        Ok(())
    }
}
