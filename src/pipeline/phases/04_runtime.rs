use crate::engine::BuildRequest;
use crate::error::PipelineError;
use crate::pipeline::context::{BuildSession, PipelineContext};
use crate::pipeline::phase_trait::WorkflowPhase;
use crate::pipeline::simulate::{SimulationReport, Simulator};
use crate::progress::ProgressEvent;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, info};

/// Simulates the runtime stage against the launch contract, then builds the
/// final image
pub struct RuntimePhase;

#[async_trait]
impl WorkflowPhase for RuntimePhase {
    fn name(&self) -> &'static str {
        "RuntimePhase"
    }

    async fn execute(&self, pipeline: &PipelineContext, session: &mut BuildSession) -> Result<()> {
        let plan = session.plan.as_ref().context("RuntimePhase requires a plan")?;
        let artifact_name = session
            .artifact_name()
            .context("RuntimePhase requires the expected artifact")?;
        let builder = plan
            .builder()
            .ok_or_else(|| PipelineError::Packaging("plan has no builder stage".to_string()))?;
        let stage = plan
            .runtime()
            .ok_or_else(|| PipelineError::Packaging("plan has no runtime stage".to_string()))?;

        let simulator = Simulator::new(artifact_name).with_launch(session.spec.launch.clone());
        let ctx = simulator.run_stage(stage, &session.stages)?;
        simulator.check_runtime(&ctx)?;
        pipeline.emit(ProgressEvent::StageSimulated {
            stage: stage.name.clone(),
            user: ctx.user.clone(),
            artifacts: ctx.installed_artifacts.len(),
        });

        session.simulation = Some(SimulationReport {
            builder_stage: builder.name.clone(),
            artifacts: session.builder_artifacts.clone(),
            runtime_stage: stage.name.clone(),
            runtime_user: ctx.user.clone(),
            installed_artifacts: ctx.installed_artifacts.clone(),
            exposed_ports: ctx
                .exposed_ports
                .iter()
                .map(|(port, protocol)| format!("{}/{}", port, protocol))
                .collect(),
            command: ctx.cmd.clone().unwrap_or_default(),
        });
        let target = stage.name.clone();
        session.stages.insert(stage.name.clone(), ctx);

        let Some(engine) = pipeline.active_engine() else {
            debug!("No engine; runtime stage simulated only");
            return Ok(());
        };
        let context = session
            .build_context
            .clone()
            .context("RuntimePhase requires the packaged build context")?;
        let tag = session
            .tag
            .clone()
            .context("RuntimePhase requires an image tag")?;

        pipeline.emit(ProgressEvent::BuildStarted {
            target: target.clone(),
            tag: tag.clone(),
        });
        let start = Instant::now();
        let outcome = engine
            .build(BuildRequest {
                context,
                dockerfile: pipeline.config.dockerfile_name.clone(),
                tag: tag.clone(),
                target: None,
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
        info!(image = %outcome.image_id, tag = %tag, "Runtime image built");
        session.image_id = Some(outcome.image_id);
        Ok(())
    }
}
