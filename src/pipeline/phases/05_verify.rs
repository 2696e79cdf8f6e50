use crate::pipeline::context::{BuildSession, PipelineContext};
use crate::pipeline::phase_trait::WorkflowPhase;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

/// Inspects the built image and checks it against the definition
pub struct VerifyPhase;

#[async_trait]
impl WorkflowPhase for VerifyPhase {
    fn name(&self) -> &'static str {
        "VerifyPhase"
    }

    async fn execute(&self, pipeline: &PipelineContext, session: &mut BuildSession) -> Result<()> {
        let Some(engine) = pipeline.active_engine() else {
            debug!("No engine; nothing to verify");
            return Ok(());
        };
        if !pipeline.config.verify {
            debug!("Image verification disabled");
            return Ok(());
        }
        let image = session
            .image_id
            .as_deref()
            .context("VerifyPhase requires a built image")?;

        let report = engine.inspect(image).await?;
        report.verify(&session.spec, session.digest.as_deref())?;
        info!(
            image = %report.id,
            user = %report.user,
            ports = ?report.exposed_ports,
            "Image verified"
        );
        session.report = Some(report);
        Ok(())
    }
}
