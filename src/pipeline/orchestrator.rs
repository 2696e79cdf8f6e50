use super::context::{BuildSession, PipelineContext};
use super::phase_trait::WorkflowPhase;
use super::phases::{
    builder::BuilderPhase, inspect::InspectPhase, plan::PlanPhase, runtime::RuntimePhase,
    verify::VerifyPhase,
};
use crate::error::PipelineError;
use crate::progress::ProgressEvent;
use anyhow::{Context, Result};
use std::time::Instant;
use tracing::{debug, info};

pub struct PipelineOrchestrator {
    context: PipelineContext,
}

impl PipelineOrchestrator {
    pub fn new(context: PipelineContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    fn phases() -> Vec<Box<dyn WorkflowPhase>> {
        vec![
            Box::new(InspectPhase),
            Box::new(PlanPhase),
            Box::new(BuilderPhase),
            Box::new(RuntimePhase),
            Box::new(VerifyPhase),
        ]
    }

    /// Run every phase in order, stopping at the first failure
    pub async fn execute(&self, session: &mut BuildSession) -> Result<()> {
        let start = Instant::now();
        info!("Starting build pipeline for: {}", session.root.display());
        self.context.emit(ProgressEvent::Started {
            root: session.root.display().to_string(),
        });

        let timeout = self.context.config.timeout;
        let result = match tokio::time::timeout(timeout, self.run_phases(session)).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Engine(format!(
                "pipeline did not finish within {}s",
                timeout.as_secs()
            ))
            .into()),
        };

        match result {
            Ok(()) => {
                info!("Pipeline complete in {}ms", start.elapsed().as_millis());
                self.context.emit(ProgressEvent::Completed {
                    total_time: start.elapsed(),
                });
                Ok(())
            }
            Err(e) => {
                self.context.emit(ProgressEvent::Failed {
                    error: format!("{:#}", e),
                });
                Err(e)
            }
        }
    }

    async fn run_phases(&self, session: &mut BuildSession) -> Result<()> {
        for phase in Self::phases() {
            let phase_name = phase.name();
            info!("Phase: {}", phase_name);
            self.context.emit(ProgressEvent::PhaseStarted {
                phase: phase_name.to_string(),
            });

            let phase_start = Instant::now();
            phase
                .execute(&self.context, session)
                .await
                .with_context(|| format!("Phase {} failed", phase_name))?;

            self.context.emit(ProgressEvent::PhaseComplete {
                phase: phase_name.to_string(),
                duration: phase_start.elapsed(),
            });
            debug!("Phase {} complete", phase_name);
        }
        Ok(())
    }
}
