//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started { root } => {
                info!(root = %root, "Starting build pipeline");
            }
            ProgressEvent::PhaseStarted { phase } => {
                info!(phase = %phase, "Starting phase");
            }
            ProgressEvent::PhaseComplete { phase, duration } => {
                info!(
                    phase = %phase,
                    duration_ms = duration.as_millis(),
                    "Phase complete"
                );
            }
            ProgressEvent::StageSimulated {
                stage,
                user,
                artifacts,
            } => {
                debug!(stage = %stage, user = %user, artifacts, "Stage simulated");
            }
            ProgressEvent::BuildStarted { target, tag } => {
                info!(target = %target, tag = %tag, "Engine build started");
            }
            ProgressEvent::BuildComplete {
                target,
                image_id,
                duration,
            } => {
                info!(
                    target = %target,
                    image = %image_id,
                    duration_ms = duration.as_millis(),
                    "Engine build complete"
                );
            }
            ProgressEvent::ValidationComplete { findings } => {
                if *findings > 0 {
                    warn!(findings, "Validation complete with findings");
                } else {
                    debug!("Validation complete");
                }
            }
            ProgressEvent::Completed { total_time } => {
                info!(total_time_ms = total_time.as_millis(), "Pipeline complete");
            }
            ProgressEvent::Failed { error } => {
                warn!(error = %error, "Pipeline failed");
            }
        }
    }
}
