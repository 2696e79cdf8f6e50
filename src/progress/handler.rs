//! Progress handler trait and events

use std::time::Duration;

/// Events emitted while a pipeline runs
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Pipeline started for a source tree
    Started { root: String },

    /// Phase started
    PhaseStarted { phase: String },

    /// Phase completed
    PhaseComplete { phase: String, duration: Duration },

    /// A stage was run through the stage simulation
    StageSimulated {
        stage: String,
        user: String,
        artifacts: usize,
    },

    /// Engine build of a stage target started
    BuildStarted { target: String, tag: String },

    /// Engine build of a stage target completed
    BuildComplete {
        target: String,
        image_id: String,
        duration: Duration,
    },

    /// Validation completed
    ValidationComplete { findings: usize },

    /// Pipeline completed successfully
    Completed { total_time: Duration },

    /// Pipeline failed
    Failed { error: String },
}

/// Trait for handling progress events during a pipeline run
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    impl ProgressHandler for CountingHandler {
        fn on_progress(&self, _event: &ProgressEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_noop_handler() {
        let handler = NoOpHandler;
        handler.on_progress(&ProgressEvent::Started {
            root: "/test".to_string(),
        });
    }

    #[test]
    fn test_progress_events() {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler {
            count: count.clone(),
        };

        handler.on_progress(&ProgressEvent::Started {
            root: "/test".to_string(),
        });
        handler.on_progress(&ProgressEvent::StageSimulated {
            stage: "builder".to_string(),
            user: "root".to_string(),
            artifacts: 1,
        });
        handler.on_progress(&ProgressEvent::Completed {
            total_time: Duration::from_secs(5),
        });

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_event_debug() {
        let event = ProgressEvent::PhaseStarted {
            phase: "PlanPhase".to_string(),
        };
        let debug_str = format!("{:?}", event);
        assert!(debug_str.contains("PhaseStarted"));
        assert!(debug_str.contains("PlanPhase"));
    }
}
