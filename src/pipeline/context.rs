//! Pipeline dependencies and per-run state

use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::engine::{ContainerEngine, ImageReport};
use crate::fs::FileSystem;
use crate::output::schema::PipelineSpec;
use crate::progress::{NoOpHandler, ProgressEvent, ProgressHandler};
use crate::source::{BuildArtifact, SourceTree};
use crate::validation::Validator;

use super::config::PipelineConfig;
use super::plan::BuildPlan;
use super::simulate::SimulationReport;
use super::stage_context::StageContext;

/// Long-lived pipeline dependencies
pub struct PipelineContext {
    /// File system abstraction
    pub file_system: Arc<dyn FileSystem>,

    /// Engine driver; `None` restricts the run to planning and simulation
    pub engine: Option<Arc<dyn ContainerEngine>>,

    /// Validator for definitions and plans
    pub validator: Arc<Validator>,

    pub progress: Arc<dyn ProgressHandler>,

    pub config: PipelineConfig,
}

impl PipelineContext {
    pub fn new(
        file_system: Arc<dyn FileSystem>,
        engine: Option<Arc<dyn ContainerEngine>>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            file_system,
            engine,
            validator: Arc::new(Validator::new()),
            progress: Arc::new(NoOpHandler),
            config,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_validator(mut self, validator: Arc<Validator>) -> Self {
        self.validator = validator;
        self
    }

    /// Engine to drive, unless the run is simulation-only
    pub fn active_engine(&self) -> Option<&Arc<dyn ContainerEngine>> {
        if self.config.simulate_only {
            None
        } else {
            self.engine.as_ref()
        }
    }

    pub fn emit(&self, event: ProgressEvent) {
        self.progress.on_progress(&event);
    }
}

/// State accumulated by the phases of one run
#[derive(Debug, Clone)]
pub struct BuildSession {
    pub root: PathBuf,
    /// Definition, with project name and version filled once the tree is read
    pub spec: PipelineSpec,
    pub tree: Option<SourceTree>,
    pub artifact: Option<BuildArtifact>,
    pub plan: Option<BuildPlan>,
    pub dockerfile: Option<String>,
    pub digest: Option<String>,
    pub labels: BTreeMap<String, String>,
    /// Simulated end state of every completed stage
    pub stages: BTreeMap<String, StageContext>,
    pub builder_artifacts: Vec<String>,
    pub simulation: Option<SimulationReport>,
    pub tag: Option<String>,
    /// Packaged build context, shared by the builder and runtime builds
    pub build_context: Option<Bytes>,
    pub builder_image: Option<String>,
    pub image_id: Option<String>,
    pub report: Option<ImageReport>,
}

impl BuildSession {
    pub fn new(root: impl Into<PathBuf>, spec: PipelineSpec) -> Self {
        Self {
            root: root.into(),
            spec,
            tree: None,
            artifact: None,
            plan: None,
            dockerfile: None,
            digest: None,
            labels: BTreeMap::new(),
            stages: BTreeMap::new(),
            builder_artifacts: Vec::new(),
            simulation: None,
            tag: None,
            build_context: None,
            builder_image: None,
            image_id: None,
            report: None,
        }
    }

    pub fn artifact_name(&self) -> Option<&str> {
        self.artifact.as_ref().map(|a| a.file_name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;
    use crate::fs::MockFileSystem;

    #[test]
    fn test_context_creation() {
        let context = PipelineContext::new(
            Arc::new(MockFileSystem::new()),
            Some(Arc::new(MockEngine::new())),
            PipelineConfig::default(),
        );
        assert!(context.active_engine().is_some());
    }

    #[test]
    fn test_simulate_only_hides_engine() {
        let context = PipelineContext::new(
            Arc::new(MockFileSystem::new()),
            Some(Arc::new(MockEngine::new())),
            PipelineConfig::new().with_simulate_only(true),
        );
        assert!(context.active_engine().is_none());
    }

    #[test]
    fn test_new_session_is_empty() {
        let session = BuildSession::new("/repo", PipelineSpec::default());
        assert!(session.plan.is_none());
        assert!(session.artifact_name().is_none());
        assert!(session.stages.is_empty());
    }
}
