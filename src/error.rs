//! Error taxonomy for the build pipeline
//!
//! Every variant is fatal: a pipeline either produces a fully formed image or
//! stops at the first failing step. There is no recoverable error class.

use thiserror::Error;

/// Errors raised while planning, simulating, or executing the pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Lock file cannot satisfy the declared dependencies, or is not fully pinned
    #[error("Dependency resolution failed: {0}")]
    DependencyResolution(String),

    /// Source tree is missing packaging metadata or required files
    #[error("Packaging failed: {0}")]
    Packaging(String),

    /// The build artifact could not be installed into the runtime interpreter
    #[error("Artifact install failed: {0}")]
    ArtifactInstall(String),

    /// Filesystem operation on a missing path, or a write without ownership
    #[error("Permission denied: {0}")]
    Permission(String),

    /// A root-requiring step ran under a non-privileged identity, or the
    /// service identity is root
    #[error("Privilege violation: {0}")]
    Privilege(String),

    /// Container engine unreachable or the engine reported a build failure
    #[error("Container engine error: {0}")]
    Engine(String),

    /// A validation rule rejected the pipeline definition or plan
    #[error("Validation failed: {0}")]
    Validation(String),
}

impl PipelineError {
    /// Short machine-friendly category name
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::DependencyResolution(_) => "dependency_resolution",
            PipelineError::Packaging(_) => "packaging",
            PipelineError::ArtifactInstall(_) => "artifact_install",
            PipelineError::Permission(_) => "permission",
            PipelineError::Privilege(_) => "privilege",
            PipelineError::Engine(_) => "engine",
            PipelineError::Validation(_) => "validation",
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// First `PipelineError` in an error's context chain
pub fn find_pipeline_error(err: &anyhow::Error) -> Option<&PipelineError> {
    err.chain().find_map(|e| e.downcast_ref::<PipelineError>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_category_prefix() {
        let err = PipelineError::DependencyResolution("fastapi is not locked".to_string());
        assert_eq!(
            err.to_string(),
            "Dependency resolution failed: fastapi is not locked"
        );
        assert_eq!(err.category(), "dependency_resolution");
    }

    #[test]
    fn test_converts_into_anyhow() {
        let err: anyhow::Error = PipelineError::Permission("/app".to_string()).into();
        let inner = err.downcast_ref::<PipelineError>();
        assert!(matches!(inner, Some(PipelineError::Permission(_))));
    }

    #[test]
    fn test_find_through_context() {
        use anyhow::Context;
        let err = Err::<(), _>(PipelineError::Privilege("root".to_string()))
            .context("Phase RuntimePhase failed")
            .unwrap_err();
        assert_eq!(
            find_pipeline_error(&err).map(PipelineError::category),
            Some("privilege")
        );
        assert!(find_pipeline_error(&anyhow::anyhow!("plain")).is_none());
    }
}
