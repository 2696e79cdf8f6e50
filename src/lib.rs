//! asgipack - two-stage container pipeline for Python ASGI services
//!
//! A pipeline definition (`PipelineSpec`) describes a builder stage that
//! packages the service into exactly one wheel from its lock file, and a
//! runtime stage that installs that wheel into a minimal image and launches
//! the ASGI server as a non-root user.
//!
//! # Flow
//!
//! 1. [`source`] reads packaging metadata and the lock file, and derives the
//!    expected wheel name.
//! 2. [`pipeline`] lowers the definition into a `BuildPlan`, simulates every
//!    stage through an explicit `StageContext` and renders the Dockerfile.
//! 3. [`engine`] builds both targets on a container engine and inspects the
//!    result against the definition.
//!
//! ```ignore
//! use asgipack::fs::RealFileSystem;
//! use asgipack::output::PipelineSpec;
//! use asgipack::pipeline::{BuildSession, PipelineConfig, PipelineContext, PipelineOrchestrator};
//! use std::sync::Arc;
//!
//! async fn plan() -> anyhow::Result<()> {
//!     let context = PipelineContext::new(Arc::new(RealFileSystem), None, PipelineConfig::default());
//!     let mut session = BuildSession::new("./service", PipelineSpec::default());
//!     PipelineOrchestrator::new(context).execute(&mut session).await?;
//!     println!("{}", session.dockerfile.unwrap_or_default());
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod extractors;
pub mod fs;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod source;
pub mod util;
pub mod validation;

pub use config::{AsgipackConfig, ConfigError};
pub use error::{PipelineError, PipelineResult};
pub use output::PipelineSpec;
pub use pipeline::{BuildSession, PipelineConfig, PipelineContext, PipelineOrchestrator};
pub use util::{init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name_is_asgipack() {
        assert_eq!(NAME, "asgipack");
    }
}
