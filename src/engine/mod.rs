//! Container engine abstraction
//!
//! The pipeline only needs three engine operations: a liveness check, a build
//! of a packaged context up to a named target, and an inspection of the result.

pub mod context;
pub mod docker;
pub mod inspect;
pub mod mock;

use crate::error::PipelineResult;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;

pub use context::package_context;
pub use docker::DockerEngine;
pub use inspect::ImageReport;
pub use mock::MockEngine;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineInfo {
    pub version: String,
    pub api_version: String,
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// gzip'd tar of the source tree plus the Dockerfile
    pub context: Bytes,
    /// Dockerfile path inside the context
    pub dockerfile: String,
    pub tag: String,
    /// Stop at this stage; `None` builds the final stage
    pub target: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub no_cache: bool,
    pub pull: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub image_id: String,
    pub logs: String,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn ping(&self) -> PipelineResult<EngineInfo>;

    async fn build(&self, request: BuildRequest) -> PipelineResult<BuildOutcome>;

    async fn inspect(&self, image: &str) -> PipelineResult<ImageReport>;
}
