use super::{BuildOutcome, BuildRequest, ContainerEngine, EngineInfo, ImageReport};
use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory engine for tests. Records every build request and returns a
/// configured image report on inspection.
pub struct MockEngine {
    reachable: bool,
    failing_targets: HashMap<String, String>,
    report: Option<ImageReport>,
    builds: Mutex<Vec<BuildRequest>>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            reachable: true,
            failing_targets: HashMap::new(),
            report: None,
            builds: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new()
        }
    }

    /// Fail builds of `target` (`""` for the final stage) with `message`
    pub fn with_failure(mut self, target: &str, message: impl Into<String>) -> Self {
        self.failing_targets
            .insert(target.to_string(), message.into());
        self
    }

    pub fn with_report(mut self, report: ImageReport) -> Self {
        self.report = Some(report);
        self
    }

    pub fn builds(&self) -> Vec<BuildRequest> {
        self.builds
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn ping(&self) -> PipelineResult<EngineInfo> {
        if !self.reachable {
            return Err(PipelineError::Engine(
                "mock engine is not reachable".to_string(),
            ));
        }
        Ok(EngineInfo {
            version: "mock".to_string(),
            api_version: "1.47".to_string(),
        })
    }

    async fn build(&self, request: BuildRequest) -> PipelineResult<BuildOutcome> {
        if !self.reachable {
            return Err(PipelineError::Engine(
                "mock engine is not reachable".to_string(),
            ));
        }
        let target = request.target.clone().unwrap_or_default();
        let index = {
            let mut builds = self
                .builds
                .lock()
                .map_err(|_| PipelineError::Engine("mock build log poisoned".to_string()))?;
            builds.push(request);
            builds.len()
        };
        if let Some(message) = self.failing_targets.get(&target) {
            return Err(PipelineError::Engine(format!("build failed: {}", message)));
        }
        Ok(BuildOutcome {
            image_id: format!("sha256:mock{}", index),
            logs: format!("built target '{}'\n", target),
        })
    }

    async fn inspect(&self, image: &str) -> PipelineResult<ImageReport> {
        self.report
            .clone()
            .map(|mut report| {
                report.id = image.to_string();
                report
            })
            .ok_or_else(|| PipelineError::Engine(format!("image {} not found", image)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::collections::BTreeMap;

    fn request(target: Option<&str>) -> BuildRequest {
        BuildRequest {
            context: Bytes::from_static(b"ctx"),
            dockerfile: "Dockerfile".to_string(),
            tag: "app:test".to_string(),
            target: target.map(str::to_string),
            labels: BTreeMap::new(),
            no_cache: false,
            pull: false,
        }
    }

    #[tokio::test]
    async fn test_records_builds() {
        let engine = MockEngine::new();
        let outcome = engine.build(request(Some("builder"))).await.unwrap();
        assert_eq!(outcome.image_id, "sha256:mock1");
        engine.build(request(None)).await.unwrap();
        let builds = engine.builds();
        assert_eq!(builds.len(), 2);
        assert_eq!(builds[0].target.as_deref(), Some("builder"));
    }

    #[tokio::test]
    async fn test_configured_failure() {
        let engine = MockEngine::new().with_failure("builder", "lock mismatch");
        let err = engine.build(request(Some("builder"))).await.unwrap_err();
        assert!(err.to_string().contains("lock mismatch"));
        assert!(engine.build(request(None)).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable() {
        let engine = MockEngine::unreachable();
        assert!(engine.ping().await.is_err());
        assert!(engine.inspect("x").await.is_err());
    }
}
