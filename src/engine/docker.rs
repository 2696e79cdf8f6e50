//! Docker engine driver over bollard

use super::{BuildOutcome, BuildRequest, ContainerEngine, EngineInfo, ImageReport};
use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use bollard::image::BuildImageOptions;
use bollard::models::BuildInfo;
use bollard::Docker;
use futures_util::{Stream, StreamExt};
use std::collections::HashMap;
use tracing::{debug, info, trace, warn};

const CONNECT_TIMEOUT_SECS: u64 = 120;

pub struct DockerEngine {
    client: Docker,
}

impl DockerEngine {
    /// Connect to `host` (`unix://`, `tcp://` or `http://`), or the local
    /// defaults (`DOCKER_HOST`, then the standard socket) when `None`
    pub fn connect(host: Option<&str>) -> PipelineResult<Self> {
        let client = match host {
            None => Docker::connect_with_local_defaults(),
            Some(h) if h.starts_with("unix://") => Docker::connect_with_socket(
                h.trim_start_matches("unix://"),
                CONNECT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
            Some(h) => Docker::connect_with_http(
                &h.replacen("tcp://", "http://", 1),
                CONNECT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
        }
        .map_err(|e| PipelineError::Engine(format!("Failed to connect to Docker: {}", e)))?;

        debug!(host = host.unwrap_or("local defaults"), "Docker client created");
        Ok(Self { client })
    }
}

fn engine_error(action: &str, err: bollard::errors::Error) -> PipelineError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => PipelineError::Engine(format!("{}: not found ({})", action, message)),
        other => PipelineError::Engine(format!("{}: {}", action, other)),
    }
}

/// Drain a build stream into the final image id and accumulated logs.
/// The first error reported by the daemon fails the build.
async fn process_build_stream(
    mut build_stream: impl Stream<Item = Result<BuildInfo, bollard::errors::Error>> + Unpin,
) -> PipelineResult<BuildOutcome> {
    let mut image_id = None;
    let mut logs = String::with_capacity(1024);
    let mut failure = None;

    while let Some(result) = build_stream.next().await {
        match result {
            Ok(info) => {
                if let Some(id) = info.aux.and_then(|aux| aux.id) {
                    image_id = Some(id);
                }
                if let Some(stream) = info.stream {
                    trace!(line = stream.trim_end(), "build");
                    logs.push_str(&stream);
                }
                if let Some(err) = info.error_detail.and_then(|e| e.message).or(info.error) {
                    warn!(error = %err, "Engine reported build error");
                    logs.push('\n');
                    logs.push_str(&err);
                    failure.get_or_insert(err);
                }
            }
            Err(err) => {
                let message = err.to_string();
                logs.push('\n');
                logs.push_str(&message);
                failure.get_or_insert(message);
            }
        }
    }

    if let Some(message) = failure {
        return Err(PipelineError::Engine(format!("build failed: {}", message)));
    }
    let image_id = image_id
        .ok_or_else(|| PipelineError::Engine("build finished without an image id".to_string()))?;
    Ok(BuildOutcome { image_id, logs })
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    fn name(&self) -> &str {
        "docker"
    }

    async fn ping(&self) -> PipelineResult<EngineInfo> {
        self.client
            .ping()
            .await
            .map_err(|e| engine_error("Docker daemon is not reachable", e))?;
        let version = self
            .client
            .version()
            .await
            .map_err(|e| engine_error("Failed to query Docker version", e))?;
        Ok(EngineInfo {
            version: version.version.unwrap_or_else(|| "unknown".to_string()),
            api_version: version.api_version.unwrap_or_else(|| "unknown".to_string()),
        })
    }

    async fn build(&self, request: BuildRequest) -> PipelineResult<BuildOutcome> {
        info!(
            tag = %request.tag,
            target = request.target.as_deref().unwrap_or("<final>"),
            context_bytes = request.context.len(),
            "Building image"
        );
        let options = BuildImageOptions {
            dockerfile: request.dockerfile.clone(),
            t: request.tag.clone(),
            target: request.target.clone().unwrap_or_default(),
            rm: true,
            forcerm: true,
            nocache: request.no_cache,
            pull: request.pull,
            labels: request.labels.clone().into_iter().collect::<HashMap<_, _>>(),
            ..Default::default()
        };
        let stream = self.client.build_image(options, None, Some(request.context));
        process_build_stream(Box::pin(stream)).await
    }

    async fn inspect(&self, image: &str) -> PipelineResult<ImageReport> {
        let inspected = self
            .client
            .inspect_image(image)
            .await
            .map_err(|e| engine_error(&format!("Failed to inspect image {}", image), e))?;
        let history = self
            .client
            .image_history(image)
            .await
            .map_err(|e| engine_error(&format!("Failed to read history of {}", image), e))?;

        let config = inspected.config.unwrap_or_default();
        let mut exposed_ports: Vec<String> = config
            .exposed_ports
            .unwrap_or_default()
            .into_keys()
            .collect();
        exposed_ports.sort();

        Ok(ImageReport {
            id: inspected.id.unwrap_or_else(|| image.to_string()),
            user: config.user.unwrap_or_default(),
            exposed_ports,
            cmd: config.cmd.unwrap_or_default(),
            entrypoint: config.entrypoint.unwrap_or_default(),
            working_dir: config.working_dir.unwrap_or_default(),
            labels: config.labels.unwrap_or_default().into_iter().collect(),
            // engine lists newest first
            history: history.into_iter().rev().map(|h| h.created_by).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{ErrorDetail, ImageId};
    use futures_util::stream;

    fn line(text: &str) -> Result<BuildInfo, bollard::errors::Error> {
        Ok(BuildInfo {
            stream: Some(text.to_string()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_build_stream_collects_id_and_logs() {
        let items = vec![
            line("Step 1/2 : FROM python:3.12-slim\n"),
            line("Step 2/2 : USER appuser\n"),
            Ok(BuildInfo {
                aux: Some(ImageId {
                    id: Some("sha256:feed".to_string()),
                }),
                ..Default::default()
            }),
        ];
        let outcome = process_build_stream(stream::iter(items)).await.unwrap();
        assert_eq!(outcome.image_id, "sha256:feed");
        assert!(outcome.logs.contains("USER appuser"));
    }

    #[tokio::test]
    async fn test_build_stream_error_fails_build() {
        let items = vec![
            line("Step 1/2 : RUN poetry check --lock\n"),
            Ok(BuildInfo {
                error_detail: Some(ErrorDetail {
                    code: Some(1),
                    message: Some("poetry.lock is not consistent".to_string()),
                }),
                ..Default::default()
            }),
        ];
        let err = process_build_stream(stream::iter(items)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Engine(ref m) if m.contains("poetry.lock")));
    }

    #[tokio::test]
    async fn test_build_stream_without_id() {
        let err = process_build_stream(stream::iter(vec![line("done\n")]))
            .await
            .unwrap_err();
        assert_eq!(err.category(), "engine");
    }
}
