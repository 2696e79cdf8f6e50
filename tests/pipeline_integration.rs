//! Pipeline integration tests
//!
//! Run the full phase sequence against the fixture service on disk, with and
//! without the in-memory engine.

use asgipack::engine::inspect::{LOCK_HASH_LABEL, PLAN_DIGEST_LABEL, TITLE_LABEL, VERSION_LABEL};
use asgipack::engine::{ImageReport, MockEngine};
use asgipack::error::{find_pipeline_error, PipelineError};
use asgipack::fs::RealFileSystem;
use asgipack::output::PipelineSpec;
use asgipack::pipeline::{BuildSession, PipelineConfig, PipelineContext, PipelineOrchestrator};
use flate2::read::GzDecoder;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn fixture_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/coreason-api")
}

fn copy_dir(from: &Path, to: &Path) {
    fs::create_dir_all(to).unwrap();
    for entry in fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&entry.path(), &target);
        } else {
            fs::copy(entry.path(), target).unwrap();
        }
    }
}

/// Scratch copy of the fixture service that tests may modify
fn scratch_service() -> TempDir {
    let dir = TempDir::new().unwrap();
    copy_dir(&fixture_root(), dir.path());
    dir
}

fn context_entries(context: &[u8]) -> Vec<String> {
    let mut archive = tar::Archive::new(GzDecoder::new(context));
    archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
        .collect()
}

fn context_file(context: &[u8], name: &str) -> Option<String> {
    let mut archive = tar::Archive::new(GzDecoder::new(context));
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        if entry.path().unwrap().to_string_lossy() == name {
            let mut content = String::new();
            entry.read_to_string(&mut content).unwrap();
            return Some(content);
        }
    }
    None
}

fn verified_report(spec: &PipelineSpec) -> ImageReport {
    ImageReport {
        user: spec.runtime.identity.user.clone(),
        exposed_ports: vec![format!("{}/tcp", spec.launch.port)],
        cmd: spec.launch.command(),
        working_dir: spec.runtime.workdir.clone(),
        ..Default::default()
    }
}

async fn simulate(root: &Path, spec: PipelineSpec) -> anyhow::Result<BuildSession> {
    let context = PipelineContext::new(Arc::new(RealFileSystem), None, PipelineConfig::default());
    let mut session = BuildSession::new(root, spec);
    PipelineOrchestrator::new(context)
        .execute(&mut session)
        .await?;
    Ok(session)
}

#[tokio::test]
async fn test_fixture_service_plans_cleanly() {
    let session = simulate(&fixture_root(), PipelineSpec::default())
        .await
        .unwrap();

    assert_eq!(session.spec.metadata.project_name.as_deref(), Some("coreason_api"));
    assert_eq!(
        session.builder_artifacts,
        vec!["/dist/coreason_api-0.4.0-py3-none-any.whl"]
    );
    assert_eq!(session.tag.as_deref(), Some("coreason-api:0.4.0"));

    let digest = session.digest.clone().unwrap();
    assert_eq!(digest.len(), 64);
    assert_eq!(session.labels[PLAN_DIGEST_LABEL], digest);
    assert_eq!(session.labels[TITLE_LABEL], "coreason_api");
    assert_eq!(session.labels[VERSION_LABEL], "0.4.0");
    assert_eq!(session.labels[LOCK_HASH_LABEL].len(), 64);

    let dockerfile = session.dockerfile.unwrap();
    assert!(dockerfile.starts_with("# coreason_api 0.4.0\n"));
    assert!(dockerfile.contains("FROM python:3.12-slim AS builder"));
    assert!(dockerfile.contains("USER appuser"));

    let simulation = session.simulation.unwrap();
    assert_eq!(simulation.runtime_user, "appuser");
    assert_eq!(simulation.exposed_ports, vec!["8000/tcp"]);
    assert_eq!(
        simulation.command,
        vec!["uvicorn", "coreason_api.main:app", "--host", "0.0.0.0", "--port", "8000"]
    );
}

#[tokio::test]
async fn test_lock_change_changes_digest_only() {
    let dir = scratch_service();
    let before = simulate(dir.path(), PipelineSpec::default()).await.unwrap();

    let lock_path = dir.path().join("poetry.lock");
    let lock = fs::read_to_string(&lock_path).unwrap();
    fs::write(&lock_path, lock.replace("2.7.4", "2.7.5")).unwrap();
    let after = simulate(dir.path(), PipelineSpec::default()).await.unwrap();

    assert_ne!(before.digest, after.digest);
    assert_eq!(
        before.dockerfile.unwrap().lines().skip(1).collect::<Vec<_>>(),
        after.dockerfile.unwrap().lines().skip(1).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_unlocked_dependency_is_reported() {
    let dir = scratch_service();
    let pyproject = dir.path().join("pyproject.toml");
    let content = fs::read_to_string(&pyproject).unwrap();
    fs::write(
        &pyproject,
        content.replace("\"pydantic>=2.6,<3\",", "\"pydantic>=2.6,<3\",\n    \"httpx>=0.27\","),
    )
    .unwrap();

    let err = simulate(dir.path(), PipelineSpec::default())
        .await
        .unwrap_err();
    assert!(matches!(
        find_pipeline_error(&err),
        Some(PipelineError::DependencyResolution(m)) if m.contains("httpx")
    ));
}

#[tokio::test]
async fn test_missing_app_module_is_packaging_error() {
    let dir = scratch_service();
    fs::remove_file(dir.path().join("src/coreason_api/main.py")).unwrap();

    let err = simulate(dir.path(), PipelineSpec::default())
        .await
        .unwrap_err();
    assert!(matches!(
        find_pipeline_error(&err),
        Some(PipelineError::Packaging(_))
    ));
}

#[tokio::test]
async fn test_spec_file_with_healthcheck_and_port() {
    let dir = scratch_service();
    let spec_path = dir.path().join("pipeline.yaml");
    fs::write(
        &spec_path,
        "launch:\n  port: 8080\n  healthcheck:\n    path: /health\n    interval: 30s\n",
    )
    .unwrap();
    let spec = PipelineSpec::from_file(&spec_path).unwrap();

    let session = simulate(dir.path(), spec).await.unwrap();
    let dockerfile = session.dockerfile.unwrap();
    assert!(dockerfile.contains("EXPOSE 8080"));
    assert!(dockerfile.contains("HEALTHCHECK --interval=30s CMD"));
    assert!(dockerfile.contains("http://127.0.0.1:8080/health"));
    assert_eq!(session.simulation.unwrap().exposed_ports, vec!["8080/tcp"]);
}

#[tokio::test]
async fn test_engine_build_packages_context_and_verifies() {
    let dir = scratch_service();
    fs::create_dir_all(dir.path().join(".venv/bin")).unwrap();
    fs::write(dir.path().join(".venv/bin/python"), "").unwrap();

    let spec = PipelineSpec::default();
    let probe = simulate(dir.path(), spec.clone()).await.unwrap();
    let mut report = verified_report(&spec);
    report
        .labels
        .insert(PLAN_DIGEST_LABEL.to_string(), probe.digest.clone().unwrap());

    let engine = Arc::new(MockEngine::new().with_report(report));
    let context = PipelineContext::new(
        Arc::new(RealFileSystem),
        Some(engine.clone()),
        PipelineConfig::new().with_no_cache(true),
    );
    let mut session = BuildSession::new(dir.path(), spec);
    PipelineOrchestrator::new(context)
        .execute(&mut session)
        .await
        .unwrap();

    let builds = engine.builds();
    assert_eq!(builds.len(), 2);
    assert_eq!(builds[0].tag, "coreason-api:0.4.0-builder");
    assert_eq!(builds[1].tag, "coreason-api:0.4.0");
    assert!(builds.iter().all(|b| b.no_cache));
    assert_eq!(builds[0].context, builds[1].context);

    let entries = context_entries(&builds[1].context);
    assert!(entries.iter().any(|e| e == "src/coreason_api/main.py"));
    assert!(entries.iter().any(|e| e == "poetry.lock"));
    assert!(!entries.iter().any(|e| e.starts_with(".venv")));
    assert_eq!(
        context_file(&builds[1].context, "Dockerfile").as_deref(),
        probe.dockerfile.as_deref()
    );

    assert_eq!(session.builder_image.as_deref(), Some("sha256:mock1"));
    assert_eq!(session.image_id.as_deref(), Some("sha256:mock2"));
    assert!(session.report.is_some());
}

#[tokio::test]
async fn test_root_image_fails_verification() {
    let dir = scratch_service();
    let spec = PipelineSpec::default();
    let report = ImageReport {
        user: String::new(),
        ..verified_report(&spec)
    };

    let engine = Arc::new(MockEngine::new().with_report(report));
    let context = PipelineContext::new(
        Arc::new(RealFileSystem),
        Some(engine.clone()),
        PipelineConfig::default(),
    );
    let mut session = BuildSession::new(dir.path(), spec);
    let err = PipelineOrchestrator::new(context)
        .execute(&mut session)
        .await
        .unwrap_err();

    assert!(matches!(
        find_pipeline_error(&err),
        Some(PipelineError::Privilege(_))
    ));
    assert!(format!("{:#}", err).contains("Phase VerifyPhase failed"));
    assert!(session.image_id.is_some());
    assert!(session.report.is_none());
}

#[tokio::test]
async fn test_skip_verify_never_inspects() {
    let dir = scratch_service();
    // no report configured: any inspection would fail
    let engine = Arc::new(MockEngine::new());
    let context = PipelineContext::new(
        Arc::new(RealFileSystem),
        Some(engine.clone()),
        PipelineConfig::new().with_verify(false),
    );
    let mut session = BuildSession::new(dir.path(), PipelineSpec::default());
    PipelineOrchestrator::new(context)
        .execute(&mut session)
        .await
        .unwrap();
    assert_eq!(engine.builds().len(), 2);
    assert!(session.report.is_none());
}

#[tokio::test]
async fn test_runtime_build_failure_is_engine_error() {
    let dir = scratch_service();
    let engine = Arc::new(MockEngine::new().with_failure("", "no space left on device"));
    let context = PipelineContext::new(
        Arc::new(RealFileSystem),
        Some(engine.clone()),
        PipelineConfig::default(),
    );
    let mut session = BuildSession::new(dir.path(), PipelineSpec::default());
    let err = PipelineOrchestrator::new(context)
        .execute(&mut session)
        .await
        .unwrap_err();

    assert!(matches!(
        find_pipeline_error(&err),
        Some(PipelineError::Engine(m)) if m.contains("no space left")
    ));
    assert_eq!(engine.builds().len(), 2);
    assert!(session.builder_image.is_some());
    assert!(session.image_id.is_none());
}
