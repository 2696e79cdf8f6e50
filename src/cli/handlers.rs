//! Command handlers
//!
//! Each handler returns the process exit code: 0 on success, 1 on any
//! pipeline failure. Failures are reported on stderr with their category.

use crate::cli::commands::{
    BuildArgs, CheckArgs, HealthArgs, LintArgs, PlanArgs, RenderArgs, VerifyArgs,
};
use crate::cli::output::{
    BuildSummary, HealthStatus, LintReport, OutputFormatter, PlanOutput, StageView, VerifyOutput,
};
use crate::config::AsgipackConfig;
use crate::engine::{ContainerEngine, DockerEngine};
use crate::error::find_pipeline_error;
use crate::extractors::parse_dockerfile;
use crate::fs::RealFileSystem;
use crate::output::schema::PipelineSpec;
use crate::pipeline::simulate::PLACEHOLDER_ARTIFACT;
use crate::pipeline::{BuildSession, PipelineContext, PipelineOrchestrator, Simulator};
use crate::progress::{LoggingHandler, NoOpHandler, ProgressHandler};
use crate::validation::{Finding, Validator};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub async fn handle_plan(args: &PlanArgs, quiet: bool) -> i32 {
    let result = async {
        let session = simulate(args.path.as_deref(), args.spec.as_deref(), quiet).await?;
        let plan = PlanOutput::from_session(&session)?;
        let output = OutputFormatter::new(args.format.into()).format_plan(&plan)?;
        write_output(&output, args.output.as_deref())
    }
    .await;
    exit_code(result)
}

pub async fn handle_render(args: &RenderArgs, quiet: bool) -> i32 {
    let result = async {
        let session = simulate(args.path.as_deref(), args.spec.as_deref(), quiet).await?;
        let dockerfile = session
            .dockerfile
            .context("run did not render a Dockerfile")?;
        write_output(&dockerfile, args.output.as_deref())
    }
    .await;
    exit_code(result)
}

pub async fn handle_check(args: &CheckArgs, quiet: bool) -> i32 {
    let result = async {
        let session = simulate(args.path.as_deref(), args.spec.as_deref(), quiet).await?;
        let plan = PlanOutput::from_session(&session)?;
        let output = OutputFormatter::new(args.format.into()).format_check(&plan)?;
        write_output(&output, None)
    }
    .await;
    exit_code(result)
}

pub async fn handle_lint(args: &LintArgs) -> i32 {
    let result = async {
        let report = lint(&args.dockerfile, args.compare.as_deref())?;
        let output = OutputFormatter::new(args.format.into()).format_lint(&report)?;
        write_output(&output, None)?;
        Ok::<bool, anyhow::Error>(report.passed())
    }
    .await;
    match result {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => exit_code::<()>(Err(e)),
    }
}

pub async fn handle_build(args: &BuildArgs, quiet: bool) -> i32 {
    let result = async {
        let env_config = AsgipackConfig::from_env()?;
        let spec = load_spec(args.spec.as_deref())?;
        let root = source_root(args.path.as_deref());

        let mut config = env_config
            .pipeline_config()
            .with_verify(!args.skip_verify)
            .with_no_cache(args.no_cache || env_config.no_cache)
            .with_pull(args.pull || env_config.pull);
        if let Some(tag) = &args.tag {
            config = config.with_tag(tag.clone());
        }
        if let Some(secs) = args.timeout {
            config = config.with_timeout(Duration::from_secs(secs));
        }

        let engine: Arc<dyn ContainerEngine> =
            Arc::new(DockerEngine::connect(env_config.docker_host.as_deref())?);
        let context = PipelineContext::new(Arc::new(RealFileSystem), Some(engine), config)
            .with_progress(progress_handler(quiet));

        let start = Instant::now();
        let mut session = BuildSession::new(&root, spec);
        PipelineOrchestrator::new(context)
            .execute(&mut session)
            .await?;

        let summary = BuildSummary {
            tag: session.tag.clone().unwrap_or_default(),
            image_id: session
                .image_id
                .clone()
                .context("build finished without an image id")?,
            builder_image: session.builder_image.clone(),
            digest: session.digest.clone().unwrap_or_default(),
            verified: session.report.is_some(),
            duration_ms: start.elapsed().as_millis(),
            finished_at: chrono::Utc::now().to_rfc3339(),
        };
        let output = OutputFormatter::new(args.format.into()).format_build(&summary)?;
        write_output(&output, None)
    }
    .await;
    exit_code(result)
}

pub async fn handle_verify(args: &VerifyArgs) -> i32 {
    let result = async {
        let env_config = AsgipackConfig::from_env()?;
        let spec = load_spec(args.spec.as_deref())?;
        let engine = DockerEngine::connect(env_config.docker_host.as_deref())?;

        let report = engine.inspect(&args.image).await?;
        let findings = report.findings(&spec, args.digest.as_deref());
        let passed = findings.is_empty();
        let output = OutputFormatter::new(args.format.into())
            .format_verify(&VerifyOutput { report, findings })?;
        write_output(&output, None)?;
        Ok::<bool, anyhow::Error>(passed)
    }
    .await;
    match result {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => exit_code::<()>(Err(e)),
    }
}

pub async fn handle_health(args: &HealthArgs) -> i32 {
    let result = async {
        let env_config = AsgipackConfig::from_env()?;
        let status = match DockerEngine::connect(env_config.docker_host.as_deref()) {
            Ok(engine) => match engine.ping().await {
                Ok(info) => HealthStatus {
                    engine: engine.name().to_string(),
                    available: true,
                    version: Some(info.version),
                    api_version: Some(info.api_version),
                    error: None,
                },
                Err(e) => unavailable(engine.name(), e.to_string()),
            },
            Err(e) => unavailable("docker", e.to_string()),
        };
        let available = status.available;
        let output = OutputFormatter::new(args.format.into())
            .format_health(&status, &env_config.to_display_map())?;
        write_output(&output, None)?;
        Ok::<bool, anyhow::Error>(available)
    }
    .await;
    match result {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => exit_code::<()>(Err(e)),
    }
}

/// Runs every phase without an engine
async fn simulate(path: Option<&Path>, spec: Option<&Path>, quiet: bool) -> Result<BuildSession> {
    let env_config = AsgipackConfig::from_env()?;
    let spec = load_spec(spec)?;
    let root = source_root(path);
    let config = env_config.pipeline_config().with_simulate_only(true);

    let context = PipelineContext::new(Arc::new(RealFileSystem), None, config)
        .with_progress(progress_handler(quiet));
    let mut session = BuildSession::new(&root, spec);
    PipelineOrchestrator::new(context)
        .execute(&mut session)
        .await?;
    Ok(session)
}

/// Lowers a Dockerfile into a plan and collects every simulation and rule
/// finding instead of stopping at the first
pub fn lint(dockerfile: &Path, compare: Option<&Path>) -> Result<LintReport> {
    let plan = read_plan(dockerfile)?;
    let validator = Validator::new();

    let mut findings = Vec::new();
    let simulation = match Simulator::new(PLACEHOLDER_ARTIFACT).simulate(&plan) {
        Ok(report) => Some(report),
        Err(e) => {
            debug!(category = e.category(), "Simulation failed");
            findings.push(Finding::new("Simulation", e.to_string()));
            None
        }
    };
    findings.extend(validator.check_plan(&plan));

    let drift = match compare {
        Some(other) => plan.diff(&read_plan(other)?),
        None => Vec::new(),
    };
    info!(
        findings = findings.len(),
        drift = drift.len(),
        "Linted {}",
        dockerfile.display()
    );

    Ok(LintReport {
        dockerfile: dockerfile.display().to_string(),
        stages: StageView::from_plan(&plan),
        simulation,
        findings,
        drift,
    })
}

fn read_plan(path: &Path) -> Result<crate::pipeline::BuildPlan> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_dockerfile(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn load_spec(path: Option<&Path>) -> Result<PipelineSpec> {
    match path {
        Some(path) => PipelineSpec::from_file(path),
        None => Ok(PipelineSpec::default()),
    }
}

fn source_root(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn progress_handler(quiet: bool) -> Arc<dyn ProgressHandler> {
    if quiet {
        Arc::new(NoOpHandler)
    } else {
        Arc::new(LoggingHandler)
    }
}

fn unavailable(engine: &str, error: String) -> HealthStatus {
    HealthStatus {
        engine: engine.to_string(),
        available: false,
        version: None,
        api_version: None,
        error: Some(error),
    }
}

fn write_output(content: &str, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => {
            print!("{}", content);
            if !content.ends_with('\n') {
                println!();
            }
        }
    }
    Ok(())
}

fn exit_code<T>(result: Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => {
            match find_pipeline_error(&e) {
                Some(pipeline_error) => {
                    eprintln!("Error ({}): {:#}", pipeline_error.category(), e)
                }
                None => eprintln!("Error: {:#}", e),
            }
            1
        }
    }
}
