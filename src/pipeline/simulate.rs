//! Static evaluation of a `BuildPlan`
//!
//! Runs each stage's instructions through a `StageContext` and checks the
//! properties the produced image must have, without contacting an engine.

use super::plan::{BuildPlan, Stage, StageRole};
use super::stage_context::StageContext;
use crate::error::{PipelineError, PipelineResult};
use crate::output::schema::LaunchSpec;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Wheel name used when no source tree is available (linting a recipe)
pub const PLACEHOLDER_ARTIFACT: &str = "app-0.0.0-py3-none-any.whl";

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub builder_stage: String,
    pub artifacts: Vec<String>,
    pub runtime_stage: String,
    pub runtime_user: String,
    pub installed_artifacts: Vec<String>,
    pub exposed_ports: Vec<String>,
    pub command: Vec<String>,
}

pub struct Simulator {
    artifact_name: String,
    launch: Option<LaunchSpec>,
}

impl Simulator {
    pub fn new(artifact_name: impl Into<String>) -> Self {
        Self {
            artifact_name: artifact_name.into(),
            launch: None,
        }
    }

    /// Require the runtime command to match this launch contract exactly
    pub fn with_launch(mut self, launch: LaunchSpec) -> Self {
        self.launch = Some(launch);
        self
    }

    pub fn run_stage(
        &self,
        stage: &Stage,
        completed: &BTreeMap<String, StageContext>,
    ) -> PipelineResult<StageContext> {
        let mut ctx = match completed.get(&stage.base) {
            Some(parent) => StageContext::inherit(parent, &stage.name, stage.role),
            None => StageContext::new(&stage.name, stage.role, &stage.base, &self.artifact_name),
        };
        for instruction in &stage.instructions {
            ctx.apply(instruction, completed)?;
        }
        debug!(
            stage = %stage.name,
            user = %ctx.user,
            artifacts = ctx.artifacts.len(),
            "Stage simulated"
        );
        Ok(ctx)
    }

    /// Builder output must be exactly one artifact file
    pub fn check_builder(&self, ctx: &StageContext) -> PipelineResult<Vec<String>> {
        let artifacts: Vec<String> = ctx.artifacts.iter().cloned().collect();
        match artifacts.len() {
            1 => Ok(artifacts),
            0 => Err(PipelineError::Packaging(format!(
                "stage '{}' produces no build artifact",
                ctx.stage
            ))),
            n => Err(PipelineError::Packaging(format!(
                "stage '{}' produces {} artifacts ({}); exactly one wheel is required",
                ctx.stage,
                n,
                artifacts.join(", ")
            ))),
        }
    }

    pub fn check_runtime(&self, ctx: &StageContext) -> PipelineResult<()> {
        if ctx.is_root() {
            return Err(PipelineError::Privilege(format!(
                "stage '{}' would run the service as '{}'",
                ctx.stage, ctx.user
            )));
        }

        if ctx.installed_artifacts.is_empty() {
            return Err(PipelineError::ArtifactInstall(format!(
                "stage '{}' never installs the build artifact",
                ctx.stage
            )));
        }

        if !ctx.toolchain.is_empty() {
            return Err(PipelineError::Validation(format!(
                "[StageSeparation] stage '{}' contains build-only toolchain: {}",
                ctx.stage,
                ctx.toolchain.iter().cloned().collect::<Vec<_>>().join(", ")
            )));
        }

        self.check_launch(ctx)?;

        // first write by the service identity lands in its working directory
        ctx.check_writable(&ctx.workdir)
    }

    fn check_launch(&self, ctx: &StageContext) -> PipelineResult<()> {
        let [(port, protocol)] = ctx.exposed_ports.as_slice() else {
            return Err(PipelineError::Validation(format!(
                "[NetworkContract] stage '{}' exposes {} ports; exactly one is required",
                ctx.stage,
                ctx.exposed_ports.len()
            )));
        };
        if protocol != "tcp" {
            return Err(PipelineError::Validation(format!(
                "[NetworkContract] port {}/{} must be tcp",
                port, protocol
            )));
        }

        let cmd = ctx.cmd.as_ref().ok_or_else(|| {
            PipelineError::Validation(format!(
                "[LaunchContract] stage '{}' declares no command",
                ctx.stage
            ))
        })?;

        if let Some(ref launch) = self.launch {
            if launch.port != *port {
                return Err(PipelineError::Validation(format!(
                    "[NetworkContract] exposed port {} does not match launch port {}",
                    port, launch.port
                )));
            }
            let expected = launch.command();
            if *cmd != expected {
                return Err(PipelineError::Validation(format!(
                    "[LaunchContract] command {:?} does not match {:?}",
                    cmd, expected
                )));
            }
            return Ok(());
        }

        let (host, bound_port) = bind_address(cmd).ok_or_else(|| {
            PipelineError::Validation(format!(
                "[LaunchContract] command {:?} does not declare a bind address",
                cmd
            ))
        })?;
        if host != "0.0.0.0" {
            return Err(PipelineError::Validation(format!(
                "[LaunchContract] server binds {} instead of 0.0.0.0",
                host
            )));
        }
        if bound_port != *port {
            return Err(PipelineError::Validation(format!(
                "[NetworkContract] server binds port {} but exposes {}",
                bound_port, port
            )));
        }
        Ok(())
    }

    /// Simulate every stage in order and check builder and runtime properties
    pub fn simulate(&self, plan: &BuildPlan) -> PipelineResult<SimulationReport> {
        let builder_name = plan
            .builder()
            .map(|s| s.name.clone())
            .ok_or_else(|| PipelineError::Packaging("plan has no builder stage".to_string()))?;
        let runtime_name = plan
            .runtime()
            .map(|s| s.name.clone())
            .ok_or_else(|| PipelineError::Packaging("plan has no runtime stage".to_string()))?;

        let mut completed: BTreeMap<String, StageContext> = BTreeMap::new();
        let mut artifacts = Vec::new();
        for stage in &plan.stages {
            let ctx = self.run_stage(stage, &completed)?;
            match stage.role {
                StageRole::Builder if stage.name == builder_name => {
                    artifacts = self.check_builder(&ctx)?;
                }
                StageRole::Runtime => self.check_runtime(&ctx)?,
                _ => {}
            }
            completed.insert(stage.name.clone(), ctx);
        }

        let runtime = completed
            .get(&runtime_name)
            .ok_or_else(|| PipelineError::Packaging("runtime stage not simulated".to_string()))?;
        info!(
            artifacts = artifacts.len(),
            user = %runtime.user,
            "Plan simulation passed"
        );

        Ok(SimulationReport {
            builder_stage: builder_name,
            artifacts,
            runtime_stage: runtime_name,
            runtime_user: runtime.user.clone(),
            installed_artifacts: runtime.installed_artifacts.clone(),
            exposed_ports: runtime
                .exposed_ports
                .iter()
                .map(|(p, proto)| format!("{}/{}", p, proto))
                .collect(),
            command: runtime.cmd.clone().unwrap_or_default(),
        })
    }
}

/// Host and port from `--host H --port P` or `--bind H:P` / `-b H:P`
pub fn bind_address(cmd: &[String]) -> Option<(String, u16)> {
    let value = |names: &[&str]| -> Option<String> {
        let mut iter = cmd.iter();
        while let Some(arg) = iter.next() {
            for name in names {
                if arg == name {
                    return iter.next().cloned();
                }
                if let Some(v) = arg.strip_prefix(&format!("{}=", name)) {
                    return Some(v.to_string());
                }
            }
        }
        None
    };

    if let Some(bind) = value(&["--bind", "-b"]) {
        let (host, port) = bind.rsplit_once(':')?;
        return Some((host.to_string(), port.parse().ok()?));
    }
    let host = value(&["--host"])?;
    let port = value(&["--port"])?.parse().ok()?;
    Some((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::schema::PipelineSpec;
    use crate::pipeline::instruction::Instruction;
    use crate::pipeline::planner::PipelinePlanner;

    const WHEEL: &str = "coreason_api-0.4.0-py3-none-any.whl";

    fn simulator(spec: &PipelineSpec) -> Simulator {
        Simulator::new(WHEEL).with_launch(spec.launch.clone())
    }

    #[test]
    fn test_default_plan_simulates_cleanly() {
        let spec = PipelineSpec::default();
        let report = simulator(&spec)
            .simulate(&PipelinePlanner::plan(&spec))
            .unwrap();
        assert_eq!(report.artifacts, vec![format!("/dist/{}", WHEEL)]);
        assert_eq!(report.runtime_user, "appuser");
        assert_eq!(report.installed_artifacts, vec![WHEEL]);
        assert_eq!(report.exposed_ports, vec!["8000/tcp"]);
    }

    #[test]
    fn test_all_tool_flavours_simulate() {
        for tool in [
            crate::output::schema::BuildTool::Poetry,
            crate::output::schema::BuildTool::Uv,
            crate::output::schema::BuildTool::Pip,
        ] {
            let mut spec = PipelineSpec::default();
            spec.builder.tool = tool;
            let result = simulator(&spec).simulate(&PipelinePlanner::plan(&spec));
            assert!(result.is_ok(), "{}: {:?}", tool, result.err());
        }
    }

    fn replace_build_step(plan: &mut BuildPlan, replacement: Option<&str>) {
        let builder = &mut plan.stages[0].instructions;
        let idx = builder
            .iter()
            .position(|i| i.to_string() == "RUN poetry build --format wheel --output /dist")
            .unwrap();
        match replacement {
            Some(run) => builder[idx] = Instruction::Run(run.to_string()),
            None => {
                builder.remove(idx);
            }
        }
    }

    #[test]
    fn test_wheel_and_sdist_is_packaging_error() {
        let spec = PipelineSpec::default();
        let mut plan = PipelinePlanner::plan(&spec);
        replace_build_step(&mut plan, Some("poetry build --output /dist"));
        let err = simulator(&spec).simulate(&plan).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Packaging(ref m) if m.contains("produces 2 artifacts")
        ));
    }

    #[test]
    fn test_builder_without_build_step_is_packaging_error() {
        let spec = PipelineSpec::default();
        let mut plan = PipelinePlanner::plan(&spec);
        replace_build_step(&mut plan, None);
        let err = simulator(&spec).simulate(&plan).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Packaging(ref m) if m.contains("produces no build artifact")
        ));
    }

    #[test]
    fn test_skipped_chown_fails_on_first_write() {
        let spec = PipelineSpec::default();
        let mut plan = PipelinePlanner::plan(&spec);
        plan.stages[1]
            .instructions
            .retain(|i| !i.to_string().starts_with("RUN chown"));
        let err = simulator(&spec).simulate(&plan).unwrap_err();
        assert!(matches!(err, PipelineError::Permission(ref m) if m.contains("/app")));
    }

    #[test]
    fn test_missing_user_switch_is_privilege_error() {
        let spec = PipelineSpec::default();
        let mut plan = PipelinePlanner::plan(&spec);
        plan.stages[1]
            .instructions
            .retain(|i| !matches!(i, Instruction::User(_)));
        assert!(matches!(
            simulator(&spec).simulate(&plan),
            Err(PipelineError::Privilege(_))
        ));
    }

    #[test]
    fn test_toolchain_in_runtime_is_rejected() {
        let mut spec = PipelineSpec::default();
        spec.runtime.packages = vec!["gcc".to_string()];
        let err = simulator(&spec)
            .simulate(&PipelinePlanner::plan(&spec))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(ref m) if m.contains("gcc")));
    }

    #[test]
    fn test_port_mismatch() {
        let spec = PipelineSpec::default();
        let mut plan = PipelinePlanner::plan(&spec);
        for i in plan.stages[1].instructions.iter_mut() {
            if let Instruction::Expose { port, .. } = i {
                *port = 9000;
            }
        }
        assert!(matches!(
            simulator(&spec).simulate(&plan),
            Err(PipelineError::Validation(ref m)) if m.contains("9000")
        ));
    }

    #[test]
    fn test_generic_launch_check_without_contract() {
        let spec = PipelineSpec::default();
        let plan = PipelinePlanner::plan(&spec);
        assert!(Simulator::new(WHEEL).simulate(&plan).is_ok());
    }

    #[test]
    fn test_bind_address_forms() {
        let uvicorn: Vec<String> = ["uvicorn", "a:b", "--host", "0.0.0.0", "--port", "8000"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(bind_address(&uvicorn), Some(("0.0.0.0".to_string(), 8000)));

        let gunicorn: Vec<String> = ["gunicorn", "-b", "0.0.0.0:8080", "a:b"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(bind_address(&gunicorn), Some(("0.0.0.0".to_string(), 8080)));

        let hypercorn: Vec<String> = ["hypercorn", "--bind=127.0.0.1:8000", "a:b"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(bind_address(&hypercorn), Some(("127.0.0.1".to_string(), 8000)));
        assert_eq!(bind_address(&["uvicorn".to_string()]), None);
    }
}
