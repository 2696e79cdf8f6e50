//! Lowers a `PipelineSpec` into the two-stage `BuildPlan`

use super::instruction::Instruction;
use super::plan::{BuildPlan, Stage, StageRole};
use crate::output::schema::{BuilderSpec, PipelineSpec, RuntimeSpec};
use tracing::debug;

pub const BUILDER_STAGE: &str = "builder";
pub const RUNTIME_STAGE: &str = "runtime";

pub struct PipelinePlanner;

impl PipelinePlanner {
    pub fn plan(spec: &PipelineSpec) -> BuildPlan {
        let builder = Self::builder_stage(&spec.builder);
        let runtime = Self::runtime_stage(spec);
        debug!(
            builder_steps = builder.instructions.len(),
            runtime_steps = runtime.instructions.len(),
            "Planned build stages"
        );
        BuildPlan {
            stages: vec![builder, runtime],
        }
    }

    fn builder_stage(builder: &BuilderSpec) -> Stage {
        let mut stage = Stage::new(BUILDER_STAGE, StageRole::Builder, &builder.base);
        stage.push(Instruction::Workdir(builder.workdir.clone()));

        let mut env = vec![
            ("PIP_NO_CACHE_DIR".to_string(), "1".to_string()),
            ("PIP_DISABLE_PIP_VERSION_CHECK".to_string(), "1".to_string()),
        ];
        env.extend(builder.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        stage.push(Instruction::Env(env));

        if let Some(run) = system_packages_command(&builder.packages) {
            stage.push(Instruction::Run(run));
        }

        let tool = builder.tool;
        stage.push(Instruction::Run(
            tool.install_command(builder.effective_tool_version()),
        ));

        stage.push(Instruction::Copy {
            from_stage: None,
            chown: None,
            sources: vec![
                builder.metadata_file.clone(),
                builder.effective_lock_file().to_string(),
            ],
            dest: "./".to_string(),
        });
        match tool.lock_check_command() {
            Some(check) => stage.push(Instruction::Run(check)),
            None => stage.push(Instruction::Run(
                tool.dependency_install_command(builder.effective_lock_file()),
            )),
        };

        for dir in &builder.source_dirs {
            let dir = dir.trim_end_matches('/');
            stage.push(Instruction::Copy {
                from_stage: None,
                chown: None,
                sources: vec![format!("{}/", dir)],
                dest: format!("./{}/", dir),
            });
        }
        if !builder.extra_files.is_empty() {
            stage.push(Instruction::Copy {
                from_stage: None,
                chown: None,
                sources: builder.extra_files.clone(),
                dest: "./".to_string(),
            });
        }

        let artifact_dir = builder.artifact_dir.trim_end_matches('/');
        stage.push(Instruction::Run(tool.build_command(artifact_dir)));
        stage.push(Instruction::Run(format!(
            "test \"$(ls {}/*.whl | wc -l)\" -eq 1",
            artifact_dir
        )));
        stage
    }

    fn runtime_stage(spec: &PipelineSpec) -> Stage {
        let runtime: &RuntimeSpec = &spec.runtime;
        let identity = &runtime.identity;
        let mut stage = Stage::new(RUNTIME_STAGE, StageRole::Runtime, &runtime.base);

        let mut env = vec![
            ("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string()),
            ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
        ];
        env.extend(runtime.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        stage.push(Instruction::Env(env));

        if let Some(run) = system_packages_command(&runtime.packages) {
            stage.push(Instruction::Run(run));
        }

        stage.push(Instruction::Run(format!(
            "groupadd --system --gid {gid} {group} && useradd --system --uid {uid} --gid {group} --home-dir {home} --create-home --shell /usr/sbin/nologin {user}",
            gid = identity.gid,
            group = identity.group,
            uid = identity.uid,
            home = identity.home,
            user = identity.user,
        )));

        stage.push(Instruction::Workdir(runtime.workdir.clone()));

        let artifact_dir = runtime.artifact_dir.trim_end_matches('/');
        stage.push(Instruction::Copy {
            from_stage: Some(BUILDER_STAGE.to_string()),
            chown: None,
            sources: vec![spec.builder.artifact_dir.trim_end_matches('/').to_string()],
            dest: artifact_dir.to_string(),
        });
        stage.push(Instruction::Run(format!(
            "pip install --no-cache-dir {dir}/*.whl && rm -rf {dir}",
            dir = artifact_dir
        )));

        stage.push(Instruction::Run(format!(
            "chown -R {} {}",
            identity.owner(),
            runtime.workdir
        )));
        stage.push(Instruction::User(identity.user.clone()));
        stage.push(Instruction::Expose {
            port: spec.launch.port,
            protocol: "tcp".to_string(),
        });

        if let Some(ref healthcheck) = spec.launch.healthcheck {
            stage.push(Instruction::Healthcheck {
                command: healthcheck.command(spec.launch.port),
                interval: healthcheck.interval.clone(),
                timeout: healthcheck.timeout.clone(),
                retries: healthcheck.retries,
            });
        }

        stage.push(Instruction::Cmd(spec.launch.command()));
        stage
    }
}

fn system_packages_command(packages: &[String]) -> Option<String> {
    if packages.is_empty() {
        return None;
    }
    Some(format!(
        "apt-get update && apt-get install -y --no-install-recommends {} && rm -rf /var/lib/apt/lists/*",
        packages.join(" ")
    ))
}
