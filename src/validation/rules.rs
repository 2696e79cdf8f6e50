use crate::error::PipelineError;
use crate::output::schema::PipelineSpec;
use crate::pipeline::instruction::{is_toolchain_package, Instruction, RunStep};
use crate::pipeline::plan::{BuildPlan, Stage, StageRole};
use crate::source::version::Version;
use anyhow::Result;
use serde::Serialize;

/// Rule over the pipeline definition
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, spec: &PipelineSpec) -> Result<()>;
}

/// Rule over a planned or parsed build recipe
pub trait PlanRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, plan: &BuildPlan) -> Vec<String>;
}

/// One failed check, reported by lint and image verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub check: String,
    pub message: String,
}

impl Finding {
    pub fn new(check: &str, message: impl Into<String>) -> Self {
        Self {
            check: check.to_string(),
            message: message.into(),
        }
    }
}

pub struct RequiredFieldsRule;

impl ValidationRule for RequiredFieldsRule {
    fn name(&self) -> &'static str {
        "RequiredFields"
    }

    fn validate(&self, spec: &PipelineSpec) -> Result<()> {
        if spec.version.is_empty() {
            anyhow::bail!("Version cannot be empty");
        }
        if spec.launch.server.is_empty() {
            anyhow::bail!("Launch server cannot be empty");
        }
        if spec.builder.source_dirs.is_empty() {
            anyhow::bail!("At least one source directory is required");
        }
        Ok(())
    }
}

pub struct ValidImageNameRule;

impl ValidationRule for ValidImageNameRule {
    fn name(&self) -> &'static str {
        "ValidImageName"
    }

    fn validate(&self, spec: &PipelineSpec) -> Result<()> {
        for (stage, image) in [("Builder", &spec.builder.base), ("Runtime", &spec.runtime.base)] {
            if image.is_empty() {
                anyhow::bail!("{} base image cannot be empty", stage);
            }
            if image.chars().any(char::is_whitespace) {
                anyhow::bail!("{} base image '{}' contains whitespace", stage, image);
            }
        }
        Ok(())
    }
}

pub struct AppReferenceRule;

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl ValidationRule for AppReferenceRule {
    fn name(&self) -> &'static str {
        "AppReference"
    }

    fn validate(&self, spec: &PipelineSpec) -> Result<()> {
        let Some((module, attr)) = spec.launch.app.split_once(':') else {
            anyhow::bail!(
                "Application reference '{}' must have the form module:attribute",
                spec.launch.app
            );
        };
        if !module.split('.').all(is_identifier) || !is_identifier(attr) {
            anyhow::bail!("Application reference '{}' is not a valid Python path", spec.launch.app);
        }
        Ok(())
    }
}

pub struct NonRootIdentityRule;

impl ValidationRule for NonRootIdentityRule {
    fn name(&self) -> &'static str {
        "NonRootIdentity"
    }

    fn validate(&self, spec: &PipelineSpec) -> Result<()> {
        let identity = &spec.runtime.identity;
        if identity.is_root() {
            return Err(PipelineError::Privilege(format!(
                "execution identity {} (uid {}, gid {}) is root",
                identity.owner(),
                identity.uid,
                identity.gid
            ))
            .into());
        }
        if identity.user.is_empty() || identity.group.is_empty() {
            anyhow::bail!("Execution identity needs a user and a group name");
        }
        if !identity.home.starts_with('/') {
            anyhow::bail!("Home directory '{}' must be absolute", identity.home);
        }
        Ok(())
    }
}

pub struct NetworkContractRule;

impl ValidationRule for NetworkContractRule {
    fn name(&self) -> &'static str {
        "NetworkContract"
    }

    fn validate(&self, spec: &PipelineSpec) -> Result<()> {
        if spec.launch.port == 0 {
            anyhow::bail!("Port must be between 1 and 65535");
        }
        if spec.launch.host != "0.0.0.0" {
            anyhow::bail!(
                "Server must bind 0.0.0.0 to be reachable, got {}",
                spec.launch.host
            );
        }
        if let Some(ref healthcheck) = spec.launch.healthcheck {
            if !healthcheck.path.starts_with('/') {
                anyhow::bail!("Healthcheck path '{}' must start with '/'", healthcheck.path);
            }
        }
        Ok(())
    }
}

pub struct AbsolutePathsRule;

impl ValidationRule for AbsolutePathsRule {
    fn name(&self) -> &'static str {
        "AbsolutePaths"
    }

    fn validate(&self, spec: &PipelineSpec) -> Result<()> {
        let paths = [
            ("builder.workdir", &spec.builder.workdir),
            ("builder.artifact_dir", &spec.builder.artifact_dir),
            ("runtime.workdir", &spec.runtime.workdir),
            ("runtime.artifact_dir", &spec.runtime.artifact_dir),
        ];
        for (field, path) in paths {
            if !path.starts_with('/') {
                anyhow::bail!("{} '{}' must be an absolute path", field, path);
            }
        }
        if spec.runtime.artifact_dir.trim_end_matches('/') == spec.runtime.workdir.trim_end_matches('/')
        {
            anyhow::bail!("runtime.artifact_dir must differ from runtime.workdir");
        }
        Ok(())
    }
}

pub struct PinnedToolRule;

impl ValidationRule for PinnedToolRule {
    fn name(&self) -> &'static str {
        "PinnedTool"
    }

    fn validate(&self, spec: &PipelineSpec) -> Result<()> {
        let version = spec.builder.effective_tool_version();
        if version.contains(['*', '<', '>', '=', '~', '^']) || Version::parse(version).is_none() {
            anyhow::bail!(
                "Build tool {} must be pinned to an exact version, got '{}'",
                spec.builder.tool,
                version
            );
        }
        Ok(())
    }
}

pub struct RuntimePackagesRule;

impl ValidationRule for RuntimePackagesRule {
    fn name(&self) -> &'static str {
        "RuntimePackages"
    }

    fn validate(&self, spec: &PipelineSpec) -> Result<()> {
        let toolchain: Vec<&str> = spec
            .runtime
            .packages
            .iter()
            .filter(|p| is_toolchain_package(p))
            .map(String::as_str)
            .collect();
        if !toolchain.is_empty() {
            anyhow::bail!(
                "Runtime packages include build-only toolchain: {}",
                toolchain.join(", ")
            );
        }
        Ok(())
    }
}

fn runtime_stage(plan: &BuildPlan) -> Option<&Stage> {
    plan.runtime()
        .or_else(|| plan.stages.last().filter(|s| s.role != StageRole::Builder))
}

/// Index of the last `USER` instruction in a stage
fn last_user(stage: &Stage) -> Option<(usize, &str)> {
    stage
        .instructions
        .iter()
        .enumerate()
        .rev()
        .find_map(|(i, instr)| match instr {
            Instruction::User(user) => Some((i, user.as_str())),
            _ => None,
        })
}

fn is_root_name(user: &str) -> bool {
    let name = user.split(':').next().unwrap_or("");
    name == "root" || name == "0"
}

pub struct StageSeparationRule;

impl PlanRule for StageSeparationRule {
    fn name(&self) -> &'static str {
        "StageSeparation"
    }

    fn check(&self, plan: &BuildPlan) -> Vec<String> {
        let Some(runtime) = runtime_stage(plan) else {
            return vec!["recipe has no runtime stage".to_string()];
        };
        let mut findings = Vec::new();
        if let Some(parent) = plan.stage(&runtime.base) {
            if parent.role == StageRole::Builder {
                findings.push(format!(
                    "stage '{}' is based on builder stage '{}' and inherits its toolchain",
                    runtime.name, parent.name
                ));
            }
        }
        for step in runtime.instructions.iter().flat_map(Instruction::run_steps) {
            match step {
                RunStep::ToolInstall { packages, .. } => findings.push(format!(
                    "stage '{}' installs build tooling: {}",
                    runtime.name,
                    packages.join(", ")
                )),
                RunStep::SystemPackages(pkgs) => {
                    let toolchain: Vec<String> =
                        pkgs.into_iter().filter(|p| is_toolchain_package(p)).collect();
                    if !toolchain.is_empty() {
                        findings.push(format!(
                            "stage '{}' installs build-only packages: {}",
                            runtime.name,
                            toolchain.join(", ")
                        ));
                    }
                }
                RunStep::ArtifactBuild { tool, .. } => findings.push(format!(
                    "stage '{}' builds artifacts with {}",
                    runtime.name, tool
                )),
                _ => {}
            }
        }
        findings
    }
}

pub struct NonRootUserRule;

impl PlanRule for NonRootUserRule {
    fn name(&self) -> &'static str {
        "NonRootUser"
    }

    fn check(&self, plan: &BuildPlan) -> Vec<String> {
        let Some(runtime) = runtime_stage(plan) else {
            return vec![];
        };
        match last_user(runtime) {
            None => vec![format!("stage '{}' never switches away from root", runtime.name)],
            Some((_, user)) if is_root_name(user) => {
                vec![format!("stage '{}' ends as user '{}'", runtime.name, user)]
            }
            Some(_) => vec![],
        }
    }
}

pub struct IdentityOrderRule;

impl PlanRule for IdentityOrderRule {
    fn name(&self) -> &'static str {
        "IdentityOrder"
    }

    fn check(&self, plan: &BuildPlan) -> Vec<String> {
        let Some(runtime) = runtime_stage(plan) else {
            return vec![];
        };
        let Some((switch, user)) = last_user(runtime) else {
            return vec![];
        };
        if is_root_name(user) {
            return vec![];
        }
        let mut findings = Vec::new();
        for instr in &runtime.instructions[switch + 1..] {
            for step in instr.run_steps() {
                if step.requires_root() {
                    findings.push(format!(
                        "{} after USER {}: {}",
                        step.label(),
                        user,
                        instr
                    ));
                }
            }
        }
        let cmd_index = runtime
            .instructions
            .iter()
            .position(|i| matches!(i, Instruction::Cmd(_)));
        if matches!(cmd_index, Some(c) if c < switch) {
            findings.push(format!("CMD is declared before USER {}", user));
        }
        findings
    }
}

pub struct OwnershipFixRule;

impl PlanRule for OwnershipFixRule {
    fn name(&self) -> &'static str {
        "OwnershipFix"
    }

    fn check(&self, plan: &BuildPlan) -> Vec<String> {
        let Some(runtime) = runtime_stage(plan) else {
            return vec![];
        };
        let Some((switch, user)) = last_user(runtime) else {
            return vec![];
        };
        let name = user.split(':').next().unwrap_or(user);
        let fixed = runtime.instructions[..switch].iter().any(|instr| match instr {
            Instruction::Copy { chown: Some(owner), .. } => owner.split(':').next() == Some(name),
            Instruction::Run(_) => instr.run_steps().iter().any(|step| {
                matches!(step, RunStep::ChangeOwner { owner, .. } if owner.split(':').next() == Some(name))
            }),
            _ => false,
        });
        if fixed {
            vec![]
        } else {
            vec![format!(
                "no ownership change to '{}' precedes USER in stage '{}'",
                name, runtime.name
            )]
        }
    }
}

pub struct SingleExposedPortRule;

impl PlanRule for SingleExposedPortRule {
    fn name(&self) -> &'static str {
        "SingleExposedPort"
    }

    fn check(&self, plan: &BuildPlan) -> Vec<String> {
        let Some(runtime) = runtime_stage(plan) else {
            return vec![];
        };
        let ports: Vec<String> = runtime
            .instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::Expose { port, protocol } => Some(format!("{}/{}", port, protocol)),
                _ => None,
            })
            .collect();
        match ports.as_slice() {
            [port] if port.ends_with("/tcp") => vec![],
            [port] => vec![format!("exposed port {} is not tcp", port)],
            [] => vec!["no port is exposed".to_string()],
            many => vec![format!("{} ports exposed: {}", many.len(), many.join(", "))],
        }
    }
}

pub struct ExecFormCommandRule;

impl PlanRule for ExecFormCommandRule {
    fn name(&self) -> &'static str {
        "ExecFormCommand"
    }

    fn check(&self, plan: &BuildPlan) -> Vec<String> {
        let Some(runtime) = runtime_stage(plan) else {
            return vec![];
        };
        let cmds: Vec<&Vec<String>> = runtime
            .instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::Cmd(args) => Some(args),
                _ => None,
            })
            .collect();
        match cmds.last() {
            None => vec![format!("stage '{}' declares no CMD", runtime.name)],
            Some(args) if args.first().map(String::as_str) == Some("/bin/sh") => vec![
                "CMD uses shell form; the server would not receive signals as PID 1".to_string(),
            ],
            Some(_) => vec![],
        }
    }
}

pub struct PinnedBaseImageRule;

impl PlanRule for PinnedBaseImageRule {
    fn name(&self) -> &'static str {
        "PinnedBaseImage"
    }

    fn check(&self, plan: &BuildPlan) -> Vec<String> {
        plan.stages
            .iter()
            .filter(|s| plan.stage(&s.base).is_none() && s.base != "scratch")
            .filter_map(|s| {
                let tag = s
                    .base
                    .rsplit('/')
                    .next()
                    .and_then(|last| last.split_once(':'))
                    .map(|(_, tag)| tag);
                match tag {
                    None if !s.base.contains('@') => {
                        Some(format!("stage '{}' base '{}' has no tag", s.name, s.base))
                    }
                    Some("latest") => {
                        Some(format!("stage '{}' base '{}' uses latest", s.name, s.base))
                    }
                    _ => None,
                }
            })
            .collect()
    }
}
