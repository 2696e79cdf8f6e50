//! Explicit per-stage build state
//!
//! A container build mutates implicit state (current directory, active user,
//! environment, file ownership). `StageContext` makes that state a value that
//! each instruction transforms, so a whole stage can be evaluated as a pure
//! fold over its instructions.

use super::instruction::{is_toolchain_package, Instruction, RunStep};
use super::plan::StageRole;
use crate::error::{PipelineError, PipelineResult};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub const ROOT_USER: &str = "root";
const ANYONE: &str = "*";

/// Tools every Python base image ships with
const BASE_TOOLS: &[&str] = &["python", "pip"];

/// Paths present in any base image, with their owners
const BASE_PATHS: &[(&str, &str)] = &[
    ("/", ROOT_USER),
    ("/tmp", ANYONE),
    ("/usr", ROOT_USER),
    ("/usr/local", ROOT_USER),
    ("/etc", ROOT_USER),
    ("/home", ROOT_USER),
    ("/root", ROOT_USER),
    ("/var", ROOT_USER),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnownUser {
    pub uid: u32,
    pub group: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageContext {
    pub stage: String,
    pub role: StageRole,
    pub base_image: String,
    pub workdir: String,
    /// Active identity
    pub user: String,
    pub env: BTreeMap<String, String>,
    pub users: BTreeMap<String, KnownUser>,
    pub groups: BTreeMap<String, u32>,
    /// Known paths and their owning user
    pub paths: BTreeMap<String, String>,
    pub tools: BTreeSet<String>,
    /// Build-only packages present in this stage
    pub toolchain: BTreeSet<String>,
    /// Artifact files present in this stage
    pub artifacts: BTreeSet<String>,
    /// Artifact files installed into the interpreter
    pub installed_artifacts: Vec<String>,
    pub exposed_ports: Vec<(u16, String)>,
    pub cmd: Option<Vec<String>>,
    pub healthcheck: Option<Vec<String>>,
    /// Set once the stage switches to a non-root identity
    pub identity_switched: bool,
    /// File name of the wheel a build step produces
    pub artifact_name: String,
}

impl StageContext {
    pub fn new(
        stage: impl Into<String>,
        role: StageRole,
        base_image: impl Into<String>,
        artifact_name: impl Into<String>,
    ) -> Self {
        let mut users = BTreeMap::new();
        users.insert(
            ROOT_USER.to_string(),
            KnownUser {
                uid: 0,
                group: ROOT_USER.to_string(),
            },
        );
        let mut groups = BTreeMap::new();
        groups.insert(ROOT_USER.to_string(), 0);

        Self {
            stage: stage.into(),
            role,
            base_image: base_image.into(),
            workdir: "/".to_string(),
            user: ROOT_USER.to_string(),
            env: BTreeMap::new(),
            users,
            groups,
            paths: BASE_PATHS
                .iter()
                .map(|(p, o)| (p.to_string(), o.to_string()))
                .collect(),
            tools: BASE_TOOLS.iter().map(|t| t.to_string()).collect(),
            toolchain: BTreeSet::new(),
            artifacts: BTreeSet::new(),
            installed_artifacts: vec![],
            exposed_ports: vec![],
            cmd: None,
            healthcheck: None,
            identity_switched: false,
            artifact_name: artifact_name.into(),
        }
    }

    /// Start a stage from an earlier stage (`FROM builder AS runtime`)
    pub fn inherit(parent: &StageContext, stage: impl Into<String>, role: StageRole) -> Self {
        let mut ctx = parent.clone();
        ctx.base_image = parent.stage.clone();
        ctx.stage = stage.into();
        ctx.role = role;
        ctx
    }

    pub fn is_root(&self) -> bool {
        self.users
            .get(&self.user)
            .map(|u| u.uid == 0)
            .unwrap_or(false)
    }

    /// Absolute, normalized form of `path` relative to the working directory
    pub fn resolve(&self, path: &str) -> String {
        let joined = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", self.workdir, path)
        };
        let mut parts: Vec<&str> = Vec::new();
        for part in joined.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                p => parts.push(p),
            }
        }
        format!("/{}", parts.join("/"))
    }

    pub fn exists(&self, path: &str) -> bool {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.paths.contains_key(path)
            || self.artifacts.contains(path)
            || self.paths.keys().any(|p| p.starts_with(&prefix))
            || self.artifacts.iter().any(|p| p.starts_with(&prefix))
    }

    /// Owner of the closest known ancestor-or-self
    pub fn owner_of(&self, path: &str) -> &str {
        let mut current = path.to_string();
        loop {
            if let Some(owner) = self.paths.get(&current) {
                return owner;
            }
            match current.rfind('/') {
                Some(0) | None => {
                    return self.paths.get("/").map(|s| s.as_str()).unwrap_or(ROOT_USER)
                }
                Some(idx) => current.truncate(idx),
            }
        }
    }

    /// Fails unless the active identity may write to `path`
    pub fn check_writable(&self, path: &str) -> PipelineResult<()> {
        let target = self.resolve(path);
        if !self.exists(&target) {
            return Err(PipelineError::Permission(format!(
                "stage '{}': write to {} which does not exist",
                self.stage, target
            )));
        }
        if self.is_root() {
            return Ok(());
        }
        let owner = self.owner_of(&target);
        if owner == self.user || owner == ANYONE {
            Ok(())
        } else {
            Err(PipelineError::Permission(format!(
                "stage '{}': '{}' cannot write to {} owned by '{}'",
                self.stage, self.user, target, owner
            )))
        }
    }

    fn nearest_existing(&self, path: &str) -> String {
        let mut current = path.to_string();
        while !self.exists(&current) {
            match current.rfind('/') {
                Some(0) | None => return "/".to_string(),
                Some(idx) => current.truncate(idx),
            }
        }
        current
    }

    /// Record `path` and any missing ancestors as owned by `owner`
    fn create_path(&mut self, path: &str, owner: &str) {
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            if !self.exists(&current) {
                self.paths.insert(current.clone(), owner.to_string());
            }
        }
    }

    fn lookup_user(&self, name_or_uid: &str) -> Option<String> {
        if self.users.contains_key(name_or_uid) {
            return Some(name_or_uid.to_string());
        }
        let uid: u32 = name_or_uid.parse().ok()?;
        self.users
            .iter()
            .find(|(_, u)| u.uid == uid)
            .map(|(name, _)| name.clone())
    }

    /// Apply one instruction. `completed` holds stages that finished earlier.
    pub fn apply(
        &mut self,
        instruction: &Instruction,
        completed: &BTreeMap<String, StageContext>,
    ) -> PipelineResult<()> {
        debug!(stage = %self.stage, user = %self.user, instruction = %instruction, "Applying");
        match instruction {
            Instruction::From { .. }
            | Instruction::Arg(_)
            | Instruction::Label(_)
            | Instruction::Other { .. } => Ok(()),
            Instruction::Workdir(path) => {
                let target = self.resolve(path);
                let owner = self.user.clone();
                self.create_path(&target, &owner);
                self.workdir = target;
                Ok(())
            }
            Instruction::Env(pairs) => {
                for (k, v) in pairs {
                    self.env.insert(k.clone(), v.clone());
                }
                Ok(())
            }
            Instruction::Copy {
                from_stage,
                chown,
                sources,
                dest,
            } => self.apply_copy(from_stage.as_deref(), chown.as_deref(), sources, dest, completed),
            Instruction::Run(_) => {
                for step in instruction.run_steps() {
                    if step.requires_root() && !self.is_root() {
                        return Err(PipelineError::Privilege(format!(
                            "stage '{}': {} requires root but runs as '{}'",
                            self.stage,
                            step.label(),
                            self.user
                        )));
                    }
                    self.apply_step(&step)?;
                }
                Ok(())
            }
            Instruction::User(spec) => self.switch_user(spec),
            Instruction::Expose { port, protocol } => {
                self.exposed_ports.push((*port, protocol.clone()));
                Ok(())
            }
            Instruction::Healthcheck { command, .. } => {
                self.healthcheck = Some(command.clone());
                Ok(())
            }
            Instruction::Cmd(args) => {
                self.cmd = Some(args.clone());
                Ok(())
            }
        }
    }

    fn switch_user(&mut self, spec: &str) -> PipelineResult<()> {
        let name = spec.split(':').next().unwrap_or(spec);
        let resolved = match self.lookup_user(name) {
            Some(user) => user,
            None => match name.parse::<u32>() {
                Ok(uid) => {
                    self.users.insert(
                        name.to_string(),
                        KnownUser {
                            uid,
                            group: name.to_string(),
                        },
                    );
                    name.to_string()
                }
                Err(_) => {
                    return Err(PipelineError::Privilege(format!(
                        "stage '{}': USER {} refers to an identity that was never created",
                        self.stage, spec
                    )))
                }
            },
        };

        let target_is_root = self
            .users
            .get(&resolved)
            .map(|u| u.uid == 0)
            .unwrap_or(false);
        if target_is_root && self.identity_switched {
            return Err(PipelineError::Privilege(format!(
                "stage '{}': re-elevates to root after switching to '{}'",
                self.stage, self.user
            )));
        }

        self.user = resolved;
        if !target_is_root {
            self.identity_switched = true;
        }
        Ok(())
    }

    fn apply_copy(
        &mut self,
        from_stage: Option<&str>,
        chown: Option<&str>,
        sources: &[String],
        dest: &str,
        completed: &BTreeMap<String, StageContext>,
    ) -> PipelineResult<()> {
        let owner = match chown {
            Some(spec) => {
                let name = spec.split(':').next().unwrap_or(spec);
                self.lookup_user(name).ok_or_else(|| {
                    PipelineError::Permission(format!(
                        "stage '{}': COPY --chown={} names an unknown user",
                        self.stage, spec
                    ))
                })?
            }
            None => ROOT_USER.to_string(),
        };
        let dest_path = self.resolve(dest);
        let into_dir = dest.ends_with('/') || sources.len() > 1;

        match from_stage.and_then(|s| completed.get(s)) {
            Some(source_ctx) => {
                for source in sources {
                    let src = source_ctx.resolve(source);
                    if !source_ctx.exists(&src) {
                        return Err(PipelineError::Permission(format!(
                            "stage '{}': COPY --from={} {} does not exist in that stage",
                            self.stage, source_ctx.stage, src
                        )));
                    }
                    let prefix = format!("{}/", src.trim_end_matches('/'));
                    let target_root = if source_ctx.artifacts.contains(&src) && into_dir {
                        format!("{}/{}", dest_path, basename(&src))
                    } else {
                        dest_path.clone()
                    };

                    self.create_path(&target_root, &owner);
                    self.paths.insert(target_root.clone(), owner.clone());
                    for artifact in &source_ctx.artifacts {
                        if artifact == &src {
                            self.artifacts.insert(target_root.clone());
                        } else if let Some(rel) = artifact.strip_prefix(&prefix) {
                            self.artifacts.insert(format!("{}/{}", target_root, rel));
                        }
                    }
                }
            }
            None => {
                if let Some(stage) = from_stage {
                    debug!(stage = %self.stage, from = %stage, "COPY from external image");
                }
                for source in sources {
                    let target = if source.ends_with('/') || !into_dir {
                        dest_path.clone()
                    } else {
                        format!("{}/{}", dest_path, basename(source))
                    };
                    self.create_path(&target, &owner);
                    self.paths.insert(target, owner.clone());
                }
            }
        }
        Ok(())
    }

    fn apply_step(&mut self, step: &RunStep) -> PipelineResult<()> {
        match step {
            RunStep::CreateGroup { name, gid } => {
                if *gid == Some(0) {
                    return Err(PipelineError::Privilege(format!(
                        "stage '{}': group '{}' created with gid 0",
                        self.stage, name
                    )));
                }
                let gid = gid.unwrap_or(next_system_id(self.groups.len()));
                self.groups.insert(name.clone(), gid);
            }
            RunStep::CreateUser {
                name,
                uid,
                group,
                home,
            } => {
                if *uid == Some(0) {
                    return Err(PipelineError::Privilege(format!(
                        "stage '{}': user '{}' created with uid 0",
                        self.stage, name
                    )));
                }
                let group = match group {
                    Some(g) => {
                        let known = self.groups.contains_key(g)
                            || g.parse::<u32>()
                                .map(|gid| self.groups.values().any(|v| *v == gid))
                                .unwrap_or(false);
                        if !known {
                            return Err(PipelineError::Permission(format!(
                                "stage '{}': group '{}' for user '{}' does not exist",
                                self.stage, g, name
                            )));
                        }
                        g.clone()
                    }
                    None => {
                        let next = next_system_id(self.groups.len());
                        self.groups.entry(name.clone()).or_insert(next);
                        name.clone()
                    }
                };
                let uid = uid.unwrap_or(next_system_id(self.users.len()));
                self.users.insert(name.clone(), KnownUser { uid, group });
                if let Some(home) = home {
                    let home = self.resolve(home);
                    self.create_path(&home, name);
                }
            }
            RunStep::ChangeOwner { owner, paths } => {
                let name = owner.split(':').next().unwrap_or(owner);
                let user = self.lookup_user(name).ok_or_else(|| {
                    PipelineError::Permission(format!(
                        "stage '{}': chown to unknown user '{}'",
                        self.stage, owner
                    ))
                })?;
                for path in paths {
                    let target = self.resolve(path);
                    if !self.exists(&target) {
                        return Err(PipelineError::Permission(format!(
                            "stage '{}': chown on {} which does not exist",
                            self.stage, target
                        )));
                    }
                    let prefix = format!("{}/", target);
                    for (p, o) in self.paths.iter_mut() {
                        if *p == target || p.starts_with(&prefix) {
                            *o = user.clone();
                        }
                    }
                    self.paths.insert(target, user.clone());
                }
            }
            RunStep::MakeDir(paths) => {
                for path in paths {
                    let target = self.resolve(path);
                    if self.exists(&target) {
                        continue;
                    }
                    let parent = self.nearest_existing(&target);
                    self.check_writable(&parent)?;
                    let owner = self.user.clone();
                    self.create_path(&target, &owner);
                }
            }
            RunStep::Remove(paths) => {
                for path in paths {
                    let target = self.resolve(path);
                    let prefix = format!("{}/", target);
                    self.paths
                        .retain(|p, _| !(glob_match(&target, p) || p.starts_with(&prefix)));
                    self.artifacts
                        .retain(|p| !(glob_match(&target, p) || p.starts_with(&prefix)));
                }
            }
            RunStep::SystemPackages(packages) | RunStep::ToolInstall { packages, .. } => {
                for pkg in packages {
                    if is_toolchain_package(pkg) {
                        self.toolchain.insert(pkg.to_lowercase());
                    }
                    self.tools.insert(pkg.to_lowercase());
                }
            }
            RunStep::DependencyInstall {
                tool, requirements, ..
            } => {
                self.require_tool(tool)?;
                for file in requirements {
                    let path = self.resolve(file);
                    if !self.exists(&path) {
                        return Err(PipelineError::DependencyResolution(format!(
                            "stage '{}': requirements file {} is not in the image",
                            self.stage, path
                        )));
                    }
                }
                if tool != "pip" {
                    self.require_project_files(tool)?;
                    self.check_writable(&self.workdir.clone())?;
                }
            }
            RunStep::LockCheck { tool } => {
                self.require_tool(tool)?;
                self.require_project_files(tool)?;
            }
            RunStep::ArtifactBuild {
                tool,
                out_dir,
                wheel_only,
            } => {
                self.require_tool(tool)?;
                let metadata = self.resolve("pyproject.toml");
                if !self.exists(&metadata) {
                    return Err(PipelineError::Packaging(format!(
                        "stage '{}': {} build without pyproject.toml in {}",
                        self.stage, tool, self.workdir
                    )));
                }
                let out = self.resolve(out_dir);
                let parent = self.nearest_existing(&out);
                self.check_writable(&parent)?;
                let owner = self.user.clone();
                self.create_path(&out, &owner);
                self.artifacts
                    .insert(format!("{}/{}", out, self.artifact_name));
                if !wheel_only {
                    self.artifacts
                        .insert(format!("{}/{}", out, sdist_name(&self.artifact_name)));
                }
            }
            RunStep::ArtifactInstall { paths, .. } => {
                for pattern in paths {
                    let pattern = self.resolve(pattern);
                    let matched: Vec<String> = self
                        .artifacts
                        .iter()
                        .filter(|a| glob_match(&pattern, a))
                        .cloned()
                        .collect();
                    if matched.is_empty() {
                        return Err(PipelineError::ArtifactInstall(format!(
                            "stage '{}': no build artifact matches {}",
                            self.stage, pattern
                        )));
                    }
                    self.installed_artifacts
                        .extend(matched.iter().map(|m| basename(m).to_string()));
                }
            }
            RunStep::Other(_) => {}
        }
        Ok(())
    }

    fn require_tool(&self, tool: &str) -> PipelineResult<()> {
        if self.tools.contains(tool) {
            Ok(())
        } else {
            Err(PipelineError::Packaging(format!(
                "stage '{}': build tool '{}' is not installed",
                self.stage, tool
            )))
        }
    }

    fn require_project_files(&self, tool: &str) -> PipelineResult<()> {
        let metadata = self.resolve("pyproject.toml");
        if !self.exists(&metadata) {
            return Err(PipelineError::Packaging(format!(
                "stage '{}': pyproject.toml not present in {}",
                self.stage, self.workdir
            )));
        }
        let lock = match tool {
            "poetry" => "poetry.lock",
            "uv" => "uv.lock",
            _ => return Ok(()),
        };
        if !self.exists(&self.resolve(lock)) {
            return Err(PipelineError::DependencyResolution(format!(
                "stage '{}': {} not present in {}",
                self.stage, lock, self.workdir
            )));
        }
        Ok(())
    }
}

fn basename(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

/// `coreason_api-0.4.0-py3-none-any.whl` -> `coreason_api-0.4.0.tar.gz`
fn sdist_name(wheel: &str) -> String {
    let stem = wheel.split("-py").next().unwrap_or(wheel);
    format!("{}.tar.gz", stem)
}

/// System ids count down from 999; a recipe with more identities than that
/// bottoms out at 1 rather than reaching root
fn next_system_id(existing: usize) -> u32 {
    999u32
        .saturating_sub(u32::try_from(existing).unwrap_or(u32::MAX))
        .max(1)
}

/// Single-segment glob: `*` matches anything but `/`
pub fn glob_match(pattern: &str, path: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == path,
        Some((prefix, suffix)) => {
            path.len() >= prefix.len() + suffix.len()
                && path.starts_with(prefix)
                && path.ends_with(suffix)
                && !path[prefix.len()..path.len() - suffix.len()].contains('/')
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHEEL: &str = "coreason_api-0.4.0-py3-none-any.whl";

    fn run(ctx: &mut StageContext, cmd: &str) -> PipelineResult<()> {
        ctx.apply(&Instruction::Run(cmd.to_string()), &BTreeMap::new())
    }

    fn copy(ctx: &mut StageContext, sources: &[&str], dest: &str) {
        ctx.apply(
            &Instruction::Copy {
                from_stage: None,
                chown: None,
                sources: sources.iter().map(|s| s.to_string()).collect(),
                dest: dest.to_string(),
            },
            &BTreeMap::new(),
        )
        .unwrap();
    }

    fn builder() -> StageContext {
        let mut ctx = StageContext::new("builder", StageRole::Builder, "python:3.12-slim", WHEEL);
        ctx.apply(&Instruction::Workdir("/app".to_string()), &BTreeMap::new())
            .unwrap();
        ctx
    }

    #[test]
    fn test_resolve_relative_paths() {
        let ctx = builder();
        assert_eq!(ctx.resolve("./src/"), "/app/src");
        assert_eq!(ctx.resolve("../tmp/x"), "/tmp/x");
        assert_eq!(ctx.resolve("/dist"), "/dist");
    }

    #[test]
    fn test_builder_produces_single_wheel() {
        let mut ctx = builder();
        run(&mut ctx, "pip install --no-cache-dir poetry==2.1.3").unwrap();
        copy(&mut ctx, &["pyproject.toml", "poetry.lock"], "./");
        run(&mut ctx, "poetry check --lock").unwrap();
        run(&mut ctx, "poetry build --format wheel --output /dist").unwrap();
        assert_eq!(
            ctx.artifacts.iter().collect::<Vec<_>>(),
            vec!["/dist/coreason_api-0.4.0-py3-none-any.whl"]
        );
        assert!(ctx.toolchain.contains("poetry"));
    }

    #[test]
    fn test_build_without_format_emits_sdist_too() {
        let mut ctx = builder();
        run(&mut ctx, "pip install poetry==2.1.3").unwrap();
        copy(&mut ctx, &["pyproject.toml", "poetry.lock"], "./");
        run(&mut ctx, "poetry build --output /dist").unwrap();
        assert!(ctx.artifacts.contains("/dist/coreason_api-0.4.0.tar.gz"));
        assert_eq!(ctx.artifacts.len(), 2);
    }

    #[test]
    fn test_pip_requirements_file_must_be_copied() {
        let mut ctx = builder();
        copy(&mut ctx, &["pyproject.toml", "requirements/prod.txt"], "./");
        let err = run(&mut ctx, "pip install --require-hashes -r requirements.txt").unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DependencyResolution(ref m) if m.contains("/app/requirements.txt")
        ));
        run(&mut ctx, "pip install --require-hashes -r prod.txt").unwrap();
    }

    #[test]
    fn test_many_identities_never_reach_root_ids() {
        let mut ctx = builder();
        for i in 0..1005 {
            run(&mut ctx, &format!("groupadd svc{}", i)).unwrap();
            run(&mut ctx, &format!("useradd -g svc{} svc{}", i, i)).unwrap();
        }
        assert_eq!(next_system_id(1005), 1);
        assert!(ctx.groups.values().all(|gid| *gid > 0));
    }

    #[test]
    fn test_missing_tool_is_packaging_error() {
        let mut ctx = builder();
        copy(&mut ctx, &["pyproject.toml", "poetry.lock"], "./");
        let err = run(&mut ctx, "poetry build --format wheel").unwrap_err();
        assert!(matches!(err, PipelineError::Packaging(ref m) if m.contains("'poetry'")));
    }

    #[test]
    fn test_lock_check_without_lock() {
        let mut ctx = builder();
        run(&mut ctx, "pip install poetry==2.1.3").unwrap();
        copy(&mut ctx, &["pyproject.toml"], "./");
        assert!(matches!(
            run(&mut ctx, "poetry check --lock"),
            Err(PipelineError::DependencyResolution(_))
        ));
    }

    #[test]
    fn test_root_step_after_switch_is_privilege_error() {
        let mut ctx = builder();
        run(&mut ctx, "groupadd --gid 1000 app && useradd --uid 1000 --gid app app").unwrap();
        ctx.apply(&Instruction::User("app".to_string()), &BTreeMap::new())
            .unwrap();
        assert!(!ctx.is_root());
        let err = run(&mut ctx, "apt-get install -y curl").unwrap_err();
        assert!(matches!(err, PipelineError::Privilege(_)));
    }

    #[test]
    fn test_re_elevation_rejected() {
        let mut ctx = builder();
        run(&mut ctx, "useradd app").unwrap();
        ctx.apply(&Instruction::User("app".to_string()), &BTreeMap::new())
            .unwrap();
        let err = ctx
            .apply(&Instruction::User("root".to_string()), &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Privilege(ref m) if m.contains("re-elevates")));
    }

    #[test]
    fn test_unknown_user_rejected() {
        let mut ctx = builder();
        assert!(matches!(
            ctx.apply(&Instruction::User("ghost".to_string()), &BTreeMap::new()),
            Err(PipelineError::Privilege(_))
        ));
    }

    #[test]
    fn test_uid_zero_user_rejected() {
        let mut ctx = builder();
        assert!(matches!(
            run(&mut ctx, "useradd --uid 0 sneaky"),
            Err(PipelineError::Privilege(_))
        ));
    }

    #[test]
    fn test_chown_missing_path_is_permission_error() {
        let mut ctx = builder();
        run(&mut ctx, "useradd app").unwrap();
        let err = run(&mut ctx, "chown -R app:app /srv/data").unwrap_err();
        assert!(matches!(err, PipelineError::Permission(ref m) if m.contains("/srv/data")));
    }

    #[test]
    fn test_write_requires_ownership() {
        let mut ctx = builder();
        run(&mut ctx, "useradd app").unwrap();
        ctx.apply(&Instruction::User("app".to_string()), &BTreeMap::new())
            .unwrap();
        assert!(matches!(
            ctx.check_writable("/app"),
            Err(PipelineError::Permission(_))
        ));
        assert!(ctx.check_writable("/tmp").is_ok());
    }

    #[test]
    fn test_chown_grants_write() {
        let mut ctx = builder();
        run(&mut ctx, "useradd app && chown -R app:app /app").unwrap();
        ctx.apply(&Instruction::User("app".to_string()), &BTreeMap::new())
            .unwrap();
        assert!(ctx.check_writable("/app").is_ok());
        assert!(ctx.check_writable("/app/cache").is_err());
    }

    #[test]
    fn test_copy_from_stage_carries_artifacts() {
        let mut b = builder();
        run(&mut b, "pip install poetry==2.1.3").unwrap();
        copy(&mut b, &["pyproject.toml", "poetry.lock"], "./");
        run(&mut b, "poetry build --format wheel --output /dist").unwrap();
        let mut completed = BTreeMap::new();
        completed.insert("builder".to_string(), b);

        let mut rt = StageContext::new("runtime", StageRole::Runtime, "python:3.12-slim", WHEEL);
        rt.apply(
            &Instruction::Copy {
                from_stage: Some("builder".to_string()),
                chown: None,
                sources: vec!["/dist".to_string()],
                dest: "/tmp/dist".to_string(),
            },
            &completed,
        )
        .unwrap();
        assert!(rt.artifacts.contains("/tmp/dist/coreason_api-0.4.0-py3-none-any.whl"));
        assert!(rt.toolchain.is_empty());

        rt.apply(
            &Instruction::Run("pip install --no-cache-dir /tmp/dist/*.whl && rm -rf /tmp/dist".to_string()),
            &completed,
        )
        .unwrap();
        assert_eq!(rt.installed_artifacts, vec![WHEEL]);
        assert!(rt.artifacts.is_empty());
    }

    #[test]
    fn test_copy_from_stage_missing_path() {
        let mut completed = BTreeMap::new();
        completed.insert("builder".to_string(), builder());
        let mut rt = StageContext::new("runtime", StageRole::Runtime, "python:3.12-slim", WHEEL);
        let err = rt
            .apply(
                &Instruction::Copy {
                    from_stage: Some("builder".to_string()),
                    chown: None,
                    sources: vec!["/dist".to_string()],
                    dest: "/tmp/dist".to_string(),
                },
                &completed,
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::Permission(_)));
    }

    #[test]
    fn test_install_without_artifact() {
        let mut ctx = builder();
        assert!(matches!(
            run(&mut ctx, "pip install /tmp/dist/*.whl"),
            Err(PipelineError::ArtifactInstall(_))
        ));
    }

    #[test]
    fn test_inherit_keeps_toolchain() {
        let mut b = builder();
        run(&mut b, "pip install poetry==2.1.3").unwrap();
        let rt = StageContext::inherit(&b, "runtime", StageRole::Runtime);
        assert_eq!(rt.base_image, "builder");
        assert!(rt.toolchain.contains("poetry"));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("/tmp/dist/*.whl", "/tmp/dist/a-1-py3-none-any.whl"));
        assert!(!glob_match("/tmp/dist/*.whl", "/tmp/dist/sub/a.whl"));
        assert!(!glob_match("/tmp/dist/*.whl", "/tmp/dist/a.tar.gz"));
        assert!(glob_match("/tmp/dist", "/tmp/dist"));
    }
}
