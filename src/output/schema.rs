//! Pipeline definition schema
//!
//! A `PipelineSpec` is the single parameterized description of the two-stage
//! build: which builder toolchain produces the wheel, which runtime base receives
//! it, which identity the service runs as, and how the ASGI server is launched.
//! Variations between recipes are expressed as parameters on this struct, never
//! as separate hand-maintained recipes.

use crate::source::ProjectMetadata;
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_python_image() -> String {
    "python:3.12-slim".to_string()
}

fn default_app() -> String {
    "coreason_api.main:app".to_string()
}

fn default_server() -> String {
    "uvicorn".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_workdir() -> String {
    "/app".to_string()
}

fn default_artifact_dir() -> String {
    "/dist".to_string()
}

fn default_runtime_artifact_dir() -> String {
    "/tmp/dist".to_string()
}

fn default_source_dirs() -> Vec<String> {
    vec!["src/".to_string()]
}

fn default_extra_files() -> Vec<String> {
    vec!["README.md".to_string(), "LICENSE".to_string()]
}

fn default_metadata_file() -> String {
    "pyproject.toml".to_string()
}

/// Tool that resolves the lock file and packages the wheel in the builder stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BuildTool {
    #[default]
    Poetry,
    Uv,
    Pip,
}

impl BuildTool {
    pub fn name(&self) -> &'static str {
        match self {
            BuildTool::Poetry => "poetry",
            BuildTool::Uv => "uv",
            BuildTool::Pip => "pip",
        }
    }

    /// Lock file this tool consumes
    pub fn lock_file(&self) -> &'static str {
        match self {
            BuildTool::Poetry => "poetry.lock",
            BuildTool::Uv => "uv.lock",
            BuildTool::Pip => "requirements.txt",
        }
    }

    /// Pinned tool version used when the definition leaves it empty
    pub fn default_version(&self) -> &'static str {
        match self {
            BuildTool::Poetry => "2.1.3",
            BuildTool::Uv => "0.7.13",
            BuildTool::Pip => "1.2.2",
        }
    }

    /// Python package that provides the tool inside the builder
    pub fn package(&self) -> &'static str {
        match self {
            BuildTool::Poetry => "poetry",
            BuildTool::Uv => "uv",
            BuildTool::Pip => "build",
        }
    }

    pub fn install_command(&self, version: &str) -> String {
        format!("pip install --no-cache-dir {}=={}", self.package(), version)
    }

    /// Verifies the lock file agrees with the packaging metadata
    pub fn lock_check_command(&self) -> Option<String> {
        match self {
            BuildTool::Poetry => Some("poetry check --lock".to_string()),
            BuildTool::Uv => Some("uv lock --locked".to_string()),
            BuildTool::Pip => None,
        }
    }

    /// Installs third-party dependencies exactly as pinned. `lock_file` is
    /// copied flat into the workdir, so only its file name is referenced.
    pub fn dependency_install_command(&self, lock_file: &str) -> String {
        match self {
            BuildTool::Poetry => {
                "poetry install --no-root --only main --no-interaction".to_string()
            }
            BuildTool::Uv => "uv sync --frozen --no-install-project --no-dev".to_string(),
            BuildTool::Pip => {
                let name = lock_file.rsplit('/').next().unwrap_or(lock_file);
                format!("pip install --no-cache-dir --require-hashes -r {}", name)
            }
        }
    }

    pub fn build_command(&self, artifact_dir: &str) -> String {
        match self {
            BuildTool::Poetry => format!("poetry build --format wheel --output {}", artifact_dir),
            BuildTool::Uv => format!("uv build --wheel --out-dir {}", artifact_dir),
            BuildTool::Pip => format!("python -m build --wheel --outdir {}", artifact_dir),
        }
    }
}

impl fmt::Display for BuildTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Root pipeline definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub metadata: PipelineMetadata,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub builder: BuilderSpec,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub runtime: RuntimeSpec,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub launch: LaunchSpec,
}

impl Default for PipelineSpec {
    fn default() -> Self {
        Self {
            version: default_version(),
            metadata: PipelineMetadata::default(),
            builder: BuilderSpec::default(),
            runtime: RuntimeSpec::default(),
            launch: LaunchSpec::default(),
        }
    }
}

/// Project identity, filled from packaging metadata when absent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PipelineMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_version: Option<String>,
}

/// Builder stage parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuilderSpec {
    #[serde(default = "default_python_image")]
    pub base: String,
    #[serde(default)]
    pub tool: BuildTool,
    /// Pinned tool version; empty means the tool's default pin
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub tool_version: String,
    /// System packages needed to compile native extensions
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub packages: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_workdir")]
    pub workdir: String,
    #[serde(default = "default_metadata_file")]
    pub metadata_file: String,
    /// Lock file path relative to the source root; empty means the tool's default
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub lock_file: String,
    #[serde(default = "default_source_dirs")]
    pub source_dirs: Vec<String>,
    #[serde(default = "default_extra_files")]
    pub extra_files: Vec<String>,
    /// Directory the single wheel is written to
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: String,
}

impl Default for BuilderSpec {
    fn default() -> Self {
        Self {
            base: default_python_image(),
            tool: BuildTool::default(),
            tool_version: String::new(),
            packages: vec![],
            env: BTreeMap::new(),
            workdir: default_workdir(),
            metadata_file: default_metadata_file(),
            lock_file: String::new(),
            source_dirs: default_source_dirs(),
            extra_files: default_extra_files(),
            artifact_dir: default_artifact_dir(),
        }
    }
}

impl BuilderSpec {
    pub fn effective_tool_version(&self) -> &str {
        if self.tool_version.is_empty() {
            self.tool.default_version()
        } else {
            &self.tool_version
        }
    }

    pub fn effective_lock_file(&self) -> &str {
        if self.lock_file.is_empty() {
            self.tool.lock_file()
        } else {
            &self.lock_file
        }
    }
}

/// Non-privileged user/group the service process runs as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionIdentity {
    pub user: String,
    pub group: String,
    pub uid: u32,
    pub gid: u32,
    pub home: String,
}

impl Default for ExecutionIdentity {
    fn default() -> Self {
        Self {
            user: "appuser".to_string(),
            group: "appuser".to_string(),
            uid: 1000,
            gid: 1000,
            home: "/home/appuser".to_string(),
        }
    }
}

impl ExecutionIdentity {
    pub fn is_root(&self) -> bool {
        self.uid == 0 || self.gid == 0 || self.user == "root" || self.group == "root"
    }

    /// `user:group` form used by chown and COPY --chown
    pub fn owner(&self) -> String {
        format!("{}:{}", self.user, self.group)
    }
}

/// Runtime stage parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSpec {
    #[serde(default = "default_python_image")]
    pub base: String,
    /// System packages the service needs at runtime (never build toolchains)
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub packages: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub env: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub identity: ExecutionIdentity,
    #[serde(default = "default_workdir")]
    pub workdir: String,
    /// Where the builder's artifact directory lands inside the runtime stage
    #[serde(default = "default_runtime_artifact_dir")]
    pub artifact_dir: String,
}

impl Default for RuntimeSpec {
    fn default() -> Self {
        Self {
            base: default_python_image(),
            packages: vec![],
            env: BTreeMap::new(),
            identity: ExecutionIdentity::default(),
            workdir: default_workdir(),
            artifact_dir: default_runtime_artifact_dir(),
        }
    }
}

/// Process launch and network contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// ASGI server executable
    #[serde(default = "default_server")]
    pub server: String,
    /// `module:attribute` reference resolving to the application object
    #[serde(default = "default_app")]
    pub app: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub extra_args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<Healthcheck>,
}

impl Default for LaunchSpec {
    fn default() -> Self {
        Self {
            server: default_server(),
            app: default_app(),
            host: default_host(),
            port: default_port(),
            extra_args: vec![],
            healthcheck: None,
        }
    }
}

impl LaunchSpec {
    /// Exec-form launch command
    pub fn command(&self) -> Vec<String> {
        let mut cmd = vec![
            self.server.clone(),
            self.app.clone(),
            "--host".to_string(),
            self.host.clone(),
            "--port".to_string(),
            self.port.to_string(),
        ];
        cmd.extend(self.extra_args.iter().cloned());
        cmd
    }

    /// Module half of the app reference (`coreason_api.main`)
    pub fn app_module(&self) -> Option<&str> {
        self.app.split_once(':').map(|(module, _)| module)
    }
}

/// Container health check probing an HTTP path on the declared port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Healthcheck {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

impl Healthcheck {
    /// Probe using the runtime interpreter so no curl is needed in the image
    pub fn command(&self, port: u16) -> Vec<String> {
        vec![
            "python".to_string(),
            "-c".to_string(),
            format!(
                "import urllib.request; urllib.request.urlopen('http://127.0.0.1:{}{}', timeout=3)",
                port, self.path
            ),
        ]
    }
}

fn format_list(items: &[String], limit: usize) -> String {
    if items.len() > limit {
        format!(
            "{} (and {} more)",
            items[..limit].join(", "),
            items.len() - limit
        )
    } else {
        items.join(", ")
    }
}

impl fmt::Display for PipelineSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pipeline Definition")?;
        writeln!(f, "===================")?;
        if let Some(ref name) = self.metadata.project_name {
            match self.metadata.project_version {
                Some(ref version) => writeln!(f, "Project: {} {}", name, version)?,
                None => writeln!(f, "Project: {}", name)?,
            }
        }
        writeln!(f)?;

        writeln!(f, "Builder Stage:")?;
        writeln!(f, "  Base Image: {}", self.builder.base)?;
        writeln!(
            f,
            "  Tool:       {} {}",
            self.builder.tool,
            self.builder.effective_tool_version()
        )?;
        writeln!(f, "  Lock File:  {}", self.builder.effective_lock_file())?;
        if !self.builder.packages.is_empty() {
            writeln!(f, "  Packages:   {}", format_list(&self.builder.packages, 3))?;
        }
        writeln!(f, "  Artifacts:  {}", self.builder.artifact_dir)?;
        writeln!(f)?;

        writeln!(f, "Runtime Stage:")?;
        writeln!(f, "  Base Image: {}", self.runtime.base)?;
        if !self.runtime.packages.is_empty() {
            writeln!(f, "  Packages:   {}", format_list(&self.runtime.packages, 3))?;
        }
        writeln!(
            f,
            "  Identity:   {} (uid {}, gid {})",
            self.runtime.identity.owner(),
            self.runtime.identity.uid,
            self.runtime.identity.gid
        )?;
        writeln!(f, "  Workdir:    {}", self.runtime.workdir)?;
        writeln!(f, "  Port:       {}", self.launch.port)?;
        writeln!(f, "  Command:    {}", self.launch.command().join(" "))?;
        if let Some(ref healthcheck) = self.launch.healthcheck {
            writeln!(f, "  Healthcheck: GET {}", healthcheck.path)?;
        }

        Ok(())
    }
}

impl PipelineSpec {
    /// Load a definition from a YAML or JSON file, chosen by extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline spec {}", path.display()))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON spec {}", path.display()))
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML spec {}", path.display()))
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize PipelineSpec to YAML")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize PipelineSpec to JSON")
    }

    /// Fill project name/version from packaging metadata when the definition leaves them unset
    pub fn resolve_with(mut self, metadata: &ProjectMetadata) -> Self {
        if self.metadata.project_name.is_none() {
            self.metadata.project_name = Some(metadata.name.clone());
        }
        if self.metadata.project_version.is_none() {
            self.metadata.project_version = Some(metadata.version.clone());
        }
        self
    }

    /// Default image tag, `name:version`
    pub fn image_tag(&self) -> String {
        let name = self
            .metadata
            .project_name
            .as_deref()
            .unwrap_or("app")
            .to_lowercase()
            .replace('_', "-");
        let version = self
            .metadata
            .project_version
            .as_deref()
            .unwrap_or("latest");
        format!("{}:{}", name, version)
    }
}
