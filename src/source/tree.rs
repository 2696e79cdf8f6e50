//! Source tree inspection
//!
//! Checks everything the builder stage reads before any instruction runs, so a
//! broken tree fails before the engine is contacted.

use super::lockfile::{LockFile, LockFormat};
use super::metadata::ProjectMetadata;
use super::version::{satisfies, Version};
use crate::error::{PipelineError, PipelineResult};
use crate::fs::FileSystem;
use crate::output::schema::{BuildTool, PipelineSpec};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// The single wheel the builder stage emits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub file_name: String,
    /// Artifact directory inside the builder stage
    pub directory: String,
}

impl BuildArtifact {
    pub fn path(&self) -> String {
        format!("{}/{}", self.directory.trim_end_matches('/'), self.file_name)
    }
}

/// Read-only view of a validated project checkout
#[derive(Debug, Clone)]
pub struct SourceTree {
    pub root: PathBuf,
    pub metadata: ProjectMetadata,
    pub lock: LockFile,
    pub source_dirs: Vec<String>,
    pub extra_files: Vec<String>,
}

impl SourceTree {
    pub fn inspect(
        fs: &dyn FileSystem,
        root: &Path,
        spec: &PipelineSpec,
    ) -> PipelineResult<Self> {
        info!(root = %root.display(), "Inspecting source tree");

        let metadata_path = root.join(&spec.builder.metadata_file);
        if !fs.is_file(&metadata_path) {
            return Err(PipelineError::Packaging(format!(
                "packaging metadata {} not found",
                metadata_path.display()
            )));
        }
        let metadata_content = fs
            .read_to_string(&metadata_path)
            .map_err(|e| PipelineError::Packaging(e.to_string()))?;
        let metadata = ProjectMetadata::parse(&metadata_content)?;
        debug!(name = %metadata.name, version = %metadata.version, "Parsed packaging metadata");

        let lock_rel = spec.builder.effective_lock_file();
        let lock_path = root.join(lock_rel);
        if !fs.is_file(&lock_path) {
            return Err(PipelineError::DependencyResolution(format!(
                "lock file {} not found",
                lock_path.display()
            )));
        }
        let format = LockFormat::from_path(&lock_path).unwrap_or(match spec.builder.tool {
            BuildTool::Poetry => LockFormat::Poetry,
            BuildTool::Uv => LockFormat::Uv,
            BuildTool::Pip => LockFormat::Requirements,
        });
        let lock_content = fs
            .read_to_string(&lock_path)
            .map_err(|e| PipelineError::DependencyResolution(e.to_string()))?;
        let lock = LockFile::parse(format, &lock_content)?;
        lock.resolve(&metadata.dependencies)?;

        for dir in &spec.builder.source_dirs {
            if !fs.is_dir(&root.join(dir.trim_end_matches('/'))) {
                return Err(PipelineError::Packaging(format!(
                    "source directory '{}' not found",
                    dir
                )));
            }
        }
        for file in &spec.builder.extra_files {
            if !fs.is_file(&root.join(file)) {
                return Err(PipelineError::Packaging(format!(
                    "required file '{}' not found",
                    file
                )));
            }
        }

        let tree = Self {
            root: root.to_path_buf(),
            metadata,
            lock,
            source_dirs: spec.builder.source_dirs.clone(),
            extra_files: spec.builder.extra_files.clone(),
        };
        if let Some(module) = spec.launch.app_module() {
            tree.find_module(fs, module)?;
        }

        info!(
            project = %tree.metadata.name,
            locked = tree.lock.packages.len(),
            "Source tree is buildable"
        );
        Ok(tree)
    }

    /// Locate `a.b.c` as `<src>/a/b/c.py` or `<src>/a/b/c/__init__.py`
    fn find_module(&self, fs: &dyn FileSystem, module: &str) -> PipelineResult<PathBuf> {
        let rel: PathBuf = module.split('.').collect();
        for dir in &self.source_dirs {
            let base = self.root.join(dir.trim_end_matches('/')).join(&rel);
            let candidates = [base.with_extension("py"), base.join("__init__.py")];
            if let Some(found) = candidates.into_iter().find(|c| fs.is_file(c)) {
                return Ok(found);
            }
        }
        Err(PipelineError::Packaging(format!(
            "application module '{}' not found under {}",
            module,
            self.source_dirs.join(", ")
        )))
    }

    /// Compare `requires-python` against the interpreter version in a `python:X.Y` image tag.
    ///
    /// A tag without a patch number (`3.12`) floats to the newest patch release,
    /// so it only fails when no `3.12.x` can satisfy the constraint.
    pub fn check_interpreter(&self, base_image: &str) -> PipelineResult<()> {
        let Some(constraint) = self.metadata.requires_python.as_deref() else {
            return Ok(());
        };
        let Some(interpreter) = python_version_from_image(base_image) else {
            debug!(image = %base_image, "Interpreter version not derivable from image");
            return Ok(());
        };
        match interpreter_satisfies(&interpreter, constraint) {
            Some(false) => Err(PipelineError::ArtifactInstall(format!(
                "{} requires Python {} but {} provides {}",
                self.metadata.name, constraint, base_image, interpreter
            ))),
            _ => Ok(()),
        }
    }

    pub fn artifact(&self, artifact_dir: &str) -> BuildArtifact {
        BuildArtifact {
            file_name: self.metadata.wheel_name(),
            directory: artifact_dir.to_string(),
        }
    }
}

/// Highest patch release probed for a floating `X.Y` tag
const MAX_PATCH_RELEASE: u64 = 50;

fn interpreter_satisfies(interpreter: &str, constraint: &str) -> Option<bool> {
    let release = Version::parse(interpreter)?.release().to_vec();
    match release.len() {
        // `python:3` floats across minors; too coarse to judge
        1 => None,
        2 => {
            let mut verdict = Some(false);
            for patch in 0..=MAX_PATCH_RELEASE {
                let candidate = format!("{}.{}.{}", release[0], release[1], patch);
                match satisfies(&candidate, constraint) {
                    Some(false) => continue,
                    other => {
                        verdict = other;
                        break;
                    }
                }
            }
            verdict
        }
        _ => satisfies(interpreter, constraint),
    }
}

fn python_version_from_image(image: &str) -> Option<String> {
    let without_digest = image.split('@').next()?;
    let (repo, tag) = without_digest.rsplit_once(':')?;
    if !repo.rsplit('/').next()?.starts_with("python") {
        return None;
    }
    // `3.12-slim-bookworm`: the variant follows the version
    let numeric = tag
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .next()?
        .trim_end_matches('.');
    let version = Version::parse(numeric)?;
    Some(
        version
            .release()
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join("."),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;

    const PYPROJECT: &str = r#"
[project]
name = "coreason-api"
version = "0.4.0"
requires-python = ">=3.12"
dependencies = ["fastapi>=0.110", "uvicorn>=0.29"]
"#;

    const LOCK: &str = r#"
[[package]]
name = "fastapi"
version = "0.115.6"
files = [{file = "fastapi.whl", hash = "sha256:aa"}]

[[package]]
name = "uvicorn"
version = "0.32.1"
files = [{file = "uvicorn.whl", hash = "sha256:bb"}]
"#;

    fn project() -> MockFileSystem {
        let fs = MockFileSystem::new();
        fs.add_file("/repo/pyproject.toml", PYPROJECT);
        fs.add_file("/repo/poetry.lock", LOCK);
        fs.add_file("/repo/README.md", "# api");
        fs.add_file("/repo/LICENSE", "MIT");
        fs.add_file("/repo/src/coreason_api/__init__.py", "");
        fs.add_file("/repo/src/coreason_api/main.py", "app = object()");
        fs
    }

    #[test]
    fn test_inspect_valid_tree() {
        let fs = project();
        let tree = SourceTree::inspect(&fs, Path::new("/repo"), &PipelineSpec::default()).unwrap();
        assert_eq!(tree.metadata.name, "coreason-api");
        assert_eq!(tree.lock.packages.len(), 2);

        let artifact = tree.artifact("/dist");
        assert_eq!(artifact.path(), "/dist/coreason_api-0.4.0-py3-none-any.whl");
    }

    #[test]
    fn test_missing_lock_is_dependency_error() {
        let fs = project();
        fs.remove("/repo/poetry.lock");
        let err = SourceTree::inspect(&fs, Path::new("/repo"), &PipelineSpec::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::DependencyResolution(_)));
    }

    #[test]
    fn test_lock_missing_declared_dependency() {
        let fs = project();
        fs.add_file(
            "/repo/pyproject.toml",
            PYPROJECT.replace("\"uvicorn>=0.29\"", "\"uvicorn>=0.29\", \"httpx\""),
        );
        let err = SourceTree::inspect(&fs, Path::new("/repo"), &PipelineSpec::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::DependencyResolution(ref m) if m.contains("httpx")));
    }

    #[test]
    fn test_missing_license_is_packaging_error() {
        let fs = project();
        fs.remove("/repo/LICENSE");
        let err = SourceTree::inspect(&fs, Path::new("/repo"), &PipelineSpec::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Packaging(ref m) if m.contains("LICENSE")));
    }

    #[test]
    fn test_missing_app_module_is_packaging_error() {
        let fs = project();
        fs.remove("/repo/src/coreason_api/main.py");
        let err = SourceTree::inspect(&fs, Path::new("/repo"), &PipelineSpec::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Packaging(ref m) if m.contains("coreason_api.main")));
    }

    #[test]
    fn test_app_module_as_package() {
        let fs = project();
        fs.remove("/repo/src/coreason_api/main.py");
        fs.add_file("/repo/src/coreason_api/main/__init__.py", "app = object()");
        assert!(SourceTree::inspect(&fs, Path::new("/repo"), &PipelineSpec::default()).is_ok());
    }

    #[test]
    fn test_interpreter_mismatch() {
        let fs = project();
        let tree = SourceTree::inspect(&fs, Path::new("/repo"), &PipelineSpec::default()).unwrap();
        assert!(tree.check_interpreter("python:3.12-slim").is_ok());
        assert!(tree.check_interpreter("docker.io/library/python:3.13").is_ok());
        assert!(matches!(
            tree.check_interpreter("python:3.11-slim-bookworm"),
            Err(PipelineError::ArtifactInstall(_))
        ));
        assert!(tree.check_interpreter("debian:bookworm-slim").is_ok());
    }

    #[test]
    fn test_floating_tag_accepts_patch_floor() {
        let fs = project();
        fs.add_file(
            "/repo/pyproject.toml",
            PYPROJECT.replace(">=3.12\"", ">=3.12.1\""),
        );
        let tree = SourceTree::inspect(&fs, Path::new("/repo"), &PipelineSpec::default()).unwrap();
        assert!(tree.check_interpreter("python:3.12-slim").is_ok());
        assert!(matches!(
            tree.check_interpreter("python:3.12.0-slim"),
            Err(PipelineError::ArtifactInstall(_))
        ));
        assert!(tree.check_interpreter("python:3").is_ok());
    }

    #[test]
    fn test_interpreter_satisfies_floating_minor() {
        assert_eq!(interpreter_satisfies("3.12", "==3.12.5"), Some(true));
        assert_eq!(interpreter_satisfies("3.12", ">=3.13"), Some(false));
        assert_eq!(interpreter_satisfies("3.12.0", ">=3.12.1"), Some(false));
        assert_eq!(interpreter_satisfies("3", ">=3.12"), None);
    }

    #[test]
    fn test_python_version_from_image() {
        assert_eq!(python_version_from_image("python:3.12-slim").as_deref(), Some("3.12"));
        assert_eq!(
            python_version_from_image("registry:5000/python:3.11.9@sha256:abc").as_deref(),
            Some("3.11.9")
        );
        assert_eq!(
            python_version_from_image("python:3.11-slim-bookworm").as_deref(),
            Some("3.11")
        );
        assert_eq!(python_version_from_image("python:slim"), None);
        assert_eq!(python_version_from_image("ubuntu:24.04"), None);
    }
}
