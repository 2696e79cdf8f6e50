//! Dependency lock file parsing
//!
//! Supports `poetry.lock`, `uv.lock` and hashed `requirements.txt`. A lock file is
//! read once and never mutated; every entry must pin an exact version.

use super::metadata::{normalize_name, Requirement};
use super::version::satisfies;
use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockFormat {
    Poetry,
    Uv,
    Requirements,
}

impl LockFormat {
    /// Guess the format from the lock file name
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        match name {
            "poetry.lock" => Some(LockFormat::Poetry),
            "uv.lock" => Some(LockFormat::Uv),
            n if n.ends_with(".txt") => Some(LockFormat::Requirements),
            _ => None,
        }
    }
}

impl fmt::Display for LockFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LockFormat::Poetry => "poetry.lock",
            LockFormat::Uv => "uv.lock",
            LockFormat::Requirements => "requirements.txt",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedPackage {
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hashes: Vec<String>,
}

/// Parsed lock file, keyed by normalized package name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockFile {
    pub format: LockFormat,
    pub packages: BTreeMap<String, LockedPackage>,
    /// sha256 hex of the raw file content
    pub content_hash: String,
}

pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

impl LockFile {
    pub fn parse(format: LockFormat, content: &str) -> PipelineResult<Self> {
        let packages = match format {
            LockFormat::Poetry | LockFormat::Uv => parse_toml_lock(format, content)?,
            LockFormat::Requirements => parse_requirements(content)?,
        };
        debug!(format = %format, packages = packages.len(), "Parsed lock file");

        Ok(Self {
            format,
            packages,
            content_hash: content_hash(content),
        })
    }

    pub fn get(&self, name: &str) -> Option<&LockedPackage> {
        self.packages.get(&normalize_name(name))
    }

    /// Check every declared requirement is locked at a version inside its constraint
    pub fn resolve(&self, requirements: &[Requirement]) -> PipelineResult<()> {
        for req in requirements {
            let locked = self.get(&req.name).ok_or_else(|| {
                let hint = self
                    .closest_package(&req.name)
                    .map(|c| format!(" (did you mean '{}'?)", c))
                    .unwrap_or_default();
                PipelineError::DependencyResolution(format!(
                    "'{}' is declared but not present in the {} lock file{}",
                    req.name, self.format, hint
                ))
            })?;

            if let Some(ref constraint) = req.constraint {
                match satisfies(&locked.version, constraint) {
                    Some(true) => {}
                    Some(false) => {
                        return Err(PipelineError::DependencyResolution(format!(
                            "'{}' is locked at {} which does not satisfy '{}'",
                            req.name, locked.version, constraint
                        )))
                    }
                    None => {
                        warn!(
                            package = %req.name,
                            version = %locked.version,
                            constraint = %constraint,
                            "Could not interpret constraint, accepting locked version"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    fn closest_package(&self, name: &str) -> Option<&str> {
        let name = normalize_name(name);
        self.packages
            .keys()
            .map(|k| (k.as_str(), strsim::jaro_winkler(&name, k)))
            .filter(|(_, score)| *score >= 0.85)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(k, _)| k)
    }
}

fn parse_toml_lock(
    format: LockFormat,
    content: &str,
) -> PipelineResult<BTreeMap<String, LockedPackage>> {
    let doc: toml::Value = toml::from_str(content).map_err(|e| {
        PipelineError::DependencyResolution(format!("malformed {}: {}", format, e))
    })?;

    let entries = match doc.get("package") {
        Some(toml::Value::Array(entries)) => entries.as_slice(),
        Some(_) => {
            return Err(PipelineError::DependencyResolution(format!(
                "malformed {}: 'package' is not an array of tables",
                format
            )))
        }
        None => &[],
    };

    let mut packages = BTreeMap::new();
    for entry in entries {
        let name = entry.get("name").and_then(|v| v.as_str()).ok_or_else(|| {
            PipelineError::DependencyResolution(format!("{} entry without a name", format))
        })?;

        // uv records the project itself as an editable/virtual source
        if format == LockFormat::Uv {
            let source = entry.get("source");
            let is_local = source
                .map(|s| s.get("editable").is_some() || s.get("virtual").is_some())
                .unwrap_or(false);
            if is_local {
                continue;
            }
        }

        let version = entry
            .get("version")
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                PipelineError::DependencyResolution(format!(
                    "'{}' is not pinned to a version in {}",
                    name, format
                ))
            })?;

        let hashes = collect_hashes(entry);
        if hashes.is_empty() {
            warn!(package = %name, format = %format, "Locked package has no hashes");
        }

        packages.insert(
            normalize_name(name),
            LockedPackage {
                version: version.to_string(),
                hashes,
            },
        );
    }
    Ok(packages)
}

fn collect_hashes(entry: &toml::Value) -> Vec<String> {
    let mut hashes = Vec::new();
    for key in ["files", "wheels"] {
        if let Some(files) = entry.get(key).and_then(|f| f.as_array()) {
            hashes.extend(
                files
                    .iter()
                    .filter_map(|f| f.get("hash").and_then(|h| h.as_str()))
                    .map(str::to_string),
            );
        }
    }
    if let Some(hash) = entry
        .get("sdist")
        .and_then(|s| s.get("hash"))
        .and_then(|h| h.as_str())
    {
        hashes.push(hash.to_string());
    }
    hashes
}

fn parse_requirements(content: &str) -> PipelineResult<BTreeMap<String, LockedPackage>> {
    let mut packages = BTreeMap::new();
    let mut logical = String::new();
    let mut lines: Vec<String> = Vec::new();

    for raw in content.lines() {
        let line = raw.split(" #").next().unwrap_or("").trim_end();
        if let Some(stripped) = line.strip_suffix('\\') {
            logical.push_str(stripped);
            logical.push(' ');
            continue;
        }
        logical.push_str(line);
        lines.push(std::mem::take(&mut logical));
    }
    if !logical.trim().is_empty() {
        lines.push(logical);
    }

    for line in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('-') {
            continue;
        }

        let mut parts = line.split_whitespace();
        let requirement = parts.next().unwrap_or("");
        let hashes: Vec<String> = parts
            .filter_map(|p| p.strip_prefix("--hash="))
            .map(str::to_string)
            .collect();

        let requirement = requirement.split(';').next().unwrap_or("");
        let (name, version) = match requirement.split_once("==") {
            Some((name, version)) if !version.is_empty() && !version.contains('*') => {
                (name, version)
            }
            _ => {
                return Err(PipelineError::DependencyResolution(format!(
                    "'{}' is not pinned with '=='",
                    requirement
                )))
            }
        };
        let name = name.split('[').next().unwrap_or(name);

        if hashes.is_empty() {
            warn!(package = %name, "Requirement has no --hash");
        }

        packages.insert(
            normalize_name(name),
            LockedPackage {
                version: version.to_string(),
                hashes,
            },
        );
    }
    Ok(packages)
}

#[cfg(test)]
mod tests {
    use super::*;

    const POETRY_LOCK: &str = r#"
[[package]]
name = "fastapi"
version = "0.115.6"
description = "FastAPI framework"
optional = false
python-versions = ">=3.8"
files = [
    {file = "fastapi-0.115.6-py3-none-any.whl", hash = "sha256:aaaa"},
    {file = "fastapi-0.115.6.tar.gz", hash = "sha256:bbbb"},
]

[[package]]
name = "Pydantic_Settings"
version = "2.7.0"
files = []

[metadata]
lock-version = "2.0"
python-versions = "^3.12"
content-hash = "abc"
"#;

    const UV_LOCK: &str = r#"
version = 1
requires-python = ">=3.12"

[[package]]
name = "coreason-api"
version = "0.4.0"
source = { editable = "." }

[[package]]
name = "uvicorn"
version = "0.32.1"
source = { registry = "https://pypi.org/simple" }
sdist = { url = "https://example/uvicorn.tar.gz", hash = "sha256:cccc" }
wheels = [{ url = "https://example/uvicorn.whl", hash = "sha256:dddd" }]
"#;

    #[test]
    fn test_parse_poetry_lock() {
        let lock = LockFile::parse(LockFormat::Poetry, POETRY_LOCK).unwrap();
        assert_eq!(lock.packages.len(), 2);
        let fastapi = lock.get("fastapi").unwrap();
        assert_eq!(fastapi.version, "0.115.6");
        assert_eq!(fastapi.hashes, vec!["sha256:aaaa", "sha256:bbbb"]);
        assert!(lock.get("pydantic-settings").is_some());
        assert_eq!(lock.content_hash.len(), 64);
    }

    #[test]
    fn test_parse_uv_lock_skips_project() {
        let lock = LockFile::parse(LockFormat::Uv, UV_LOCK).unwrap();
        assert!(lock.get("coreason-api").is_none());
        let uvicorn = lock.get("uvicorn").unwrap();
        assert_eq!(uvicorn.hashes, vec!["sha256:dddd", "sha256:cccc"]);
    }

    #[test]
    fn test_parse_requirements_with_continuations() {
        let content = "\
# generated
fastapi==0.115.6 \\
    --hash=sha256:aaaa \\
    --hash=sha256:bbbb
uvicorn[standard]==0.32.1 --hash=sha256:cccc  # server
";
        let lock = LockFile::parse(LockFormat::Requirements, content).unwrap();
        assert_eq!(lock.get("fastapi").unwrap().hashes.len(), 2);
        assert_eq!(lock.get("uvicorn").unwrap().version, "0.32.1");
    }

    #[test]
    fn test_unpinned_requirement_rejected() {
        let err = LockFile::parse(LockFormat::Requirements, "fastapi>=0.110\n").unwrap_err();
        assert!(matches!(err, PipelineError::DependencyResolution(ref m) if m.contains("fastapi>=0.110")));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let err = LockFile::parse(LockFormat::Poetry, "[[package]\nname=").unwrap_err();
        assert_eq!(err.category(), "dependency_resolution");
    }

    #[test]
    fn test_content_hash_is_stable() {
        let a = LockFile::parse(LockFormat::Poetry, POETRY_LOCK).unwrap();
        let b = LockFile::parse(LockFormat::Poetry, POETRY_LOCK).unwrap();
        assert_eq!(a.content_hash, b.content_hash);
        assert_ne!(a.content_hash, content_hash("other"));
    }

    #[test]
    fn test_resolve_missing_dependency_suggests_closest() {
        let lock = LockFile::parse(LockFormat::Poetry, POETRY_LOCK).unwrap();
        let reqs = vec![Requirement {
            name: "fastapy".to_string(),
            constraint: None,
        }];
        let err = lock.resolve(&reqs).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'fastapy' is declared but not present"));
        assert!(msg.contains("did you mean 'fastapi'"));
    }

    #[test]
    fn test_resolve_constraint_violation() {
        let lock = LockFile::parse(LockFormat::Poetry, POETRY_LOCK).unwrap();
        let ok = vec![Requirement {
            name: "fastapi".to_string(),
            constraint: Some(">=0.110,<1.0".to_string()),
        }];
        assert!(lock.resolve(&ok).is_ok());

        let bad = vec![Requirement {
            name: "pydantic-settings".to_string(),
            constraint: Some("^3.0".to_string()),
        }];
        assert!(matches!(
            lock.resolve(&bad),
            Err(PipelineError::DependencyResolution(_))
        ));
    }

    #[test]
    fn test_resolve_poetry_range_checks_upper_bound() {
        let lock = LockFile::parse(LockFormat::Poetry, POETRY_LOCK).unwrap();
        let meta = crate::source::ProjectMetadata::parse(
            r#"
[tool.poetry]
name = "coreason_api"
version = "0.4.0"

[tool.poetry.dependencies]
fastapi = ">=0.100 <0.110"
"#,
        )
        .unwrap();

        let err = lock.resolve(&meta.dependencies).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DependencyResolution(ref m) if m.contains("0.115.6") && m.contains("<0.110")
        ));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            LockFormat::from_path(Path::new("x/poetry.lock")),
            Some(LockFormat::Poetry)
        );
        assert_eq!(
            LockFormat::from_path(Path::new("requirements.lock.txt")),
            Some(LockFormat::Requirements)
        );
        assert_eq!(LockFormat::from_path(Path::new("Pipfile.lock")), None);
    }
}
