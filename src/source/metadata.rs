//! Packaging metadata (`pyproject.toml`)

use super::version::normalize_constraint;
use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};

/// A declared third-party dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    /// Normalized distribution name
    pub name: String,
    /// Version constraint, if any (`>=0.110,<1`, `^2.7`)
    pub constraint: Option<String>,
}

impl Requirement {
    /// Parse a PEP 508 requirement string, dropping extras and environment markers
    pub fn parse(spec: &str) -> Option<Self> {
        let without_marker = spec.split(';').next().unwrap_or("").trim();
        let name_end = without_marker
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'))
            .unwrap_or(without_marker.len());
        let name = &without_marker[..name_end];
        if name.is_empty() {
            return None;
        }

        let mut rest = without_marker[name_end..].trim();
        if rest.starts_with('[') {
            rest = rest.find(']').map(|i| rest[i + 1..].trim()).unwrap_or("");
        }
        let rest = rest.trim_start_matches('(').trim_end_matches(')').trim();
        let constraint = if rest.is_empty() {
            None
        } else {
            Some(normalize_constraint(rest))
        };

        Some(Self {
            name: normalize_name(name),
            constraint,
        })
    }
}

/// PEP 503 name normalization: lowercase, runs of `-_.` collapse to `-`
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_sep = false;
    for c in name.trim().chars() {
        if c == '-' || c == '_' || c == '.' {
            if !last_sep {
                out.push('-');
            }
            last_sep = true;
        } else {
            out.push(c.to_ascii_lowercase());
            last_sep = false;
        }
    }
    out
}

/// Project identity and declared dependencies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub name: String,
    pub version: String,
    pub requires_python: Option<String>,
    pub dependencies: Vec<Requirement>,
}

impl ProjectMetadata {
    /// Parse `[project]` (PEP 621) or fall back to `[tool.poetry]`
    pub fn parse(content: &str) -> PipelineResult<Self> {
        let doc: toml::Value = toml::from_str(content)
            .map_err(|e| PipelineError::Packaging(format!("invalid pyproject.toml: {}", e)))?;

        if let Some(project) = doc.get("project") {
            return Self::from_pep621(project);
        }
        if let Some(poetry) = doc.get("tool").and_then(|t| t.get("poetry")) {
            return Self::from_poetry(poetry);
        }

        Err(PipelineError::Packaging(
            "pyproject.toml has neither a [project] nor a [tool.poetry] table".to_string(),
        ))
    }

    fn from_pep621(project: &toml::Value) -> PipelineResult<Self> {
        let name = required_str(project, "name", "[project]")?;
        let version = match project.get("version").and_then(|v| v.as_str()) {
            Some(v) => v.to_string(),
            None => {
                let dynamic = project
                    .get("dynamic")
                    .and_then(|d| d.as_array())
                    .map(|d| d.iter().any(|v| v.as_str() == Some("version")))
                    .unwrap_or(false);
                let reason = if dynamic {
                    "[project] version is dynamic; a static version is required for a reproducible artifact"
                } else {
                    "[project] is missing 'version'"
                };
                return Err(PipelineError::Packaging(reason.to_string()));
            }
        };

        let dependencies = project
            .get("dependencies")
            .and_then(|d| d.as_array())
            .map(|deps| {
                deps.iter()
                    .filter_map(|d| d.as_str())
                    .filter_map(Requirement::parse)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            name,
            version,
            requires_python: project
                .get("requires-python")
                .and_then(|v| v.as_str())
                .map(normalize_constraint),
            dependencies,
        })
    }

    fn from_poetry(poetry: &toml::Value) -> PipelineResult<Self> {
        let name = required_str(poetry, "name", "[tool.poetry]")?;
        let version = required_str(poetry, "version", "[tool.poetry]")?;

        let mut requires_python = None;
        let mut dependencies = Vec::new();
        if let Some(table) = poetry.get("dependencies").and_then(|d| d.as_table()) {
            for (dep_name, value) in table {
                let constraint = match value {
                    toml::Value::String(s) => Some(normalize_constraint(s)),
                    toml::Value::Table(t) => t
                        .get("version")
                        .and_then(|v| v.as_str())
                        .map(normalize_constraint),
                    _ => None,
                };
                if dep_name == "python" {
                    requires_python = constraint;
                    continue;
                }
                dependencies.push(Requirement {
                    name: normalize_name(dep_name),
                    constraint,
                });
            }
        }

        Ok(Self {
            name,
            version,
            requires_python,
            dependencies,
        })
    }

    /// Wheel file name the builder stage produces (pure-Python wheel)
    pub fn wheel_name(&self) -> String {
        let dist = normalize_name(&self.name).replace('-', "_");
        format!("{}-{}-py3-none-any.whl", dist, self.version)
    }
}

fn required_str(table: &toml::Value, key: &str, section: &str) -> PipelineResult<String> {
    table
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| PipelineError::Packaging(format!("{} is missing '{}'", section, key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEP621: &str = r#"
[project]
name = "coreason-api"
version = "0.4.0"
requires-python = ">=3.12"
dependencies = [
    "fastapi>=0.110,<1.0",
    "uvicorn[standard] >= 0.29",
    "pydantic-settings",
    "loguru ; python_version >= '3.8'",
]
"#;

    #[test]
    fn test_parse_pep621() {
        let meta = ProjectMetadata::parse(PEP621).unwrap();
        assert_eq!(meta.name, "coreason-api");
        assert_eq!(meta.version, "0.4.0");
        assert_eq!(meta.requires_python.as_deref(), Some(">=3.12"));
        assert_eq!(meta.dependencies.len(), 4);
        assert_eq!(meta.dependencies[0].constraint.as_deref(), Some(">=0.110,<1.0"));
        assert_eq!(meta.dependencies[1].name, "uvicorn");
        assert_eq!(meta.dependencies[1].constraint.as_deref(), Some(">=0.29"));
        assert_eq!(meta.dependencies[2].constraint, None);
        assert_eq!(meta.dependencies[3].name, "loguru");
    }

    #[test]
    fn test_parse_poetry_table() {
        let content = r#"
[tool.poetry]
name = "coreason_api"
version = "0.1.0"

[tool.poetry.dependencies]
python = "^3.12"
fastapi = "^0.115"
Pydantic_Settings = { version = "^2.3", extras = ["dotenv"] }
"#;
        let meta = ProjectMetadata::parse(content).unwrap();
        assert_eq!(meta.requires_python.as_deref(), Some("^3.12"));
        assert_eq!(meta.dependencies.len(), 2);
        assert!(meta
            .dependencies
            .iter()
            .any(|d| d.name == "pydantic-settings" && d.constraint.as_deref() == Some("^2.3")));
    }

    #[test]
    fn test_poetry_space_separated_constraint_keeps_both_bounds() {
        let content = r#"
[tool.poetry]
name = "coreason_api"
version = "0.1.0"

[tool.poetry.dependencies]
python = ">=3.12 <3.14"
fastapi = ">=0.100 <0.110"
"#;
        let meta = ProjectMetadata::parse(content).unwrap();
        assert_eq!(meta.requires_python.as_deref(), Some(">=3.12,<3.14"));
        assert_eq!(
            meta.dependencies[0].constraint.as_deref(),
            Some(">=0.100,<0.110")
        );
    }

    #[test]
    fn test_dynamic_version_is_packaging_error() {
        let content = "[project]\nname = \"x\"\ndynamic = [\"version\"]\n";
        let err = ProjectMetadata::parse(content).unwrap_err();
        assert!(matches!(err, PipelineError::Packaging(ref m) if m.contains("dynamic")));
    }

    #[test]
    fn test_missing_tables_is_packaging_error() {
        let err = ProjectMetadata::parse("[build-system]\nrequires = []\n").unwrap_err();
        assert!(matches!(err, PipelineError::Packaging(_)));
    }

    #[test]
    fn test_invalid_toml_is_packaging_error() {
        assert!(matches!(
            ProjectMetadata::parse("[project"),
            Err(PipelineError::Packaging(_))
        ));
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Pydantic_Settings"), "pydantic-settings");
        assert_eq!(normalize_name("zope..interface"), "zope-interface");
        assert_eq!(normalize_name("coreason-api"), "coreason-api");
    }

    #[test]
    fn test_wheel_name() {
        let meta = ProjectMetadata::parse(PEP621).unwrap();
        assert_eq!(meta.wheel_name(), "coreason_api-0.4.0-py3-none-any.whl");
    }

    #[test]
    fn test_requirement_parse_edge_cases() {
        assert!(Requirement::parse("").is_none());
        let req = Requirement::parse("httpx (>=0.27)").unwrap();
        assert_eq!(req.constraint.as_deref(), Some(">=0.27"));
    }
}
