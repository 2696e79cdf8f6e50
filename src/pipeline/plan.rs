//! Ordered, named build stages

use super::instruction::Instruction;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageRole {
    Builder,
    Runtime,
    Other,
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageRole::Builder => "builder",
            StageRole::Runtime => "runtime",
            StageRole::Other => "other",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub name: String,
    pub role: StageRole,
    pub base: String,
    /// Every instruction of the stage, starting with its `FROM`
    pub instructions: Vec<Instruction>,
}

impl Stage {
    pub fn new(name: impl Into<String>, role: StageRole, base: impl Into<String>) -> Self {
        let name = name.into();
        let base = base.into();
        Self {
            instructions: vec![Instruction::From {
                image: base.clone(),
                alias: Some(name.clone()),
            }],
            name,
            role,
            base,
        }
    }

    pub fn push(&mut self, instruction: Instruction) -> &mut Self {
        self.instructions.push(instruction);
        self
    }

    /// Names of earlier stages this stage reads from (`FROM stage` or `COPY --from`)
    pub fn dependencies(&self) -> Vec<&str> {
        let mut deps: Vec<&str> = self
            .instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::Copy {
                    from_stage: Some(stage),
                    ..
                } => Some(stage.as_str()),
                _ => None,
            })
            .collect();
        deps.push(self.base.as_str());
        deps
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildPlan {
    pub stages: Vec<Stage>,
}

impl BuildPlan {
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn builder(&self) -> Option<&Stage> {
        self.stages.iter().find(|s| s.role == StageRole::Builder)
    }

    /// The final stage is what the engine tags as the image
    pub fn runtime(&self) -> Option<&Stage> {
        self.stages.last().filter(|s| s.role == StageRole::Runtime)
    }

    /// All instructions in build order, one per line
    pub fn lines(&self) -> Vec<String> {
        self.stages
            .iter()
            .flat_map(|s| s.instructions.iter().map(|i| i.to_string()))
            .collect()
    }

    /// Content hash over the normalized instructions and the lock file hash
    pub fn digest(&self, lock_hash: &str) -> String {
        let mut hasher = Sha256::new();
        for line in self.lines() {
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
        }
        hasher.update(lock_hash.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Instruction-level differences between two plans, stage by stage
    pub fn diff(&self, other: &BuildPlan) -> Vec<String> {
        let mut drift = Vec::new();
        let len = self.stages.len().max(other.stages.len());
        for idx in 0..len {
            match (self.stages.get(idx), other.stages.get(idx)) {
                (Some(a), Some(b)) => {
                    if a.name != b.name {
                        drift.push(format!("stage {}: named '{}' vs '{}'", idx, a.name, b.name));
                    }
                    let a_lines: Vec<String> = a.instructions.iter().map(|i| i.to_string()).collect();
                    let b_lines: Vec<String> = b.instructions.iter().map(|i| i.to_string()).collect();
                    for line in a_lines.iter().filter(|l| !b_lines.contains(l)) {
                        drift.push(format!("stage '{}': only in first: {}", a.name, line));
                    }
                    for line in b_lines.iter().filter(|l| !a_lines.contains(l)) {
                        drift.push(format!("stage '{}': only in second: {}", b.name, line));
                    }
                }
                (Some(a), None) => drift.push(format!("stage '{}' only in first", a.name)),
                (None, Some(b)) => drift.push(format!("stage '{}' only in second", b.name)),
                (None, None) => {}
            }
        }
        drift
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> BuildPlan {
        let mut builder = Stage::new("builder", StageRole::Builder, "python:3.12-slim");
        builder.push(Instruction::Run("poetry build --format wheel --output /dist".to_string()));
        let mut runtime = Stage::new("runtime", StageRole::Runtime, "python:3.12-slim");
        runtime.push(Instruction::Copy {
            from_stage: Some("builder".to_string()),
            chown: None,
            sources: vec!["/dist".to_string()],
            dest: "/tmp/dist".to_string(),
        });
        BuildPlan {
            stages: vec![builder, runtime],
        }
    }

    #[test]
    fn test_stage_lookup() {
        let plan = plan();
        assert_eq!(plan.builder().unwrap().name, "builder");
        assert_eq!(plan.runtime().unwrap().name, "runtime");
        assert!(plan.stage("missing").is_none());
        assert_eq!(plan.runtime().unwrap().dependencies(), vec!["builder", "python:3.12-slim"]);
    }

    #[test]
    fn test_digest_is_deterministic() {
        let a = plan().digest("abc");
        let b = plan().digest("abc");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, plan().digest("def"));
    }

    #[test]
    fn test_diff_reports_changed_lines() {
        let first = plan();
        let mut second = plan();
        second.stages[1].push(Instruction::User("appuser".to_string()));

        assert!(first.diff(&first).is_empty());
        let drift = first.diff(&second);
        assert_eq!(drift, vec!["stage 'runtime': only in second: USER appuser"]);
    }
}
