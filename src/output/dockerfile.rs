//! Dockerfile rendering

use crate::pipeline::instruction::Instruction;
use crate::pipeline::plan::BuildPlan;

const WRAP_WIDTH: usize = 88;

/// Renders a `BuildPlan` as Dockerfile text. Output depends only on the plan,
/// so identical inputs give byte-identical files.
#[derive(Debug, Clone, Default)]
pub struct DockerfileRenderer {
    header: Vec<String>,
}

impl DockerfileRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Comment lines emitted before the first stage
    pub fn with_header(mut self, line: impl Into<String>) -> Self {
        self.header.push(line.into());
        self
    }

    pub fn render(&self, plan: &BuildPlan) -> String {
        let mut out = String::new();
        for line in &self.header {
            out.push_str("# ");
            out.push_str(line);
            out.push('\n');
        }
        if !self.header.is_empty() {
            out.push('\n');
        }

        for (index, stage) in plan.stages.iter().enumerate() {
            if index > 0 {
                out.push('\n');
            }
            for instruction in &stage.instructions {
                out.push_str(&render_instruction(instruction));
                out.push('\n');
            }
        }
        out
    }
}

/// Long unquoted `RUN a && b` chains are wrapped one command per line
fn render_instruction(instruction: &Instruction) -> String {
    let line = instruction.to_string();
    match instruction {
        Instruction::Run(command)
            if line.len() > WRAP_WIDTH && command.contains(" && ") && !command.contains(['"', '\'']) =>
        {
            format!("RUN {}", command.split(" && ").collect::<Vec<_>>().join(" \\\n    && "))
        }
        _ => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::schema::{BuildTool, Healthcheck, PipelineSpec};
    use crate::pipeline::planner::PipelinePlanner;

    #[test]
    fn test_render_default_plan() {
        let plan = PipelinePlanner::plan(&PipelineSpec::default());
        let rendered = DockerfileRenderer::new().render(&plan);
        assert!(rendered.starts_with("FROM python:3.12-slim AS builder\n"));
        assert!(rendered.contains("\n\nFROM python:3.12-slim AS runtime\n"));
        assert!(rendered.contains("RUN poetry build --format wheel --output /dist\n"));
        assert!(rendered.contains("COPY --from=builder /dist /tmp/dist\n"));
        assert!(rendered.contains("USER appuser\nEXPOSE 8000\n"));
        assert!(rendered.ends_with(
            "CMD [\"uvicorn\", \"coreason_api.main:app\", \"--host\", \"0.0.0.0\", \"--port\", \"8000\"]\n"
        ));
    }

    #[test]
    fn test_render_is_deterministic() {
        let mut spec = PipelineSpec::default();
        spec.builder.tool = BuildTool::Uv;
        spec.launch.healthcheck = Some(Healthcheck {
            path: "/health".to_string(),
            interval: Some("30s".to_string()),
            timeout: None,
            retries: Some(3),
        });
        let first = DockerfileRenderer::new().render(&PipelinePlanner::plan(&spec));
        let second = DockerfileRenderer::new().render(&PipelinePlanner::plan(&spec));
        assert_eq!(first, second);
        assert!(first.contains("HEALTHCHECK --interval=30s --retries=3 CMD [\"python\""));
    }

    #[test]
    fn test_header_and_wrapping() {
        let plan = PipelinePlanner::plan(&PipelineSpec::default());
        let rendered = DockerfileRenderer::new()
            .with_header("generated by asgipack")
            .render(&plan);
        assert!(rendered.starts_with("# generated by asgipack\n\nFROM"));
        assert!(rendered.contains(" \\\n    && useradd --system"));
    }
}
