//! Output formatting for plans and reports
//!
//! Every command renders through `OutputFormatter`, so the same data is
//! available as human-readable text, JSON or YAML. Plans can additionally be
//! emitted as the rendered Dockerfile.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::engine::ImageReport;
use crate::output::schema::PipelineSpec;
use crate::pipeline::{BuildPlan, BuildSession, SimulationReport};
use crate::validation::Finding;

const RULE: &str = "\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Yaml,
    Human,
    /// Only meaningful for plans
    Dockerfile,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageView {
    pub name: String,
    pub role: String,
    pub base: String,
    pub instructions: Vec<String>,
}

impl StageView {
    pub fn from_plan(plan: &BuildPlan) -> Vec<StageView> {
        plan.stages
            .iter()
            .map(|stage| StageView {
                name: stage.name.clone(),
                role: stage.role.to_string(),
                base: stage.base.clone(),
                instructions: stage.instructions.iter().map(|i| i.to_string()).collect(),
            })
            .collect()
    }
}

/// Everything `plan` and `check` report about a simulated run
#[derive(Debug, Clone, Serialize)]
pub struct PlanOutput {
    pub project: String,
    pub version: String,
    pub lock_format: String,
    pub locked_packages: usize,
    pub artifact: String,
    pub tag: String,
    pub digest: String,
    pub labels: BTreeMap<String, String>,
    pub stages: Vec<StageView>,
    pub simulation: Option<SimulationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<PipelineSpec>,
    #[serde(skip)]
    pub dockerfile: String,
}

impl PlanOutput {
    pub fn from_session(session: &BuildSession) -> Result<Self> {
        let tree = session
            .tree
            .as_ref()
            .context("run did not inspect the source tree")?;
        let plan = session.plan.as_ref().context("run did not produce a plan")?;
        Ok(Self {
            project: tree.metadata.name.clone(),
            version: tree.metadata.version.clone(),
            lock_format: tree.lock.format.to_string(),
            locked_packages: tree.lock.packages.len(),
            artifact: session
                .artifact
                .as_ref()
                .map(|a| a.path())
                .unwrap_or_default(),
            tag: session.tag.clone().unwrap_or_default(),
            digest: session.digest.clone().unwrap_or_default(),
            labels: session.labels.clone(),
            stages: StageView::from_plan(plan),
            simulation: session.simulation.clone(),
            spec: Some(session.spec.clone()),
            dockerfile: session.dockerfile.clone().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LintReport {
    pub dockerfile: String,
    pub stages: Vec<StageView>,
    pub simulation: Option<SimulationReport>,
    pub findings: Vec<Finding>,
    /// Normalized plan differences against `--compare`
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub drift: Vec<String>,
}

impl LintReport {
    pub fn passed(&self) -> bool {
        self.findings.is_empty() && self.drift.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyOutput {
    pub report: ImageReport,
    pub findings: Vec<Finding>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub tag: String,
    pub image_id: String,
    pub builder_image: Option<String>,
    pub digest: String,
    pub verified: bool,
    pub duration_ms: u128,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub engine: String,
    pub available: bool,
    pub version: Option<String>,
    pub api_version: Option<String>,
    pub error: Option<String>,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_plan(&self, plan: &PlanOutput) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(plan).context("Failed to serialize plan to JSON")
            }
            OutputFormat::Yaml => {
                serde_yaml::to_string(plan).context("Failed to serialize plan to YAML")
            }
            OutputFormat::Human => Ok(self.format_plan_human(plan)),
            OutputFormat::Dockerfile => Ok(plan.dockerfile.clone()),
        }
    }

    pub fn format_check(&self, plan: &PlanOutput) -> Result<String> {
        match self.format {
            OutputFormat::Human => Ok(self.format_check_human(plan)),
            OutputFormat::Dockerfile => bail!("check output cannot be a Dockerfile"),
            _ => {
                let mut plan = plan.clone();
                plan.spec = None;
                self.format_plan(&plan)
            }
        }
    }

    pub fn format_lint(&self, report: &LintReport) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report)
                .context("Failed to serialize lint report to JSON"),
            OutputFormat::Yaml => {
                serde_yaml::to_string(report).context("Failed to serialize lint report to YAML")
            }
            OutputFormat::Human => Ok(self.format_lint_human(report)),
            OutputFormat::Dockerfile => bail!("lint output cannot be a Dockerfile"),
        }
    }

    pub fn format_verify(&self, output: &VerifyOutput) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(output)
                .context("Failed to serialize image report to JSON"),
            OutputFormat::Yaml => serde_yaml::to_string(output)
                .context("Failed to serialize image report to YAML"),
            OutputFormat::Human => Ok(self.format_verify_human(output)),
            OutputFormat::Dockerfile => bail!("verify output cannot be a Dockerfile"),
        }
    }

    pub fn format_build(&self, summary: &BuildSummary) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(summary)
                .context("Failed to serialize build summary to JSON"),
            OutputFormat::Yaml => serde_yaml::to_string(summary)
                .context("Failed to serialize build summary to YAML"),
            OutputFormat::Human => Ok(self.format_build_human(summary)),
            OutputFormat::Dockerfile => bail!("build output cannot be a Dockerfile"),
        }
    }

    pub fn format_health(
        &self,
        status: &HealthStatus,
        config: &HashMap<String, String>,
    ) -> Result<String> {
        let config: BTreeMap<_, _> = config.iter().collect();
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "engine": status,
                "configuration": config,
            }))
            .context("Failed to serialize health status to JSON"),
            OutputFormat::Yaml => serde_yaml::to_string(&serde_json::json!({
                "engine": status,
                "configuration": config,
            }))
            .context("Failed to serialize health status to YAML"),
            OutputFormat::Human => {
                let mut output = String::new();
                if status.available {
                    output.push_str(&format!(
                        "\u{2713} {} engine available (version {}, API {})\n",
                        status.engine,
                        status.version.as_deref().unwrap_or("unknown"),
                        status.api_version.as_deref().unwrap_or("unknown"),
                    ));
                } else {
                    output.push_str(&format!("\u{2717} {} engine unavailable\n", status.engine));
                    if let Some(error) = &status.error {
                        output.push_str(&format!("  {}\n", error));
                    }
                }
                output.push_str("\nConfiguration:\n");
                for (key, value) in config {
                    output.push_str(&format!("  {}: {}\n", key, value));
                }
                Ok(output)
            }
            OutputFormat::Dockerfile => bail!("health output cannot be a Dockerfile"),
        }
    }

    fn format_plan_human(&self, plan: &PlanOutput) -> String {
        let mut output = String::new();
        output.push_str(&format!("\u{2713} Pipeline Plan: {} {}\n", plan.project, plan.version));
        output.push_str(RULE);
        output.push_str("\n\n");

        output.push_str(&format!("Image:     {}\n", plan.tag));
        output.push_str(&format!("Artifact:  {}\n", plan.artifact));
        output.push_str(&format!(
            "Lock:      {} ({} packages)\n",
            plan.lock_format, plan.locked_packages
        ));
        output.push_str(&format!("Digest:    {}\n\n", plan.digest));

        for stage in &plan.stages {
            output.push_str(&format!(
                "Stage {} ({}) from {}:\n",
                stage.name, stage.role, stage.base
            ));
            let body: Vec<_> = stage.instructions.iter().skip(1).collect();
            for (i, instruction) in body.iter().enumerate() {
                let connector = if i == body.len() - 1 {
                    "\u{2514}"
                } else {
                    "\u{251C}"
                };
                output.push_str(&format!("{}\u{2500} {}\n", connector, instruction));
            }
            output.push('\n');
        }

        if let Some(simulation) = &plan.simulation {
            output.push_str(&self.format_simulation_human(simulation));
        }
        output
    }

    fn format_check_human(&self, plan: &PlanOutput) -> String {
        let mut output = String::new();
        output.push_str(&format!(
            "\u{2713} {} {} passed all checks\n",
            plan.project, plan.version
        ));
        output.push_str(&format!(
            "  lock file:  {} with {} packages\n",
            plan.lock_format, plan.locked_packages
        ));
        output.push_str(&format!("  artifact:   {}\n", plan.artifact));
        if let Some(simulation) = &plan.simulation {
            output.push_str(&format!("  runs as:    {}\n", simulation.runtime_user));
            output.push_str(&format!(
                "  exposes:    {}\n",
                simulation.exposed_ports.join(", ")
            ));
        }
        output
    }

    fn format_simulation_human(&self, simulation: &SimulationReport) -> String {
        let mut output = String::from("Simulation:\n");
        output.push_str(&format!(
            "\u{251C}\u{2500} Builder '{}' produces: {}\n",
            simulation.builder_stage,
            simulation.artifacts.join(", ")
        ));
        output.push_str(&format!(
            "\u{251C}\u{2500} Runtime '{}' runs as: {}\n",
            simulation.runtime_stage, simulation.runtime_user
        ));
        output.push_str(&format!(
            "\u{251C}\u{2500} Exposes: {}\n",
            simulation.exposed_ports.join(", ")
        ));
        output.push_str(&format!(
            "\u{2514}\u{2500} Command: {}\n",
            simulation.command.join(" ")
        ));
        output
    }

    fn format_lint_human(&self, report: &LintReport) -> String {
        let mut output = String::new();
        if report.passed() {
            output.push_str(&format!("\u{2713} {} passed lint\n", report.dockerfile));
        } else {
            output.push_str(&format!(
                "\u{26A0} {}: {} finding(s)\n",
                report.dockerfile,
                report.findings.len() + report.drift.len()
            ));
        }
        output.push_str(RULE);
        output.push_str("\n\n");

        for stage in &report.stages {
            output.push_str(&format!(
                "Stage {} ({}) from {}\n",
                stage.name, stage.role, stage.base
            ));
        }
        output.push('\n');

        if let Some(simulation) = &report.simulation {
            output.push_str(&self.format_simulation_human(simulation));
            output.push('\n');
        }

        if !report.findings.is_empty() {
            output.push_str("Findings:\n");
            for finding in &report.findings {
                output.push_str(&format!("  - [{}] {}\n", finding.check, finding.message));
            }
        }
        if !report.drift.is_empty() {
            output.push_str("\nDrift:\n");
            for line in &report.drift {
                output.push_str(&format!("  {}\n", line));
            }
        }
        output
    }

    fn format_verify_human(&self, output: &VerifyOutput) -> String {
        let report = &output.report;
        let mut text = String::new();
        if output.findings.is_empty() {
            text.push_str(&format!("\u{2713} Image {} verified\n", report.id));
        } else {
            text.push_str(&format!(
                "\u{2717} Image {} failed {} check(s)\n",
                report.id,
                output.findings.len()
            ));
        }
        text.push_str(RULE);
        text.push_str("\n\n");
        text.push_str(&format!(
            "User:     {}\n",
            if report.user.is_empty() {
                "(root)"
            } else {
                &report.user
            }
        ));
        text.push_str(&format!("Ports:    {}\n", report.exposed_ports.join(", ")));
        text.push_str(&format!("Command:  {}\n", report.cmd.join(" ")));
        text.push_str(&format!("Workdir:  {}\n", report.working_dir));
        text.push_str(&format!("Layers:   {}\n", report.history.len()));
        if !report.labels.is_empty() {
            text.push_str("Labels:\n");
            for (key, value) in &report.labels {
                text.push_str(&format!("  {}={}\n", key, value));
            }
        }
        if !output.findings.is_empty() {
            text.push_str("\nFindings:\n");
            for finding in &output.findings {
                text.push_str(&format!("  - [{}] {}\n", finding.check, finding.message));
            }
        }
        text
    }

    fn format_build_human(&self, summary: &BuildSummary) -> String {
        let mut output = String::new();
        output.push_str(&format!("\u{2713} Built {}\n", summary.tag));
        output.push_str(&format!("  image:    {}\n", summary.image_id));
        if let Some(builder) = &summary.builder_image {
            output.push_str(&format!("  builder:  {}\n", builder));
        }
        output.push_str(&format!("  digest:   {}\n", summary.digest));
        output.push_str(&format!(
            "  verified: {}\n",
            if summary.verified { "yes" } else { "skipped" }
        ));
        output.push_str(&format!(
            "\nFinished at {} in {}ms\n",
            summary.finished_at, summary.duration_ms
        ));
        output
    }
}
