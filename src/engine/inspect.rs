//! Built image inspection and verification

use crate::error::{PipelineError, PipelineResult};
use crate::output::schema::PipelineSpec;
use crate::pipeline::instruction::{is_toolchain_package, shell_words, split_commands, RunStep};
use crate::validation::Finding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PLAN_DIGEST_LABEL: &str = "io.asgipack.plan-digest";
pub const LOCK_HASH_LABEL: &str = "io.asgipack.lock-hash";
pub const TITLE_LABEL: &str = "org.opencontainers.image.title";
pub const VERSION_LABEL: &str = "org.opencontainers.image.version";

/// Image configuration as reported by the engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReport {
    pub id: String,
    pub user: String,
    /// `port/protocol`, sorted
    pub exposed_ports: Vec<String>,
    pub cmd: Vec<String>,
    pub entrypoint: Vec<String>,
    pub working_dir: String,
    pub labels: BTreeMap<String, String>,
    /// `created_by` of each layer, oldest first
    pub history: Vec<String>,
}

/// `RUN /bin/sh -c pip install x # buildkit` -> `pip install x`
fn history_command(created_by: &str) -> &str {
    let mut cmd = created_by.trim();
    for prefix in ["RUN ", "|1 ", "/bin/sh -c ", "#(nop) "] {
        cmd = cmd.strip_prefix(prefix).unwrap_or(cmd).trim_start();
    }
    cmd.strip_suffix("# buildkit").unwrap_or(cmd).trim()
}

fn purges_packages(segment: &str) -> bool {
    let words = shell_words(segment);
    let mut words = words.iter().map(String::as_str);
    match words.next() {
        Some("apt-get") | Some("apt") => words.any(|w| w == "purge" || w == "remove"),
        Some("apk") => words.any(|w| w == "del"),
        _ => false,
    }
}

impl ImageReport {
    pub fn runs_as_root(&self) -> bool {
        let name = self.user.split(':').next().unwrap_or("");
        name.is_empty() || name == "root" || name == "0"
    }

    /// Build-only toolchain installs recorded in the layer history. A layer
    /// that purges system packages again (as official interpreter images do
    /// after compiling) leaves nothing behind and is not counted.
    pub fn toolchain_layers(&self) -> Vec<String> {
        self.history
            .iter()
            .filter(|created_by| {
                let segments = split_commands(history_command(created_by));
                let purged = segments.iter().any(|segment| purges_packages(segment));
                segments
                    .iter()
                    .map(|segment| RunStep::classify(segment))
                    .any(|step| match step {
                        RunStep::ToolInstall { .. } => true,
                        RunStep::SystemPackages(pkgs) => {
                            !purged && pkgs.iter().any(|p| is_toolchain_package(p))
                        }
                        _ => false,
                    })
            })
            .cloned()
            .collect()
    }

    /// Every check that fails against the pipeline definition
    pub fn findings(&self, spec: &PipelineSpec, expected_digest: Option<&str>) -> Vec<Finding> {
        let mut findings = Vec::new();

        if self.runs_as_root() {
            findings.push(Finding::new(
                "NonRootUser",
                format!("image runs as '{}'", if self.user.is_empty() { "root" } else { &self.user }),
            ));
        } else if self.user.split(':').next() != Some(spec.runtime.identity.user.as_str())
            && self.user.split(':').next() != Some(spec.runtime.identity.uid.to_string().as_str())
        {
            findings.push(Finding::new(
                "NonRootUser",
                format!(
                    "image user '{}' is not the service identity '{}'",
                    self.user, spec.runtime.identity.user
                ),
            ));
        }

        let expected_port = format!("{}/tcp", spec.launch.port);
        if self.exposed_ports != [expected_port.clone()] {
            findings.push(Finding::new(
                "ExposedPort",
                format!(
                    "exposed ports {:?}, expected exactly [{}]",
                    self.exposed_ports, expected_port
                ),
            ));
        }

        let expected_cmd = spec.launch.command();
        if !self.entrypoint.is_empty() || self.cmd != expected_cmd {
            findings.push(Finding::new(
                "LaunchCommand",
                format!(
                    "entrypoint {:?} cmd {:?}, expected cmd {:?}",
                    self.entrypoint, self.cmd, expected_cmd
                ),
            ));
        }

        for layer in self.toolchain_layers() {
            findings.push(Finding::new(
                "StageSeparation",
                format!("runtime layer installs build toolchain: {}", history_command(&layer)),
            ));
        }

        if let Some(digest) = expected_digest {
            match self.labels.get(PLAN_DIGEST_LABEL) {
                Some(actual) if actual == digest => {}
                Some(actual) => findings.push(Finding::new(
                    "PlanDigest",
                    format!("image digest label {} does not match plan {}", actual, digest),
                )),
                None => findings.push(Finding::new(
                    "PlanDigest",
                    format!("image has no {} label", PLAN_DIGEST_LABEL),
                )),
            }
        }

        findings
    }

    /// Fail on the first finding, mapped to its error category
    pub fn verify(&self, spec: &PipelineSpec, expected_digest: Option<&str>) -> PipelineResult<()> {
        match self.findings(spec, expected_digest).into_iter().next() {
            None => Ok(()),
            Some(f) if f.check == "NonRootUser" => Err(PipelineError::Privilege(f.message)),
            Some(f) => Err(PipelineError::Validation(format!("[{}] {}", f.check, f.message))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good_report() -> ImageReport {
        ImageReport {
            id: "sha256:abc".to_string(),
            user: "appuser".to_string(),
            exposed_ports: vec!["8000/tcp".to_string()],
            cmd: PipelineSpec::default().launch.command(),
            entrypoint: vec![],
            working_dir: "/app".to_string(),
            labels: BTreeMap::from([(PLAN_DIGEST_LABEL.to_string(), "d1".to_string())]),
            history: vec![
                "/bin/sh -c #(nop) ADD file:abc in / ".to_string(),
                "RUN /bin/sh -c pip install --no-cache-dir /tmp/dist/*.whl && rm -rf /tmp/dist # buildkit".to_string(),
                "USER appuser".to_string(),
            ],
        }
    }

    #[test]
    fn test_valid_image_has_no_findings() {
        let report = good_report();
        assert!(report.findings(&PipelineSpec::default(), Some("d1")).is_empty());
        assert!(report.verify(&PipelineSpec::default(), None).is_ok());
    }

    #[test]
    fn test_root_image_is_privilege_error() {
        let mut report = good_report();
        report.user = String::new();
        assert!(report.runs_as_root());
        assert!(matches!(
            report.verify(&PipelineSpec::default(), None),
            Err(PipelineError::Privilege(_))
        ));
    }

    #[test]
    fn test_uid_form_user_accepted() {
        let mut report = good_report();
        report.user = "1000:1000".to_string();
        assert!(report.findings(&PipelineSpec::default(), None).is_empty());
    }

    #[test]
    fn test_toolchain_in_history() {
        let mut report = good_report();
        report
            .history
            .push("RUN /bin/sh -c pip install --no-cache-dir poetry==2.1.3 # buildkit".to_string());
        report
            .history
            .push("RUN /bin/sh -c apt-get update && apt-get install -y gcc # buildkit".to_string());
        report.history.insert(
            0,
            "RUN /bin/sh -c set -eux; apt-get install -y gcc make; make install; apt-get purge -y --auto-remove gcc make".to_string(),
        );
        assert_eq!(report.toolchain_layers().len(), 2);
        let err = report.verify(&PipelineSpec::default(), None).unwrap_err();
        assert!(err.to_string().contains("[StageSeparation]"));
    }

    #[test]
    fn test_port_and_command_findings() {
        let mut report = good_report();
        report.exposed_ports = vec!["8000/tcp".to_string(), "9000/tcp".to_string()];
        report.cmd = vec!["python".to_string(), "-m".to_string(), "app".to_string()];
        let checks: Vec<String> = report
            .findings(&PipelineSpec::default(), Some("other"))
            .into_iter()
            .map(|f| f.check)
            .collect();
        assert_eq!(checks, vec!["ExposedPort", "LaunchCommand", "PlanDigest"]);
    }

    #[test]
    fn test_history_command_strips_prefixes() {
        assert_eq!(
            history_command("RUN /bin/sh -c chown -R appuser:appuser /app # buildkit"),
            "chown -R appuser:appuser /app"
        );
        assert_eq!(history_command("|1 /bin/sh -c echo hi"), "echo hi");
    }
}
