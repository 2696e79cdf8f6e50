//! Dockerfile parsing into a `BuildPlan`
//!
//! Lowers an existing recipe into the same stage/instruction model the planner
//! produces, so hand-written recipes can be simulated and linted.

use crate::pipeline::instruction::{shell_words, Instruction, RunStep};
use crate::pipeline::plan::{BuildPlan, Stage, StageRole};
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

fn from_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:--platform=\S+\s+)?(\S+)(?:\s+as\s+(\S+))?\s*$").expect("valid regex")
    })
}

/// Logical lines with continuations joined and comments dropped
fn logical_lines(content: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut start = 0;

    for (index, raw) in content.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.starts_with('#') {
            continue;
        }
        if current.is_empty() {
            if trimmed.is_empty() {
                continue;
            }
            start = index + 1;
        }
        match trimmed.strip_suffix('\\') {
            Some(head) => {
                current.push_str(head.trim_end());
                current.push(' ');
            }
            None => {
                current.push_str(trimmed);
                lines.push((start, current.trim().to_string()));
                current.clear();
            }
        }
    }
    if !current.trim().is_empty() {
        lines.push((start, current.trim().to_string()));
    }
    lines
}

/// `["a", "b"]` -> `Some(vec!["a", "b"])`
fn json_array(args: &str) -> Option<Vec<String>> {
    if !args.trim_start().starts_with('[') {
        return None;
    }
    serde_json::from_str(args.trim()).ok()
}

fn key_values(args: &str) -> Vec<(String, String)> {
    let words = shell_words(args);
    if words.len() >= 2 && !words[0].contains('=') {
        // legacy `ENV KEY value with spaces`
        let (key, rest) = args.trim().split_once(char::is_whitespace).unwrap_or((args, ""));
        return vec![(key.to_string(), rest.trim().to_string())];
    }
    words
        .into_iter()
        .filter_map(|w| w.split_once('=').map(|(k, v)| (k.to_string(), v.to_string())))
        .collect()
}

fn parse_copy(args: &str) -> Result<Instruction> {
    let mut from_stage = None;
    let mut chown = None;
    let mut rest = Vec::new();
    let words = match json_array(args) {
        Some(words) => words,
        None => shell_words(args),
    };
    for word in words {
        if let Some(stage) = word.strip_prefix("--from=") {
            from_stage = Some(stage.to_string());
        } else if let Some(owner) = word.strip_prefix("--chown=") {
            chown = Some(owner.to_string());
        } else if word.starts_with("--") && rest.is_empty() {
            continue;
        } else {
            rest.push(word);
        }
    }
    let Some(dest) = rest.pop() else {
        bail!("COPY needs at least a source and a destination");
    };
    if rest.is_empty() {
        bail!("COPY needs at least a source and a destination");
    }
    Ok(Instruction::Copy {
        from_stage,
        chown,
        sources: rest,
        dest,
    })
}

fn parse_expose(args: &str) -> Result<Vec<Instruction>> {
    shell_words(args)
        .into_iter()
        .map(|spec| {
            let (port, protocol) = spec.split_once('/').unwrap_or((spec.as_str(), "tcp"));
            let port: u16 = port
                .parse()
                .with_context(|| format!("invalid EXPOSE port '{}'", spec))?;
            Ok(Instruction::Expose {
                port,
                protocol: protocol.to_lowercase(),
            })
        })
        .collect()
}

fn parse_command(args: &str) -> Vec<String> {
    json_array(args).unwrap_or_else(|| {
        vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            args.trim().to_string(),
        ]
    })
}

fn parse_healthcheck(args: &str) -> Instruction {
    let mut interval = None;
    let mut timeout = None;
    let mut retries = None;
    let mut rest = args.trim();

    while let Some(option) = rest.strip_prefix("--") {
        let (word, tail) = option.split_once(char::is_whitespace).unwrap_or((option, ""));
        match word.split_once('=') {
            Some(("interval", v)) => interval = Some(v.to_string()),
            Some(("timeout", v)) => timeout = Some(v.to_string()),
            Some(("retries", v)) => retries = v.parse().ok(),
            _ => {}
        }
        rest = tail.trim_start();
    }

    match rest.split_once(char::is_whitespace) {
        Some((cmd, command)) if cmd.eq_ignore_ascii_case("CMD") => Instruction::Healthcheck {
            command: parse_command(command),
            interval,
            timeout,
            retries,
        },
        _ => Instruction::Other {
            keyword: "HEALTHCHECK".to_string(),
            args: args.trim().to_string(),
        },
    }
}

fn parse_instruction(keyword: &str, args: &str) -> Result<Vec<Instruction>> {
    let instruction = match keyword {
        "WORKDIR" => Instruction::Workdir(args.trim().to_string()),
        "ENV" => Instruction::Env(key_values(args)),
        "LABEL" => Instruction::Label(key_values(args)),
        "ARG" => Instruction::Arg(args.trim().to_string()),
        "COPY" | "ADD" => parse_copy(args)?,
        "RUN" => Instruction::Run(match json_array(args) {
            Some(words) => words.join(" "),
            None => args.trim().to_string(),
        }),
        "USER" => Instruction::User(args.trim().to_string()),
        "EXPOSE" => return parse_expose(args),
        "HEALTHCHECK" => parse_healthcheck(args),
        "CMD" => Instruction::Cmd(parse_command(args)),
        other => Instruction::Other {
            keyword: other.to_string(),
            args: args.trim().to_string(),
        },
    };
    Ok(vec![instruction])
}

/// Assign roles: the last stage is the runtime stage, stages it copies from
/// or that build an artifact are builders
fn infer_roles(stages: &mut [Stage]) {
    let Some(last) = stages.len().checked_sub(1) else {
        return;
    };
    let copied_from: Vec<String> = stages[last]
        .dependencies()
        .into_iter()
        .map(str::to_string)
        .collect();

    for (index, stage) in stages.iter_mut().enumerate() {
        let builds_artifact = stage
            .instructions
            .iter()
            .flat_map(Instruction::run_steps)
            .any(|step| matches!(step, RunStep::ArtifactBuild { .. }));
        stage.role = if index == last {
            StageRole::Runtime
        } else if builds_artifact || copied_from.contains(&stage.name) {
            StageRole::Builder
        } else {
            StageRole::Other
        };
    }
}

/// Parse a Dockerfile into stages. Unnamed stages are named by index.
pub fn parse_dockerfile(content: &str) -> Result<BuildPlan> {
    let mut stages: Vec<Stage> = Vec::new();

    for (line_no, line) in logical_lines(content) {
        let (keyword, args) = line.split_once(char::is_whitespace).unwrap_or((line.as_str(), ""));
        let keyword = keyword.to_uppercase();

        if keyword == "FROM" {
            let caps = from_re()
                .captures(args.trim())
                .with_context(|| format!("line {}: malformed FROM '{}'", line_no, args))?;
            let image = caps[1].to_string();
            let alias = caps.get(2).map(|m| m.as_str().to_string());
            let name = alias.clone().unwrap_or_else(|| stages.len().to_string());
            stages.push(Stage {
                name,
                role: StageRole::Other,
                base: image.clone(),
                instructions: vec![Instruction::From { image, alias }],
            });
            continue;
        }

        let Some(stage) = stages.last_mut() else {
            if keyword == "ARG" {
                continue;
            }
            bail!("line {}: {} before the first FROM", line_no, keyword);
        };
        let instructions = parse_instruction(&keyword, args)
            .with_context(|| format!("line {}: {}", line_no, line))?;
        stage.instructions.extend(instructions);
    }

    if stages.is_empty() {
        bail!("Dockerfile has no FROM instruction");
    }
    infer_roles(&mut stages);
    debug!(stages = stages.len(), "Parsed Dockerfile");
    Ok(BuildPlan { stages })
}
