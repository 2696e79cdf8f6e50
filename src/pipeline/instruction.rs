//! Typed build instructions and shell-step classification
//!
//! `RUN` commands are split into `&&`/`;`/`||` segments and each segment is
//! classified into a `RunStep` so the stage simulation can reason about
//! privilege, ownership and toolchain presence without executing anything.

use std::fmt;

/// Packages that only belong in a builder stage
pub const TOOLCHAIN_PACKAGES: &[&str] = &[
    "poetry",
    "poetry-core",
    "uv",
    "build",
    "pip-tools",
    "hatch",
    "hatchling",
    "pdm",
    "flit",
    "twine",
    "gcc",
    "g++",
    "make",
    "build-essential",
    "libc6-dev",
    "python3-dev",
    "musl-dev",
    "cargo",
    "rustc",
    "git",
];

pub fn is_toolchain_package(name: &str) -> bool {
    let bare = package_name(name);
    TOOLCHAIN_PACKAGES.contains(&bare.as_str())
}

/// Strip version pins and extras: `poetry==2.1.3` -> `poetry`
fn package_name(spec: &str) -> String {
    let end = spec
        .find(|c: char| matches!(c, '=' | '<' | '>' | '~' | '!' | '[' | '@' | ';'))
        .unwrap_or(spec.len());
    spec[..end].trim().to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    From {
        image: String,
        alias: Option<String>,
    },
    Workdir(String),
    Env(Vec<(String, String)>),
    Arg(String),
    Label(Vec<(String, String)>),
    Copy {
        from_stage: Option<String>,
        chown: Option<String>,
        sources: Vec<String>,
        dest: String,
    },
    Run(String),
    User(String),
    Expose {
        port: u16,
        protocol: String,
    },
    Healthcheck {
        command: Vec<String>,
        interval: Option<String>,
        timeout: Option<String>,
        retries: Option<u32>,
    },
    Cmd(Vec<String>),
    Other {
        keyword: String,
        args: String,
    },
}

impl Instruction {
    pub fn keyword(&self) -> &str {
        match self {
            Instruction::From { .. } => "FROM",
            Instruction::Workdir(_) => "WORKDIR",
            Instruction::Env(_) => "ENV",
            Instruction::Arg(_) => "ARG",
            Instruction::Label(_) => "LABEL",
            Instruction::Copy { .. } => "COPY",
            Instruction::Run(_) => "RUN",
            Instruction::User(_) => "USER",
            Instruction::Expose { .. } => "EXPOSE",
            Instruction::Healthcheck { .. } => "HEALTHCHECK",
            Instruction::Cmd(_) => "CMD",
            Instruction::Other { keyword, .. } => keyword.as_str(),
        }
    }

    /// Classified steps of a `RUN`; empty for every other instruction
    pub fn run_steps(&self) -> Vec<RunStep> {
        match self {
            Instruction::Run(command) => split_commands(command)
                .iter()
                .map(|segment| RunStep::classify(segment))
                .collect(),
            _ => vec![],
        }
    }
}

fn quote_value(value: &str) -> String {
    if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c == '"') {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

/// JSON array form used by exec-form `CMD` and `HEALTHCHECK`
pub fn exec_form(args: &[String]) -> String {
    let items: Vec<String> = args
        .iter()
        .map(|a| format!("\"{}\"", a.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("[{}]", items.join(", "))
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::From { image, alias } => match alias {
                Some(alias) => write!(f, "FROM {} AS {}", image, alias),
                None => write!(f, "FROM {}", image),
            },
            Instruction::Workdir(path) => write!(f, "WORKDIR {}", path),
            Instruction::Env(pairs) | Instruction::Label(pairs) => {
                let body: Vec<String> = pairs
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, quote_value(v)))
                    .collect();
                write!(f, "{} {}", self.keyword(), body.join(" "))
            }
            Instruction::Arg(arg) => write!(f, "ARG {}", arg),
            Instruction::Copy {
                from_stage,
                chown,
                sources,
                dest,
            } => {
                write!(f, "COPY")?;
                if let Some(stage) = from_stage {
                    write!(f, " --from={}", stage)?;
                }
                if let Some(owner) = chown {
                    write!(f, " --chown={}", owner)?;
                }
                write!(f, " {} {}", sources.join(" "), dest)
            }
            Instruction::Run(command) => write!(f, "RUN {}", command),
            Instruction::User(user) => write!(f, "USER {}", user),
            Instruction::Expose { port, protocol } => {
                if protocol == "tcp" {
                    write!(f, "EXPOSE {}", port)
                } else {
                    write!(f, "EXPOSE {}/{}", port, protocol)
                }
            }
            Instruction::Healthcheck {
                command,
                interval,
                timeout,
                retries,
            } => {
                write!(f, "HEALTHCHECK")?;
                if let Some(interval) = interval {
                    write!(f, " --interval={}", interval)?;
                }
                if let Some(timeout) = timeout {
                    write!(f, " --timeout={}", timeout)?;
                }
                if let Some(retries) = retries {
                    write!(f, " --retries={}", retries)?;
                }
                write!(f, " CMD {}", exec_form(command))
            }
            Instruction::Cmd(args) => write!(f, "CMD {}", exec_form(args)),
            Instruction::Other { keyword, args } => write!(f, "{} {}", keyword, args),
        }
    }
}

/// Split a shell command on `&&`, `||` and `;` outside of quotes
pub fn split_commands(command: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = command.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                current.push(c);
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    current.push(c);
                }
                ';' => segments.push(std::mem::take(&mut current)),
                '&' | '|' if chars.peek() == Some(&c) => {
                    chars.next();
                    segments.push(std::mem::take(&mut current));
                }
                _ => current.push(c),
            },
        }
    }
    segments.push(current);

    segments
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Whitespace tokenization honoring single and double quotes
pub fn shell_words(segment: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_word = false;

    for c in segment.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                in_word = true;
            }
            None if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

/// Semantic effect of a single shell segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStep {
    CreateGroup {
        name: String,
        gid: Option<u32>,
    },
    CreateUser {
        name: String,
        uid: Option<u32>,
        group: Option<String>,
        home: Option<String>,
    },
    ChangeOwner {
        owner: String,
        paths: Vec<String>,
    },
    MakeDir(Vec<String>),
    Remove(Vec<String>),
    SystemPackages(Vec<String>),
    ToolInstall {
        packages: Vec<String>,
        user_scope: bool,
    },
    DependencyInstall {
        tool: String,
        user_scope: bool,
        /// `-r` files read by pip
        requirements: Vec<String>,
    },
    LockCheck {
        tool: String,
    },
    ArtifactBuild {
        tool: String,
        out_dir: String,
        wheel_only: bool,
    },
    ArtifactInstall {
        paths: Vec<String>,
        user_scope: bool,
    },
    Other(String),
}

/// Flags that consume the following word
fn takes_value(program: &str, flag: &str) -> bool {
    match program {
        "useradd" | "adduser" | "groupadd" | "addgroup" => matches!(
            flag,
            "-u" | "--uid"
                | "-g"
                | "--gid"
                | "-G"
                | "--groups"
                | "--ingroup"
                | "-d"
                | "-h"
                | "--home"
                | "--home-dir"
                | "-s"
                | "--shell"
                | "-c"
                | "--comment"
                | "-K"
                | "-k"
                | "--skel"
        ),
        "pip" => matches!(
            flag,
            "-r" | "--requirement"
                | "-f"
                | "--find-links"
                | "-c"
                | "--constraint"
                | "-i"
                | "--index-url"
                | "--extra-index-url"
                | "-t"
                | "--target"
                | "-w"
                | "--wheel-dir"
                | "--prefix"
                | "--root"
        ),
        _ => matches!(
            flag,
            "-o" | "--output" | "--out-dir" | "--outdir" | "-f" | "--format"
        ),
    }
}

fn flag_value<'a>(args: &'a [String], names: &[&str]) -> Option<&'a str> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        for name in names {
            if arg == name {
                return iter.next().map(|s| s.as_str());
            }
            if let Some(value) = arg.strip_prefix(&format!("{}=", name)) {
                return Some(value);
            }
        }
    }
    None
}

/// Every value of a repeatable flag (`-r a.txt -r b.txt`)
fn flag_values<'a>(args: &'a [String], names: &[&str]) -> Vec<&'a str> {
    let mut values = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        for name in names {
            if arg == name {
                if let Some(value) = iter.next() {
                    values.push(value.as_str());
                }
                break;
            }
            if let Some(value) = arg.strip_prefix(&format!("{}=", name)) {
                values.push(value);
                break;
            }
        }
    }
    values
}

fn has_flag(args: &[String], names: &[&str]) -> bool {
    args.iter().any(|a| names.contains(&a.as_str()))
}

fn positionals(program: &str, args: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut skip = false;
    for arg in args {
        if skip {
            skip = false;
            continue;
        }
        if arg.starts_with('-') {
            skip = !arg.contains('=') && takes_value(program, arg);
            continue;
        }
        out.push(arg.clone());
    }
    out
}

impl RunStep {
    pub fn classify(segment: &str) -> RunStep {
        let words = shell_words(segment);
        let mut words: Vec<String> = words
            .into_iter()
            .skip_while(|w| w.contains('=') && !w.starts_with('-'))
            .collect();
        if words.first().map(|w| w == "sudo" || w == "exec").unwrap_or(false) {
            words.remove(0);
        }
        let Some(first) = words.first() else {
            return RunStep::Other(segment.to_string());
        };
        let program = first.rsplit('/').next().unwrap_or(first).to_string();
        let args = &words[1..];

        match program.as_str() {
            "groupadd" | "addgroup" => {
                let gid = flag_value(args, &["-g", "--gid"]).and_then(|v| v.parse().ok());
                match positionals(&program, args).pop() {
                    Some(name) => RunStep::CreateGroup { name, gid },
                    None => RunStep::Other(segment.to_string()),
                }
            }
            "useradd" | "adduser" => {
                let uid = flag_value(args, &["-u", "--uid"]).and_then(|v| v.parse().ok());
                let group_flags: &[&str] = if program == "adduser" {
                    &["-G", "--ingroup"]
                } else {
                    &["-g", "--gid"]
                };
                let group = flag_value(args, group_flags).map(str::to_string);
                let home = flag_value(args, &["-d", "-h", "--home", "--home-dir"]).map(str::to_string);
                match positionals(&program, args).pop() {
                    Some(name) => RunStep::CreateUser {
                        name,
                        uid,
                        group,
                        home,
                    },
                    None => RunStep::Other(segment.to_string()),
                }
            }
            "chown" => {
                let mut rest = positionals(&program, args).into_iter();
                match rest.next() {
                    Some(owner) => RunStep::ChangeOwner {
                        owner,
                        paths: rest.collect(),
                    },
                    None => RunStep::Other(segment.to_string()),
                }
            }
            "mkdir" => RunStep::MakeDir(positionals(&program, args)),
            "rm" => RunStep::Remove(positionals(&program, args)),
            "apt-get" | "apt" | "apk" | "yum" | "dnf" | "microdnf" => {
                let mut rest = positionals(&program, args).into_iter();
                let sub = rest.next().unwrap_or_default();
                if sub == "install" || sub == "add" {
                    RunStep::SystemPackages(rest.collect())
                } else {
                    RunStep::SystemPackages(vec![])
                }
            }
            "pip" | "pip3" => classify_pip(segment, args),
            "python" | "python3" => {
                if args.first().map(|a| a == "-m").unwrap_or(false) {
                    match args.get(1).map(|s| s.as_str()) {
                        Some("pip") => classify_pip(segment, &args[2..]),
                        Some("build") => RunStep::ArtifactBuild {
                            tool: "build".to_string(),
                            out_dir: flag_value(args, &["--outdir", "-o"])
                                .unwrap_or("dist")
                                .to_string(),
                            wheel_only: has_flag(args, &["--wheel", "-w"]),
                        },
                        _ => RunStep::Other(segment.to_string()),
                    }
                } else {
                    RunStep::Other(segment.to_string())
                }
            }
            "poetry" => match args.first().map(|s| s.as_str()) {
                Some("check") => RunStep::LockCheck {
                    tool: "poetry".to_string(),
                },
                Some("lock") if has_flag(args, &["--check"]) => RunStep::LockCheck {
                    tool: "poetry".to_string(),
                },
                Some("install") | Some("sync") => RunStep::DependencyInstall {
                    tool: "poetry".to_string(),
                    user_scope: false,
                    requirements: Vec::new(),
                },
                Some("build") => RunStep::ArtifactBuild {
                    tool: "poetry".to_string(),
                    out_dir: flag_value(args, &["--output", "-o"])
                        .unwrap_or("dist")
                        .to_string(),
                    wheel_only: flag_value(args, &["--format", "-f"]) == Some("wheel"),
                },
                _ => RunStep::Other(segment.to_string()),
            },
            "uv" => match args.first().map(|s| s.as_str()) {
                Some("lock") if has_flag(args, &["--locked", "--check"]) => RunStep::LockCheck {
                    tool: "uv".to_string(),
                },
                Some("sync") => RunStep::DependencyInstall {
                    tool: "uv".to_string(),
                    user_scope: false,
                    requirements: Vec::new(),
                },
                Some("build") => RunStep::ArtifactBuild {
                    tool: "uv".to_string(),
                    out_dir: flag_value(args, &["--out-dir", "-o"])
                        .unwrap_or("dist")
                        .to_string(),
                    wheel_only: has_flag(args, &["--wheel"]),
                },
                Some("pip") => classify_pip(segment, &args[1..]),
                _ => RunStep::Other(segment.to_string()),
            },
            _ => RunStep::Other(segment.to_string()),
        }
    }

    /// Steps that write outside the service identity's own paths
    pub fn requires_root(&self) -> bool {
        match self {
            RunStep::CreateGroup { .. }
            | RunStep::CreateUser { .. }
            | RunStep::ChangeOwner { .. } => true,
            RunStep::SystemPackages(_) => true,
            RunStep::ToolInstall { user_scope, .. }
            | RunStep::ArtifactInstall { user_scope, .. } => !user_scope,
            RunStep::DependencyInstall {
                tool, user_scope, ..
            } => tool == "pip" && !user_scope,
            _ => false,
        }
    }

    /// Short label used in logs and findings
    pub fn label(&self) -> &'static str {
        match self {
            RunStep::CreateGroup { .. } | RunStep::CreateUser { .. } => "identity creation",
            RunStep::ChangeOwner { .. } => "ownership change",
            RunStep::MakeDir(_) => "directory creation",
            RunStep::Remove(_) => "removal",
            RunStep::SystemPackages(_) => "system package install",
            RunStep::ToolInstall { .. } => "toolchain install",
            RunStep::DependencyInstall { .. } => "dependency install",
            RunStep::LockCheck { .. } => "lock check",
            RunStep::ArtifactBuild { .. } => "artifact build",
            RunStep::ArtifactInstall { .. } => "artifact install",
            RunStep::Other(_) => "command",
        }
    }
}

fn classify_pip(segment: &str, args: &[String]) -> RunStep {
    let Some(sub) = args.first() else {
        return RunStep::Other(segment.to_string());
    };
    let rest = &args[1..];
    let user_scope = has_flag(rest, &["--user"]);

    match sub.as_str() {
        "install" => {
            let targets = positionals("pip", rest);
            // wheel files, or a glob over a directory of copied artifacts
            let wheels: Vec<String> = targets
                .iter()
                .filter(|t| t.ends_with(".whl") || (t.contains('/') && t.contains('*')))
                .cloned()
                .collect();
            if !wheels.is_empty() {
                return RunStep::ArtifactInstall {
                    paths: wheels,
                    user_scope,
                };
            }
            let requirements: Vec<String> = flag_values(rest, &["-r", "--requirement"])
                .into_iter()
                .map(str::to_string)
                .collect();
            if !requirements.is_empty() {
                return RunStep::DependencyInstall {
                    tool: "pip".to_string(),
                    user_scope,
                    requirements,
                };
            }
            let find_links = flag_values(rest, &["-f", "--find-links"]);
            if !find_links.is_empty() && !targets.is_empty() {
                return RunStep::ArtifactInstall {
                    paths: find_links
                        .iter()
                        .map(|dir| format!("{}/*.whl", dir.trim_end_matches('/')))
                        .collect(),
                    user_scope,
                };
            }
            let tools: Vec<String> = targets
                .iter()
                .filter(|t| is_toolchain_package(t))
                .map(|t| package_name(t))
                .collect();
            if tools.is_empty() {
                RunStep::DependencyInstall {
                    tool: "pip".to_string(),
                    user_scope,
                    requirements: Vec::new(),
                }
            } else {
                RunStep::ToolInstall {
                    packages: tools,
                    user_scope,
                }
            }
        }
        "wheel" => RunStep::ArtifactBuild {
            tool: "pip".to_string(),
            out_dir: flag_value(rest, &["-w", "--wheel-dir"])
                .unwrap_or(".")
                .to_string(),
            wheel_only: true,
        },
        _ => RunStep::Other(segment.to_string()),
    }
}
