use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Two-stage container pipeline for Python ASGI services
#[derive(Parser, Debug)]
#[command(
    name = "asgipack",
    about = "Two-stage container pipeline for Python ASGI services",
    version,
    author,
    long_about = "asgipack plans, checks and builds a two-stage container image for a \
                  Python ASGI service: a builder stage packages the project into a single \
                  wheel from its lock file, and a minimal runtime stage installs that wheel \
                  and runs the server as a non-root user."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Plan the pipeline for a source tree",
        long_about = "Inspects the source tree, lowers the pipeline definition into a \
                      two-stage plan and simulates it without contacting an engine.\n\n\
                      Examples:\n  \
                      asgipack plan\n  \
                      asgipack plan ./service --format json\n  \
                      asgipack plan --spec pipeline.yaml --format dockerfile -o Dockerfile"
    )]
    Plan(PlanArgs),

    #[command(about = "Render the Dockerfile for a source tree")]
    Render(RenderArgs),

    #[command(
        about = "Check lock file, source layout and plan simulation",
        long_about = "Runs every pre-build check: lock file coverage, source layout, \
                      interpreter compatibility and the stage simulation. Exits non-zero \
                      on the first failure."
    )]
    Check(CheckArgs),

    #[command(
        about = "Lint an existing Dockerfile",
        long_about = "Parses a Dockerfile into a plan and runs the same simulation and \
                      plan rules used for generated recipes.\n\n\
                      Examples:\n  \
                      asgipack lint Dockerfile\n  \
                      asgipack lint Dockerfile --compare build/Dockerfile.generated"
    )]
    Lint(LintArgs),

    #[command(about = "Build and verify the image on the container engine")]
    Build(BuildArgs),

    #[command(about = "Verify a built image against the pipeline definition")]
    Verify(VerifyArgs),

    #[command(about = "Check container engine availability")]
    Health(HealthArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    #[arg(value_name = "PATH", help = "Service source tree (defaults to current directory)")]
    pub path: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Pipeline definition (YAML or JSON)")]
    pub spec: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Write output to file instead of stdout"
    )]
    pub output: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct RenderArgs {
    #[arg(value_name = "PATH", help = "Service source tree (defaults to current directory)")]
    pub path: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Pipeline definition (YAML or JSON)")]
    pub spec: Option<PathBuf>,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Write the Dockerfile to file instead of stdout"
    )]
    pub output: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct CheckArgs {
    #[arg(value_name = "PATH", help = "Service source tree (defaults to current directory)")]
    pub path: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Pipeline definition (YAML or JSON)")]
    pub spec: Option<PathBuf>,

    #[arg(short = 'f', long, value_enum, default_value = "human")]
    pub format: ReportFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct LintArgs {
    #[arg(value_name = "DOCKERFILE")]
    pub dockerfile: PathBuf,

    #[arg(
        long,
        value_name = "OTHER",
        help = "Report drift against another Dockerfile"
    )]
    pub compare: Option<PathBuf>,

    #[arg(short = 'f', long, value_enum, default_value = "human")]
    pub format: ReportFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct BuildArgs {
    #[arg(value_name = "PATH", help = "Service source tree (defaults to current directory)")]
    pub path: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Pipeline definition (YAML or JSON)")]
    pub spec: Option<PathBuf>,

    #[arg(short = 't', long, value_name = "TAG", help = "Tag for the runtime image")]
    pub tag: Option<String>,

    #[arg(long, help = "Disable the engine layer cache")]
    pub no_cache: bool,

    #[arg(long, help = "Always pull base images")]
    pub pull: bool,

    #[arg(long, help = "Skip inspecting the built image")]
    pub skip_verify: bool,

    #[arg(
        long,
        value_name = "SECONDS",
        help = "Pipeline timeout (defaults to ASGIPACK_BUILD_TIMEOUT or 900)"
    )]
    pub timeout: Option<u64>,

    #[arg(short = 'f', long, value_enum, default_value = "human")]
    pub format: ReportFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct VerifyArgs {
    #[arg(value_name = "IMAGE", help = "Image id or tag")]
    pub image: String,

    #[arg(long, value_name = "FILE", help = "Pipeline definition (YAML or JSON)")]
    pub spec: Option<PathBuf>,

    #[arg(
        long,
        value_name = "DIGEST",
        help = "Expected plan digest label"
    )]
    pub digest: Option<String>,

    #[arg(short = 'f', long, value_enum, default_value = "human")]
    pub format: ReportFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct HealthArgs {
    #[arg(short = 'f', long, value_enum, default_value = "human")]
    pub format: ReportFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Yaml,
    Human,
    Dockerfile,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormatArg {
    Json,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
            OutputFormatArg::Dockerfile => super::output::OutputFormat::Dockerfile,
        }
    }
}

impl From<ReportFormatArg> for super::output::OutputFormat {
    fn from(arg: ReportFormatArg) -> Self {
        match arg {
            ReportFormatArg::Json => super::output::OutputFormat::Json,
            ReportFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}
