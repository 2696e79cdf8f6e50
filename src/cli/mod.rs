pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{
    BuildArgs, CheckArgs, CliArgs, Commands, HealthArgs, LintArgs, PlanArgs, RenderArgs,
    VerifyArgs,
};
pub use output::{OutputFormat, OutputFormatter};
