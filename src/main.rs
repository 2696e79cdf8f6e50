use asgipack::cli::commands::{CliArgs, Commands};
use asgipack::cli::handlers::{
    handle_build, handle_check, handle_health, handle_lint, handle_plan, handle_render,
    handle_verify,
};
use asgipack::util::logging::{init_logging, parse_level, LoggingConfig};
use asgipack::VERSION;

use clap::Parser;
use tracing::{debug, Level};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("asgipack v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Plan(plan_args) => handle_plan(plan_args, args.quiet).await,
        Commands::Render(render_args) => handle_render(render_args, args.quiet).await,
        Commands::Check(check_args) => handle_check(check_args, args.quiet).await,
        Commands::Lint(lint_args) => handle_lint(lint_args).await,
        Commands::Build(build_args) => handle_build(build_args, args.quiet).await,
        Commands::Verify(verify_args) => handle_verify(verify_args).await,
        Commands::Health(health_args) => handle_health(health_args).await,
    };

    std::process::exit(exit_code);
}

fn init_logging_from_args(args: &CliArgs) {
    let mut config = LoggingConfig::from_env();
    if let Some(level_str) = &args.log_level {
        config.level = parse_level(level_str);
    } else if args.verbose {
        config.level = Level::DEBUG;
    } else if args.quiet {
        config.level = Level::ERROR;
    }
    init_logging(config);
}
