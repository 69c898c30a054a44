//! Flowbench CLI - Main Entry Point
//!
//! Manages automation projects, their versions and data models, the test
//! repository, and runs tests into recorded sessions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use flowbench_cli::commands::{config, data, fixture, project, run, session};
use flowbench_cli::context::CliContext;
use flowbench_cli::output::{self, print_error};

/// Flowbench - automation project engine and test runner
#[derive(Parser)]
#[command(name = "flowbench")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(long, env = "FLOWBENCH_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Workspace holding the projects
    #[arg(long, env = "FLOWBENCH_WORKSPACE", global = true)]
    workspace: Option<PathBuf>,

    /// Record sessions in memory only
    #[arg(long, env = "FLOWBENCH_OFFLINE", global = true)]
    offline: bool,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage projects, versions and prefabs
    #[command(subcommand)]
    Project(project::ProjectCommands),

    /// Manage test fixtures
    #[command(subcommand)]
    Fixture(fixture::FixtureCommands),

    /// Manage test cases
    #[command(subcommand)]
    Test(fixture::TestCommands),

    /// Manage test data sources
    #[command(subcommand)]
    Data(data::DataCommands),

    /// Run tests of a project
    Run(run::RunArgs),

    /// Inspect recorded sessions
    #[command(subcommand)]
    Session(session::SessionCommands),

    /// Inspect or write the configuration
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let ctx = CliContext::load(cli.config, cli.workspace, cli.offline)?;

    let result = match cli.command {
        Commands::Project(cmd) => project::execute(cmd, &ctx, cli.format).await,
        Commands::Fixture(cmd) => fixture::execute_fixture(cmd, &ctx, cli.format).await,
        Commands::Test(cmd) => fixture::execute_test(cmd, &ctx, cli.format).await,
        Commands::Data(cmd) => data::execute(cmd, &ctx, cli.format).await,
        Commands::Run(args) => run::execute(args, &ctx, cli.format).await,
        Commands::Session(cmd) => session::execute(cmd, &ctx, cli.format).await,
        Commands::Config(cmd) => config::execute(cmd, &ctx).await,
        Commands::Version => {
            println!("Flowbench CLI v{}", flowbench_common::VERSION);
            println!("Workspace: {}", ctx.config.workspace_root.display());
            Ok(())
        }
    };

    if let Err(e) = result {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}
