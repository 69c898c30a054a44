//! E2E scenario harness entry point
//!
//! Runs every YAML scenario under `tests/scenarios`.
//! Run with: cargo test --package flowbench-e2e --test e2e

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use flowbench_e2e::{E2eResult, RunnerConfig, ScenarioRunner, SuiteResult};

#[derive(Parser, Debug)]
#[command(name = "flowbench-e2e")]
#[command(about = "Scenario runner for the Flowbench engine")]
struct Args {
    /// Path to the scenarios directory
    #[arg(short, long, default_value_os_t = default_scenarios_dir())]
    scenarios: PathBuf,

    /// Run only scenarios with this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Run only the named scenario
    #[arg(short, long)]
    name: Option<String>,

    /// Delay after each actor in milliseconds
    #[arg(long, default_value = "0")]
    post_delay_ms: u64,

    /// Output directory for results
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn default_scenarios_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/scenarios")
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // cargo test passes harness flags we do not understand
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(_) => Args::parse_from(["flowbench-e2e"]),
    };

    let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");
    match rt.block_on(async_main(args)) {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

async fn async_main(args: Args) -> E2eResult<bool> {
    let runner = ScenarioRunner::new(RunnerConfig {
        scenarios_dir: args.scenarios,
        output_dir: args.output,
        post_delay_ms: args.post_delay_ms,
    });

    let results = if let Some(name) = args.name {
        let result = runner.run_named(&name).await?;
        SuiteResult {
            total: 1,
            passed: usize::from(result.success),
            failed: usize::from(!result.success),
            duration_ms: result.duration_ms,
            results: vec![result],
        }
    } else if let Some(tag) = args.tag {
        runner.run_tagged(&tag).await?
    } else {
        runner.run_all().await?
    };

    runner.write_results(&results)?;
    Ok(results.failed == 0)
}
