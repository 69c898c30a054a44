//! Run Command

use anyhow::Result;
use clap::Args;
use flowbench_common::{
    RunListener, TestExecutionCoordinator, TestFixture, TestResult, TestSelector, TestStatus,
    Version,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::commands::session::{print_session, ResultDisplay};
use crate::context::CliContext;
use crate::output::{print_list, print_warning, status_label, OutputFormat};

#[derive(Args)]
pub struct RunArgs {
    /// Project ID
    pub project: String,

    /// Version to run (defaults to the active version)
    #[arg(long)]
    pub version: Option<Version>,

    /// Selector expression, e.g. `test.Priority == Priority.High`
    #[arg(short, long, conflicts_with = "select_file")]
    pub select: Option<String>,

    /// Script file defining a selector function `fn name(fixture, test) => ...`
    #[arg(long)]
    pub select_file: Option<PathBuf>,

    /// Session template recorded with the session
    #[arg(long)]
    pub template: Option<String>,
}

/// Spinner reporting fixtures and results as they complete
struct ProgressListener {
    bar: ProgressBar,
}

impl ProgressListener {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }
}

impl RunListener for ProgressListener {
    fn fixture_started(&self, fixture: &TestFixture) {
        self.bar.set_message(fixture.display_name.clone());
    }

    fn result_recorded(&self, result: &TestResult) {
        self.bar.println(format!(
            "  {} {} / {} [row {}] ({:.0}ms)",
            status_label(result.status),
            result.fixture_name,
            result.test_name,
            result.row_index,
            result.execution_time_ms
        ));
    }
}

pub async fn execute(args: RunArgs, ctx: &CliContext, format: OutputFormat) -> Result<()> {
    let mut opened = ctx.open(&args.project, args.version)?;
    let file_selector = args
        .select_file
        .as_deref()
        .map(|path| TestSelector::from_file(opened.repo.engine(), path))
        .transpose()?;
    let sessions = ctx.sessions().await?;
    if sessions.is_offline() {
        print_warning("Session recording is offline; results are not persisted");
    }

    let listener = Arc::new(ProgressListener::new());
    let mut coordinator = TestExecutionCoordinator::new(sessions).with_listener(listener.clone());
    if let Some(template) = args.template {
        coordinator = coordinator.with_template(template);
    }

    let abort = coordinator.abort_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Abort requested; stopping after the current test");
            abort.abort();
        }
    });

    let session = match (file_selector, args.select.as_deref()) {
        (Some(selector), _) => coordinator.run(&mut opened.repo, &selector).await,
        (None, Some(expression)) => opened.repo.run_selected(&coordinator, expression).await,
        (None, None) => opened.repo.run_all(&coordinator).await,
    };
    listener.bar.finish_and_clear();
    let session = session?;

    print_session(&session, format);
    let results: Vec<ResultDisplay> = session.results.iter().map(ResultDisplay::from).collect();
    print_list(&results, format);

    if session.session_result != TestStatus::Success {
        std::process::exit(1);
    }
    Ok(())
}
