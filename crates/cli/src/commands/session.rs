//! Session Commands

use anyhow::{Context, Result};
use clap::Subcommand;
use flowbench_common::{TestResult, TestSession, TestStatus};
use serde::Serialize;

use crate::context::CliContext;
use crate::output::{print_item, print_list, status_label, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum SessionCommands {
    /// List recorded sessions, newest first
    List {
        /// Only sessions of this project
        #[arg(long)]
        project: Option<String>,
    },

    /// Show a session and its results
    Get {
        /// Session ID
        id: String,
    },
}

#[derive(Serialize)]
pub struct SessionDisplay {
    pub id: String,
    pub project: String,
    pub version: String,
    pub machine: String,
    pub result: String,
    pub passed: u32,
    pub failed: u32,
    pub total: u32,
    pub duration_ms: f64,
    pub started_at: String,
}

impl From<&TestSession> for SessionDisplay {
    fn from(s: &TestSession) -> Self {
        Self {
            id: s.id.clone(),
            project: s.project_id.clone(),
            version: s.project_version.clone(),
            machine: s.machine_name.clone(),
            result: s.session_result.to_string(),
            passed: s.num_passed,
            failed: s.num_failed,
            total: s.total,
            duration_ms: s.duration_ms,
            started_at: s.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl TableDisplay for SessionDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Project", "Version", "Machine", "Result", "Passed", "Failed", "Total", "Duration", "Started"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.project.clone(),
            self.version.clone(),
            self.machine.clone(),
            self.result.clone(),
            self.passed.to_string(),
            self.failed.to_string(),
            self.total.to_string(),
            format!("{:.0}ms", self.duration_ms),
            self.started_at.clone(),
        ]
    }
}

#[derive(Serialize)]
pub struct ResultDisplay {
    pub order: u32,
    pub fixture: String,
    pub test: String,
    pub row: usize,
    pub status: TestStatus,
    pub duration_ms: f64,
    pub error: String,
}

impl From<&TestResult> for ResultDisplay {
    fn from(r: &TestResult) -> Self {
        Self {
            order: r.execution_order,
            fixture: r.fixture_name.clone(),
            test: r.test_name.clone(),
            row: r.row_index,
            status: r.status,
            duration_ms: r.execution_time_ms,
            error: r
                .failure
                .as_ref()
                .map(|f| format!("{}: {}", f.error_type, f.message))
                .unwrap_or_default(),
        }
    }
}

impl TableDisplay for ResultDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["#", "Fixture", "Test", "Row", "Status", "Duration", "Error"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.order.to_string(),
            self.fixture.clone(),
            self.test.clone(),
            self.row.to_string(),
            status_label(self.status),
            format!("{:.0}ms", self.duration_ms),
            self.error.clone(),
        ]
    }
}

pub fn print_session(session: &TestSession, format: OutputFormat) {
    print_item(&SessionDisplay::from(session), format);
}

pub async fn execute(cmd: SessionCommands, ctx: &CliContext, format: OutputFormat) -> Result<()> {
    let sessions = ctx.sessions().await?;
    match cmd {
        SessionCommands::List { project } => {
            let list = sessions.list_sessions(project.as_deref()).await?;
            let displays: Vec<SessionDisplay> = list.iter().map(SessionDisplay::from).collect();
            print_list(&displays, format);
        }

        SessionCommands::Get { id } => {
            let session = sessions
                .get_session(&id)
                .await?
                .with_context(|| format!("session {} not found", id))?;
            print_session(&session, format);
            let results: Vec<ResultDisplay> = session.results.iter().map(ResultDisplay::from).collect();
            print_list(&results, format);
        }
    }

    Ok(())
}
