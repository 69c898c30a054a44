//! Fixture and Test Case Commands

use anyhow::{Context, Result};
use clap::Subcommand;
use flowbench_common::{Priority, TestCase, TestFixture};
use serde::Serialize;

use crate::context::CliContext;
use crate::output::{print_item, print_list, print_success, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum FixtureCommands {
    /// List fixtures of a project
    List {
        /// Project ID
        project: String,

        /// Filter query (`name:`, `tag:`, `priority:`, `muted:` or a substring)
        #[arg(long)]
        filter: Option<String>,
    },

    /// Add a fixture
    Add {
        /// Project ID
        project: String,

        /// Display name
        #[arg(short, long)]
        name: String,
    },

    /// Mute or unmute a fixture
    Mute {
        /// Project ID
        project: String,

        /// Fixture ID
        id: String,

        /// Unmute instead
        #[arg(long)]
        off: bool,
    },

    /// Delete a fixture and its test cases
    Delete {
        /// Project ID
        project: String,

        /// Fixture ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum TestCommands {
    /// List test cases of a fixture
    List {
        /// Project ID
        project: String,

        /// Fixture ID
        #[arg(long)]
        fixture: String,
    },

    /// Add a test case to a fixture
    Add {
        /// Project ID
        project: String,

        /// Fixture ID
        #[arg(long)]
        fixture: String,

        /// Display name
        #[arg(short, long)]
        name: String,

        /// Priority (low, normal, high, critical)
        #[arg(long, default_value = "normal")]
        priority: Priority,

        /// Data source ID to bind
        #[arg(long)]
        data: Option<String>,
    },

    /// Bind a test case to a data source
    Bind {
        /// Project ID
        project: String,

        /// Test case ID
        id: String,

        /// Data source ID
        #[arg(long)]
        data: String,
    },

    /// Mute or unmute a test case
    Mute {
        /// Project ID
        project: String,

        /// Test case ID
        id: String,

        /// Unmute instead
        #[arg(long)]
        off: bool,
    },

    /// Delete a test case
    Delete {
        /// Project ID
        project: String,

        /// Test case ID
        id: String,
    },
}

#[derive(Serialize)]
pub struct FixtureDisplay {
    pub id: String,
    pub name: String,
    pub order: i32,
    pub muted: bool,
    pub tests: usize,
}

impl TableDisplay for FixtureDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Name", "Order", "Muted", "Tests"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            self.order.to_string(),
            self.muted.to_string(),
            self.tests.to_string(),
        ]
    }
}

#[derive(Serialize)]
pub struct TestDisplay {
    pub id: String,
    pub name: String,
    pub order: i32,
    pub priority: String,
    pub muted: bool,
    pub data_source: String,
}

impl From<&TestCase> for TestDisplay {
    fn from(t: &TestCase) -> Self {
        Self {
            id: t.id.clone(),
            name: t.display_name.clone(),
            order: t.order,
            priority: t.priority.to_string(),
            muted: t.is_muted,
            data_source: t.test_data_id.clone(),
        }
    }
}

impl TableDisplay for TestDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Name", "Order", "Priority", "Muted", "Data Source"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            self.order.to_string(),
            self.priority.clone(),
            self.muted.to_string(),
            if self.data_source.is_empty() {
                "(not runnable)".to_string()
            } else {
                self.data_source.clone()
            },
        ]
    }
}

fn fixture_display(fixture: &TestFixture, tests: usize) -> FixtureDisplay {
    FixtureDisplay {
        id: fixture.id.clone(),
        name: fixture.display_name.clone(),
        order: fixture.order,
        muted: fixture.is_muted,
        tests,
    }
}

pub async fn execute_fixture(cmd: FixtureCommands, ctx: &CliContext, format: OutputFormat) -> Result<()> {
    match cmd {
        FixtureCommands::List { project, filter } => {
            let opened = ctx.open(&project, None)?;
            let visible = opened.repo.filter(filter.as_deref().unwrap_or(""));
            let displays: Vec<FixtureDisplay> = opened
                .repo
                .fixtures()
                .iter()
                .filter(|f| visible.fixture_visible(&f.id))
                .map(|f| {
                    let tests = opened
                        .repo
                        .test_cases(&f.id)
                        .iter()
                        .filter(|t| visible.test_visible(&t.id))
                        .count();
                    fixture_display(f, tests)
                })
                .collect();
            print_list(&displays, format);
        }

        FixtureCommands::Add { project, name } => {
            let mut opened = ctx.open(&project, None)?;
            let fixture = opened.repo.add_fixture(&name)?;
            print_success(&format!("Fixture '{}' added", fixture.display_name));
            print_item(&fixture_display(&fixture, 0), format);
        }

        FixtureCommands::Mute { project, id, off } => {
            let mut opened = ctx.open(&project, None)?;
            let mut fixture = opened
                .repo
                .fixture(&id)
                .cloned()
                .with_context(|| format!("fixture {} not found", id))?;
            fixture.is_muted = !off;
            opened.repo.update_fixture(fixture)?;
            print_success(&format!("Fixture {} {}", id, if off { "unmuted" } else { "muted" }));
        }

        FixtureCommands::Delete { project, id } => {
            let mut opened = ctx.open(&project, None)?;
            opened.repo.delete_fixture(&id)?;
            print_success(&format!("Fixture {} deleted", id));
        }
    }

    Ok(())
}

pub async fn execute_test(cmd: TestCommands, ctx: &CliContext, format: OutputFormat) -> Result<()> {
    match cmd {
        TestCommands::List { project, fixture } => {
            let opened = ctx.open(&project, None)?;
            let tests = opened.repo.test_cases(&fixture);
            let displays: Vec<TestDisplay> = tests.iter().map(TestDisplay::from).collect();
            print_list(&displays, format);
        }

        TestCommands::Add {
            project,
            fixture,
            name,
            priority,
            data,
        } => {
            let mut opened = ctx.open(&project, None)?;
            let mut test = opened.repo.add_test_case(&fixture, &name)?;
            test.priority = priority;
            test.test_data_id = data.unwrap_or_default();
            opened.repo.update_test_case(test.clone())?;
            print_success(&format!("Test case '{}' added", test.display_name));
            print_item(&TestDisplay::from(&test), format);
        }

        TestCommands::Bind { project, id, data } => {
            let mut opened = ctx.open(&project, None)?;
            let mut test = opened
                .repo
                .test_case(&id)
                .cloned()
                .with_context(|| format!("test case {} not found", id))?;
            test.test_data_id = data;
            opened.repo.update_test_case(test)?;
            print_success(&format!("Test case {} bound", id));
        }

        TestCommands::Mute { project, id, off } => {
            let mut opened = ctx.open(&project, None)?;
            let mut test = opened
                .repo
                .test_case(&id)
                .cloned()
                .with_context(|| format!("test case {} not found", id))?;
            test.is_muted = !off;
            opened.repo.update_test_case(test)?;
            print_success(&format!("Test case {} {}", id, if off { "unmuted" } else { "muted" }));
        }

        TestCommands::Delete { project, id } => {
            let mut opened = ctx.open(&project, None)?;
            opened.repo.delete_test_case(&id)?;
            print_success(&format!("Test case {} deleted", id));
        }
    }

    Ok(())
}
