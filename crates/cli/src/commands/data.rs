//! Data Source Commands

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use flowbench_common::datasource::TestDataSource;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;

use crate::context::CliContext;
use crate::output::{print_item, print_list, print_success, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum DataCommands {
    /// List data sources of a project
    List {
        /// Project ID
        project: String,
    },

    /// Import a data source from a JSON array of row objects
    Import {
        /// Project ID
        project: String,

        /// Display name
        #[arg(short, long)]
        name: String,

        /// JSON file holding the rows
        file: PathBuf,
    },
}

#[derive(Serialize)]
pub struct DataSourceDisplay {
    pub id: String,
    pub name: String,
    pub rows: usize,
}

impl From<&TestDataSource> for DataSourceDisplay {
    fn from(s: &TestDataSource) -> Self {
        Self {
            id: s.id.clone(),
            name: s.name.clone(),
            rows: s.rows.len(),
        }
    }
}

impl TableDisplay for DataSourceDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Name", "Rows"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.id.clone(), self.name.clone(), self.rows.to_string()]
    }
}

pub async fn execute(cmd: DataCommands, ctx: &CliContext, format: OutputFormat) -> Result<()> {
    match cmd {
        DataCommands::List { project } => {
            let opened = ctx.open(&project, None)?;
            let sources = TestDataSource::list(opened.repo.data_sources_dir())?;
            let displays: Vec<DataSourceDisplay> = sources.iter().map(DataSourceDisplay::from).collect();
            print_list(&displays, format);
        }

        DataCommands::Import { project, name, file } => {
            let opened = ctx.open(&project, None)?;
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {:?}", file))?;
            let Value::Array(rows) = serde_json::from_str(&text)? else {
                bail!("{:?} must hold a JSON array of rows", file);
            };
            let source = TestDataSource::new(name).with_rows(rows);
            source.save(opened.repo.data_sources_dir())?;
            print_success(&format!("Data source '{}' imported", source.name));
            print_item(&DataSourceDisplay::from(&source), format);
        }
    }

    Ok(())
}
