//! Test data sources
//!
//! Stored as `DataSources/<id>.json`. Each row is one execution of every test
//! case bound to the source; the row is visible to scripts as `data`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDataSource {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub rows: Vec<Value>,
}

impl TestDataSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            rows: Vec::new(),
        }
    }

    pub fn with_rows(mut self, rows: Vec<Value>) -> Self {
        self.rows = rows;
        self
    }

    fn path(dir: &Path, id: &str) -> PathBuf {
        dir.join(format!("{}.json", id))
    }

    /// Load the source `id` from `dir`
    pub fn load(dir: &Path, id: &str) -> Result<Self> {
        let path = Self::path(dir, id);
        if !path.exists() {
            return Err(Error::not_found("data source", id));
        }
        let source: Self = serde_json::from_str(&fs::read_to_string(&path)?)?;
        debug!("Loaded data source {} ({} rows)", source.name, source.rows.len());
        Ok(source)
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(Self::path(dir, &self.id), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// All sources in `dir`, ordered by name
    pub fn list(dir: &Path) -> Result<Vec<Self>> {
        let mut sources = Vec::new();
        if !dir.exists() {
            return Ok(sources);
        }
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                sources.push(serde_json::from_str::<Self>(&fs::read_to_string(&path)?)?);
            }
        }
        sources.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sources)
    }
}
