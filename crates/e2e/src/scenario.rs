//! Declarative YAML scenarios
//!
//! A scenario describes a sample project (data model, data sources, fixtures,
//! tests and their steps), how to run it, and what the session must contain.

use flowbench_common::{Priority, TestStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use crate::error::{E2eError, E2eResult};

/// A complete scenario parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSpec {
    /// Unique name for this scenario
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering scenarios
    #[serde(default)]
    pub tags: Vec<String>,

    /// Data model source (TOML), replacing the generated default
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub data_sources: Vec<DataSourceSpec>,

    #[serde(default)]
    pub fixtures: Vec<FixtureSpec>,

    #[serde(default)]
    pub run: RunSpec,

    #[serde(default)]
    pub expect: Expectation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceSpec {
    pub name: String,
    #[serde(default)]
    pub rows: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureSpec {
    pub name: String,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub one_time_setup: Vec<StepSpec>,
    #[serde(default)]
    pub setup: Vec<StepSpec>,
    #[serde(default)]
    pub teardown: Vec<StepSpec>,
    #[serde(default)]
    pub one_time_teardown: Vec<StepSpec>,
    #[serde(default)]
    pub tests: Vec<TestSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestSpec {
    pub name: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub muted: bool,
    /// Name of the bound data source; unbound tests are not runnable
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

/// One actor node: its component type plus its properties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSpec {
    /// Selector expression; every runnable test when absent
    #[serde(default)]
    pub select: Option<String>,

    /// Abort once the named fixture has finished
    #[serde(default)]
    pub abort_after: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Expectation {
    #[serde(default)]
    pub total: Option<u32>,
    #[serde(default)]
    pub passed: Option<u32>,
    #[serde(default)]
    pub failed: Option<u32>,
    #[serde(default)]
    pub result: Option<TestStatus>,
    /// `Fixture/Test` names in execution order
    #[serde(default)]
    pub order: Vec<String>,
    /// Expected data model values after the run, by top-level field
    #[serde(default)]
    pub model: Map<String, Value>,
}

impl ScenarioSpec {
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| E2eError::SpecParse(e.to_string()))
    }

    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))
    }

    /// Every `*.yaml` scenario beneath `dir`, ordered by name
    pub fn load_dir(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut specs = Vec::new();
        for entry in walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if path
                .extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml")
            {
                specs.push(Self::from_file(path)?);
            }
        }
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scenario() {
        let yaml = r#"
name: login
tags: [smoke]
data_sources:
  - name: users
    rows: [{ user: ann }]
fixtures:
  - name: Login
    setup:
      - type: Log
        message: opening browser
    tests:
      - name: Valid
        priority: High
        data: users
        steps:
          - type: Assert
            condition: data.user == "ann"
expect:
  total: 1
  result: success
  order: [Login/Valid]
"#;
        let spec = ScenarioSpec::from_yaml(yaml).unwrap();
        assert_eq!(spec.name, "login");
        let test = &spec.fixtures[0].tests[0];
        assert_eq!(test.priority, Priority::High);
        assert_eq!(test.steps[0].type_name, "Assert");
        assert_eq!(test.steps[0].properties["condition"], "data.user == \"ann\"");
        assert_eq!(spec.expect.result, Some(TestStatus::Success));
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            ScenarioSpec::from_yaml("name: [unterminated"),
            Err(E2eError::SpecParse(_))
        ));
    }
}
