//! Builds a throwaway automation project from a scenario

use flowbench_common::datasource::TestDataSource;
use flowbench_common::repository::{ONE_TIME_SET_UP, ONE_TIME_TEAR_DOWN, SET_UP, TEAR_DOWN};
use flowbench_common::{
    AutomationProjectManager, ComponentNode, ComponentRegistry, EngineConfig, ExpressionEngine,
    ProjectManager, ProjectServices, TestRepositoryManager, TypeCatalog,
};
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use tracing::debug;

use crate::error::{E2eError, E2eResult};
use crate::scenario::{ScenarioSpec, StepSpec};

/// A loaded project with its repository populated from a scenario
pub struct SampleProject {
    pub project: AutomationProjectManager,
    pub repo: TestRepositoryManager,
    fixtures: HashMap<String, String>,
    tests: HashMap<String, String>,
    sources: HashMap<String, String>,
}

impl SampleProject {
    /// Create the project inside `config.workspace_root` and populate it
    pub fn create(config: EngineConfig, spec: &ScenarioSpec) -> E2eResult<Self> {
        let services = ProjectServices::new(
            config,
            Arc::new(ComponentRegistry::with_builtins()),
            Arc::new(ExpressionEngine::new()),
        );
        let mut project = AutomationProjectManager::new(services);
        let descriptor = project.create_project(&spec.name, "Sample")?;
        project.load(&descriptor.id, None)?;

        if let Some(model) = &spec.model {
            let dir = project.context()?.store().data_model_dir()?;
            fs::write(dir.join("DataModel.model.toml"), model)?;
            project.refresh()?;
        }

        let mut repo = TestRepositoryManager::new(project.context()?)?;
        repo.load()?;

        let mut sample = Self {
            project,
            repo,
            fixtures: HashMap::new(),
            tests: HashMap::new(),
            sources: HashMap::new(),
        };
        for source in &spec.data_sources {
            let data = TestDataSource::new(&source.name).with_rows(source.rows.clone());
            data.save(sample.repo.data_sources_dir())?;
            sample.sources.insert(source.name.clone(), data.id);
        }
        for fixture in &spec.fixtures {
            sample.add_fixture(fixture)?;
        }
        debug!(
            "Built sample project with {} fixtures and {} tests",
            sample.fixtures.len(),
            sample.tests.len()
        );
        Ok(sample)
    }

    pub fn fixture_id(&self, name: &str) -> Option<&str> {
        self.fixtures.get(name).map(String::as_str)
    }

    /// Id of the test `test` in fixture `fixture`
    pub fn test_id(&self, fixture: &str, test: &str) -> Option<&str> {
        self.tests.get(&format!("{}/{}", fixture, test)).map(String::as_str)
    }

    pub fn source_id(&self, name: &str) -> Option<&str> {
        self.sources.get(name).map(String::as_str)
    }

    fn add_fixture(&mut self, spec: &crate::scenario::FixtureSpec) -> E2eResult<()> {
        let mut fixture = self.repo.add_fixture(&spec.name)?;
        if spec.muted {
            fixture.is_muted = true;
            self.repo.update_fixture(fixture.clone())?;
        }
        self.fixtures.insert(spec.name.clone(), fixture.id.clone());

        let node = self.repo.open_fixture(&fixture.id)?;
        for (tag, steps) in [
            (ONE_TIME_SET_UP, &spec.one_time_setup),
            (SET_UP, &spec.setup),
            (TEAR_DOWN, &spec.teardown),
            (ONE_TIME_TEAR_DOWN, &spec.one_time_teardown),
        ] {
            let section = self
                .repo
                .graph()
                .read()
                .child_by_tag(&node, tag)
                .map(|n| n.id.clone())
                .ok_or_else(|| E2eError::UnknownName {
                    kind: "fixture section",
                    name: tag.to_string(),
                })?;
            self.add_steps(&section, steps)?;
        }

        for test_spec in &spec.tests {
            let mut test = self.repo.add_test_case(&fixture.id, &test_spec.name)?;
            test.priority = test_spec.priority;
            test.is_muted = test_spec.muted;
            if let Some(source) = &test_spec.data {
                test.test_data_id = self
                    .source_id(source)
                    .ok_or_else(|| E2eError::UnknownName {
                        kind: "data source",
                        name: source.clone(),
                    })?
                    .to_string();
            }
            self.repo.update_test_case(test.clone())?;

            let test_node = self.repo.open_test_case(&test.id)?;
            self.add_steps(&test_node, &test_spec.steps)?;
            self.tests
                .insert(format!("{}/{}", spec.name, test_spec.name), test.id);
        }

        self.repo.close_fixture(&fixture.id, true)?;
        Ok(())
    }

    fn add_steps(&self, parent: &str, steps: &[StepSpec]) -> E2eResult<()> {
        let catalog = self.repo.catalog();
        let graph = self.repo.graph();
        for step in steps {
            let component = catalog
                .resolve(&step.type_name)
                .ok_or_else(|| E2eError::UnknownName {
                    kind: "component type",
                    name: step.type_name.clone(),
                })?;
            let mut node = ComponentNode::new(&step.type_name, &component);
            node.properties = step.properties.clone();
            graph.write().add(parent, node)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sample_persists_steps() {
        let yaml = r#"
name: persist
data_sources:
  - name: one
    rows: [{}]
fixtures:
  - name: F
    setup:
      - type: Log
        message: set up
    tests:
      - name: T
        data: one
        steps:
          - type: Assign
            target: x
            value: "1"
"#;
        let spec = ScenarioSpec::from_yaml(yaml).unwrap();
        let tmp = TempDir::new().unwrap();
        let mut sample = SampleProject::create(EngineConfig::with_workspace(tmp.path()), &spec).unwrap();

        let test_id = sample.test_id("F", "T").unwrap().to_string();
        assert!(sample.repo.test_case(&test_id).unwrap().is_runnable());
        assert!(!sample.repo.is_fixture_open(sample.fixture_id("F").unwrap()));

        let node = sample.repo.open_test_case(&test_id).unwrap();
        let graph = sample.repo.graph();
        let graph = graph.read();
        let children = graph.get(&node).unwrap().children();
        assert_eq!(children.len(), 1);
        assert_eq!(graph.get(&children[0]).unwrap().type_name, "Assign");
    }

    #[test]
    fn test_unknown_component_type() {
        let spec = ScenarioSpec::from_yaml(
            "name: bad\nfixtures:\n  - name: F\n    setup:\n      - type: Teleport\n",
        )
        .unwrap();
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            SampleProject::create(EngineConfig::with_workspace(tmp.path()), &spec),
            Err(E2eError::UnknownName { kind: "component type", .. })
        ));
    }
}
