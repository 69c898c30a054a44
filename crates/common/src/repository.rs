//! Test repository
//!
//! Fixtures and test cases of one project version live under
//! `TestCases/<fixtureId>/` and `TestCases/<fixtureId>/<testId>/`. Each holds a
//! metadata file, a process document and a script. Opening an item for edit
//! loads its process document and attaches it to the project graph as a
//! runtime child; closing detaches it again.

use crate::catalog::{TypeCatalog, FIXTURE, SEQUENCE, TEST_CASE};
use crate::config::{ExecutionConfig, LayoutConfig};
use crate::coordinator::TestExecutionCoordinator;
use crate::filter::{self, Visibility};
use crate::graph::{ComponentNode, EntityGraph};
use crate::model::ModuleIdentity;
use crate::project::{ProjectContext, ProjectManager};
use crate::script::ScriptEngine;
use crate::selector::TestSelector;
use crate::trace::TraceRecorder;
use crate::types::{TestCase, TestFixture, TestResult, TestSession, Version};
use crate::{Error, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fixture children created with every new fixture
pub const ONE_TIME_SET_UP: &str = "OneTimeSetUp";
pub const SET_UP: &str = "SetUp";
pub const TEAR_DOWN: &str = "TearDown";
pub const ONE_TIME_TEAR_DOWN: &str = "OneTimeTearDown";

struct Entry<T> {
    meta: T,
    /// Graph node id while open for edit
    node: Option<String>,
}

/// In-session manager of every fixture and test case of an open project
pub struct TestRepositoryManager {
    graph: Arc<RwLock<EntityGraph>>,
    engine: Arc<dyn ScriptEngine>,
    catalog: Arc<dyn TypeCatalog>,
    trace: TraceRecorder,
    layout: LayoutConfig,
    execution: ExecutionConfig,
    machine_name: String,
    repository_dir: PathBuf,
    data_sources_dir: PathBuf,
    identity: ModuleIdentity,
    project_id: String,
    version: Version,
    fixtures: BTreeMap<String, Entry<TestFixture>>,
    tests: BTreeMap<String, Entry<TestCase>>,
    results: HashMap<String, Vec<TestResult>>,
}

impl TestRepositoryManager {
    /// Manager over the repository of a loaded project; call [`Self::load`] next
    pub fn new(project: &ProjectContext) -> Result<Self> {
        let config = project.config();
        Ok(Self {
            graph: project.graph(),
            engine: project.engine(),
            catalog: project.catalog(),
            trace: project.trace(),
            layout: config.layout.clone(),
            execution: config.execution.clone(),
            machine_name: config.machine_name(),
            repository_dir: project.store().test_cases_dir()?,
            data_sources_dir: project.store().data_sources_dir()?,
            identity: project.model_identity().clone(),
            project_id: project.descriptor().id.clone(),
            version: project.version()?,
            fixtures: BTreeMap::new(),
            tests: BTreeMap::new(),
            results: HashMap::new(),
        })
    }

    pub fn graph(&self) -> Arc<RwLock<EntityGraph>> {
        Arc::clone(&self.graph)
    }

    pub fn engine(&self) -> Arc<dyn ScriptEngine> {
        Arc::clone(&self.engine)
    }

    pub fn catalog(&self) -> Arc<dyn TypeCatalog> {
        Arc::clone(&self.catalog)
    }

    pub fn trace(&self) -> TraceRecorder {
        self.trace.clone()
    }

    pub fn execution(&self) -> &ExecutionConfig {
        &self.execution
    }

    pub fn machine_name(&self) -> &str {
        &self.machine_name
    }

    pub fn data_sources_dir(&self) -> &Path {
        &self.data_sources_dir
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn model_identity(&self) -> &ModuleIdentity {
        &self.identity
    }

    fn fixture_dir(&self, fixture_id: &str) -> PathBuf {
        self.repository_dir.join(fixture_id)
    }

    fn test_dir(&self, test: &TestCase) -> PathBuf {
        self.fixture_dir(&test.fixture_id).join(&test.id)
    }

    fn fixture_entry(&self, id: &str) -> Result<&Entry<TestFixture>> {
        self.fixtures
            .get(id)
            .ok_or_else(|| Error::not_found("fixture", id))
    }

    fn test_entry(&self, id: &str) -> Result<&Entry<TestCase>> {
        self.tests.get(id).ok_or_else(|| Error::not_found("test case", id))
    }

    /// Scan the repository directory, replacing everything known so far
    pub fn load(&mut self) -> Result<()> {
        for id in self.open_fixture_ids() {
            self.close_fixture(&id, false)?;
        }
        self.fixtures.clear();
        self.tests.clear();
        self.results.clear();

        fs::create_dir_all(&self.repository_dir)?;
        for entry in fs::read_dir(&self.repository_dir)? {
            let dir = entry?.path();
            let Some(fixture) = read_meta::<TestFixture>(&dir.join(&self.layout.fixture_meta_file))
            else {
                continue;
            };
            for child in fs::read_dir(&dir)? {
                let test_dir = child?.path();
                if let Some(test) = read_meta::<TestCase>(&test_dir.join(&self.layout.test_meta_file)) {
                    self.tests.insert(test.id.clone(), Entry { meta: test, node: None });
                }
            }
            self.fixtures
                .insert(fixture.id.clone(), Entry { meta: fixture, node: None });
        }

        info!(
            "Loaded {} fixture(s) and {} test case(s)",
            self.fixtures.len(),
            self.tests.len()
        );
        Ok(())
    }

    /// Fixtures ordered by (order, display name)
    pub fn fixtures(&self) -> Vec<TestFixture> {
        let mut fixtures: Vec<_> = self.fixtures.values().map(|e| e.meta.clone()).collect();
        fixtures.sort_by(|a, b| (a.order, &a.display_name).cmp(&(b.order, &b.display_name)));
        fixtures
    }

    /// Test cases of a fixture ordered by (order, display name)
    pub fn test_cases(&self, fixture_id: &str) -> Vec<TestCase> {
        let mut tests: Vec<_> = self
            .tests
            .values()
            .filter(|e| e.meta.fixture_id == fixture_id)
            .map(|e| e.meta.clone())
            .collect();
        tests.sort_by(|a, b| (a.order, &a.display_name).cmp(&(b.order, &b.display_name)));
        tests
    }

    pub fn fixture(&self, id: &str) -> Option<&TestFixture> {
        self.fixtures.get(id).map(|e| &e.meta)
    }

    pub fn test_case(&self, id: &str) -> Option<&TestCase> {
        self.tests.get(id).map(|e| &e.meta)
    }

    pub fn is_fixture_open(&self, id: &str) -> bool {
        self.fixtures.get(id).is_some_and(|e| e.node.is_some())
    }

    pub fn is_test_case_open(&self, id: &str) -> bool {
        self.tests.get(id).is_some_and(|e| e.node.is_some())
    }

    /// Graph node of an open fixture
    pub fn fixture_node(&self, id: &str) -> Option<&str> {
        self.fixtures.get(id).and_then(|e| e.node.as_deref())
    }

    /// Graph node of an open test case
    pub fn test_node(&self, id: &str) -> Option<&str> {
        self.tests.get(id).and_then(|e| e.node.as_deref())
    }

    fn open_fixture_ids(&self) -> Vec<String> {
        self.fixtures
            .iter()
            .filter(|(_, e)| e.node.is_some())
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn open_test_ids(&self) -> Vec<String> {
        self.tests
            .iter()
            .filter(|(_, e)| e.node.is_some())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Load a process document, name/tag its root and attach it under `parent`
    fn attach(
        &self,
        process: &Path,
        parent: &str,
        name: &str,
        tag: &str,
        owner: &str,
        script: &Path,
    ) -> Result<String> {
        if !process.exists() {
            return Err(Error::ProcessFileMissing(process.to_path_buf()));
        }
        let text = fs::read_to_string(process)?;
        let context = self.graph.read().context().to_string();
        let mut subgraph = EntityGraph::load(&text, self.catalog.as_ref(), Some(&self.identity), &context)?;
        let root = subgraph.root_id().to_string();
        if let Some(node) = subgraph.get_mut(&root) {
            node.name = name.to_string();
            node.tag = tag.to_string();
        }

        let node = self.graph.write().attach_runtime(parent, subgraph)?;
        if let Err(e) = self.engine.register_script(owner, script) {
            if let Err(detach) = self.graph.write().detach_runtime(&node) {
                warn!("Failed to detach {} after script error: {}", node, detach);
            }
            return Err(e);
        }
        Ok(node)
    }

    /// Open a fixture for edit; returns its graph node
    pub fn open_fixture(&mut self, id: &str) -> Result<String> {
        let entry = self.fixture_entry(id)?;
        if let Some(node) = &entry.node {
            return Ok(node.clone());
        }
        let fixture = entry.meta.clone();
        let dir = self.fixture_dir(id);
        let root = self.graph.read().root_id().to_string();
        let node = self.attach(
            &dir.join(&self.layout.fixture_process_file),
            &root,
            &fixture.display_name,
            &fixture.id,
            &fixture.id,
            &dir.join(&fixture.script_file),
        )?;

        if let Some(entry) = self.fixtures.get_mut(id) {
            entry.node = Some(node.clone());
        }
        debug!("Opened fixture {}", fixture.display_name);
        Ok(node)
    }

    /// Open a test case for edit, opening its fixture first; returns its graph node
    pub fn open_test_case(&mut self, id: &str) -> Result<String> {
        let entry = self.test_entry(id)?;
        if let Some(node) = &entry.node {
            return Ok(node.clone());
        }
        let test = entry.meta.clone();
        let fixture_node = self.open_fixture(&test.fixture_id)?;
        let dir = self.test_dir(&test);
        let node = self.attach(
            &dir.join(&self.layout.test_process_file),
            &fixture_node,
            &test.display_name,
            &test.id,
            &test.id,
            &dir.join(&test.script_file),
        )?;

        if let Some(entry) = self.tests.get_mut(id) {
            entry.node = Some(node.clone());
        }
        debug!("Opened test case {}", test.display_name);
        Ok(node)
    }

    pub fn close_test_case(&mut self, id: &str, auto_save: bool) -> Result<()> {
        let Some(node) = self.test_entry(id)?.node.clone() else {
            return Ok(());
        };
        if auto_save {
            self.save_test_case(id, true)?;
        }
        self.engine.unregister_script(id);
        self.graph.write().detach_runtime(&node)?;
        if let Some(entry) = self.tests.get_mut(id) {
            entry.node = None;
        }
        debug!("Closed test case {}", id);
        Ok(())
    }

    /// Close a fixture and every open test case beneath it
    pub fn close_fixture(&mut self, id: &str, auto_save: bool) -> Result<()> {
        let Some(node) = self.fixture_entry(id)?.node.clone() else {
            return Ok(());
        };
        let open_tests: Vec<String> = self
            .tests
            .values()
            .filter(|e| e.meta.fixture_id == id && e.node.is_some())
            .map(|e| e.meta.id.clone())
            .collect();
        for test in open_tests {
            self.close_test_case(&test, auto_save)?;
        }

        if auto_save {
            self.save_fixture(id, true)?;
        }
        self.engine.unregister_script(id);
        self.graph.write().detach_runtime(&node)?;
        if let Some(entry) = self.fixtures.get_mut(id) {
            entry.node = None;
        }
        debug!("Closed fixture {}", id);
        Ok(())
    }

    /// Persist metadata, and the process document when `save_entity` is set
    /// and the fixture is open
    pub fn save_fixture(&self, id: &str, save_entity: bool) -> Result<()> {
        let entry = self.fixture_entry(id)?;
        let dir = self.fixture_dir(id);
        write_meta(&dir.join(&self.layout.fixture_meta_file), &entry.meta)?;
        if let (true, Some(node)) = (save_entity, &entry.node) {
            let text = self.graph.read().export_subtree(node)?;
            fs::write(dir.join(&self.layout.fixture_process_file), text)?;
        }
        Ok(())
    }

    pub fn save_test_case(&self, id: &str, save_entity: bool) -> Result<()> {
        let entry = self.test_entry(id)?;
        let dir = self.test_dir(&entry.meta);
        write_meta(&dir.join(&self.layout.test_meta_file), &entry.meta)?;
        if let (true, Some(node)) = (save_entity, &entry.node) {
            let text = self.graph.read().export_subtree(node)?;
            fs::write(dir.join(&self.layout.test_process_file), text)?;
        }
        Ok(())
    }

    fn container(&self, type_name: &str) -> Result<crate::catalog::ComponentType> {
        self.catalog
            .resolve(type_name)
            .ok_or_else(|| Error::UnknownComponentType(type_name.to_string()))
    }

    fn write_process(&self, path: &Path, mut graph: EntityGraph) -> Result<()> {
        graph.set_data_model(self.identity.name.clone());
        fs::write(path, graph.save()?)?;
        Ok(())
    }

    /// Create a fixture with empty one-time and per-test setup/teardown sequences
    pub fn add_fixture(&mut self, display_name: &str) -> Result<TestFixture> {
        let mut fixture = TestFixture::new(display_name, self.layout.fixture_script_file.clone());
        fixture.order = self.fixtures.values().map(|e| e.meta.order).max().unwrap_or(0) + 1;

        let dir = self.fixture_dir(&fixture.id);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(&fixture.script_file), "")?;

        let root = ComponentNode::new(display_name, &self.container(FIXTURE)?).with_tag(&fixture.id);
        let root_id = root.id.clone();
        let mut graph = EntityGraph::new(root, self.graph.read().context());
        let sequence = self.container(SEQUENCE)?;
        for tag in [ONE_TIME_SET_UP, SET_UP, TEAR_DOWN, ONE_TIME_TEAR_DOWN] {
            graph.add(&root_id, ComponentNode::new(tag, &sequence).with_tag(tag))?;
        }
        self.write_process(&dir.join(&self.layout.fixture_process_file), graph)?;
        write_meta(&dir.join(&self.layout.fixture_meta_file), &fixture)?;

        self.fixtures.insert(
            fixture.id.clone(),
            Entry {
                meta: fixture.clone(),
                node: None,
            },
        );
        info!("Added fixture {}", fixture.display_name);
        Ok(fixture)
    }

    /// Create a test case under `fixture_id`; it is not runnable until bound
    /// to a data source
    pub fn add_test_case(&mut self, fixture_id: &str, display_name: &str) -> Result<TestCase> {
        self.fixture_entry(fixture_id)?;
        let mut test = TestCase::new(fixture_id, display_name, self.layout.test_script_file.clone());
        test.order = self
            .tests
            .values()
            .filter(|e| e.meta.fixture_id == fixture_id)
            .map(|e| e.meta.order)
            .max()
            .unwrap_or(0)
            + 1;

        let dir = self.test_dir(&test);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(&test.script_file), "")?;

        let root = ComponentNode::new(display_name, &self.container(TEST_CASE)?).with_tag(&test.id);
        let graph = EntityGraph::new(root, self.graph.read().context());
        self.write_process(&dir.join(&self.layout.test_process_file), graph)?;
        write_meta(&dir.join(&self.layout.test_meta_file), &test)?;

        self.tests.insert(
            test.id.clone(),
            Entry {
                meta: test.clone(),
                node: None,
            },
        );
        info!("Added test case {}", test.display_name);
        Ok(test)
    }

    pub fn delete_test_case(&mut self, id: &str) -> Result<()> {
        self.close_test_case(id, false)?;
        let dir = self.test_dir(&self.test_entry(id)?.meta);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        self.tests.remove(id);
        self.results.remove(id);
        info!("Deleted test case {}", id);
        Ok(())
    }

    /// Delete a fixture together with its test cases
    pub fn delete_fixture(&mut self, id: &str) -> Result<()> {
        self.close_fixture(id, false)?;
        for test in self.test_cases(id) {
            self.tests.remove(&test.id);
            self.results.remove(&test.id);
        }
        let dir = self.fixture_dir(id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        self.fixtures.remove(id);
        info!("Deleted fixture {}", id);
        Ok(())
    }

    /// Replace a fixture's metadata and persist it
    pub fn update_fixture(&mut self, fixture: TestFixture) -> Result<()> {
        let entry = self
            .fixtures
            .get_mut(&fixture.id)
            .ok_or_else(|| Error::not_found("fixture", fixture.id.clone()))?;
        entry.meta = fixture;
        let id = entry.meta.id.clone();
        self.save_fixture(&id, false)
    }

    /// Replace a test case's metadata and persist it; the fixture cannot change
    pub fn update_test_case(&mut self, test: TestCase) -> Result<()> {
        let entry = self
            .tests
            .get_mut(&test.id)
            .ok_or_else(|| Error::not_found("test case", test.id.clone()))?;
        if entry.meta.fixture_id != test.fixture_id {
            return Err(Error::InvalidStateTransition {
                from: entry.meta.fixture_id.clone(),
                to: test.fixture_id,
            });
        }
        entry.meta = test;
        let id = entry.meta.id.clone();
        self.save_test_case(&id, false)
    }

    /// Visible fixtures and tests for a filter query
    pub fn filter(&self, query: &str) -> Visibility {
        let fixtures: Vec<_> = self.fixtures.values().map(|e| e.meta.clone()).collect();
        let tests: Vec<_> = self.tests.values().map(|e| e.meta.clone()).collect();
        filter::apply(query, &fixtures, &tests)
    }

    pub fn clear_results(&mut self, test_id: &str) {
        self.results.remove(test_id);
    }

    pub fn record_result(&mut self, result: TestResult) {
        self.results.entry(result.test_id.clone()).or_default().push(result);
    }

    /// Results of the latest run of a test case
    pub fn results(&self, test_id: &str) -> &[TestResult] {
        self.results.get(test_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Recompile the project's data model.
    ///
    /// Open fixtures and tests are closed with auto-save first and reopened
    /// against the new model afterwards, also when the refresh fails.
    pub fn refresh_project(&mut self, project: &mut dyn ProjectManager) -> Result<ModuleIdentity> {
        let fixtures = self.open_fixture_ids();
        let tests = self.open_test_ids();
        for id in &fixtures {
            self.close_fixture(id, true)?;
        }

        let refreshed = project.refresh();
        if let Ok(identity) = &refreshed {
            self.identity = identity.clone();
            self.graph = project.context()?.graph();
        }

        for id in &fixtures {
            self.open_fixture(id)?;
        }
        for id in &tests {
            self.open_test_case(id)?;
        }
        refreshed
    }

    /// Run every runnable test
    pub async fn run_all(&mut self, coordinator: &TestExecutionCoordinator) -> Result<TestSession> {
        let selector = TestSelector::all(self.engine());
        coordinator.run(self, &selector).await
    }

    /// Run the tests accepted by a selector expression
    pub async fn run_selected(
        &mut self,
        coordinator: &TestExecutionCoordinator,
        expression: &str,
    ) -> Result<TestSession> {
        let selector = TestSelector::initialize(self.engine(), expression)?;
        coordinator.run(self, &selector).await
    }
}

fn read_meta<T: DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.is_file() {
        return None;
    }
    match fs::read_to_string(path)
        .map_err(Error::from)
        .and_then(|text| serde_json::from_str(&text).map_err(Error::from))
    {
        Ok(meta) => Some(meta),
        Err(e) => {
            warn!("Skipping unreadable metadata {:?}: {}", path, e);
            None
        }
    }
}

fn write_meta<T: serde::Serialize>(path: &Path, meta: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(meta)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ComponentRegistry;
    use crate::config::EngineConfig;
    use crate::project::{AutomationProjectManager, ProjectServices};
    use crate::script::{ExpressionEngine, ScriptScope};
    use serde_json::json;
    use tempfile::TempDir;

    fn project(tmp: &TempDir) -> AutomationProjectManager {
        let services = ProjectServices::new(
            EngineConfig::with_workspace(tmp.path()),
            Arc::new(ComponentRegistry::with_builtins()),
            Arc::new(ExpressionEngine::new()),
        );
        let mut manager = AutomationProjectManager::new(services);
        let descriptor = manager.create_project("Shop", "Shop").unwrap();
        manager.load(&descriptor.id, None).unwrap();
        manager
    }

    #[test]
    fn test_add_and_reload() {
        let tmp = TempDir::new().unwrap();
        let project = project(&tmp);
        let mut repo = TestRepositoryManager::new(project.context().unwrap()).unwrap();

        let login = repo.add_fixture("Login").unwrap();
        let checkout = repo.add_fixture("Checkout").unwrap();
        let valid = repo.add_test_case(&login.id, "Valid").unwrap();
        repo.add_test_case(&login.id, "Invalid").unwrap();
        assert_eq!((login.order, checkout.order), (1, 2));
        assert!(!valid.is_runnable());

        repo.load().unwrap();
        let names: Vec<_> = repo.fixtures().into_iter().map(|f| f.display_name).collect();
        assert_eq!(names, vec!["Login", "Checkout"]);
        let tests: Vec<_> = repo.test_cases(&login.id).into_iter().map(|t| t.display_name).collect();
        assert_eq!(tests, vec!["Valid", "Invalid"]);
    }

    #[test]
    fn test_open_attaches_runtime_children() {
        let tmp = TempDir::new().unwrap();
        let project = project(&tmp);
        let mut repo = TestRepositoryManager::new(project.context().unwrap()).unwrap();
        let fixture = repo.add_fixture("Login").unwrap();
        let test = repo.add_test_case(&fixture.id, "Valid").unwrap();

        let test_node = repo.open_test_case(&test.id).unwrap();
        assert!(repo.is_fixture_open(&fixture.id));
        let fixture_node = repo.fixture_node(&fixture.id).unwrap().to_string();

        {
            let graph = repo.graph();
            let graph = graph.read();
            let root = graph.root();
            assert_eq!(root.runtime_children(), &[fixture_node.clone()]);
            assert!(root.children().is_empty());
            let node = graph.get(&fixture_node).unwrap();
            assert_eq!(node.tag, fixture.id);
            assert_eq!(node.name, "Login");
            assert!(graph.child_by_tag(&fixture_node, SET_UP).is_some());
            assert_eq!(graph.get(&test_node).unwrap().parent(), Some(fixture_node.as_str()));
            assert!(!graph.save().unwrap().contains("OneTimeSetUp"));
        }
        assert!(repo.engine().is_registered(&test.id));

        repo.close_fixture(&fixture.id, false).unwrap();
        assert!(!repo.is_test_case_open(&test.id));
        assert!(!repo.engine().is_registered(&fixture.id));
        assert!(repo.graph().read().root().runtime_children().is_empty());
    }

    #[test]
    fn test_missing_process_file() {
        let tmp = TempDir::new().unwrap();
        let project = project(&tmp);
        let mut repo = TestRepositoryManager::new(project.context().unwrap()).unwrap();
        let fixture = repo.add_fixture("Login").unwrap();
        fs::remove_file(repo.fixture_dir(&fixture.id).join("fixture.proc")).unwrap();

        assert!(matches!(
            repo.open_fixture(&fixture.id),
            Err(Error::ProcessFileMissing(_))
        ));
        assert!(!repo.is_fixture_open(&fixture.id));
    }

    #[test]
    fn test_save_entity_only_when_open() {
        let tmp = TempDir::new().unwrap();
        let project = project(&tmp);
        let catalog = project.context().unwrap().catalog();
        let mut repo = TestRepositoryManager::new(project.context().unwrap()).unwrap();
        let fixture = repo.add_fixture("Login").unwrap();
        let test = repo.add_test_case(&fixture.id, "Valid").unwrap();
        let process = repo.test_dir(&test).join("test.proc");
        let before = fs::read_to_string(&process).unwrap();

        repo.save_test_case(&test.id, true).unwrap();
        assert_eq!(fs::read_to_string(&process).unwrap(), before);

        let node = repo.open_test_case(&test.id).unwrap();
        let log = catalog.resolve("Log").unwrap();
        repo.graph()
            .write()
            .add(&node, ComponentNode::new("Say hi", &log).with_property("message", json!("hi")))
            .unwrap();
        repo.close_test_case(&test.id, true).unwrap();
        assert!(fs::read_to_string(&process).unwrap().contains("Say hi"));
    }

    #[test]
    fn test_delete_fixture_removes_tests() {
        let tmp = TempDir::new().unwrap();
        let project = project(&tmp);
        let mut repo = TestRepositoryManager::new(project.context().unwrap()).unwrap();
        let fixture = repo.add_fixture("Login").unwrap();
        let test = repo.add_test_case(&fixture.id, "Valid").unwrap();
        repo.open_test_case(&test.id).unwrap();

        repo.delete_fixture(&fixture.id).unwrap();
        assert!(repo.fixtures().is_empty());
        assert!(repo.test_case(&test.id).is_none());
        assert!(!repo.fixture_dir(&fixture.id).exists());
        assert!(repo.graph().read().root().runtime_children().is_empty());
    }

    #[test]
    fn test_refresh_project_reopens() {
        let tmp = TempDir::new().unwrap();
        let mut project = project(&tmp);
        let mut repo = TestRepositoryManager::new(project.context().unwrap()).unwrap();
        let fixture = repo.add_fixture("Login").unwrap();
        let test = repo.add_test_case(&fixture.id, "Valid").unwrap();
        fs::write(repo.test_dir(&test).join("test.script"), "attempts = 3\n").unwrap();
        repo.open_test_case(&test.id).unwrap();

        let before = repo.model_identity().clone();
        let identity = repo.refresh_project(&mut project).unwrap();
        assert_ne!(identity, before);
        assert_eq!(repo.model_identity(), &identity);
        assert!(repo.is_fixture_open(&fixture.id));
        assert!(repo.is_test_case_open(&test.id));

        let scope = ScriptScope::new().with_owner(&test.id);
        assert_eq!(repo.engine().evaluate("attempts", &scope).unwrap(), json!(3));
        repo.graph().read().verify_linkage().unwrap();
    }

    #[test]
    fn test_update_and_filter() {
        let tmp = TempDir::new().unwrap();
        let project = project(&tmp);
        let mut repo = TestRepositoryManager::new(project.context().unwrap()).unwrap();
        let fixture = repo.add_fixture("Login").unwrap();
        let mut test = repo.add_test_case(&fixture.id, "Valid").unwrap();
        test.tags.insert("smoke".to_string());
        repo.update_test_case(test.clone()).unwrap();

        repo.load().unwrap();
        let visible = repo.filter("tag:smoke");
        assert!(visible.test_visible(&test.id));
        assert!(visible.fixture_visible(&fixture.id));

        let mut moved = test.clone();
        moved.fixture_id = "other".to_string();
        assert!(repo.update_test_case(moved).is_err());
    }
}
