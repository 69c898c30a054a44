//! Test execution
//!
//! A run walks the fixtures in order. For every fixture that is not muted it
//! runs `OneTimeSetUp`, then each selected test once per data source row, then
//! `OneTimeTearDown`. A row runs the fixture's `SetUp`,
//! the test entity and the fixture's `TearDown` inside one trace capture
//! window. Abort is only observed before a fixture and before a test.

use crate::actor::ActorContext;
use crate::catalog::TypeCatalog;
use crate::datasource::TestDataSource;
use crate::graph::EntityGraph;
use crate::repository::{TestRepositoryManager, ONE_TIME_SET_UP, ONE_TIME_TEAR_DOWN, SET_UP, TEAR_DOWN};
use crate::script::{ScriptEngine, ScriptScope};
use crate::selector::TestSelector;
use crate::session::TestSessionManager;
use crate::trace::{TraceImage, TraceRecorder};
use crate::types::{
    FailureDetail, TestCase, TestFixture, TestResult, TestSession, TestStatus, TraceKind,
};
use crate::{Error, Result};
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Cooperative cancellation flag shared with whoever may stop a run
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Progress notifications of a run
pub trait RunListener: Send + Sync {
    fn fixture_started(&self, _fixture: &TestFixture) {}

    fn fixture_finished(&self, _fixture: &TestFixture) {}

    fn result_recorded(&self, _result: &TestResult) {}
}

/// Listener that ignores every notification
pub struct NoopListener;

impl RunListener for NoopListener {}

/// Outcome of one data row
pub struct RowOutcome {
    pub result: TestResult,
    pub images: Vec<TraceImage>,
}

/// Executes the planned actors of fixture and test nodes
#[derive(Clone)]
struct NodeRunner {
    graph: Arc<RwLock<EntityGraph>>,
    catalog: Arc<dyn TypeCatalog>,
    engine: Arc<dyn ScriptEngine>,
    trace: TraceRecorder,
    post_delay: Duration,
}

impl NodeRunner {
    fn new(repo: &TestRepositoryManager, post_delay: Duration) -> Self {
        Self {
            graph: repo.graph(),
            catalog: repo.catalog(),
            engine: repo.engine(),
            trace: repo.trace(),
            post_delay,
        }
    }

    async fn run_node(&self, node_id: &str, scope: &ScriptScope) -> Result<()> {
        let planned = self.graph.read().plan(node_id, self.catalog.as_ref())?;
        let ctx = ActorContext::new(Arc::clone(&self.engine), scope.clone(), self.trace.clone());
        for step in planned {
            debug!("Running {} ({})", step.name, step.node_id);
            step.actor.begin_process(&ctx.for_node(&step.name)).await?;
            if !self.post_delay.is_zero() {
                tokio::time::sleep(self.post_delay).await;
            }
        }
        Ok(())
    }

    /// Run the child of `parent` tagged `tag`; a missing child is a no-op
    async fn run_tagged(&self, parent: &str, tag: &str, scope: &ScriptScope) -> Result<()> {
        let child = self
            .graph
            .read()
            .child_by_tag(parent, tag)
            .map(|node| node.id.clone());
        match child {
            Some(id) => self.run_node(&id, scope).await,
            None => Ok(()),
        }
    }
}

/// Everything needed to run the rows of one test
struct TestRun {
    runner: NodeRunner,
    fixture: TestFixture,
    test: TestCase,
    fixture_node: String,
    test_node: String,
}

impl TestRun {
    async fn run_row(&self, row_index: usize, row: Value) -> RowOutcome {
        let scope = ScriptScope::new()
            .with_owner(&self.fixture.id)
            .with_owner(&self.test.id)
            .with_local("data", row);

        self.runner.trace.begin();
        let executed_on = Utc::now();
        let started = Instant::now();

        let mut outcome = self.runner.run_tagged(&self.fixture_node, SET_UP, &scope).await;
        if outcome.is_ok() {
            outcome = self.runner.run_node(&self.test_node, &scope).await;
        }
        let teardown = self.runner.run_tagged(&self.fixture_node, TEAR_DOWN, &scope).await;
        let outcome = outcome.and(teardown);

        let captured = self.runner.trace.drain();
        let mut result = new_result(&self.fixture, &self.test, row_index, outcome.err().as_ref());
        result.executed_on = executed_on;
        result.execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        result.traces = captured.records;
        RowOutcome {
            result,
            images: captured.images,
        }
    }

    /// One result per row, produced as each row completes
    fn rows(self, rows: Vec<Value>) -> BoxStream<'static, RowOutcome> {
        let state = (Arc::new(self), rows.into_iter().enumerate());
        stream::unfold(state, |(run, mut rows)| async move {
            let (index, row) = rows.next()?;
            let outcome = run.run_row(index, row).await;
            Some((outcome, (run, rows)))
        })
        .boxed()
    }
}

/// `base` scaled by a delay factor; negative and NaN factors mean no delay
fn scaled_delay(base: Duration, factor: f64) -> Result<Duration> {
    if factor.is_nan() || factor <= 0.0 || base.is_zero() {
        return Ok(Duration::ZERO);
    }
    Duration::try_from_secs_f64(base.as_secs_f64() * factor)
        .map_err(|_| Error::InvalidConfig(format!("delay factor {} is out of range", factor)))
}

fn new_result(
    fixture: &TestFixture,
    test: &TestCase,
    row_index: usize,
    error: Option<&Error>,
) -> TestResult {
    TestResult {
        id: String::new(),
        session_id: String::new(),
        test_id: test.id.clone(),
        test_name: test.display_name.clone(),
        fixture_id: fixture.id.clone(),
        fixture_name: fixture.display_name.clone(),
        row_index,
        execution_order: 0,
        executed_on: Utc::now(),
        execution_time_ms: 0.0,
        status: if error.is_some() {
            TestStatus::Failed
        } else {
            TestStatus::Success
        },
        failure: error.map(FailureDetail::from),
        traces: Vec::new(),
    }
}

/// Per-run bookkeeping
struct RunState {
    session_id: String,
    execution_order: u32,
    aborted: bool,
}

/// Sequences fixtures and tests of a repository into one recorded session
pub struct TestExecutionCoordinator {
    sessions: Arc<TestSessionManager>,
    abort: AbortSignal,
    listener: Arc<dyn RunListener>,
    template_id: Option<String>,
}

impl TestExecutionCoordinator {
    pub fn new(sessions: Arc<TestSessionManager>) -> Self {
        Self {
            sessions,
            abort: AbortSignal::new(),
            listener: Arc::new(NoopListener),
            template_id: None,
        }
    }

    pub fn with_abort_signal(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn RunListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    pub fn sessions(&self) -> &Arc<TestSessionManager> {
        &self.sessions
    }

    /// Run every fixture and test accepted by `selector`
    pub async fn run(
        &self,
        repo: &mut TestRepositoryManager,
        selector: &TestSelector,
    ) -> Result<TestSession> {
        let session = self
            .sessions
            .start_session(
                self.template_id.clone(),
                repo.project_id(),
                &repo.version().to_string(),
                repo.machine_name(),
            )
            .await?;
        let mut state = RunState {
            session_id: session.id,
            execution_order: 0,
            aborted: false,
        };

        for fixture in repo.fixtures() {
            if self.abort.is_aborted() {
                state.aborted = true;
                break;
            }
            if fixture.is_muted {
                debug!("Skipping muted fixture {}", fixture.display_name);
                continue;
            }
            self.run_fixture(repo, selector, &fixture, &mut state).await;
            if state.aborted {
                break;
            }
        }

        if state.aborted {
            info!("Run aborted");
        }
        self.sessions
            .finish_session(&state.session_id, state.aborted)
            .await
    }

    async fn run_fixture(
        &self,
        repo: &mut TestRepositoryManager,
        selector: &TestSelector,
        fixture: &TestFixture,
        state: &mut RunState,
    ) {
        let mut selected = Vec::new();
        for test in repo.test_cases(&fixture.id) {
            match selector.can_run(fixture, &test) {
                Ok(true) => selected.push((test, None)),
                Ok(false) => {}
                Err(e) => {
                    warn!("Selector failed for {}: {}", test.display_name, e);
                    selected.push((test, Some(e)));
                }
            }
        }
        if selected.is_empty() {
            debug!("No selected tests in {}", fixture.display_name);
        }

        self.listener.fixture_started(fixture);
        let base_delay = Duration::from_millis(repo.execution().post_delay_ms);
        let opened = !repo.is_fixture_open(&fixture.id);
        let fixture_node = scaled_delay(base_delay, fixture.delay_factor)
            .and_then(|delay| repo.open_fixture(&fixture.id).map(|node| (node, delay)));
        let (fixture_node, post_delay) = match fixture_node {
            Ok(ready) => ready,
            Err(e) => {
                warn!("Failed to open fixture {}: {}", fixture.display_name, e);
                for (test, _) in &selected {
                    self.record_failure(repo, fixture, test, &e, state).await;
                }
                self.listener.fixture_finished(fixture);
                return;
            }
        };

        let runner = NodeRunner::new(repo, post_delay);
        let scope = ScriptScope::new().with_owner(&fixture.id);

        match runner.run_tagged(&fixture_node, ONE_TIME_SET_UP, &scope).await {
            Ok(()) => {
                for (test, selector_error) in selected {
                    if self.abort.is_aborted() {
                        state.aborted = true;
                        break;
                    }
                    match selector_error {
                        Some(e) => self.record_failure(repo, fixture, &test, &e, state).await,
                        None => self.run_test(repo, &runner, fixture, &fixture_node, &test, state).await,
                    }
                }
            }
            Err(e) => {
                warn!("One-time setup of {} failed: {}", fixture.display_name, e);
                for (test, _) in &selected {
                    self.record_failure(repo, fixture, test, &e, state).await;
                }
            }
        }

        if let Err(e) = runner.run_tagged(&fixture_node, ONE_TIME_TEAR_DOWN, &scope).await {
            warn!("One-time teardown of {} failed: {}", fixture.display_name, e);
        }
        if opened {
            if let Err(e) = repo.close_fixture(&fixture.id, false) {
                warn!("Failed to close fixture {}: {}", fixture.display_name, e);
            }
        }
        self.listener.fixture_finished(fixture);
    }

    async fn run_test(
        &self,
        repo: &mut TestRepositoryManager,
        runner: &NodeRunner,
        fixture: &TestFixture,
        fixture_node: &str,
        test: &TestCase,
        state: &mut RunState,
    ) {
        let opened = !repo.is_test_case_open(&test.id);
        let test_node = match repo.open_test_case(&test.id) {
            Ok(node) => node,
            Err(e) => {
                self.record_failure(repo, fixture, test, &e, state).await;
                return;
            }
        };
        repo.clear_results(&test.id);

        let loaded = scaled_delay(runner.post_delay, test.delay_factor).and_then(|delay| {
            TestDataSource::load(repo.data_sources_dir(), &test.test_data_id).map(|source| (source, delay))
        });
        match loaded {
            Ok((source, post_delay)) => {
                let mut runner = runner.clone();
                runner.post_delay = post_delay;
                let run = TestRun {
                    runner,
                    fixture: fixture.clone(),
                    test: test.clone(),
                    fixture_node: fixture_node.to_string(),
                    test_node,
                };
                let mut rows = run.rows(source.rows);
                while let Some(outcome) = rows.next().await {
                    self.record(repo, outcome, state).await;
                }
            }
            Err(e) => self.record_failure(repo, fixture, test, &e, state).await,
        }

        if opened {
            if let Err(e) = repo.close_test_case(&test.id, false) {
                warn!("Failed to close test case {}: {}", test.display_name, e);
            }
        }
    }

    async fn record_failure(
        &self,
        repo: &mut TestRepositoryManager,
        fixture: &TestFixture,
        test: &TestCase,
        error: &Error,
        state: &mut RunState,
    ) {
        let outcome = RowOutcome {
            result: new_result(fixture, test, 0, Some(error)),
            images: Vec::new(),
        };
        self.record(repo, outcome, state).await;
    }

    /// Number, upload and store one result; bookkeeping failures are logged
    async fn record(&self, repo: &mut TestRepositoryManager, outcome: RowOutcome, state: &mut RunState) {
        let RowOutcome { mut result, images } = outcome;
        state.execution_order += 1;
        result.execution_order = state.execution_order;
        self.sessions.prepare_result(&state.session_id, &mut result);

        let image_records = result
            .traces
            .iter_mut()
            .filter(|record| record.kind == TraceKind::Image);
        for (record, image) in image_records.zip(images) {
            match self
                .sessions
                .upload_trace_image(&state.session_id, &result.id, &image.name, &image.bytes)
                .await
            {
                Ok(reference) => record.content = reference,
                Err(e) => warn!("Failed to upload image {}: {}", image.name, e),
            }
        }

        let result = match self.sessions.add_result(&state.session_id, result.clone()).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Failed to store result #{}: {}", result.execution_order, e);
                result
            }
        };
        self.listener.result_recorded(&result);
        repo.record_result(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ComponentRegistry;
    use crate::config::EngineConfig;
    use crate::graph::ComponentNode;
    use crate::project::{AutomationProjectManager, ProjectManager, ProjectServices};
    use crate::script::ExpressionEngine;
    use crate::session::OfflineSessionStore;
    use parking_lot::Mutex;
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        _project: AutomationProjectManager,
        repo: TestRepositoryManager,
        catalog: Arc<dyn TypeCatalog>,
        source: TestDataSource,
    }

    fn setup() -> Fixture {
        setup_with(0, None)
    }

    fn setup_with(post_delay_ms: u64, model: Option<&str>) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let mut config = EngineConfig::with_workspace(tmp.path());
        config.execution.post_delay_ms = post_delay_ms;
        let services = ProjectServices::new(
            config,
            Arc::new(ComponentRegistry::with_builtins()),
            Arc::new(ExpressionEngine::new()),
        );
        let catalog = Arc::clone(&services.catalog);
        let mut project = AutomationProjectManager::new(services);
        let descriptor = project.create_project("Shop", "Shop").unwrap();
        project.load(&descriptor.id, None).unwrap();
        if let Some(model) = model {
            let dir = project.context().unwrap().store().data_model_dir().unwrap();
            std::fs::write(dir.join("DataModel.model.toml"), model).unwrap();
            project.refresh().unwrap();
        }

        let repo = TestRepositoryManager::new(project.context().unwrap()).unwrap();
        let source = TestDataSource::new("users").with_rows(vec![json!({"user": "ann"})]);
        source.save(repo.data_sources_dir()).unwrap();
        Fixture {
            _tmp: tmp,
            _project: project,
            repo,
            catalog,
            source,
        }
    }

    impl Fixture {
        fn section(&mut self, fixture_id: &str, tag: &str) -> String {
            let node = self.repo.open_fixture(fixture_id).unwrap();
            let graph = self.repo.graph();
            let graph = graph.read();
            graph.child_by_tag(&node, tag).unwrap().id.clone()
        }

        fn add_step(&mut self, parent: &str, type_name: &str, props: serde_json::Value) {
            let component = self.catalog.resolve(type_name).unwrap();
            let mut node = ComponentNode::new(type_name, &component);
            if let serde_json::Value::Object(map) = props {
                node.properties = map;
            }
            self.repo.graph().write().add(parent, node).unwrap();
        }

        fn add_test(&mut self, fixture_id: &str, name: &str) -> TestCase {
            let mut test = self.repo.add_test_case(fixture_id, name).unwrap();
            test.test_data_id = self.source.id.clone();
            self.repo.update_test_case(test.clone()).unwrap();
            test
        }
    }

    #[derive(Default)]
    struct Recorder {
        fixtures: Mutex<Vec<String>>,
    }

    impl RunListener for Recorder {
        fn fixture_finished(&self, fixture: &TestFixture) {
            self.fixtures.lock().push(fixture.display_name.clone());
        }
    }

    #[tokio::test]
    async fn test_failure_becomes_result_and_run_continues() {
        let mut fx = setup();
        let fixture = fx.repo.add_fixture("Login").unwrap();
        let failing = fx.add_test(&fixture.id, "Broken");
        let passing = fx.add_test(&fixture.id, "Works");

        let node = fx.repo.open_test_case(&failing.id).unwrap();
        fx.add_step(&node, "Fail", json!({"message": "boom"}));
        fx.repo.close_fixture(&fixture.id, true).unwrap();

        let coordinator = TestExecutionCoordinator::new(Arc::new(TestSessionManager::offline()));
        let session = fx.repo.run_all(&coordinator).await.unwrap();

        assert_eq!(session.total, 2);
        assert_eq!(session.num_failed, 1);
        assert_eq!(session.session_result, TestStatus::Failed);
        let failure = session.results[0].failure.clone().unwrap();
        assert_eq!(failure.error_type, "ActorFailed");
        assert!(failure.message.contains("boom"));
        assert!(session.results[1].passed());
        assert_eq!(fx.repo.results(&passing.id).len(), 1);
        assert!(!fx.repo.is_fixture_open(&fixture.id));
    }

    #[tokio::test]
    async fn test_rows_see_data_and_capture_traces() {
        let mut fx = setup();
        let fixture = fx.repo.add_fixture("Login").unwrap();
        let test = fx.add_test(&fixture.id, "Greets");
        let rows = vec![json!({"user": "ann"}), json!({"user": "bob"})];
        fx.source.rows = rows;
        fx.source.save(fx.repo.data_sources_dir()).unwrap();

        let node = fx.repo.open_test_case(&test.id).unwrap();
        fx.add_step(&node, "Log", json!({"expression": "\"hello \" + data.user"}));
        fx.add_step(&node, "AttachImage", json!({"name": "shot.png", "content": "data.user"}));
        fx.repo.close_fixture(&fixture.id, true).unwrap();

        let store = Arc::new(OfflineSessionStore::new());
        let sessions = Arc::new(TestSessionManager::new(store.clone()));
        let coordinator = TestExecutionCoordinator::new(sessions);
        let session = fx.repo.run_all(&coordinator).await.unwrap();

        assert_eq!(session.total, 2);
        let orders: Vec<_> = session.results.iter().map(|r| r.execution_order).collect();
        assert_eq!(orders, vec![1, 2]);
        let second = &session.results[1];
        assert_eq!(second.row_index, 1);
        assert_eq!(second.traces[0].content, "hello bob");
        assert_eq!(second.traces[1].kind, TraceKind::Image);
        assert_eq!(store.image(&second.traces[1].content).unwrap(), b"bob".to_vec());
    }

    #[tokio::test]
    async fn test_one_time_setup_failure_fails_every_test() {
        let mut fx = setup();
        let fixture = fx.repo.add_fixture("Login").unwrap();
        fx.add_test(&fixture.id, "A");
        fx.add_test(&fixture.id, "B");

        let setup = fx.section(&fixture.id, ONE_TIME_SET_UP);
        fx.add_step(&setup, "Fail", json!({"message": "no browser"}));
        fx.repo.close_fixture(&fixture.id, true).unwrap();

        let recorder = Arc::new(Recorder::default());
        let coordinator = TestExecutionCoordinator::new(Arc::new(TestSessionManager::offline()))
            .with_listener(recorder.clone());
        let session = fx.repo.run_all(&coordinator).await.unwrap();

        assert_eq!(session.num_failed, 2);
        assert!(session
            .results
            .iter()
            .all(|r| r.failure.as_ref().unwrap().message.contains("no browser")));
        assert_eq!(*recorder.fixtures.lock(), vec!["Login".to_string()]);
    }

    #[tokio::test]
    async fn test_abort_before_run() {
        let mut fx = setup();
        let fixture = fx.repo.add_fixture("Login").unwrap();
        fx.add_test(&fixture.id, "A");

        let coordinator = TestExecutionCoordinator::new(Arc::new(TestSessionManager::offline()));
        coordinator.abort_signal().abort();
        let session = fx.repo.run_all(&coordinator).await.unwrap();
        assert_eq!(session.total, 0);
        assert_eq!(session.session_result, TestStatus::Aborted);
    }

    #[tokio::test]
    async fn test_invalid_selector_is_fatal() {
        let mut fx = setup();
        let coordinator = TestExecutionCoordinator::new(Arc::new(TestSessionManager::offline()));
        assert!(matches!(
            fx.repo.run_selected(&coordinator, "test.Priority ==").await,
            Err(Error::Script(_))
        ));
    }

    #[tokio::test]
    async fn test_fixture_without_selected_tests_still_runs_one_time_sections() {
        let mut fx = setup_with(0, Some("[types.DataModel]\nOpened = 0\nClosed = 0\n"));
        let fixture = fx.repo.add_fixture("Login").unwrap();
        let mut test = fx.add_test(&fixture.id, "Skipped");
        test.is_muted = true;
        fx.repo.update_test_case(test).unwrap();

        let setup = fx.section(&fixture.id, ONE_TIME_SET_UP);
        fx.add_step(&setup, "Assign", json!({"target": "model.Opened", "value": "model.Opened + 1"}));
        let teardown = fx.section(&fixture.id, ONE_TIME_TEAR_DOWN);
        fx.add_step(&teardown, "Assign", json!({"target": "model.Closed", "value": "model.Closed + 1"}));
        fx.repo.close_fixture(&fixture.id, true).unwrap();

        let recorder = Arc::new(Recorder::default());
        let coordinator = TestExecutionCoordinator::new(Arc::new(TestSessionManager::offline()))
            .with_listener(recorder.clone());
        let session = fx.repo.run_all(&coordinator).await.unwrap();

        assert_eq!(session.total, 0);
        let engine = fx.repo.engine();
        let scope = ScriptScope::new();
        assert_eq!(engine.evaluate("model.Opened", &scope).unwrap(), json!(1));
        assert_eq!(engine.evaluate("model.Closed", &scope).unwrap(), json!(1));
        assert_eq!(*recorder.fixtures.lock(), vec!["Login".to_string()]);
        assert!(!fx.repo.is_fixture_open(&fixture.id));
    }

    #[tokio::test]
    async fn test_out_of_range_delay_factor_fails_only_that_test() {
        let mut fx = setup_with(100, None);
        let fixture = fx.repo.add_fixture("Login").unwrap();
        let mut slow = fx.add_test(&fixture.id, "Slow");
        slow.delay_factor = 1e300;
        fx.repo.update_test_case(slow).unwrap();
        fx.add_test(&fixture.id, "Normal");

        let coordinator = TestExecutionCoordinator::new(Arc::new(TestSessionManager::offline()));
        let session = fx.repo.run_all(&coordinator).await.unwrap();

        assert_eq!(session.total, 2);
        let failure = session.results[0].failure.clone().unwrap();
        assert_eq!(failure.error_type, "InvalidConfig");
        assert!(failure.message.contains("delay factor"));
        assert!(session.results[1].passed());
    }

    #[test]
    fn test_scaled_delay() {
        let base = Duration::from_millis(100);
        assert_eq!(scaled_delay(base, 2.0).unwrap(), Duration::from_millis(200));
        assert_eq!(scaled_delay(base, -1.0).unwrap(), Duration::ZERO);
        assert_eq!(scaled_delay(base, f64::NAN).unwrap(), Duration::ZERO);
        assert_eq!(scaled_delay(Duration::ZERO, f64::INFINITY).unwrap(), Duration::ZERO);
        assert!(matches!(scaled_delay(base, f64::INFINITY), Err(Error::InvalidConfig(_))));
        assert!(matches!(scaled_delay(base, 1e300), Err(Error::InvalidConfig(_))));
    }

    /// Drops the open fixture from the graph as soon as a result arrives
    struct DetachOnResult {
        graph: Arc<RwLock<EntityGraph>>,
    }

    impl RunListener for DetachOnResult {
        fn result_recorded(&self, _result: &TestResult) {
            let node = self.graph.read().root().runtime_children().first().cloned();
            if let Some(node) = node {
                self.graph.write().detach_runtime(&node).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_close_failure_still_finishes_session() {
        let mut fx = setup();
        let fixture = fx.repo.add_fixture("Login").unwrap();
        fx.add_test(&fixture.id, "A");
        fx.repo.close_fixture(&fixture.id, true).unwrap();

        let store = Arc::new(OfflineSessionStore::new());
        let sessions = Arc::new(TestSessionManager::new(store.clone()));
        let coordinator = TestExecutionCoordinator::new(Arc::clone(&sessions)).with_listener(Arc::new(
            DetachOnResult {
                graph: fx.repo.graph(),
            },
        ));
        let session = fx.repo.run_all(&coordinator).await.unwrap();

        assert_eq!(session.total, 1);
        assert!(session.finished_at.is_some());
        assert!(sessions.finish_session(&session.id, false).await.is_err());
        let stored = sessions.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.total, 1);
        assert!(stored.finished_at.is_some());
    }
}
