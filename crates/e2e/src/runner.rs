//! Scenario runner: builds each sample project, runs it and checks the session

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use flowbench_common::{
    AbortSignal, EngineConfig, RunListener, ScriptEngine, ScriptScope, TestExecutionCoordinator,
    TestFixture, TestSession, TestSessionManager,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::{E2eError, E2eResult};
use crate::sample::SampleProject;
use crate::scenario::{Expectation, ScenarioSpec};

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    /// `Fixture/Test` names in execution order
    pub executed: Vec<String>,
    pub error: Option<String>,
}

/// Result of running a set of scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

/// Aborts the run once a named fixture has finished
pub struct AbortAfterFixture {
    fixture: String,
    signal: AbortSignal,
}

impl AbortAfterFixture {
    pub fn new(fixture: impl Into<String>, signal: AbortSignal) -> Self {
        Self {
            fixture: fixture.into(),
            signal,
        }
    }
}

impl RunListener for AbortAfterFixture {
    fn fixture_finished(&self, fixture: &TestFixture) {
        if fixture.display_name == self.fixture {
            debug!("Aborting after fixture {}", fixture.display_name);
            self.signal.abort();
        }
    }
}

/// Configuration for the scenario runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub scenarios_dir: PathBuf,
    /// Where results are written; nothing is written when unset
    pub output_dir: Option<PathBuf>,
    /// Delay after each actor, overriding the engine default
    pub post_delay_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            scenarios_dir: PathBuf::from("tests/scenarios"),
            output_dir: None,
            post_delay_ms: 0,
        }
    }
}

pub struct ScenarioRunner {
    config: RunnerConfig,
}

impl ScenarioRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    fn load(&self) -> E2eResult<Vec<ScenarioSpec>> {
        ScenarioSpec::load_dir(&self.config.scenarios_dir)
    }

    pub async fn run_all(&self) -> E2eResult<SuiteResult> {
        let specs = self.load()?;
        Ok(self.run_specs(&specs).await)
    }

    pub async fn run_tagged(&self, tag: &str) -> E2eResult<SuiteResult> {
        let specs: Vec<_> = self
            .load()?
            .into_iter()
            .filter(|s| s.tags.iter().any(|t| t == tag))
            .collect();
        Ok(self.run_specs(&specs).await)
    }

    pub async fn run_named(&self, name: &str) -> E2eResult<ScenarioResult> {
        let spec = self
            .load()?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| E2eError::ScenarioNotFound(name.to_string()))?;
        Ok(self.run_scenario(&spec).await)
    }

    pub async fn run_specs(&self, specs: &[ScenarioSpec]) -> SuiteResult {
        let start = Instant::now();
        let mut results = Vec::new();

        info!("Running {} scenario(s)...", specs.len());
        for spec in specs {
            let result = self.run_scenario(spec).await;
            if result.success {
                info!("✓ {} ({} ms)", result.name, result.duration_ms);
            } else {
                error!(
                    "✗ {} - {}",
                    result.name,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            results.push(result);
        }

        let passed = results.iter().filter(|r| r.success).count();
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Scenario results: {} passed, {} failed ({} ms)",
            passed,
            results.len() - passed,
            duration_ms
        );
        SuiteResult {
            total: results.len(),
            passed,
            failed: results.len() - passed,
            duration_ms,
            results,
        }
    }

    /// Run one scenario in a fresh temporary workspace
    pub async fn run_scenario(&self, spec: &ScenarioSpec) -> ScenarioResult {
        let start = Instant::now();
        debug!("Running scenario: {}", spec.name);
        let outcome = self.execute(spec).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(session) => {
                let executed = executed_names(&session);
                let error = check(&spec.expect, &session, &executed).err();
                ScenarioResult {
                    name: spec.name.clone(),
                    success: error.is_none(),
                    duration_ms,
                    total: session.total,
                    passed: session.num_passed,
                    failed: session.num_failed,
                    executed,
                    error: error.map(|e| e.to_string()),
                }
            }
            Err(e) => ScenarioResult {
                name: spec.name.clone(),
                success: false,
                duration_ms,
                total: 0,
                passed: 0,
                failed: 0,
                executed: Vec::new(),
                error: Some(e.to_string()),
            },
        }
    }

    async fn execute(&self, spec: &ScenarioSpec) -> E2eResult<TestSession> {
        let workspace = tempfile::TempDir::new()?;
        let mut config = EngineConfig::with_workspace(workspace.path());
        config.offline = true;
        config.execution.post_delay_ms = self.config.post_delay_ms;

        let mut sample = SampleProject::create(config, spec)?;
        let session = run_sample(&mut sample, spec).await?;
        check_model(&spec.expect, sample.repo.engine().as_ref())?;
        Ok(session)
    }

    /// Write suite results as JSON into the output directory, if configured
    pub fn write_results(&self, results: &SuiteResult) -> E2eResult<Option<PathBuf>> {
        let Some(dir) = &self.config.output_dir else {
            return Ok(None);
        };
        std::fs::create_dir_all(dir)?;
        let path = dir.join("scenario-results.json");
        std::fs::write(&path, serde_json::to_string_pretty(results)?)?;
        info!("Results written to: {}", path.display());
        Ok(Some(path))
    }

    pub fn scenarios_dir(&self) -> &Path {
        &self.config.scenarios_dir
    }
}

/// Run a populated sample as its scenario describes, against offline sessions
pub async fn run_sample(sample: &mut SampleProject, spec: &ScenarioSpec) -> E2eResult<TestSession> {
    let mut coordinator = TestExecutionCoordinator::new(Arc::new(TestSessionManager::offline()));
    if let Some(fixture) = &spec.run.abort_after {
        let signal = coordinator.abort_signal();
        coordinator = coordinator.with_listener(Arc::new(AbortAfterFixture::new(fixture, signal)));
    }

    let session = match &spec.run.select {
        Some(expression) => sample.repo.run_selected(&coordinator, expression).await?,
        None => sample.repo.run_all(&coordinator).await?,
    };
    Ok(session)
}

fn executed_names(session: &TestSession) -> Vec<String> {
    session
        .results
        .iter()
        .map(|r| format!("{}/{}", r.fixture_name, r.test_name))
        .collect()
}

fn expect_eq<T: PartialEq + std::fmt::Debug>(what: &str, expected: Option<T>, actual: T) -> E2eResult<()> {
    match expected {
        Some(expected) if expected != actual => Err(E2eError::Expectation(format!(
            "{}: expected {:?}, got {:?}",
            what, expected, actual
        ))),
        _ => Ok(()),
    }
}

/// Compare a finished session against the expectation
pub fn check(expect: &Expectation, session: &TestSession, executed: &[String]) -> E2eResult<()> {
    expect_eq("total", expect.total, session.total)?;
    expect_eq("passed", expect.passed, session.num_passed)?;
    expect_eq("failed", expect.failed, session.num_failed)?;
    expect_eq("result", expect.result, session.session_result)?;
    if session.num_passed + session.num_failed != session.total {
        return Err(E2eError::Expectation(format!(
            "aggregates disagree: {} passed + {} failed != {} total",
            session.num_passed, session.num_failed, session.total
        )));
    }
    let orders: Vec<u32> = session.results.iter().map(|r| r.execution_order).collect();
    if orders.windows(2).any(|w| w[0] >= w[1]) {
        return Err(E2eError::Expectation(format!(
            "execution order not increasing: {:?}",
            orders
        )));
    }
    if !expect.order.is_empty() && expect.order != executed {
        return Err(E2eError::Expectation(format!(
            "order: expected {:?}, got {:?}",
            expect.order, executed
        )));
    }
    Ok(())
}

fn check_model(expect: &Expectation, engine: &dyn ScriptEngine) -> E2eResult<()> {
    let scope = ScriptScope::new();
    for (field, expected) in &expect.model {
        let actual = engine.evaluate(&format!("model.{}", field), &scope)?;
        if &actual != expected {
            return Err(E2eError::Expectation(format!(
                "model.{}: expected {}, got {}",
                field, expected, actual
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_expectation_mismatch_fails_scenario() {
        let spec = ScenarioSpec::from_yaml(
            r#"
name: mismatch
data_sources:
  - name: one
    rows: [{}]
fixtures:
  - name: F
    tests:
      - name: T
        data: one
expect:
  total: 2
"#,
        )
        .unwrap();
        let runner = ScenarioRunner::new(RunnerConfig::default());
        let result = runner.run_scenario(&spec).await;
        assert!(!result.success);
        assert_eq!(result.total, 1);
        assert!(result.error.unwrap().contains("total"));
    }

    #[tokio::test]
    async fn test_missing_scenario() {
        let tmp = tempfile::TempDir::new().unwrap();
        let runner = ScenarioRunner::new(RunnerConfig {
            scenarios_dir: tmp.path().to_path_buf(),
            ..Default::default()
        });
        assert!(matches!(
            runner.run_named("nope").await,
            Err(E2eError::ScenarioNotFound(_))
        ));
    }
}
