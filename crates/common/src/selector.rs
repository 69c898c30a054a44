//! Test selection
//!
//! A selector expression is compiled once per run into
//! `fn select(fixture, test) => <expression>`. Predicates see PascalCase views
//! of the fixture and test and the `Priority` enumeration:
//!
//! ```text
//! fixture.DisplayName.Equals("F1") && test.Priority == Priority.High
//! ```
//!
//! Longer predicates can live in a script file holding a single two-parameter
//! function, loaded with [`TestSelector::from_file`].

use crate::script::{CompiledFunction, ScriptEngine, ScriptScope};
use crate::types::{TestCase, TestFixture};
use crate::{Error, Result};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Value a predicate sees as `fixture`
pub fn fixture_view(fixture: &TestFixture) -> Value {
    json!({
        "Id": fixture.id,
        "DisplayName": fixture.display_name,
        "Description": fixture.description,
        "Order": fixture.order,
        "IsMuted": fixture.is_muted,
        "DelayFactor": fixture.delay_factor,
        "Tags": fixture.tags,
    })
}

/// Value a predicate sees as `test`
pub fn test_view(test: &TestCase) -> Value {
    json!({
        "Id": test.id,
        "FixtureId": test.fixture_id,
        "DisplayName": test.display_name,
        "Description": test.description,
        "Order": test.order,
        "IsMuted": test.is_muted,
        "Priority": test.priority.as_str(),
        "DelayFactor": test.delay_factor,
        "Tags": test.tags,
        "TestDataId": test.test_data_id,
    })
}

/// Compiled run filter
pub struct TestSelector {
    engine: Arc<dyn ScriptEngine>,
    predicate: Option<CompiledFunction>,
    evaluations: AtomicUsize,
}

impl TestSelector {
    /// Compile `expression`; an empty expression selects every runnable test
    pub fn initialize(engine: Arc<dyn ScriptEngine>, expression: &str) -> Result<Self> {
        let expression = expression.trim();
        let predicate = if expression.is_empty() {
            None
        } else {
            let source = format!("fn select(fixture, test) => {}", expression);
            let compiled = engine.compile_function(&source).map_err(|e| {
                Error::Script(format!("invalid selector '{}': {}", expression, e))
            })?;
            debug!("Compiled selector: {}", expression);
            Some(compiled)
        };

        Ok(Self {
            engine,
            predicate,
            evaluations: AtomicUsize::new(0),
        })
    }

    /// Load a predicate written as `fn name(fixture, test) => ...` in `path`
    pub fn from_file(engine: Arc<dyn ScriptEngine>, path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::not_found("selector file", path.display().to_string()));
        }
        let compiled = engine
            .create_delegate(path)
            .map_err(|e| Error::Script(format!("invalid selector file {}: {}", path.display(), e)))?;
        if compiled.params().len() != 2 {
            return Err(Error::Script(format!(
                "selector {} must take (fixture, test), found {} parameter(s)",
                compiled.name(),
                compiled.params().len()
            )));
        }
        debug!("Loaded selector {} from {:?}", compiled.name(), path);

        Ok(Self {
            engine,
            predicate: Some(compiled),
            evaluations: AtomicUsize::new(0),
        })
    }

    /// Selector that accepts every runnable test
    pub fn all(engine: Arc<dyn ScriptEngine>) -> Self {
        Self {
            engine,
            predicate: None,
            evaluations: AtomicUsize::new(0),
        }
    }

    /// Whether `test` should run. Muted fixtures, muted tests and tests
    /// without a data source are rejected before the predicate is evaluated.
    pub fn can_run(&self, fixture: &TestFixture, test: &TestCase) -> Result<bool> {
        if fixture.is_muted || test.is_muted || !test.is_runnable() {
            return Ok(false);
        }
        let Some(predicate) = &self.predicate else {
            return Ok(true);
        };

        self.evaluations.fetch_add(1, Ordering::Relaxed);
        let result = self.engine.invoke(
            predicate,
            vec![fixture_view(fixture), test_view(test)],
            &ScriptScope::new(),
        )?;
        result.as_bool().ok_or_else(|| {
            Error::Script(format!("selector returned {} instead of a boolean", result))
        })
    }

    /// Number of times the predicate has been evaluated
    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ExpressionEngine;
    use crate::types::Priority;

    fn engine() -> Arc<dyn ScriptEngine> {
        Arc::new(ExpressionEngine::new())
    }

    fn fixture(name: &str) -> TestFixture {
        TestFixture::new(name, "fixture.script")
    }

    fn test(fixture: &TestFixture, name: &str, priority: Priority) -> TestCase {
        let mut t = TestCase::new(&fixture.id, name, "test.script");
        t.priority = priority;
        t.test_data_id = "rows".to_string();
        t
    }

    #[test]
    fn test_predicate_on_fixture_and_priority() {
        let selector = TestSelector::initialize(
            engine(),
            r#"fixture.DisplayName.Equals("F1") && test.Priority == Priority.High"#,
        )
        .unwrap();
        let f1 = fixture("F1");
        let f2 = fixture("F2");

        assert!(selector.can_run(&f1, &test(&f1, "a", Priority::High)).unwrap());
        assert!(!selector.can_run(&f1, &test(&f1, "b", Priority::Low)).unwrap());
        assert!(!selector.can_run(&f2, &test(&f2, "c", Priority::High)).unwrap());
    }

    #[test]
    fn test_empty_data_source_short_circuits() {
        let selector = TestSelector::initialize(engine(), "true").unwrap();
        let f = fixture("F1");
        let mut t = test(&f, "a", Priority::Normal);
        t.test_data_id.clear();

        assert!(!selector.can_run(&f, &t).unwrap());
        assert_eq!(selector.evaluations(), 0);

        t.test_data_id = "rows".to_string();
        assert!(selector.can_run(&f, &t).unwrap());
        assert_eq!(selector.evaluations(), 1);
    }

    #[test]
    fn test_muted_short_circuits() {
        let selector = TestSelector::initialize(engine(), "true").unwrap();
        let mut f = fixture("F1");
        let mut t = test(&f, "a", Priority::Normal);
        t.is_muted = true;
        assert!(!selector.can_run(&f, &t).unwrap());
        t.is_muted = false;
        f.is_muted = true;
        assert!(!selector.can_run(&f, &t).unwrap());
        assert_eq!(selector.evaluations(), 0);
    }

    #[test]
    fn test_invalid_expression_fails_initialize() {
        assert!(TestSelector::initialize(engine(), "fixture.DisplayName ==").is_err());
    }

    #[test]
    fn test_non_boolean_result_is_an_error() {
        let selector = TestSelector::initialize(engine(), "test.Order").unwrap();
        let f = fixture("F1");
        assert!(selector.can_run(&f, &test(&f, "a", Priority::Normal)).is_err());
    }

    #[test]
    fn test_empty_expression_selects_runnable() {
        let selector = TestSelector::initialize(engine(), "  ").unwrap();
        let f = fixture("F1");
        assert!(selector.can_run(&f, &test(&f, "a", Priority::Low)).unwrap());
    }

    #[test]
    fn test_predicate_from_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("smoke.select");
        std::fs::write(&path, "fn smoke(f, t) => t.Tags.Contains(\"smoke\") || f.DisplayName == \"Core\"\n").unwrap();
        let selector = TestSelector::from_file(engine(), &path).unwrap();

        let core = fixture("Core");
        let other = fixture("Other");
        let mut tagged = test(&other, "a", Priority::Normal);
        tagged.tags.insert("smoke".to_string());
        assert!(selector.can_run(&other, &tagged).unwrap());
        assert!(!selector.can_run(&other, &test(&other, "b", Priority::Normal)).unwrap());
        assert!(selector.can_run(&core, &test(&core, "c", Priority::Normal)).unwrap());
        assert_eq!(selector.evaluations(), 3);
    }

    #[test]
    fn test_selector_file_needs_two_parameters() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("bad.select");
        std::fs::write(&path, "fn bad(test) => true").unwrap();
        assert!(matches!(TestSelector::from_file(engine(), &path), Err(Error::Script(_))));
        assert!(matches!(
            TestSelector::from_file(engine(), &tmp.path().join("absent.select")),
            Err(Error::NotFound { .. })
        ));
    }
}
