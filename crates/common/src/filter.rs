//! Fixture and test visibility filter
//!
//! A query is either `key:value` or a bare substring matched against display
//! names. A fixture stays visible when any of its tests is visible.

use crate::types::{TestCase, TestFixture};
use std::collections::BTreeSet;

/// Parsed filter query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterQuery {
    All,
    Name(String),
    Id(String),
    Tag(String),
    Priority(String),
    Description(String),
    Muted(bool),
    Text(String),
}

impl FilterQuery {
    pub fn parse(query: &str) -> Self {
        let query = query.trim();
        if query.is_empty() {
            return FilterQuery::All;
        }
        let Some((key, value)) = query.split_once(':') else {
            return FilterQuery::Text(query.to_lowercase());
        };
        let value = value.trim().to_lowercase();
        match key.trim().to_lowercase().as_str() {
            "name" => FilterQuery::Name(value),
            "id" => FilterQuery::Id(value),
            "tag" => FilterQuery::Tag(value),
            "priority" => FilterQuery::Priority(value),
            "description" | "desc" => FilterQuery::Description(value),
            "muted" => FilterQuery::Muted(value == "true" || value == "yes"),
            _ => FilterQuery::Text(query.to_lowercase()),
        }
    }

    fn matches(
        &self,
        id: &str,
        name: &str,
        description: &str,
        tags: &BTreeSet<String>,
        muted: bool,
        priority: Option<&str>,
    ) -> bool {
        let has_tag = |wanted: &str| tags.iter().any(|t| t.to_lowercase() == wanted);
        match self {
            FilterQuery::All => true,
            FilterQuery::Name(v) | FilterQuery::Text(v) => name.to_lowercase().contains(v),
            FilterQuery::Id(v) => id.to_lowercase() == *v,
            FilterQuery::Tag(v) => has_tag(v),
            FilterQuery::Priority(v) => priority.is_some_and(|p| p.to_lowercase() == *v),
            FilterQuery::Description(v) => description.to_lowercase().contains(v),
            FilterQuery::Muted(v) => muted == *v,
        }
    }

    pub fn matches_fixture(&self, fixture: &TestFixture) -> bool {
        self.matches(
            &fixture.id,
            &fixture.display_name,
            &fixture.description,
            &fixture.tags,
            fixture.is_muted,
            None,
        )
    }

    pub fn matches_test(&self, test: &TestCase) -> bool {
        self.matches(
            &test.id,
            &test.display_name,
            &test.description,
            &test.tags,
            test.is_muted,
            Some(test.priority.as_str()),
        )
    }
}

/// Ids left visible by a filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Visibility {
    pub fixtures: BTreeSet<String>,
    pub tests: BTreeSet<String>,
}

impl Visibility {
    pub fn fixture_visible(&self, id: &str) -> bool {
        self.fixtures.contains(id)
    }

    pub fn test_visible(&self, id: &str) -> bool {
        self.tests.contains(id)
    }
}

/// Apply `query` to a fixture/test set
pub fn apply(query: &str, fixtures: &[TestFixture], tests: &[TestCase]) -> Visibility {
    let query = FilterQuery::parse(query);
    let mut visibility = Visibility::default();

    for test in tests.iter().filter(|t| query.matches_test(t)) {
        visibility.tests.insert(test.id.clone());
        visibility.fixtures.insert(test.fixture_id.clone());
    }
    for fixture in fixtures.iter().filter(|f| query.matches_fixture(f)) {
        visibility.fixtures.insert(fixture.id.clone());
    }
    visibility
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;

    fn data() -> (Vec<TestFixture>, Vec<TestCase>) {
        let login = TestFixture::new("Login", "f.script");
        let mut checkout = TestFixture::new("Checkout", "f.script");
        checkout.tags.insert("Smoke".to_string());

        let mut valid = TestCase::new(&login.id, "Valid password", "t.script");
        valid.priority = Priority::High;
        let mut invalid = TestCase::new(&login.id, "Invalid password", "t.script");
        invalid.is_muted = true;
        let pay = TestCase::new(&checkout.id, "Pay by card", "t.script");

        (vec![login, checkout], vec![valid, invalid, pay])
    }

    #[test]
    fn test_parse() {
        assert_eq!(FilterQuery::parse(""), FilterQuery::All);
        assert_eq!(FilterQuery::parse("Tag: Smoke"), FilterQuery::Tag("smoke".into()));
        assert_eq!(FilterQuery::parse("muted:true"), FilterQuery::Muted(true));
        assert_eq!(FilterQuery::parse("card"), FilterQuery::Text("card".into()));
        assert_eq!(FilterQuery::parse("http://x"), FilterQuery::Text("http://x".into()));
    }

    #[test]
    fn test_fixture_visible_through_its_tests() {
        let (fixtures, tests) = data();
        let visible = apply("priority:high", &fixtures, &tests);
        assert_eq!(visible.tests.len(), 1);
        assert!(visible.test_visible(&tests[0].id));
        assert!(visible.fixture_visible(&fixtures[0].id));
        assert!(!visible.fixture_visible(&fixtures[1].id));
    }

    #[test]
    fn test_substring_and_tag() {
        let (fixtures, tests) = data();
        let visible = apply("password", &fixtures, &tests);
        assert_eq!(visible.tests.len(), 2);
        assert_eq!(visible.fixtures.len(), 1);

        let visible = apply("tag:smoke", &fixtures, &tests);
        assert!(visible.tests.is_empty());
        assert!(visible.fixture_visible(&fixtures[1].id));

        let visible = apply("", &fixtures, &tests);
        assert_eq!(visible.tests.len(), 3);
        assert_eq!(visible.fixtures.len(), 2);
    }
}
