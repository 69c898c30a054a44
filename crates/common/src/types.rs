//! Core types for Flowbench

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::Error;

/// Project version, rendered as `major.minor`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// The version produced by branching from this one
    pub fn next_major(&self) -> Self {
        Self::new(self.major + 1, 0)
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::new(1, 0)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl std::str::FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidConfig(format!("invalid version: {}", s));
        let (major, minor) = match s.trim().split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (s.trim(), "0"),
        };
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

impl TryFrom<String> for Version {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

/// A single version of a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: Version,
    /// Published versions are frozen and load their data model artifact as-is
    #[serde(default)]
    pub is_deployed: bool,
    /// Name of the frozen data model artifact, set when published
    #[serde(default)]
    pub data_model_assembly: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl VersionInfo {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            is_deployed: false,
            data_model_assembly: None,
            created_at: Utc::now(),
        }
    }
}

/// Kind of project managed by a project manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectKind {
    Automation,
    Prefab,
}

impl std::fmt::Display for ProjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectKind::Automation => write!(f, "automation"),
            ProjectKind::Prefab => write!(f, "prefab"),
        }
    }
}

/// Persisted description of an automation or prefab project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDescriptor {
    pub id: String,
    pub kind: ProjectKind,
    pub name: String,
    pub namespace: String,
    /// Owning automation project, for prefabs
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub versions: Vec<VersionInfo>,
    pub active_version: Option<Version>,
    /// Extra data model sources compiled with the project's own, relative to the version directory
    #[serde(default)]
    pub references: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectDescriptor {
    pub fn new(kind: ProjectKind, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let now = Utc::now();
        let initial = VersionInfo::new(Version::default());
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            name: name.into(),
            namespace: namespace.into(),
            owner_id: None,
            active_version: Some(initial.version),
            versions: vec![initial],
            references: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn version(&self, version: &Version) -> Option<&VersionInfo> {
        self.versions.iter().find(|v| &v.version == version)
    }

    pub fn version_mut(&mut self, version: &Version) -> Option<&mut VersionInfo> {
        self.versions.iter_mut().find(|v| &v.version == version)
    }

    pub fn latest_version(&self) -> Option<&VersionInfo> {
        self.versions.iter().max_by_key(|v| v.version)
    }

    /// The active version, failing when none is set or it is not registered
    pub fn active(&self) -> crate::Result<&VersionInfo> {
        self.active_version
            .as_ref()
            .and_then(|v| self.version(v))
            .ok_or_else(|| Error::NoActiveVersion(self.id.clone()))
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Test case priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Normal,
        Priority::High,
        Priority::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Normal => "Normal",
            Priority::High => "High",
            Priority::Critical => "Critical",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Priority::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidConfig(format!("unknown priority: {}", s)))
    }
}

fn default_delay_factor() -> f64 {
    1.0
}

/// A group of test cases sharing one-time setup and teardown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestFixture {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub is_muted: bool,
    #[serde(default = "default_delay_factor")]
    pub delay_factor: f64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub script_file: String,
}

impl TestFixture {
    pub fn new(display_name: impl Into<String>, script_file: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            display_name: display_name.into(),
            description: String::new(),
            order: 0,
            is_muted: false,
            delay_factor: 1.0,
            tags: BTreeSet::new(),
            script_file: script_file.into(),
        }
    }
}

/// A single test case belonging to a fixture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub fixture_id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub is_muted: bool,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_delay_factor")]
    pub delay_factor: f64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Bound test data source; empty when the test is not yet runnable
    #[serde(default)]
    pub test_data_id: String,
    pub script_file: String,
}

impl TestCase {
    pub fn new(
        fixture_id: impl Into<String>,
        display_name: impl Into<String>,
        script_file: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            fixture_id: fixture_id.into(),
            display_name: display_name.into(),
            description: String::new(),
            order: 0,
            is_muted: false,
            priority: Priority::Normal,
            delay_factor: 1.0,
            tags: BTreeSet::new(),
            test_data_id: String::new(),
            script_file: script_file.into(),
        }
    }

    /// A test case needs a data source binding before it can run
    pub fn is_runnable(&self) -> bool {
        !self.test_data_id.trim().is_empty()
    }
}

/// Outcome of a test execution or session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    #[default]
    None,
    Success,
    Failed,
    Aborted,
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestStatus::None => write!(f, "none"),
            TestStatus::Success => write!(f, "success"),
            TestStatus::Failed => write!(f, "failed"),
            TestStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// Failure captured from a test execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub error_type: String,
    pub message: String,
}

impl From<&Error> for FailureDetail {
    fn from(e: &Error) -> Self {
        Self {
            error_type: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

/// Kind of trace entry captured during a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    Message,
    Image,
}

/// Trace entry stored with a result; image content is the stored image reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub kind: TraceKind,
    pub recorded_at: DateTime<Utc>,
    pub content: String,
}

/// Result of one execution of a test case (one data row)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub id: String,
    pub session_id: String,
    pub test_id: String,
    pub test_name: String,
    pub fixture_id: String,
    pub fixture_name: String,
    /// Index of the data source row this execution used
    pub row_index: usize,
    /// Strictly increasing across the whole session
    pub execution_order: u32,
    pub executed_on: DateTime<Utc>,
    pub execution_time_ms: f64,
    pub status: TestStatus,
    pub failure: Option<FailureDetail>,
    #[serde(default)]
    pub traces: Vec<TraceRecord>,
}

impl TestResult {
    pub fn passed(&self) -> bool {
        self.status == TestStatus::Success
    }
}

/// One complete run of a selected set of fixtures and tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSession {
    pub id: String,
    pub template_id: Option<String>,
    pub project_id: String,
    pub project_version: String,
    pub machine_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub session_result: TestStatus,
    pub num_passed: u32,
    pub num_failed: u32,
    pub total: u32,
    pub duration_ms: f64,
    #[serde(default)]
    pub results: Vec<TestResult>,
}

impl TestSession {
    pub fn new(
        template_id: Option<String>,
        project_id: impl Into<String>,
        project_version: impl Into<String>,
        machine_name: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            template_id,
            project_id: project_id.into(),
            project_version: project_version.into(),
            machine_name: machine_name.into(),
            started_at: Utc::now(),
            finished_at: None,
            session_result: TestStatus::None,
            num_passed: 0,
            num_failed: 0,
            total: 0,
            duration_ms: 0.0,
            results: Vec::new(),
        }
    }

    /// Compute aggregates from the recorded results and stamp the finish time
    pub fn finish(&mut self) {
        let finished = Utc::now();
        self.num_passed = self.results.iter().filter(|r| r.passed()).count() as u32;
        self.num_failed = self.results.len() as u32 - self.num_passed;
        self.total = self.results.len() as u32;
        self.session_result = if self.num_failed > 0 {
            TestStatus::Failed
        } else {
            TestStatus::Success
        };
        self.duration_ms = (finished - self.started_at).num_microseconds().unwrap_or(0) as f64 / 1000.0;
        self.finished_at = Some(finished);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse_and_display() {
        let v: Version = "3.2".parse().unwrap();
        assert_eq!(v, Version::new(3, 2));
        assert_eq!(v.to_string(), "3.2");
        assert_eq!("4".parse::<Version>().unwrap(), Version::new(4, 0));
        assert!("x.1".parse::<Version>().is_err());
        assert_eq!(v.next_major(), Version::new(4, 0));
    }

    #[test]
    fn test_version_serde_as_string() {
        let info = VersionInfo::new(Version::new(2, 0));
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains(r#""version":"2.0""#));
        let back: VersionInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back.version, Version::new(2, 0));
    }

    #[test]
    fn test_active_version_missing() {
        let mut project = ProjectDescriptor::new(ProjectKind::Automation, "Demo", "Demo");
        assert!(project.active().is_ok());
        project.active_version = None;
        assert!(matches!(project.active(), Err(Error::NoActiveVersion(_))));
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("high".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_session_finish_aggregates() {
        let mut session = TestSession::new(None, "p", "1.0", "host");
        for (i, status) in [TestStatus::Success, TestStatus::Failed, TestStatus::Success]
            .into_iter()
            .enumerate()
        {
            session.results.push(TestResult {
                id: i.to_string(),
                session_id: String::new(),
                test_id: "t".to_string(),
                test_name: "t".to_string(),
                fixture_id: "f".to_string(),
                fixture_name: "f".to_string(),
                row_index: 0,
                execution_order: i as u32 + 1,
                executed_on: Utc::now(),
                execution_time_ms: 1.0,
                status,
                failure: None,
                traces: Vec::new(),
            });
        }

        session.finish();
        assert_eq!(session.total, 3);
        assert_eq!(session.num_passed, 2);
        assert_eq!(session.num_failed, 1);
        assert_eq!(session.session_result, TestStatus::Failed);
        assert!(session.finished_at.is_some());
    }
}
