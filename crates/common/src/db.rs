//! SQLite persistence for test sessions and results

use crate::types::{FailureDetail, TestResult, TestSession, TestStatus, TraceRecord};
use crate::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Database wrapper for session persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                template_id TEXT,
                project_id TEXT NOT NULL,
                project_version TEXT NOT NULL,
                machine_name TEXT NOT NULL,
                session_result TEXT NOT NULL,
                num_passed INTEGER NOT NULL DEFAULT 0,
                num_failed INTEGER NOT NULL DEFAULT 0,
                total INTEGER NOT NULL DEFAULT 0,
                duration_ms REAL NOT NULL DEFAULT 0,
                started_at INTEGER NOT NULL,
                finished_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project_id);

            CREATE TABLE IF NOT EXISTS results (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                test_id TEXT NOT NULL,
                test_name TEXT NOT NULL,
                fixture_id TEXT NOT NULL,
                fixture_name TEXT NOT NULL,
                row_index INTEGER NOT NULL,
                execution_order INTEGER NOT NULL,
                executed_on INTEGER NOT NULL,
                execution_time_ms REAL NOT NULL,
                status TEXT NOT NULL,
                failure TEXT,
                traces TEXT NOT NULL DEFAULT '[]'
            );
            CREATE INDEX IF NOT EXISTS idx_results_session ON results(session_id, execution_order);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    pub fn insert_session(&self, session: &TestSession) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (id, template_id, project_id, project_version, machine_name,
                                   session_result, num_passed, num_failed, total, duration_ms,
                                   started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                session.id,
                session.template_id,
                session.project_id,
                session.project_version,
                session.machine_name,
                serde_json::to_string(&session.session_result)?,
                session.num_passed,
                session.num_failed,
                session.total,
                session.duration_ms,
                session.started_at.timestamp_millis(),
                session.finished_at.map(|t| t.timestamp_millis()),
            ],
        )?;
        debug!("Inserted session {}", session.id);
        Ok(())
    }

    /// Persist the aggregates of a session
    pub fn update_session(&self, session: &TestSession) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE sessions SET session_result = ?1, num_passed = ?2, num_failed = ?3,
                                 total = ?4, duration_ms = ?5, finished_at = ?6
             WHERE id = ?7",
            params![
                serde_json::to_string(&session.session_result)?,
                session.num_passed,
                session.num_failed,
                session.total,
                session.duration_ms,
                session.finished_at.map(|t| t.timestamp_millis()),
                session.id,
            ],
        )?;
        if changed == 0 {
            return Err(Error::not_found("session", session.id.clone()));
        }
        debug!("Updated session {}", session.id);
        Ok(())
    }

    /// Session with its results ordered by execution order
    pub fn get_session(&self, id: &str) -> Result<Option<TestSession>> {
        let conn = self.conn.lock();
        let session = conn
            .query_row(
                &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
                params![id],
                RawSession::from_row,
            )
            .optional()?;

        let Some(raw) = session else {
            return Ok(None);
        };
        let mut session = raw.into_session()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM results WHERE session_id = ?1 ORDER BY execution_order",
            RESULT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![id], RawResult::from_row)?;
        for row in rows {
            session.results.push(row?.into_result()?);
        }
        Ok(Some(session))
    }

    /// Session summaries, newest first; results are not loaded
    pub fn list_sessions(&self, project_id: Option<&str>) -> Result<Vec<TestSession>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions WHERE (?1 IS NULL OR project_id = ?1) ORDER BY started_at DESC",
            SESSION_COLUMNS
        ))?;
        let rows = stmt.query_map(params![project_id], RawSession::from_row)?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?.into_session()?);
        }
        Ok(sessions)
    }

    pub fn delete_session(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM results WHERE session_id = ?1", params![id])?;
        let deleted = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    // ========================================================================
    // Results
    // ========================================================================

    pub fn insert_result(&self, result: &TestResult) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO results ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                RESULT_COLUMNS
            ),
            params![
                result.id,
                result.session_id,
                result.test_id,
                result.test_name,
                result.fixture_id,
                result.fixture_name,
                result.row_index as i64,
                result.execution_order,
                result.executed_on.timestamp_millis(),
                result.execution_time_ms,
                serde_json::to_string(&result.status)?,
                result
                    .failure
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                serde_json::to_string(&result.traces)?,
            ],
        )?;
        debug!("Inserted result {} (#{})", result.id, result.execution_order);
        Ok(())
    }
}

const SESSION_COLUMNS: &str = "id, template_id, project_id, project_version, machine_name, \
     session_result, num_passed, num_failed, total, duration_ms, started_at, finished_at";

const RESULT_COLUMNS: &str = "id, session_id, test_id, test_name, fixture_id, fixture_name, \
     row_index, execution_order, executed_on, execution_time_ms, status, failure, traces";

fn timestamp(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| Error::Internal(format!("invalid timestamp {}", millis)))
}

struct RawSession {
    id: String,
    template_id: Option<String>,
    project_id: String,
    project_version: String,
    machine_name: String,
    session_result: String,
    num_passed: u32,
    num_failed: u32,
    total: u32,
    duration_ms: f64,
    started_at: i64,
    finished_at: Option<i64>,
}

impl RawSession {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            template_id: row.get(1)?,
            project_id: row.get(2)?,
            project_version: row.get(3)?,
            machine_name: row.get(4)?,
            session_result: row.get(5)?,
            num_passed: row.get(6)?,
            num_failed: row.get(7)?,
            total: row.get(8)?,
            duration_ms: row.get(9)?,
            started_at: row.get(10)?,
            finished_at: row.get(11)?,
        })
    }

    fn into_session(self) -> Result<TestSession> {
        Ok(TestSession {
            id: self.id,
            template_id: self.template_id,
            project_id: self.project_id,
            project_version: self.project_version,
            machine_name: self.machine_name,
            started_at: timestamp(self.started_at)?,
            finished_at: self.finished_at.map(timestamp).transpose()?,
            session_result: serde_json::from_str::<TestStatus>(&self.session_result)?,
            num_passed: self.num_passed,
            num_failed: self.num_failed,
            total: self.total,
            duration_ms: self.duration_ms,
            results: Vec::new(),
        })
    }
}

struct RawResult {
    id: String,
    session_id: String,
    test_id: String,
    test_name: String,
    fixture_id: String,
    fixture_name: String,
    row_index: i64,
    execution_order: u32,
    executed_on: i64,
    execution_time_ms: f64,
    status: String,
    failure: Option<String>,
    traces: String,
}

impl RawResult {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            test_id: row.get(2)?,
            test_name: row.get(3)?,
            fixture_id: row.get(4)?,
            fixture_name: row.get(5)?,
            row_index: row.get(6)?,
            execution_order: row.get(7)?,
            executed_on: row.get(8)?,
            execution_time_ms: row.get(9)?,
            status: row.get(10)?,
            failure: row.get(11)?,
            traces: row.get(12)?,
        })
    }

    fn into_result(self) -> Result<TestResult> {
        Ok(TestResult {
            id: self.id,
            session_id: self.session_id,
            test_id: self.test_id,
            test_name: self.test_name,
            fixture_id: self.fixture_id,
            fixture_name: self.fixture_name,
            row_index: self.row_index as usize,
            execution_order: self.execution_order,
            executed_on: timestamp(self.executed_on)?,
            execution_time_ms: self.execution_time_ms,
            status: serde_json::from_str(&self.status)?,
            failure: self
                .failure
                .map(|f| serde_json::from_str::<FailureDetail>(&f))
                .transpose()?,
            traces: serde_json::from_str::<Vec<TraceRecord>>(&self.traces)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TraceKind;

    fn result(session: &TestSession, order: u32, status: TestStatus) -> TestResult {
        TestResult {
            id: format!("r{}", order),
            session_id: session.id.clone(),
            test_id: "t1".to_string(),
            test_name: "Login".to_string(),
            fixture_id: "f1".to_string(),
            fixture_name: "Auth".to_string(),
            row_index: 0,
            execution_order: order,
            executed_on: Utc::now(),
            execution_time_ms: 12.5,
            status,
            failure: (status == TestStatus::Failed).then(|| FailureDetail {
                error_type: "AssertionFailed".to_string(),
                message: "nope".to_string(),
            }),
            traces: vec![TraceRecord {
                kind: TraceKind::Message,
                recorded_at: Utc::now(),
                content: "step".to_string(),
            }],
        }
    }

    #[test]
    fn test_session_roundtrip() {
        let db = Database::open_memory().unwrap();
        let mut session = TestSession::new(Some("nightly".to_string()), "p1", "1.0", "host");
        session.id = "s1".to_string();
        db.insert_session(&session).unwrap();

        let second = result(&session, 2, TestStatus::Failed);
        let first = result(&session, 1, TestStatus::Success);
        db.insert_result(&second).unwrap();
        db.insert_result(&first).unwrap();

        session.results = vec![first, second];
        session.finish();
        db.update_session(&session).unwrap();

        let loaded = db.get_session("s1").unwrap().unwrap();
        assert_eq!(loaded.template_id.as_deref(), Some("nightly"));
        assert_eq!(loaded.total, 2);
        assert_eq!(loaded.num_failed, 1);
        assert_eq!(loaded.session_result, TestStatus::Failed);
        let orders: Vec<_> = loaded.results.iter().map(|r| r.execution_order).collect();
        assert_eq!(orders, vec![1, 2]);
        assert_eq!(loaded.results[1].failure.as_ref().unwrap().error_type, "AssertionFailed");
        assert_eq!(loaded.results[0].traces[0].content, "step");
    }

    #[test]
    fn test_list_and_delete() {
        let db = Database::open_memory().unwrap();
        for (id, project) in [("a", "p1"), ("b", "p2"), ("c", "p1")] {
            let mut session = TestSession::new(None, project, "1.0", "host");
            session.id = id.to_string();
            db.insert_session(&session).unwrap();
        }

        assert_eq!(db.list_sessions(None).unwrap().len(), 3);
        assert_eq!(db.list_sessions(Some("p1")).unwrap().len(), 2);
        assert!(db.delete_session("a").unwrap());
        assert!(!db.delete_session("a").unwrap());
        assert!(db.get_session("a").unwrap().is_none());
    }

    #[test]
    fn test_update_missing_session() {
        let db = Database::open_memory().unwrap();
        let session = TestSession::new(None, "p", "1.0", "host");
        assert!(matches!(db.update_session(&session), Err(Error::NotFound { .. })));
    }
}
