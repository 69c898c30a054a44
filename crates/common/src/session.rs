//! Test session recording
//!
//! [`TestSessionManager`] keeps the sessions of the current process in memory
//! and mirrors them to a [`SessionStore`]:
//! - [`PersistentSessionStore`]: SQLite database plus content-addressed image store
//! - [`OfflineSessionStore`]: memory only, identifiers prefixed `local-`

use crate::cas::ContentAddressedStore;
use crate::config::EngineConfig;
use crate::db::Database;
use crate::types::{TestResult, TestSession, TestStatus};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Backing store for sessions, results and trace images
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Whether the store is the local fallback
    fn is_offline(&self) -> bool;

    /// Identifier for a new session or result
    fn new_id(&self) -> String;

    async fn create_session(&self, session: &TestSession) -> Result<()>;

    async fn update_session(&self, session: &TestSession) -> Result<()>;

    async fn save_result(&self, result: &TestResult) -> Result<()>;

    /// Store an image and return the reference recorded in the trace
    async fn upload_image(
        &self,
        session_id: &str,
        result_id: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<String>;

    async fn get_session(&self, id: &str) -> Result<Option<TestSession>>;

    async fn list_sessions(&self, project_id: Option<&str>) -> Result<Vec<TestSession>>;
}

/// SQLite-backed store
#[derive(Clone)]
pub struct PersistentSessionStore {
    db: Database,
    images: ContentAddressedStore,
}

impl PersistentSessionStore {
    pub fn new(db: Database, images: ContentAddressedStore) -> Self {
        Self { db, images }
    }

    /// Open the database and image store named by `config`
    pub async fn open(config: &EngineConfig) -> Result<Self> {
        let db = Database::open(config.session_db_path())?;
        let images = ContentAddressedStore::new(config.trace_store_path()).await?;
        Ok(Self::new(db, images))
    }

    pub fn images(&self) -> &ContentAddressedStore {
        &self.images
    }
}

#[async_trait]
impl SessionStore for PersistentSessionStore {
    fn is_offline(&self) -> bool {
        false
    }

    fn new_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    async fn create_session(&self, session: &TestSession) -> Result<()> {
        self.db.insert_session(session)
    }

    async fn update_session(&self, session: &TestSession) -> Result<()> {
        self.db.update_session(session)
    }

    async fn save_result(&self, result: &TestResult) -> Result<()> {
        self.db.insert_result(result)
    }

    async fn upload_image(
        &self,
        session_id: &str,
        result_id: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<String> {
        self.images
            .put_trace_image(session_id, result_id, name, bytes)
            .await
    }

    async fn get_session(&self, id: &str) -> Result<Option<TestSession>> {
        self.db.get_session(id)
    }

    async fn list_sessions(&self, project_id: Option<&str>) -> Result<Vec<TestSession>> {
        self.db.list_sessions(project_id)
    }
}

/// In-memory fallback used when no persistent store is available
#[derive(Default)]
pub struct OfflineSessionStore {
    sessions: Mutex<HashMap<String, TestSession>>,
    images: Mutex<HashMap<String, Vec<u8>>>,
}

impl OfflineSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Image uploaded under `reference`
    pub fn image(&self, reference: &str) -> Option<Vec<u8>> {
        self.images.lock().get(reference).cloned()
    }
}

#[async_trait]
impl SessionStore for OfflineSessionStore {
    fn is_offline(&self) -> bool {
        true
    }

    fn new_id(&self) -> String {
        format!("local-{}", uuid::Uuid::new_v4())
    }

    async fn create_session(&self, session: &TestSession) -> Result<()> {
        self.sessions.lock().insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn update_session(&self, session: &TestSession) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let stored = sessions
            .get_mut(&session.id)
            .ok_or_else(|| Error::not_found("session", session.id.clone()))?;
        let results = std::mem::take(&mut stored.results);
        *stored = session.clone();
        stored.results = results;
        Ok(())
    }

    async fn save_result(&self, result: &TestResult) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(&result.session_id)
            .ok_or_else(|| Error::not_found("session", result.session_id.clone()))?;
        session.results.push(result.clone());
        session.results.sort_by_key(|r| r.execution_order);
        Ok(())
    }

    async fn upload_image(
        &self,
        session_id: &str,
        result_id: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<String> {
        let reference = format!("local-{}/{}/{}", session_id, result_id, name);
        self.images.lock().insert(reference.clone(), bytes.to_vec());
        Ok(reference)
    }

    async fn get_session(&self, id: &str) -> Result<Option<TestSession>> {
        Ok(self.sessions.lock().get(id).cloned())
    }

    async fn list_sessions(&self, project_id: Option<&str>) -> Result<Vec<TestSession>> {
        let mut sessions: Vec<TestSession> = self
            .sessions
            .lock()
            .values()
            .filter(|s| project_id.map_or(true, |p| s.project_id == p))
            .map(|s| TestSession {
                results: Vec::new(),
                ..s.clone()
            })
            .collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(sessions)
    }
}

/// Records sessions and their results
pub struct TestSessionManager {
    store: Arc<dyn SessionStore>,
    active: Mutex<HashMap<String, TestSession>>,
}

impl TestSessionManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn offline() -> Self {
        Self::new(Arc::new(OfflineSessionStore::new()))
    }

    /// Persistent store unless the configuration asks for offline mode
    pub async fn from_config(config: &EngineConfig) -> Result<Self> {
        if config.offline {
            info!("Session recording is offline");
            return Ok(Self::offline());
        }
        Ok(Self::new(Arc::new(PersistentSessionStore::open(config).await?)))
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn is_offline(&self) -> bool {
        self.store.is_offline()
    }

    /// Create and register a new session
    pub async fn start_session(
        &self,
        template_id: Option<String>,
        project_id: &str,
        project_version: &str,
        machine_name: &str,
    ) -> Result<TestSession> {
        let mut session = TestSession::new(template_id, project_id, project_version, machine_name);
        session.id = self.store.new_id();
        self.store.create_session(&session).await?;
        self.active.lock().insert(session.id.clone(), session.clone());
        info!("Started session {} for {} v{}", session.id, project_id, project_version);
        Ok(session)
    }

    /// Assign an identifier to a result before its images are uploaded
    pub fn prepare_result(&self, session_id: &str, result: &mut TestResult) {
        if result.id.is_empty() {
            result.id = self.store.new_id();
        }
        result.session_id = session_id.to_string();
    }

    /// Record a result.
    ///
    /// The result is kept in the session even when persisting it fails; the
    /// error is still returned so the caller can log it.
    pub async fn add_result(&self, session_id: &str, mut result: TestResult) -> Result<TestResult> {
        self.prepare_result(session_id, &mut result);
        {
            let mut active = self.active.lock();
            let session = active
                .get_mut(session_id)
                .ok_or_else(|| Error::not_found("session", session_id))?;
            session.results.push(result.clone());
        }
        self.store.save_result(&result).await?;
        debug!("Recorded result #{} for {}", result.execution_order, result.test_name);
        Ok(result)
    }

    pub async fn upload_trace_image(
        &self,
        session_id: &str,
        result_id: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<String> {
        self.store.upload_image(session_id, result_id, name, bytes).await
    }

    /// Compute aggregates, persist them and retire the session
    pub async fn finish_session(&self, session_id: &str, aborted: bool) -> Result<TestSession> {
        let mut session = self
            .active
            .lock()
            .remove(session_id)
            .ok_or_else(|| Error::not_found("session", session_id))?;
        session.finish();
        if aborted {
            session.session_result = TestStatus::Aborted;
        }

        if let Err(e) = self.store.update_session(&session).await {
            warn!("Failed to persist session {}: {}", session.id, e);
        }
        info!(
            "Finished session {}: {} passed, {} failed, {} total",
            session.id, session.num_passed, session.num_failed, session.total
        );
        Ok(session)
    }

    /// Session by id, active ones first
    pub async fn get_session(&self, id: &str) -> Result<Option<TestSession>> {
        if let Some(session) = self.active.lock().get(id) {
            return Ok(Some(session.clone()));
        }
        self.store.get_session(id).await
    }

    pub async fn list_sessions(&self, project_id: Option<&str>) -> Result<Vec<TestSession>> {
        self.store.list_sessions(project_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn result(order: u32, status: TestStatus) -> TestResult {
        TestResult {
            id: String::new(),
            session_id: String::new(),
            test_id: format!("t{}", order),
            test_name: format!("Test {}", order),
            fixture_id: "f".to_string(),
            fixture_name: "F".to_string(),
            row_index: 0,
            execution_order: order,
            executed_on: Utc::now(),
            execution_time_ms: 1.0,
            status,
            failure: None,
            traces: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_offline_session_lifecycle() {
        let manager = TestSessionManager::offline();
        assert!(manager.is_offline());

        let session = manager.start_session(None, "p1", "1.0", "host").await.unwrap();
        assert!(session.id.starts_with("local-"));

        let recorded = manager
            .add_result(&session.id, result(1, TestStatus::Success))
            .await
            .unwrap();
        assert!(recorded.id.starts_with("local-"));
        manager
            .add_result(&session.id, result(2, TestStatus::Failed))
            .await
            .unwrap();

        let finished = manager.finish_session(&session.id, false).await.unwrap();
        assert_eq!((finished.num_passed, finished.num_failed, finished.total), (1, 1, 2));

        let stored = manager.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.results.len(), 2);
        assert_eq!(stored.total, 2);
        assert_eq!(manager.list_sessions(Some("p1")).await.unwrap().len(), 1);
        assert!(manager.list_sessions(Some("p2")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persistent_session_with_images() {
        let tmp = TempDir::new().unwrap();
        let config = EngineConfig::with_workspace(tmp.path());
        let manager = TestSessionManager::from_config(&config).await.unwrap();
        assert!(!manager.is_offline());

        let session = manager.start_session(Some("smoke".into()), "p1", "2.0", "host").await.unwrap();
        let mut r = result(1, TestStatus::Success);
        manager.prepare_result(&session.id, &mut r);
        let reference = manager
            .upload_trace_image(&session.id, &r.id, "shot.png", b"image")
            .await
            .unwrap();
        assert_eq!(reference, ContentAddressedStore::hash(b"image"));
        manager.add_result(&session.id, r).await.unwrap();

        let finished = manager.finish_session(&session.id, true).await.unwrap();
        assert_eq!(finished.session_result, TestStatus::Aborted);

        let loaded = manager.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.results.len(), 1);
        assert_eq!(loaded.template_id.as_deref(), Some("smoke"));
        assert_eq!(loaded.session_result, TestStatus::Aborted);
    }

    #[tokio::test]
    async fn test_unknown_session_is_rejected() {
        let manager = TestSessionManager::offline();
        assert!(manager.add_result("nope", result(1, TestStatus::Success)).await.is_err());
        assert!(manager.finish_session("nope", false).await.is_err());
    }
}
