//! Engine wiring shared by every command

use anyhow::{Context, Result};
use flowbench_common::{
    AutomationProjectManager, ComponentRegistry, EngineConfig, ExpressionEngine,
    PrefabProjectManager, ProjectManager, ProjectServices, TestRepositoryManager,
    TestSessionManager, Version,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Loaded configuration plus factories for the engine components
pub struct CliContext {
    pub config: EngineConfig,
    pub config_path: PathBuf,
}

/// An automation project loaded together with its test repository
pub struct OpenProject {
    pub project: AutomationProjectManager,
    pub repo: TestRepositoryManager,
}

impl CliContext {
    pub fn load(
        config_path: Option<PathBuf>,
        workspace: Option<PathBuf>,
        offline: bool,
    ) -> Result<Self> {
        let config_path = config_path.unwrap_or_else(flowbench_common::default_config_path);
        let mut config = EngineConfig::load(&config_path)
            .with_context(|| format!("failed to read config {:?}", config_path))?;
        if let Some(workspace) = workspace {
            config.workspace_root = workspace;
        }
        if offline {
            config.offline = true;
        }
        if config.execution.machine_name.is_none() {
            config.execution.machine_name = hostname::get()
                .ok()
                .map(|h| h.to_string_lossy().into_owned());
        }
        debug!("Using workspace {:?}", config.workspace_root);
        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn services(&self) -> ProjectServices {
        ProjectServices::new(
            self.config.clone(),
            Arc::new(ComponentRegistry::with_builtins()),
            Arc::new(ExpressionEngine::new()),
        )
    }

    pub fn automation(&self) -> AutomationProjectManager {
        AutomationProjectManager::new(self.services())
    }

    pub fn prefabs(&self, owner_id: &str) -> PrefabProjectManager {
        PrefabProjectManager::new(self.services(), owner_id)
    }

    /// Load a project and scan its test repository
    pub fn open(&self, project_id: &str, version: Option<Version>) -> Result<OpenProject> {
        let mut project = self.automation();
        project
            .load(project_id, version)
            .with_context(|| format!("failed to load project {}", project_id))?;
        let mut repo = TestRepositoryManager::new(project.context()?)?;
        repo.load()?;
        Ok(OpenProject { project, repo })
    }

    pub async fn sessions(&self) -> Result<Arc<TestSessionManager>> {
        Ok(Arc::new(TestSessionManager::from_config(&self.config).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_overrides_and_open() {
        let tmp = TempDir::new().unwrap();
        let ctx = CliContext::load(
            Some(tmp.path().join("missing.toml")),
            Some(tmp.path().join("ws")),
            true,
        )
        .unwrap();
        assert!(ctx.config.offline);
        assert_eq!(ctx.config.workspace_root, tmp.path().join("ws"));

        let project = ctx.automation().create_project("Shop", "Shop").unwrap();
        let opened = ctx.open(&project.id, None).unwrap();
        assert!(opened.repo.fixtures().is_empty());
        assert!(ctx.open("missing", None).is_err());
    }
}
