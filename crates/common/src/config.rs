//! Engine configuration

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding one sub-directory per project
    pub workspace_root: PathBuf,

    /// Run without the persistent session store
    pub offline: bool,

    /// Session database path (defaults to `<workspace>/sessions.db`)
    pub session_db_path: Option<PathBuf>,

    /// Trace image store path (defaults to `<workspace>/traces`)
    pub trace_store_path: Option<PathBuf>,

    /// Data model compilation settings
    pub model: ModelConfig,

    /// Test execution settings
    pub execution: ExecutionConfig,

    /// On-disk layout of a project version
    pub layout: LayoutConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace_root: crate::default_workspace_path(),
            offline: false,
            session_db_path: None,
            trace_store_path: None,
            model: ModelConfig::default(),
            execution: ExecutionConfig::default(),
            layout: LayoutConfig::default(),
        }
    }
}

/// Data model compilation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Name of the type instantiated as the data model
    pub entry_type: String,

    /// Extension of data model source files
    pub source_extension: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            entry_type: "DataModel".to_string(),
            source_extension: "model.toml".to_string(),
        }
    }
}

/// Test execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Delay after each actor, scaled by fixture and test delay factors
    pub post_delay_ms: u64,

    /// Machine name recorded on sessions
    pub machine_name: Option<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            post_delay_ms: 0,
            machine_name: None,
        }
    }
}

/// Directory and file names used inside a project version
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub project_file: String,
    pub prefab_file: String,
    pub prefabs_dir: String,
    pub data_model_dir: String,
    pub references_dir: String,
    pub process_dir: String,
    pub process_file: String,
    pub prefab_process_file: String,
    pub scripts_dir: String,
    pub initialize_script: String,
    pub data_sources_dir: String,
    pub test_cases_dir: String,
    pub fixture_meta_file: String,
    pub fixture_process_file: String,
    pub fixture_script_file: String,
    pub test_meta_file: String,
    pub test_process_file: String,
    pub test_script_file: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            project_file: "project.json".to_string(),
            prefab_file: "prefab.json".to_string(),
            prefabs_dir: "Prefabs".to_string(),
            data_model_dir: "DataModel".to_string(),
            references_dir: "References".to_string(),
            process_dir: "Process".to_string(),
            process_file: "process.proc".to_string(),
            prefab_process_file: "prefab.proc".to_string(),
            scripts_dir: "Scripts".to_string(),
            initialize_script: "initialize.script".to_string(),
            data_sources_dir: "DataSources".to_string(),
            test_cases_dir: "TestCases".to_string(),
            fixture_meta_file: "fixture.meta".to_string(),
            fixture_process_file: "fixture.proc".to_string(),
            fixture_script_file: "fixture.script".to_string(),
            test_meta_file: "test.meta".to_string(),
            test_process_file: "test.proc".to_string(),
            test_script_file: "test.script".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Configuration rooted at `workspace_root` with everything else defaulted
    pub fn with_workspace(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            ..Self::default()
        }
    }

    /// Get the session database path
    pub fn session_db_path(&self) -> PathBuf {
        self.session_db_path
            .clone()
            .unwrap_or_else(|| self.workspace_root.join("sessions.db"))
    }

    /// Get the trace image store path
    pub fn trace_store_path(&self) -> PathBuf {
        self.trace_store_path
            .clone()
            .unwrap_or_else(|| self.workspace_root.join("traces"))
    }

    /// Machine name recorded on test sessions
    pub fn machine_name(&self) -> String {
        self.execution
            .machine_name
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "localhost".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
workspace_root = "/tmp/flowbench"
offline = true

[execution]
post_delay_ms = 25
"#,
        )
        .unwrap();

        assert!(config.offline);
        assert_eq!(config.execution.post_delay_ms, 25);
        assert_eq!(config.model.entry_type, "DataModel");
        assert_eq!(config.layout.process_file, "process.proc");
        assert_eq!(
            config.session_db_path(),
            PathBuf::from("/tmp/flowbench/sessions.db")
        );
    }

    #[test]
    fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("conf").join("flowbench.toml");

        let mut config = EngineConfig::with_workspace(tmp.path());
        config.model.entry_type = "Model".to_string();
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.model.entry_type, "Model");
        assert_eq!(loaded.workspace_root, tmp.path());
    }

    #[test]
    fn test_missing_file_is_default() {
        let tmp = TempDir::new().unwrap();
        let config = EngineConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert!(!config.offline);
    }
}
