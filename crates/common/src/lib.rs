//! Flowbench Common Library
//!
//! Versioned project engine and test execution pipeline shared by the
//! Flowbench CLI and its end-to-end tests.

pub mod actor;
pub mod cas;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod datasource;
pub mod db;
pub mod error;
pub mod filter;
pub mod graph;
pub mod model;
pub mod project;
pub mod repository;
pub mod script;
pub mod selector;
pub mod session;
pub mod store;
pub mod trace;
pub mod types;

// Re-export commonly used types
pub use catalog::{ComponentRegistry, ComponentType, TypeCatalog};
pub use config::EngineConfig;
pub use coordinator::{AbortSignal, RunListener, TestExecutionCoordinator};
pub use db::Database;
pub use error::{Error, Result};
pub use graph::{ComponentNode, EntityGraph};
pub use model::{DataModelCompiler, ModelRegistry, ModuleIdentity};
pub use project::{
    AutomationProjectManager, PrefabProjectManager, ProjectContext, ProjectManager,
    ProjectServices,
};
pub use repository::TestRepositoryManager;
pub use script::{ExpressionEngine, ScriptEngine, ScriptScope};
pub use selector::TestSelector;
pub use session::{OfflineSessionStore, PersistentSessionStore, SessionStore, TestSessionManager};
pub use store::VersionedStore;
pub use types::*;

/// Flowbench version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default workspace holding every automation project
pub fn default_workspace_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".flowbench")
}

/// Default configuration file
pub fn default_config_path() -> std::path::PathBuf {
    default_workspace_path().join("flowbench.toml")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
