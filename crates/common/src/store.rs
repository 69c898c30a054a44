//! Versioned project store
//!
//! Maps a project id and version to a working directory:
//!
//! ```text
//! <base>/<project-id>/
//!   project.json                 # descriptor (versions, active version)
//!   1.0/                         # one directory per version
//!     DataModel/ References/ Process/ Scripts/ DataSources/ TestCases/
//!   2.0/
//! ```
//!
//! New versions are branched by copying the whole tree of an existing version.
//! There is no merge.

use crate::config::LayoutConfig;
use crate::types::{ProjectDescriptor, Version, VersionInfo};
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
struct Binding {
    project_id: String,
    version: Version,
}

/// File store for one project, bound to one version at a time
#[derive(Debug, Clone)]
pub struct VersionedStore {
    base_dir: PathBuf,
    layout: LayoutConfig,
    binding: Option<Binding>,
}

impl VersionedStore {
    /// Create a store over `base_dir`, the directory holding project directories
    pub fn new(base_dir: impl Into<PathBuf>, layout: LayoutConfig) -> Self {
        Self {
            base_dir: base_dir.into(),
            layout,
            binding: None,
        }
    }

    /// Bind all subsequent path operations to one version of a project
    pub fn initialize(&mut self, project_id: &str, version: Version) {
        debug!("Binding store to {} v{}", project_id, version);
        self.binding = Some(Binding {
            project_id: project_id.to_string(),
            version,
        });
    }

    /// Rebind to another version of the same project
    pub fn switch_to_version(&mut self, version: Version) -> Result<()> {
        let binding = self.binding_mut()?;
        binding.version = version;
        info!("Switched {} to version {}", binding.project_id, version);
        Ok(())
    }

    fn binding(&self) -> Result<&Binding> {
        self.binding
            .as_ref()
            .ok_or_else(|| Error::Internal("versioned store is not initialized".to_string()))
    }

    fn binding_mut(&mut self) -> Result<&mut Binding> {
        self.binding
            .as_mut()
            .ok_or_else(|| Error::Internal("versioned store is not initialized".to_string()))
    }

    pub fn layout(&self) -> &LayoutConfig {
        &self.layout
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Currently bound version
    pub fn version(&self) -> Result<Version> {
        Ok(self.binding()?.version)
    }

    pub fn project_dir(&self) -> Result<PathBuf> {
        Ok(self.base_dir.join(&self.binding()?.project_id))
    }

    pub fn version_dir_for(&self, version: &Version) -> Result<PathBuf> {
        Ok(self.project_dir()?.join(version.to_string()))
    }

    /// Working directory of the bound version
    pub fn version_dir(&self) -> Result<PathBuf> {
        self.version_dir_for(&self.binding()?.version)
    }

    pub fn data_model_dir(&self) -> Result<PathBuf> {
        Ok(self.version_dir()?.join(&self.layout.data_model_dir))
    }

    pub fn references_dir(&self) -> Result<PathBuf> {
        Ok(self.version_dir()?.join(&self.layout.references_dir))
    }

    pub fn process_dir(&self) -> Result<PathBuf> {
        Ok(self.version_dir()?.join(&self.layout.process_dir))
    }

    pub fn scripts_dir(&self) -> Result<PathBuf> {
        Ok(self.version_dir()?.join(&self.layout.scripts_dir))
    }

    pub fn data_sources_dir(&self) -> Result<PathBuf> {
        Ok(self.version_dir()?.join(&self.layout.data_sources_dir))
    }

    pub fn test_cases_dir(&self) -> Result<PathBuf> {
        Ok(self.version_dir()?.join(&self.layout.test_cases_dir))
    }

    /// Path of a file relative to the bound version directory
    pub fn resolve(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        Ok(self.version_dir()?.join(relative))
    }

    /// Create the standard directory skeleton for the bound version
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.data_model_dir()?,
            self.references_dir()?,
            self.process_dir()?,
            self.scripts_dir()?,
            self.data_sources_dir()?,
            self.test_cases_dir()?,
        ] {
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Read the project descriptor stored next to the version directories
    pub fn read_descriptor(&self, file_name: &str) -> Result<ProjectDescriptor> {
        let path = self.project_dir()?.join(file_name);
        if !path.exists() {
            return Err(Error::not_found("project", self.binding()?.project_id.clone()));
        }
        let json = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Write the project descriptor
    pub fn write_descriptor(&self, file_name: &str, descriptor: &ProjectDescriptor) -> Result<()> {
        let dir = self.project_dir()?;
        fs::create_dir_all(&dir)?;
        let path = dir.join(file_name);
        fs::write(&path, serde_json::to_string_pretty(descriptor)?)?;
        Ok(())
    }

    /// Branch a new version from `from`.
    ///
    /// The new version number is the next major after the highest known
    /// version. It is registered on `project` before the copy starts; a copy
    /// failure is returned as [`Error::VersionCopy`] and the partially copied
    /// directory is left in place.
    pub fn create_version(
        &self,
        project: &mut ProjectDescriptor,
        from: &Version,
    ) -> Result<VersionInfo> {
        if project.version(from).is_none() {
            return Err(Error::not_found("version", from.to_string()));
        }

        let latest = project
            .latest_version()
            .map(|v| v.version)
            .unwrap_or_default();
        let new_version = latest.next_major();

        let src = self.version_dir_for(from)?;
        let dst = self.version_dir_for(&new_version)?;
        if dst.exists() {
            return Err(Error::AlreadyExists {
                kind: "version".to_string(),
                id: new_version.to_string(),
            });
        }

        let info = VersionInfo::new(new_version);
        project.versions.push(info.clone());
        project.touch();

        copy_tree(&src, &dst).map_err(|e| Error::VersionCopy {
            from: from.to_string(),
            to: new_version.to_string(),
            reason: e.to_string(),
        })?;

        info!(
            "Created version {} of {} from {}",
            new_version, project.id, from
        );
        Ok(info)
    }
}

/// Recursively copy `src` into `dst`
fn copy_tree(src: &Path, dst: &Path) -> Result<u64> {
    if !src.is_dir() {
        return Err(Error::not_found("directory", src.display().to_string()));
    }

    let mut copied = 0u64;
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| Error::Internal(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::Internal(e.to_string()))?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            copied += fs::copy(entry.path(), &target)?;
        }
    }

    debug!("Copied {} bytes from {:?} to {:?}", copied, src, dst);
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProjectKind;
    use tempfile::TempDir;

    fn setup() -> (TempDir, VersionedStore, ProjectDescriptor) {
        let tmp = TempDir::new().unwrap();
        let project = ProjectDescriptor::new(ProjectKind::Automation, "Demo", "Demo");
        let mut store = VersionedStore::new(tmp.path(), LayoutConfig::default());
        store.initialize(&project.id, Version::default());
        store.ensure_layout().unwrap();
        (tmp, store, project)
    }

    #[test]
    fn test_uninitialized_store_errors() {
        let store = VersionedStore::new("/tmp", LayoutConfig::default());
        assert!(store.version_dir().is_err());
    }

    #[test]
    fn test_create_version_copies_tree() {
        let (_tmp, mut store, mut project) = setup();
        let file = store.process_dir().unwrap().join("process.proc");
        fs::write(&file, b"{}").unwrap();

        let info = store.create_version(&mut project, &Version::default()).unwrap();
        assert_eq!(info.version, Version::new(2, 0));
        assert_eq!(project.versions.len(), 2);

        store.switch_to_version(info.version).unwrap();
        let copied = store.process_dir().unwrap().join("process.proc");
        assert_eq!(fs::read(copied).unwrap(), b"{}");
    }

    #[test]
    fn test_create_version_uses_highest_known() {
        let (_tmp, store, mut project) = setup();
        store.create_version(&mut project, &Version::new(1, 0)).unwrap();
        let third = store.create_version(&mut project, &Version::new(1, 0)).unwrap();
        assert_eq!(third.version, Version::new(3, 0));
    }

    #[test]
    fn test_create_version_unknown_source() {
        let (_tmp, store, mut project) = setup();
        let err = store.create_version(&mut project, &Version::new(9, 0)).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_copy_failure_is_fatal() {
        let (_tmp, store, mut project) = setup();
        fs::remove_dir_all(store.version_dir().unwrap()).unwrap();
        let err = store.create_version(&mut project, &Version::default()).unwrap_err();
        assert!(matches!(err, Error::VersionCopy { .. }));
    }

    #[test]
    fn test_descriptor_roundtrip() {
        let (_tmp, store, project) = setup();
        store.write_descriptor("project.json", &project).unwrap();
        let loaded = store.read_descriptor("project.json").unwrap();
        assert_eq!(loaded.id, project.id);
        assert_eq!(loaded.active_version, Some(Version::default()));
    }
}
