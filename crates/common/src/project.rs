//! Project managers
//!
//! A project manager owns one loaded project: its versioned store, the
//! compiled data model, the script engine binding and the in-memory process
//! graph. Two kinds exist:
//!
//! - [`AutomationProjectManager`]: `<workspace>/<id>/`, runs
//!   `Scripts/initialize.script` whenever a data model is bound
//! - [`PrefabProjectManager`]: `<workspace>/<owner>/Prefabs/<id>/`, a
//!   reusable process owned by an automation project
//!
//! Both share the lifecycle implemented by [`ProjectHost`].

use crate::catalog::TypeCatalog;
use crate::config::EngineConfig;
use crate::graph::EntityGraph;
use crate::model::{
    CompiledModule, DataModelCompiler, DataModelInstance, ModelRegistry, ModuleIdentity,
};
use crate::script::ScriptEngine;
use crate::store::VersionedStore;
use crate::trace::TraceRecorder;
use crate::types::{ProjectDescriptor, ProjectKind, Version, VersionInfo};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Logical data model name derived from a project namespace
pub fn model_name(namespace: &str) -> String {
    let name: String = namespace
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if name.is_empty() {
        "Model".to_string()
    } else {
        name
    }
}

/// Shared services every project is loaded with
#[derive(Clone)]
pub struct ProjectServices {
    pub config: EngineConfig,
    pub catalog: Arc<dyn TypeCatalog>,
    pub engine: Arc<dyn ScriptEngine>,
    pub registry: Arc<ModelRegistry>,
}

impl ProjectServices {
    pub fn new(
        config: EngineConfig,
        catalog: Arc<dyn TypeCatalog>,
        engine: Arc<dyn ScriptEngine>,
    ) -> Self {
        Self {
            config,
            catalog,
            engine,
            registry: Arc::new(ModelRegistry::new()),
        }
    }
}

/// Everything belonging to a loaded project version
pub struct ProjectContext {
    id: String,
    services: ProjectServices,
    descriptor: ProjectDescriptor,
    store: VersionedStore,
    compiler: DataModelCompiler,
    module: CompiledModule,
    graph: Arc<RwLock<EntityGraph>>,
    trace: TraceRecorder,
}

impl ProjectContext {
    /// Execution context id propagated to every graph node
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn descriptor(&self) -> &ProjectDescriptor {
        &self.descriptor
    }

    pub fn store(&self) -> &VersionedStore {
        &self.store
    }

    pub fn version(&self) -> Result<Version> {
        self.store.version()
    }

    pub fn module(&self) -> &CompiledModule {
        &self.module
    }

    pub fn model_identity(&self) -> &ModuleIdentity {
        &self.module.identity
    }

    pub fn graph(&self) -> Arc<RwLock<EntityGraph>> {
        Arc::clone(&self.graph)
    }

    pub fn engine(&self) -> Arc<dyn ScriptEngine> {
        Arc::clone(&self.services.engine)
    }

    pub fn catalog(&self) -> Arc<dyn TypeCatalog> {
        Arc::clone(&self.services.catalog)
    }

    pub fn trace(&self) -> TraceRecorder {
        self.trace.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    pub fn is_published(&self) -> bool {
        self.version()
            .ok()
            .and_then(|v| self.descriptor.version(&v))
            .is_some_and(|info| info.is_deployed)
    }

    fn process_path(&self, file: &str) -> Result<PathBuf> {
        Ok(self.store.process_dir()?.join(file))
    }

    fn bind(&self, instance: DataModelInstance) {
        self.services.registry.register(self.module.identity.clone());
        self.services.engine.clear_state();
        self.services.engine.bind_model(instance);
    }
}

/// Lifecycle shared by every project kind
pub struct ProjectHost {
    kind: ProjectKind,
    services: ProjectServices,
    base_dir: PathBuf,
    descriptor_file: String,
    process_file: String,
    loaded: Option<ProjectContext>,
}

impl ProjectHost {
    pub fn new(
        kind: ProjectKind,
        services: ProjectServices,
        base_dir: PathBuf,
        descriptor_file: String,
        process_file: String,
    ) -> Self {
        Self {
            kind,
            services,
            base_dir,
            descriptor_file,
            process_file,
            loaded: None,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn services(&self) -> &ProjectServices {
        &self.services
    }

    fn new_store(&self, project_id: &str, version: Version) -> VersionedStore {
        let mut store = VersionedStore::new(&self.base_dir, self.services.config.layout.clone());
        store.initialize(project_id, version);
        store
    }

    pub fn context(&self) -> Result<&ProjectContext> {
        self.loaded
            .as_ref()
            .ok_or_else(|| Error::Internal("no project is loaded".to_string()))
    }

    fn context_mut(&mut self) -> Result<&mut ProjectContext> {
        self.loaded
            .as_mut()
            .ok_or_else(|| Error::Internal("no project is loaded".to_string()))
    }

    /// Create the descriptor and the first version skeleton on disk
    pub fn create(&self, name: &str, namespace: &str) -> Result<(ProjectDescriptor, VersionedStore)> {
        let descriptor = ProjectDescriptor::new(self.kind, name, namespace);
        let version = descriptor.active()?.version;
        let store = self.new_store(&descriptor.id, version);
        store.ensure_layout()?;

        let mut graph = EntityGraph::with_root(name, descriptor.id.as_str());
        graph.set_data_model(model_name(namespace));
        fs::write(store.process_dir()?.join(&self.process_file), graph.save()?)?;

        store.write_descriptor(&self.descriptor_file, &descriptor)?;
        info!("Created {} project {} ({})", self.kind, name, descriptor.id);
        Ok((descriptor, store))
    }

    /// Load `version` of a project, or its active version
    pub fn load(&mut self, project_id: &str, version: Option<Version>) -> Result<()> {
        let mut store = self.new_store(project_id, Version::default());
        let descriptor = store.read_descriptor(&self.descriptor_file)?;

        let version = match version {
            Some(v) => {
                descriptor
                    .version(&v)
                    .ok_or_else(|| Error::not_found("version", v.to_string()))?;
                v
            }
            None => descriptor.active()?.version,
        };
        store.switch_to_version(version)?;
        store.ensure_layout()?;

        let name = model_name(&descriptor.namespace);
        let references = descriptor
            .references
            .iter()
            .map(|r| store.resolve(r))
            .collect::<Result<Vec<_>>>()?;
        let mut compiler = DataModelCompiler::new(
            name.clone(),
            self.services.config.model.clone(),
            store.data_model_dir()?,
            store.references_dir()?,
        )
        .with_references(references);

        let published = descriptor
            .version(&version)
            .filter(|info| info.is_deployed)
            .and_then(|info| info.data_model_assembly.clone());
        let (module, instance) = match published {
            Some(artifact) => compiler.load_published(&artifact)?,
            None => compiler.compile()?,
        };

        let context_id = uuid::Uuid::new_v4().to_string();
        let process_path = store.process_dir()?.join(&self.process_file);
        if !process_path.exists() {
            return Err(Error::ProcessFileMissing(process_path));
        }
        let text = fs::read_to_string(&process_path)?;
        let mut graph = EntityGraph::load(
            &text,
            self.services.catalog.as_ref(),
            Some(&module.identity),
            &context_id,
        )?;
        if graph.data_model().is_none() {
            graph.set_data_model(name);
        }

        let context = ProjectContext {
            id: context_id,
            services: self.services.clone(),
            descriptor,
            store,
            compiler,
            module,
            graph: Arc::new(RwLock::new(graph)),
            trace: TraceRecorder::new(),
        };
        context.bind(instance);
        info!(
            "Loaded {} v{} with data model {}",
            context.descriptor.name, version, context.module.identity
        );
        self.loaded = Some(context);
        Ok(())
    }

    /// Persist the process graph and the descriptor
    pub fn save(&self) -> Result<()> {
        let ctx = self.context()?;
        let text = ctx.graph.read().save()?;
        fs::write(ctx.process_path(&self.process_file)?, text)?;
        ctx.store.write_descriptor(&self.descriptor_file, &ctx.descriptor)?;
        debug!("Saved project {}", ctx.descriptor.id);
        Ok(())
    }

    /// Recompile the data model under a new identity and rebuild the graph
    /// against it. Runtime subtrees are dropped; reopen them afterwards.
    pub fn refresh(&mut self) -> Result<ModuleIdentity> {
        let ctx = self.context_mut()?;
        if ctx.is_published() {
            return Err(Error::InvalidStateTransition {
                from: "published".to_string(),
                to: "refreshed".to_string(),
            });
        }

        let (module, instance) = ctx.compiler.refresh()?;
        let persisted = ctx.graph.read().save()?;
        let graph = EntityGraph::load(
            &persisted,
            ctx.services.catalog.as_ref(),
            Some(&module.identity),
            &ctx.id,
        )?;
        *ctx.graph.write() = graph;
        ctx.module = module;
        ctx.bind(instance);

        info!("Refreshed data model to {}", ctx.module.identity);
        Ok(ctx.module.identity.clone())
    }

    /// Branch a new version from `from` (default: the loaded version)
    pub fn create_version(&mut self, from: Option<Version>) -> Result<VersionInfo> {
        self.save()?;
        let descriptor_file = self.descriptor_file.clone();
        let ctx = self.context_mut()?;
        let from = match from {
            Some(v) => v,
            None => ctx.store.version()?,
        };
        let info = ctx.store.create_version(&mut ctx.descriptor, &from)?;
        ctx.store.write_descriptor(&descriptor_file, &ctx.descriptor)?;
        Ok(info)
    }

    /// Make `version` the active version and load it
    pub fn switch_version(&mut self, version: Version) -> Result<()> {
        let project_id = self.context()?.descriptor.id.clone();
        let mut store = self.new_store(&project_id, version);
        let mut descriptor = store.read_descriptor(&self.descriptor_file)?;
        if descriptor.version(&version).is_none() {
            return Err(Error::not_found("version", version.to_string()));
        }
        descriptor.active_version = Some(version);
        descriptor.touch();
        store.switch_to_version(version)?;
        store.write_descriptor(&self.descriptor_file, &descriptor)?;
        self.load(&project_id, Some(version))
    }

    /// Freeze the loaded version: later loads use the current artifact
    pub fn publish(&mut self) -> Result<VersionInfo> {
        self.save()?;
        let descriptor_file = self.descriptor_file.clone();
        let ctx = self.context_mut()?;
        let version = ctx.store.version()?;
        let artifact = ctx.module.identity.to_string();
        let info = ctx
            .descriptor
            .version_mut(&version)
            .ok_or_else(|| Error::not_found("version", version.to_string()))?;
        info.is_deployed = true;
        info.data_model_assembly = Some(artifact);
        let info = info.clone();
        ctx.descriptor.touch();
        ctx.store.write_descriptor(&descriptor_file, &ctx.descriptor)?;
        info!("Published {} v{}", ctx.descriptor.name, version);
        Ok(info)
    }

    pub fn close(&mut self) {
        if let Some(ctx) = self.loaded.take() {
            ctx.services.engine.clear_state();
            ctx.services.registry.unregister(&ctx.module.identity.name);
            debug!("Closed project {}", ctx.descriptor.id);
        }
    }

    /// Descriptors of every project under the base directory
    pub fn list(&self) -> Result<Vec<ProjectDescriptor>> {
        let mut projects = Vec::new();
        if !self.base_dir.exists() {
            return Ok(projects);
        }
        for entry in fs::read_dir(&self.base_dir)? {
            let path = entry?.path().join(&self.descriptor_file);
            if path.is_file() {
                projects.push(serde_json::from_str::<ProjectDescriptor>(
                    &fs::read_to_string(&path)?,
                )?);
            }
        }
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }
}

/// Load/save/refresh/snapshot for one project kind
pub trait ProjectManager: Send + Sync {
    fn kind(&self) -> ProjectKind;

    fn host(&self) -> &ProjectHost;

    fn host_mut(&mut self) -> &mut ProjectHost;

    /// Runs after a data model has been bound to the script engine
    fn on_model_bound(&self) -> Result<()> {
        Ok(())
    }

    fn context(&self) -> Result<&ProjectContext> {
        self.host().context()
    }

    fn create_project(&mut self, name: &str, namespace: &str) -> Result<ProjectDescriptor> {
        self.host().create(name, namespace).map(|(d, _)| d)
    }

    fn load(&mut self, project_id: &str, version: Option<Version>) -> Result<()> {
        self.host_mut().load(project_id, version)?;
        self.on_model_bound()
    }

    fn save(&self) -> Result<()> {
        self.host().save()
    }

    fn refresh(&mut self) -> Result<ModuleIdentity> {
        let identity = self.host_mut().refresh()?;
        self.on_model_bound()?;
        Ok(identity)
    }

    /// Snapshot the project into a new version
    fn create_version(&mut self, from: Option<Version>) -> Result<VersionInfo> {
        self.host_mut().create_version(from)
    }

    fn switch_version(&mut self, version: Version) -> Result<()> {
        self.host_mut().switch_version(version)?;
        self.on_model_bound()
    }

    fn publish(&mut self) -> Result<VersionInfo> {
        self.host_mut().publish()
    }

    fn close(&mut self) {
        self.host_mut().close()
    }

    fn list_projects(&self) -> Result<Vec<ProjectDescriptor>> {
        self.host().list()
    }
}

/// Manager for automation projects
pub struct AutomationProjectManager {
    host: ProjectHost,
}

impl AutomationProjectManager {
    pub fn new(services: ProjectServices) -> Self {
        let base_dir = services.config.workspace_root.clone();
        let layout = &services.config.layout;
        let (descriptor_file, process_file) =
            (layout.project_file.clone(), layout.process_file.clone());
        Self {
            host: ProjectHost::new(
                ProjectKind::Automation,
                services,
                base_dir,
                descriptor_file,
                process_file,
            ),
        }
    }

    fn initialize_script(&self) -> Result<PathBuf> {
        let ctx = self.host.context()?;
        Ok(ctx
            .store
            .scripts_dir()?
            .join(&ctx.config().layout.initialize_script))
    }
}

impl ProjectManager for AutomationProjectManager {
    fn kind(&self) -> ProjectKind {
        ProjectKind::Automation
    }

    fn host(&self) -> &ProjectHost {
        &self.host
    }

    fn host_mut(&mut self) -> &mut ProjectHost {
        &mut self.host
    }

    fn on_model_bound(&self) -> Result<()> {
        let script = self.initialize_script()?;
        if script.exists() {
            self.host.context()?.engine().execute_file(&script)?;
            debug!("Ran initialization script {:?}", script);
        }
        Ok(())
    }

    fn create_project(&mut self, name: &str, namespace: &str) -> Result<ProjectDescriptor> {
        let (descriptor, store) = self.host.create(name, namespace)?;
        let script = store
            .scripts_dir()?
            .join(&self.host.services().config.layout.initialize_script);
        fs::write(&script, "# Runs whenever the data model is (re)bound\n")?;
        Ok(descriptor)
    }
}

/// Manager for prefabs owned by an automation project
pub struct PrefabProjectManager {
    host: ProjectHost,
    owner_id: String,
}

impl PrefabProjectManager {
    pub fn new(services: ProjectServices, owner_id: impl Into<String>) -> Self {
        let owner_id = owner_id.into();
        let layout = &services.config.layout;
        let base_dir = services
            .config
            .workspace_root
            .join(&owner_id)
            .join(&layout.prefabs_dir);
        let (descriptor_file, process_file) =
            (layout.prefab_file.clone(), layout.prefab_process_file.clone());
        Self {
            host: ProjectHost::new(
                ProjectKind::Prefab,
                services,
                base_dir,
                descriptor_file,
                process_file,
            ),
            owner_id,
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }
}

impl ProjectManager for PrefabProjectManager {
    fn kind(&self) -> ProjectKind {
        ProjectKind::Prefab
    }

    fn host(&self) -> &ProjectHost {
        &self.host
    }

    fn host_mut(&mut self) -> &mut ProjectHost {
        &mut self.host
    }

    fn create_project(&mut self, name: &str, namespace: &str) -> Result<ProjectDescriptor> {
        let (mut descriptor, store) = self.host.create(name, namespace)?;
        descriptor.owner_id = Some(self.owner_id.clone());
        store.write_descriptor(&self.host.descriptor_file, &descriptor)?;
        Ok(descriptor)
    }
}
