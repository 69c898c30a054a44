//! Data model compilation
//!
//! A project's data model is declared in TOML source files:
//!
//! ```toml
//! [types.DataModel]
//! Url = "https://example.com"
//! Retries = 3
//! Login = "@Credentials"      # embeds an instance of another type
//!
//! [types.Credentials]
//! UserName = ""
//! ```
//!
//! Compiling merges every source (user sources plus project references) into
//! one [`CompiledModule`], persists it to the references directory as
//! `<identity>.json` and instantiates the entry type. Every compilation gets a
//! fresh identity `<name>_<iteration>`; iterations only ever increase.

use crate::config::ModelConfig;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const EMBED_PREFIX: char = '@';

/// Identity of one compiled data model module
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleIdentity {
    pub name: String,
    pub iteration: u32,
}

impl ModuleIdentity {
    pub fn new(name: impl Into<String>, iteration: u32) -> Self {
        Self {
            name: name.into(),
            iteration,
        }
    }

    /// Parse `<name>_<iteration>`
    pub fn parse(s: &str) -> Option<Self> {
        let (name, iteration) = s.rsplit_once('_')?;
        if name.is_empty() {
            return None;
        }
        Some(Self::new(name, iteration.parse().ok()?))
    }
}

impl std::fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.name, self.iteration)
    }
}

/// Field of a declared type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldDef {
    /// Plain default value
    Value(Value),
    /// Instance of another declared type
    Embedded(String),
}

/// A type declared by a data model source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: String,
    pub source: String,
    pub fields: BTreeMap<String, FieldDef>,
}

/// Output of a successful compilation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledModule {
    pub identity: ModuleIdentity,
    pub entry_type: String,
    pub types: BTreeMap<String, TypeDef>,
    pub source_digest: String,
    pub compiled_at: DateTime<Utc>,
}

impl CompiledModule {
    /// Instantiate the entry type with parameterless construction
    pub fn instantiate(&self) -> Result<DataModelInstance> {
        let value = self.construct(&self.entry_type)?;
        Ok(DataModelInstance {
            identity: self.identity.clone(),
            value,
        })
    }

    fn construct(&self, type_name: &str) -> Result<Value> {
        let def = self.types.get(type_name).ok_or_else(|| Error::Compilation {
            diagnostics: vec![format!("type {} is not declared", type_name)],
        })?;

        let mut object = Map::new();
        for (field, kind) in &def.fields {
            let value = match kind {
                FieldDef::Value(v) => v.clone(),
                FieldDef::Embedded(t) => self.construct(t)?,
            };
            object.insert(field.clone(), value);
        }
        Ok(Value::Object(object))
    }

    /// Artifact file name inside the references directory
    pub fn artifact_name(&self) -> String {
        format!("{}.json", self.identity)
    }
}

/// A live instance of a compiled data model
#[derive(Debug, Clone)]
pub struct DataModelInstance {
    pub identity: ModuleIdentity,
    pub value: Value,
}

/// Maps logical model names to the currently loaded module identity.
///
/// Persisted documents reference the logical name only; the registry is what
/// turns that into the physical module loaded right now.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    entries: RwLock<HashMap<String, ModuleIdentity>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, identity: ModuleIdentity) {
        debug!("Registered data model {}", identity);
        self.entries.write().insert(identity.name.clone(), identity);
    }

    pub fn resolve(&self, name: &str) -> Option<ModuleIdentity> {
        self.entries.read().get(name).cloned()
    }

    pub fn unregister(&self, name: &str) {
        self.entries.write().remove(name);
    }
}

/// Rewrite every `<name>_<digits>` token in `text` to `current`.
///
/// Documents written against an earlier compilation embed that iteration's
/// identity; iteration numbers carry no meaning beyond uniqueness, so they are
/// normalized before parsing.
pub fn rewrite_module_identity(text: &str, current: &ModuleIdentity) -> String {
    let pattern = format!(r"\b{}_\d+\b", regex::escape(&current.name));
    match Regex::new(&pattern) {
        Ok(re) => re.replace_all(text, current.to_string().as_str()).into_owned(),
        Err(e) => {
            warn!("Invalid identity pattern {}: {}", pattern, e);
            text.to_string()
        }
    }
}

/// Compiles a project's data model sources
#[derive(Debug)]
pub struct DataModelCompiler {
    name: String,
    config: ModelConfig,
    sources_dir: PathBuf,
    references_dir: PathBuf,
    reference_sources: Vec<PathBuf>,
    iteration: u32,
}

impl DataModelCompiler {
    /// Create a compiler for the module `name`
    pub fn new(
        name: impl Into<String>,
        config: ModelConfig,
        sources_dir: impl Into<PathBuf>,
        references_dir: impl Into<PathBuf>,
    ) -> Self {
        let mut compiler = Self {
            name: name.into(),
            config,
            sources_dir: sources_dir.into(),
            references_dir: references_dir.into(),
            reference_sources: Vec::new(),
            iteration: 0,
        };
        compiler.iteration = compiler.highest_persisted_iteration();
        compiler
    }

    /// Additional sources compiled together with the project's own
    pub fn with_references(mut self, references: Vec<PathBuf>) -> Self {
        self.reference_sources = references;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Iteration of the most recent compilation
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Compile the sources into a new module and instantiate it.
    ///
    /// A default source is generated first when the project has none.
    pub fn compile(&mut self) -> Result<(CompiledModule, DataModelInstance)> {
        let sources = self.collect_sources()?;
        let identity = self.next_identity();
        let module = self.build(identity, &sources)?;
        self.persist(&module)?;
        self.remove_stale_artifacts(&module.identity);
        let instance = module.instantiate()?;
        info!(
            "Compiled data model {} from {} source(s)",
            module.identity,
            sources.len()
        );
        Ok((module, instance))
    }

    /// Recompile under a new identity, even when the sources did not change
    pub fn refresh(&mut self) -> Result<(CompiledModule, DataModelInstance)> {
        debug!("Refreshing data model {} (iteration {})", self.name, self.iteration);
        self.compile()
    }

    /// Load a frozen artifact of a published version instead of compiling
    pub fn load_published(&mut self, artifact: &str) -> Result<(CompiledModule, DataModelInstance)> {
        let file = if artifact.ends_with(".json") {
            artifact.to_string()
        } else {
            format!("{}.json", artifact)
        };
        let path = self.references_dir.join(file);
        if !path.exists() {
            return Err(Error::not_found("data model artifact", artifact));
        }
        let module: CompiledModule = serde_json::from_str(&fs::read_to_string(&path)?)?;
        self.iteration = self.iteration.max(module.identity.iteration);
        let instance = module.instantiate()?;
        info!("Loaded published data model {}", module.identity);
        Ok((module, instance))
    }

    fn next_identity(&mut self) -> ModuleIdentity {
        self.iteration += 1;
        ModuleIdentity::new(self.name.clone(), self.iteration)
    }

    fn highest_persisted_iteration(&self) -> u32 {
        let Ok(entries) = fs::read_dir(&self.references_dir) else {
            return 0;
        };
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let file = e.file_name().to_string_lossy().to_string();
                let stem = file.strip_suffix(".json")?.to_string();
                ModuleIdentity::parse(&stem)
            })
            .filter(|id| id.name == self.name)
            .map(|id| id.iteration)
            .max()
            .unwrap_or(0)
    }

    fn is_source(&self, path: &Path) -> bool {
        path.is_file()
            && path
                .file_name()
                .map(|n| {
                    n.to_string_lossy()
                        .ends_with(&format!(".{}", self.config.source_extension))
                })
                .unwrap_or(false)
    }

    /// User sources (sorted by file name) followed by references
    fn collect_sources(&self) -> Result<Vec<(String, String)>> {
        fs::create_dir_all(&self.sources_dir)?;

        let mut paths: Vec<PathBuf> = fs::read_dir(&self.sources_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| self.is_source(p))
            .collect();
        paths.sort();

        if paths.is_empty() {
            let seed = self
                .sources_dir
                .join(format!("{}.{}", self.config.entry_type, self.config.source_extension));
            fs::write(&seed, default_source(&self.config.entry_type))?;
            info!("Generated default data model source {:?}", seed);
            paths.push(seed);
        }

        let mut sources = Vec::new();
        for path in paths.iter().chain(self.reference_sources.iter()) {
            let text = fs::read_to_string(path).map_err(|e| Error::Compilation {
                diagnostics: vec![format!("{}: {}", path.display(), e)],
            })?;
            let label = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            sources.push((label, text));
        }
        Ok(sources)
    }

    fn build(&self, identity: ModuleIdentity, sources: &[(String, String)]) -> Result<CompiledModule> {
        let mut diagnostics = Vec::new();
        let mut types: BTreeMap<String, TypeDef> = BTreeMap::new();
        let mut hasher = Sha256::new();

        for (label, text) in sources {
            hasher.update(label.as_bytes());
            hasher.update(text.as_bytes());

            let parsed: toml::Value = match toml::from_str(text) {
                Ok(v) => v,
                Err(e) => {
                    diagnostics.push(format!("{}: {}", label, e));
                    continue;
                }
            };

            let Some(declared) = parsed.get("types").and_then(|t| t.as_table()) else {
                diagnostics.push(format!("{}: missing [types] table", label));
                continue;
            };

            for (type_name, body) in declared {
                let Some(table) = body.as_table() else {
                    diagnostics.push(format!("{}: type {} must be a table", label, type_name));
                    continue;
                };
                if let Some(existing) = types.get(type_name) {
                    diagnostics.push(format!(
                        "{}: type {} already declared in {}",
                        label, type_name, existing.source
                    ));
                    continue;
                }

                let mut fields = BTreeMap::new();
                for (field, value) in table {
                    let def = match value.as_str() {
                        Some(s) if s.starts_with(EMBED_PREFIX) => {
                            FieldDef::Embedded(s[EMBED_PREFIX.len_utf8()..].to_string())
                        }
                        _ => FieldDef::Value(serde_json::to_value(value)?),
                    };
                    fields.insert(field.clone(), def);
                }

                types.insert(
                    type_name.clone(),
                    TypeDef {
                        name: type_name.clone(),
                        source: label.clone(),
                        fields,
                    },
                );
            }
        }

        for def in types.values() {
            for (field, kind) in &def.fields {
                if let FieldDef::Embedded(target) = kind {
                    if !types.contains_key(target) {
                        diagnostics.push(format!(
                            "{}: {}.{} embeds unknown type {}",
                            def.source, def.name, field, target
                        ));
                    }
                }
            }
        }

        if let Some(cycle) = find_embedding_cycle(&types) {
            diagnostics.push(format!("recursive embedding: {}", cycle.join(" -> ")));
        }

        if !types.contains_key(&self.config.entry_type) {
            diagnostics.push(format!(
                "entry type {} is not declared by any source",
                self.config.entry_type
            ));
        }

        if !diagnostics.is_empty() {
            return Err(Error::Compilation { diagnostics });
        }

        Ok(CompiledModule {
            identity,
            entry_type: self.config.entry_type.clone(),
            types,
            source_digest: hex::encode(hasher.finalize()),
            compiled_at: Utc::now(),
        })
    }

    fn persist(&self, module: &CompiledModule) -> Result<PathBuf> {
        fs::create_dir_all(&self.references_dir)?;
        let path = self.references_dir.join(module.artifact_name());
        fs::write(&path, serde_json::to_string_pretty(module)?)?;
        debug!("Persisted data model artifact {:?}", path);
        Ok(path)
    }

    /// Remove artifacts of earlier iterations; failures are logged only
    fn remove_stale_artifacts(&self, current: &ModuleIdentity) {
        let Ok(entries) = fs::read_dir(&self.references_dir) else {
            return;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let file = entry.file_name().to_string_lossy().to_string();
            let Some(id) = file.strip_suffix(".json").and_then(ModuleIdentity::parse) else {
                continue;
            };
            if id.name == current.name && id.iteration < current.iteration {
                if let Err(e) = fs::remove_file(entry.path()) {
                    warn!("Failed to remove stale data model artifact {}: {}", file, e);
                }
            }
        }
    }
}

fn default_source(entry_type: &str) -> String {
    format!(
        "# Data model of the project. Fields declared here are available to scripts as `model.<Field>`.\n[types.{}]\n",
        entry_type
    )
}

fn find_embedding_cycle(types: &BTreeMap<String, TypeDef>) -> Option<Vec<String>> {
    fn visit(
        name: &str,
        types: &BTreeMap<String, TypeDef>,
        visited: &mut HashSet<String>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = stack.iter().position(|n| n == name) {
            let mut cycle = stack[pos..].to_vec();
            cycle.push(name.to_string());
            return Some(cycle);
        }
        if !visited.insert(name.to_string()) {
            return None;
        }
        stack.push(name.to_string());
        if let Some(def) = types.get(name) {
            for kind in def.fields.values() {
                if let FieldDef::Embedded(target) = kind {
                    if let Some(cycle) = visit(target, types, visited, stack) {
                        return Some(cycle);
                    }
                }
            }
        }
        stack.pop();
        None
    }

    let mut visited = HashSet::new();
    for name in types.keys() {
        let mut stack = Vec::new();
        if let Some(cycle) = visit(name, types, &mut visited, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn compiler(tmp: &TempDir) -> DataModelCompiler {
        DataModelCompiler::new(
            "Demo",
            ModelConfig::default(),
            tmp.path().join("DataModel"),
            tmp.path().join("References"),
        )
    }

    fn write_source(tmp: &TempDir, name: &str, text: &str) {
        let dir = tmp.path().join("DataModel");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), text).unwrap();
    }

    #[test]
    fn test_seed_source_generated() {
        let tmp = TempDir::new().unwrap();
        let mut compiler = compiler(&tmp);

        let (module, instance) = compiler.compile().unwrap();
        assert_eq!(module.identity, ModuleIdentity::new("Demo", 1));
        assert_eq!(instance.value, serde_json::json!({}));
        assert!(tmp.path().join("DataModel/DataModel.model.toml").exists());
        assert!(tmp.path().join("References/Demo_1.json").exists());
    }

    #[test]
    fn test_instantiates_embedded_types() {
        let tmp = TempDir::new().unwrap();
        write_source(
            &tmp,
            "a.model.toml",
            "[types.DataModel]\nUrl = \"https://example.com\"\nRetries = 3\nLogin = \"@Credentials\"\n",
        );
        write_source(&tmp, "b.model.toml", "[types.Credentials]\nUserName = \"admin\"\n");

        let (_, instance) = compiler(&tmp).compile().unwrap();
        assert_eq!(instance.value["Url"], "https://example.com");
        assert_eq!(instance.value["Retries"], 3);
        assert_eq!(instance.value["Login"]["UserName"], "admin");
    }

    #[test]
    fn test_refresh_always_new_identity() {
        let tmp = TempDir::new().unwrap();
        let mut compiler = compiler(&tmp);
        let (first, _) = compiler.compile().unwrap();
        let (second, _) = compiler.refresh().unwrap();
        let (third, _) = compiler.refresh().unwrap();

        assert_ne!(first.identity, second.identity);
        assert_ne!(second.identity, third.identity);
        assert_eq!(first.source_digest, third.source_digest);
        assert!(!tmp.path().join("References/Demo_1.json").exists());
        assert!(tmp.path().join("References/Demo_3.json").exists());
    }

    #[test]
    fn test_iteration_continues_from_disk() {
        let tmp = TempDir::new().unwrap();
        compiler(&tmp).compile().unwrap();
        compiler(&tmp).compile().unwrap();

        let (module, _) = compiler(&tmp).compile().unwrap();
        assert_eq!(module.identity.iteration, 3);
    }

    #[test]
    fn test_missing_entry_type_is_fatal() {
        let tmp = TempDir::new().unwrap();
        write_source(&tmp, "a.model.toml", "[types.Other]\nX = 1\n");

        let err = compiler(&tmp).compile().unwrap_err();
        match err {
            Error::Compilation { diagnostics } => {
                assert!(diagnostics.iter().any(|d| d.contains("entry type DataModel")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_diagnostics_collected() {
        let tmp = TempDir::new().unwrap();
        write_source(&tmp, "a.model.toml", "[types.DataModel]\nA = \"@Missing\"\n");
        write_source(&tmp, "b.model.toml", "not = [valid");
        write_source(&tmp, "c.model.toml", "[types.DataModel]\n");

        let Err(Error::Compilation { diagnostics }) = compiler(&tmp).compile() else {
            panic!("expected compilation failure");
        };
        assert_eq!(diagnostics.len(), 3);
    }

    #[test]
    fn test_recursive_embedding_rejected() {
        let tmp = TempDir::new().unwrap();
        write_source(
            &tmp,
            "a.model.toml",
            "[types.DataModel]\nNode = \"@Node\"\n[types.Node]\nNext = \"@Node\"\n",
        );
        let Err(Error::Compilation { diagnostics }) = compiler(&tmp).compile() else {
            panic!("expected compilation failure");
        };
        assert!(diagnostics[0].contains("recursive embedding"));
    }

    #[test]
    fn test_references_are_compiled() {
        let tmp = TempDir::new().unwrap();
        let shared = tmp.path().join("shared.model.toml");
        fs::write(&shared, "[types.Shared]\nFlag = true\n").unwrap();
        write_source(&tmp, "a.model.toml", "[types.DataModel]\nS = \"@Shared\"\n");

        let (_, instance) = compiler(&tmp)
            .with_references(vec![shared])
            .compile()
            .unwrap();
        assert_eq!(instance.value["S"]["Flag"], true);
    }

    #[test]
    fn test_load_published() {
        let tmp = TempDir::new().unwrap();
        write_source(&tmp, "a.model.toml", "[types.DataModel]\nX = 7\n");
        let mut compiler = compiler(&tmp);
        let (module, _) = compiler.compile().unwrap();

        let (loaded, instance) = compiler.load_published(&module.identity.to_string()).unwrap();
        assert_eq!(loaded.identity, module.identity);
        assert_eq!(instance.value["X"], 7);
        assert!(compiler.load_published("Demo_99").is_err());
    }

    #[test]
    fn test_rewrite_module_identity() {
        let current = ModuleIdentity::new("Demo", 5);
        let text = r#"{"type": "Demo_2.Credentials", "other": "Demo_Extra_3", "x": "Demo_12"}"#;
        let rewritten = rewrite_module_identity(text, &current);
        assert!(rewritten.contains("Demo_5.Credentials"));
        assert!(rewritten.contains(r#""x": "Demo_5""#));
        assert!(rewritten.contains("Demo_Extra_3"));
    }

    #[test]
    fn test_registry_resolves_latest() {
        let registry = ModelRegistry::new();
        registry.register(ModuleIdentity::new("Demo", 1));
        registry.register(ModuleIdentity::new("Demo", 2));
        assert_eq!(registry.resolve("Demo"), Some(ModuleIdentity::new("Demo", 2)));
        registry.unregister("Demo");
        assert!(registry.resolve("Demo").is_none());
    }
}
