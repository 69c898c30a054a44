//! Scripting capability
//!
//! Scripts and selector predicates are evaluated against the bound data
//! model through the [`ScriptEngine`] trait. [`ExpressionEngine`] is the
//! built-in implementation: a small expression language with member access,
//! method calls, functions and assignments.
//!
//! ```text
//! # initialize.script
//! model.BaseUrl = "https://example.com"
//! fn loginUrl() => model.BaseUrl + "/login"
//! ```

mod engine;
pub mod lexer;
pub mod parser;

pub use engine::ExpressionEngine;
pub(crate) use engine::display;
pub use parser::{Expr, FunctionDef, Statement};

use crate::model::{DataModelInstance, ModuleIdentity};
use crate::Result;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

/// Name resolution context for one evaluation.
///
/// Identifiers are looked up in `locals`, then in the script registered for
/// each owner (innermost first), then in globals, then `model`.
#[derive(Debug, Clone, Default)]
pub struct ScriptScope {
    pub owners: Vec<String>,
    pub locals: Map<String, Value>,
}

impl ScriptScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an owner whose script is searched before the existing ones
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owners.insert(0, owner.into());
        self
    }

    pub fn with_local(mut self, name: impl Into<String>, value: Value) -> Self {
        self.locals.insert(name.into(), value);
        self
    }
}

/// A compiled function that can be invoked repeatedly
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    def: Arc<FunctionDef>,
}

impl CompiledFunction {
    pub(crate) fn new(def: FunctionDef) -> Self {
        Self { def: Arc::new(def) }
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn params(&self) -> &[String] {
        &self.def.params
    }

    pub(crate) fn def(&self) -> &FunctionDef {
        &self.def
    }
}

/// Scripting capability consumed by the engine
pub trait ScriptEngine: Send + Sync {
    /// Bind a data model instance, replacing the previous one
    fn bind_model(&self, instance: DataModelInstance);

    /// Identity of the bound model
    fn model_identity(&self) -> Option<ModuleIdentity>;

    /// Snapshot of the bound model instance
    fn model(&self) -> Value;

    /// Drop globals, global functions and registered scripts
    fn clear_state(&self);

    /// Execute a script file in the global scope
    fn execute_file(&self, path: &Path) -> Result<()>;

    /// Call a function visible from `scope` without arguments
    fn execute_function(&self, name: &str, scope: &ScriptScope) -> Result<Value>;

    /// Compile a file holding a single function definition
    fn create_delegate(&self, path: &Path) -> Result<CompiledFunction>;

    /// Compile a single `fn` definition from source text
    fn compile_function(&self, source: &str) -> Result<CompiledFunction>;

    /// Invoke a compiled function with positional arguments
    fn invoke(&self, function: &CompiledFunction, args: Vec<Value>, scope: &ScriptScope) -> Result<Value>;

    /// Load the script of `owner` (a fixture or test case)
    fn register_script(&self, owner: &str, path: &Path) -> Result<()>;

    fn unregister_script(&self, owner: &str);

    fn is_registered(&self, owner: &str) -> bool;

    /// Evaluate an expression
    fn evaluate(&self, expression: &str, scope: &ScriptScope) -> Result<Value>;

    /// Execute one statement (assignment, definition or expression)
    fn execute(&self, statement: &str, scope: &ScriptScope) -> Result<()>;
}
