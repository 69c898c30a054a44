//! Built-in expression engine

use super::parser::{self, BinaryOp, Expr, FunctionDef, Statement, UnaryOp};
use super::{CompiledFunction, ScriptEngine, ScriptScope};
use crate::model::{DataModelInstance, ModuleIdentity};
use crate::types::Priority;
use crate::{Error, Result};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const MAX_CALL_DEPTH: usize = 64;

/// Variables and functions loaded from one owner's script
#[derive(Debug, Default)]
struct ScriptUnit {
    path: PathBuf,
    vars: Map<String, Value>,
    functions: HashMap<String, Arc<FunctionDef>>,
}

#[derive(Debug, Default)]
struct EngineState {
    model: Option<DataModelInstance>,
    globals: Map<String, Value>,
    functions: HashMap<String, Arc<FunctionDef>>,
    scripts: HashMap<String, ScriptUnit>,
}

/// Expression engine bound to one data model instance
#[derive(Debug)]
pub struct ExpressionEngine {
    state: RwLock<EngineState>,
    constants: Map<String, Value>,
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpressionEngine {
    pub fn new() -> Self {
        let priorities: Map<String, Value> = Priority::ALL
            .iter()
            .map(|p| (p.as_str().to_string(), Value::String(p.as_str().to_string())))
            .collect();

        Self {
            state: RwLock::new(EngineState::default()),
            constants: Map::new(),
        }
        .with_constant("Priority", Value::Object(priorities))
    }

    /// Expose a read-only constant (for example an enumeration) to every script
    pub fn with_constant(mut self, name: impl Into<String>, value: Value) -> Self {
        self.constants.insert(name.into(), value);
        self
    }

    fn eval(&self, expr: &Expr, scope: &ScriptScope) -> Result<Value> {
        let state = self.state.read();
        Evaluator {
            state: &state,
            constants: &self.constants,
            depth: 0,
        }
        .eval(expr, scope)
    }

    fn run_statement(&self, statement: Statement, scope: &ScriptScope) -> Result<()> {
        match statement {
            Statement::Function(def) => {
                let mut state = self.state.write();
                let def = Arc::new(def);
                match scope.owners.first().and_then(|o| state.scripts.get_mut(o)) {
                    Some(unit) => {
                        unit.functions.insert(def.name.clone(), def);
                    }
                    None => {
                        state.functions.insert(def.name.clone(), def);
                    }
                }
                Ok(())
            }
            Statement::Assign { target, value } => {
                let value = self.eval(&value, scope)?;
                let mut state = self.state.write();
                assign(&mut state, scope, &target, value)
            }
            Statement::Expr(expr) => self.eval(&expr, scope).map(|_| ()),
        }
    }

    fn read_script(path: &Path) -> Result<Vec<Statement>> {
        if !path.exists() {
            return Err(Error::not_found("script", path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        parser::parse_script(&text)
            .map_err(|e| Error::Script(format!("{}: {}", path.display(), e)))
    }
}

impl ScriptEngine for ExpressionEngine {
    fn bind_model(&self, instance: DataModelInstance) {
        info!("Script engine bound to data model {}", instance.identity);
        self.state.write().model = Some(instance);
    }

    fn model_identity(&self) -> Option<ModuleIdentity> {
        self.state.read().model.as_ref().map(|m| m.identity.clone())
    }

    fn model(&self) -> Value {
        self.state
            .read()
            .model
            .as_ref()
            .map(|m| m.value.clone())
            .unwrap_or(Value::Null)
    }

    fn clear_state(&self) {
        let mut state = self.state.write();
        state.globals.clear();
        state.functions.clear();
        state.scripts.clear();
        debug!("Cleared script engine state");
    }

    fn execute_file(&self, path: &Path) -> Result<()> {
        let statements = Self::read_script(path)?;
        let scope = ScriptScope::new();
        for statement in statements {
            self.run_statement(statement, &scope)?;
        }
        debug!("Executed script {:?}", path);
        Ok(())
    }

    fn execute_function(&self, name: &str, scope: &ScriptScope) -> Result<Value> {
        self.eval(
            &Expr::Call {
                name: name.to_string(),
                args: Vec::new(),
            },
            scope,
        )
    }

    fn create_delegate(&self, path: &Path) -> Result<CompiledFunction> {
        let text = std::fs::read_to_string(path)?;
        self.compile_function(&text)
    }

    fn compile_function(&self, source: &str) -> Result<CompiledFunction> {
        match parser::parse_statement(source)? {
            Statement::Function(def) => Ok(CompiledFunction::new(def)),
            _ => Err(Error::Script("expected a function definition".to_string())),
        }
    }

    fn invoke(&self, function: &CompiledFunction, args: Vec<Value>, scope: &ScriptScope) -> Result<Value> {
        let state = self.state.read();
        Evaluator {
            state: &state,
            constants: &self.constants,
            depth: 0,
        }
        .call(function.def(), args, scope)
    }

    fn register_script(&self, owner: &str, path: &Path) -> Result<()> {
        let statements = Self::read_script(path)?;
        self.state.write().scripts.insert(
            owner.to_string(),
            ScriptUnit {
                path: path.to_path_buf(),
                ..ScriptUnit::default()
            },
        );

        let scope = ScriptScope::new().with_owner(owner);
        for statement in statements {
            if let Err(e) = self.run_statement(statement, &scope) {
                self.state.write().scripts.remove(owner);
                return Err(e);
            }
        }
        debug!("Registered script {:?} for {}", path, owner);
        Ok(())
    }

    fn unregister_script(&self, owner: &str) {
        if let Some(unit) = self.state.write().scripts.remove(owner) {
            debug!("Unregistered script {:?} for {}", unit.path, owner);
        }
    }

    fn is_registered(&self, owner: &str) -> bool {
        self.state.read().scripts.contains_key(owner)
    }

    fn evaluate(&self, expression: &str, scope: &ScriptScope) -> Result<Value> {
        let expr = parser::parse_expression(expression)?;
        self.eval(&expr, scope)
    }

    fn execute(&self, statement: &str, scope: &ScriptScope) -> Result<()> {
        let statement = parser::parse_statement(statement)?;
        self.run_statement(statement, scope)
    }
}

// ============================================================================
// Assignment
// ============================================================================

fn assign(state: &mut EngineState, scope: &ScriptScope, target: &[String], value: Value) -> Result<()> {
    let (root, rest) = target
        .split_first()
        .ok_or_else(|| Error::Script("empty assignment target".to_string()))?;

    if scope.locals.contains_key(root) {
        return Err(Error::Script(format!("cannot assign to parameter {}", root)));
    }

    if root == "model" {
        let model = state
            .model
            .as_mut()
            .ok_or_else(|| Error::Script("no data model is bound".to_string()))?;
        if rest.is_empty() {
            return Err(Error::Script("cannot replace the data model".to_string()));
        }
        return set_path(&mut model.value, rest, value);
    }

    let owner = scope
        .owners
        .iter()
        .find(|o| {
            state
                .scripts
                .get(*o)
                .is_some_and(|u| u.vars.contains_key(root))
        })
        .or_else(|| {
            if state.globals.contains_key(root) {
                None
            } else {
                scope.owners.iter().find(|o| state.scripts.contains_key(*o))
            }
        })
        .cloned();

    let vars = match owner.and_then(|o| state.scripts.get_mut(&o)) {
        Some(unit) => &mut unit.vars,
        None => &mut state.globals,
    };

    if rest.is_empty() {
        vars.insert(root.clone(), value);
        Ok(())
    } else {
        let slot = vars
            .entry(root.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        set_path(slot, rest, value)
    }
}

fn set_path(mut current: &mut Value, path: &[String], value: Value) -> Result<()> {
    let Some((last, parents)) = path.split_last() else {
        *current = value;
        return Ok(());
    };
    for segment in parents {
        let object = current
            .as_object_mut()
            .ok_or_else(|| Error::Script(format!("{} is not an object", segment)))?;
        current = object
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    let object = current
        .as_object_mut()
        .ok_or_else(|| Error::Script(format!("cannot set {} on a non-object", last)))?;
    object.insert(last.clone(), value);
    Ok(())
}

// ============================================================================
// Evaluation
// ============================================================================

struct Evaluator<'a> {
    state: &'a EngineState,
    constants: &'a Map<String, Value>,
    depth: usize,
}

impl<'a> Evaluator<'a> {
    fn eval(&mut self, expr: &Expr, scope: &ScriptScope) -> Result<Value> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Ident(name) => self.lookup(name, scope),
            Expr::Member(target, field) => {
                let target = self.eval(target, scope)?;
                member(&target, field)
            }
            Expr::Index(target, index) => {
                let target = self.eval(target, scope)?;
                let index = self.eval(index, scope)?;
                element(&target, &index)
            }
            Expr::Call { name, args } => {
                let (def, defined_at) = self.function(name, scope)?;
                let args = args
                    .iter()
                    .map(|a| self.eval(a, scope))
                    .collect::<Result<Vec<_>>>()?;
                let scope = ScriptScope {
                    owners: scope.owners[defined_at..].to_vec(),
                    locals: scope.locals.clone(),
                };
                self.call(&def, args, &scope)
            }
            Expr::MethodCall {
                target,
                method,
                args,
            } => {
                let target = self.eval(target, scope)?;
                let args = args
                    .iter()
                    .map(|a| self.eval(a, scope))
                    .collect::<Result<Vec<_>>>()?;
                call_method(&target, method, &args)
            }
            Expr::Unary(op, operand) => {
                let v = self.eval(operand, scope)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!as_bool(&v)?)),
                    UnaryOp::Neg => Ok(parser::number(-as_number(&v)?)),
                }
            }
            Expr::Binary(BinaryOp::And, lhs, rhs) => {
                if !as_bool(&self.eval(lhs, scope)?)? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(as_bool(&self.eval(rhs, scope)?)?))
            }
            Expr::Binary(BinaryOp::Or, lhs, rhs) => {
                if as_bool(&self.eval(lhs, scope)?)? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(as_bool(&self.eval(rhs, scope)?)?))
            }
            Expr::Binary(op, lhs, rhs) => {
                let l = self.eval(lhs, scope)?;
                let r = self.eval(rhs, scope)?;
                binary(*op, &l, &r)
            }
        }
    }

    fn call(&mut self, def: &FunctionDef, args: Vec<Value>, scope: &ScriptScope) -> Result<Value> {
        if args.len() != def.params.len() {
            return Err(Error::Script(format!(
                "{} expects {} argument(s), got {}",
                def.name,
                def.params.len(),
                args.len()
            )));
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Error::Script(format!("call depth exceeded in {}", def.name)));
        }

        let mut inner = ScriptScope {
            owners: scope.owners.clone(),
            locals: scope.locals.clone(),
        };
        for (param, arg) in def.params.iter().zip(args) {
            inner.locals.insert(param.clone(), arg);
        }

        self.depth += 1;
        let result = self.eval(&def.body, &inner);
        self.depth -= 1;
        result
    }

    fn lookup(&self, name: &str, scope: &ScriptScope) -> Result<Value> {
        if let Some(v) = scope.locals.get(name) {
            return Ok(v.clone());
        }
        for owner in &scope.owners {
            if let Some(v) = self.state.scripts.get(owner).and_then(|u| u.vars.get(name)) {
                return Ok(v.clone());
            }
        }
        if let Some(v) = self.state.globals.get(name) {
            return Ok(v.clone());
        }
        if name == "model" {
            return self
                .state
                .model
                .as_ref()
                .map(|m| m.value.clone())
                .ok_or_else(|| Error::Script("no data model is bound".to_string()));
        }
        self.constants
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Script(format!("unknown identifier {}", name)))
    }

    /// Resolve `name` along with the index of its defining owner in `scope.owners`.
    ///
    /// The body sees that owner and the ones outside it, never the caller's
    /// inner owners. Global functions see no owner at all.
    fn function(&self, name: &str, scope: &ScriptScope) -> Result<(Arc<FunctionDef>, usize)> {
        scope
            .owners
            .iter()
            .enumerate()
            .find_map(|(i, o)| {
                self.state
                    .scripts
                    .get(o)
                    .and_then(|u| u.functions.get(name))
                    .map(|def| (Arc::clone(def), i))
            })
            .or_else(|| {
                self.state
                    .functions
                    .get(name)
                    .map(|def| (Arc::clone(def), scope.owners.len()))
            })
            .ok_or_else(|| Error::Script(format!("unknown function {}", name)))
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn as_bool(v: &Value) -> Result<bool> {
    v.as_bool()
        .ok_or_else(|| Error::Script(format!("expected boolean, found {}", type_name(v))))
}

fn as_number(v: &Value) -> Result<f64> {
    v.as_f64()
        .ok_or_else(|| Error::Script(format!("expected number, found {}", type_name(v))))
}

fn as_str<'v>(v: &'v Value, method: &str) -> Result<&'v str> {
    v.as_str().ok_or_else(|| {
        Error::Script(format!("{} expects a string, found {}", method, type_name(v)))
    })
}

/// Text form used for concatenation and `ToString()`
pub(crate) fn display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn length(v: &Value) -> Option<usize> {
    match v {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(a) => Some(a.len()),
        Value::Object(o) => Some(o.len()),
        _ => None,
    }
}

fn member(target: &Value, field: &str) -> Result<Value> {
    if let Value::Object(object) = target {
        if let Some(v) = object.get(field) {
            return Ok(v.clone());
        }
        if let Some((_, v)) = object.iter().find(|(k, _)| k.eq_ignore_ascii_case(field)) {
            return Ok(v.clone());
        }
    }
    if field == "Length" || field == "Count" {
        if let Some(n) = length(target) {
            return Ok(Value::from(n));
        }
    }
    Err(Error::Script(format!(
        "{} has no member {}",
        type_name(target),
        field
    )))
}

fn element(target: &Value, index: &Value) -> Result<Value> {
    match (target, index) {
        (Value::Array(items), Value::Number(n)) => {
            let i = n
                .as_u64()
                .ok_or_else(|| Error::Script(format!("invalid index {}", n)))?;
            items
                .get(i as usize)
                .cloned()
                .ok_or_else(|| Error::Script(format!("index {} out of range", i)))
        }
        (Value::Object(_), Value::String(key)) => member(target, key),
        _ => Err(Error::Script(format!(
            "cannot index {} with {}",
            type_name(target),
            type_name(index)
        ))),
    }
}

fn call_method(target: &Value, method: &str, args: &[Value]) -> Result<Value> {
    let arity = |n: usize| -> Result<()> {
        if args.len() == n {
            Ok(())
        } else {
            Err(Error::Script(format!(
                "{} expects {} argument(s), got {}",
                method,
                n,
                args.len()
            )))
        }
    };

    match method.to_ascii_lowercase().as_str() {
        "equals" => {
            arity(1)?;
            Ok(Value::Bool(loose_eq(target, &args[0])))
        }
        "contains" => {
            arity(1)?;
            let found = match target {
                Value::String(s) => s.contains(as_str(&args[0], method)?),
                Value::Array(items) => items.iter().any(|i| loose_eq(i, &args[0])),
                Value::Object(o) => o.contains_key(as_str(&args[0], method)?),
                other => {
                    return Err(Error::Script(format!(
                        "Contains is not defined for {}",
                        type_name(other)
                    )))
                }
            };
            Ok(Value::Bool(found))
        }
        "startswith" => {
            arity(1)?;
            Ok(Value::Bool(
                as_str(target, method)?.starts_with(as_str(&args[0], method)?),
            ))
        }
        "endswith" => {
            arity(1)?;
            Ok(Value::Bool(
                as_str(target, method)?.ends_with(as_str(&args[0], method)?),
            ))
        }
        "tolower" => {
            arity(0)?;
            Ok(Value::String(as_str(target, method)?.to_lowercase()))
        }
        "toupper" => {
            arity(0)?;
            Ok(Value::String(as_str(target, method)?.to_uppercase()))
        }
        "trim" => {
            arity(0)?;
            Ok(Value::String(as_str(target, method)?.trim().to_string()))
        }
        "tostring" => {
            arity(0)?;
            Ok(Value::String(display(target)))
        }
        "count" | "length" => {
            arity(0)?;
            length(target)
                .map(Value::from)
                .ok_or_else(|| Error::Script(format!("{} has no length", type_name(target))))
        }
        _ => Err(Error::Script(format!("unknown method {}", method))),
    }
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(l, r))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_eq(l, r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (l, r) {
                (Value::Number(_), Value::Number(_)) => {
                    as_number(l)?.partial_cmp(&as_number(r)?)
                }
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            }
            .ok_or_else(|| {
                Error::Script(format!(
                    "cannot compare {} with {}",
                    type_name(l),
                    type_name(r)
                ))
            })?;
            let result = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::Add if l.is_string() || r.is_string() => {
            Ok(Value::String(format!("{}{}", display(l), display(r))))
        }
        BinaryOp::Add => Ok(parser::number(as_number(l)? + as_number(r)?)),
        BinaryOp::Sub => Ok(parser::number(as_number(l)? - as_number(r)?)),
        BinaryOp::Mul => Ok(parser::number(as_number(l)? * as_number(r)?)),
        BinaryOp::Div | BinaryOp::Rem => {
            let divisor = as_number(r)?;
            if divisor == 0.0 {
                return Err(Error::Script("division by zero".to_string()));
            }
            let dividend = as_number(l)?;
            Ok(parser::number(if op == BinaryOp::Div {
                dividend / divisor
            } else {
                dividend % divisor
            }))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit operators are evaluated lazily"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn engine_with_model(value: Value) -> ExpressionEngine {
        let engine = ExpressionEngine::new();
        engine.bind_model(DataModelInstance {
            identity: ModuleIdentity::new("Demo", 1),
            value,
        });
        engine
    }

    #[test]
    fn test_evaluate_against_model() {
        let engine = engine_with_model(json!({"Url": "https://x", "Retries": 3}));
        let scope = ScriptScope::new();
        assert_eq!(
            engine.evaluate(r#"model.Url + "/login""#, &scope).unwrap(),
            json!("https://x/login")
        );
        assert_eq!(engine.evaluate("model.Retries * 2 > 5", &scope).unwrap(), json!(true));
        assert_eq!(engine.evaluate("model.url.Length", &scope).unwrap(), json!(9));
    }

    #[test]
    fn test_assignment_to_model_and_globals() {
        let engine = engine_with_model(json!({"Counter": 0}));
        let scope = ScriptScope::new();
        engine.execute("model.Counter = model.Counter + 1", &scope).unwrap();
        engine.execute("model.Nested.Value = true", &scope).unwrap();
        engine.execute("total = 10", &scope).unwrap();

        assert_eq!(engine.model()["Counter"], json!(1));
        assert_eq!(engine.model()["Nested"]["Value"], json!(true));
        assert_eq!(engine.evaluate("total", &scope).unwrap(), json!(10));
    }

    #[test]
    fn test_short_circuit_skips_errors() {
        let engine = ExpressionEngine::new();
        let scope = ScriptScope::new();
        assert_eq!(engine.evaluate("false && missing.Value", &scope).unwrap(), json!(false));
        assert_eq!(engine.evaluate("true || missing.Value", &scope).unwrap(), json!(true));
        assert!(engine.evaluate("true && missing", &scope).is_err());
        assert!(engine.evaluate("1 && true", &scope).is_err());
    }

    #[test]
    fn test_methods() {
        let engine = ExpressionEngine::new();
        let scope = ScriptScope::new().with_local("tags", json!(["smoke", "ui"]));
        assert_eq!(engine.evaluate(r#""F1".Equals("F1")"#, &scope).unwrap(), json!(true));
        assert_eq!(engine.evaluate(r#"tags.Contains("ui")"#, &scope).unwrap(), json!(true));
        assert_eq!(engine.evaluate(r#""Login".StartsWith("Log")"#, &scope).unwrap(), json!(true));
        assert_eq!(engine.evaluate(r#"" A ".Trim().ToLower()"#, &scope).unwrap(), json!("a"));
        assert_eq!(engine.evaluate("tags.Count()", &scope).unwrap(), json!(2));
        assert_eq!(engine.evaluate("tags[1]", &scope).unwrap(), json!("ui"));
        assert!(engine.evaluate("tags.Explode()", &scope).is_err());
    }

    #[test]
    fn test_priority_constant() {
        let engine = ExpressionEngine::new();
        let scope = ScriptScope::new().with_local("p", json!("High"));
        assert_eq!(engine.evaluate("p == Priority.High", &scope).unwrap(), json!(true));
        assert_eq!(engine.evaluate("p != Priority.Low", &scope).unwrap(), json!(true));
    }

    #[test]
    fn test_compile_and_invoke_function() {
        let engine = ExpressionEngine::new();
        let f = engine
            .compile_function("fn select(fixture, test) => fixture.Name == \"F1\" && test.Order < 3")
            .unwrap();
        assert_eq!(f.params(), ["fixture", "test"]);

        let scope = ScriptScope::new();
        let yes = engine
            .invoke(&f, vec![json!({"Name": "F1"}), json!({"Order": 1})], &scope)
            .unwrap();
        let no = engine
            .invoke(&f, vec![json!({"Name": "F2"}), json!({"Order": 1})], &scope)
            .unwrap();
        assert_eq!(yes, json!(true));
        assert_eq!(no, json!(false));
        assert!(engine.invoke(&f, vec![json!({})], &scope).is_err());
        assert!(engine.compile_function("1 + 1").is_err());
    }

    #[test]
    fn test_delegate_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("discount.script");
        std::fs::write(&path, "fn discount(price) => price * Rate.Member\n").unwrap();

        let engine = ExpressionEngine::new().with_constant("Rate", json!({"Member": 0.5}));
        let f = engine.create_delegate(&path).unwrap();
        assert_eq!(f.name(), "discount");
        assert_eq!(engine.invoke(&f, vec![json!(40)], &ScriptScope::new()).unwrap(), json!(20));
        assert_eq!(engine.evaluate("Priority.High", &ScriptScope::new()).unwrap(), json!("High"));

        std::fs::write(&path, "price = 1\n").unwrap();
        assert!(engine.create_delegate(&path).is_err());
        assert!(engine.create_delegate(&tmp.path().join("absent.script")).is_err());
    }

    #[test]
    fn test_registered_scripts_are_scoped() {
        let tmp = TempDir::new().unwrap();
        let fixture = tmp.path().join("fixture.script");
        let test = tmp.path().join("test.script");
        std::fs::write(&fixture, "greeting = \"hello\"\nfn shout() => greeting.ToUpper()\n").unwrap();
        std::fs::write(&test, "greeting = \"hi\"\n").unwrap();

        let engine = ExpressionEngine::new();
        engine.register_script("fixture-1", &fixture).unwrap();
        engine.register_script("test-1", &test).unwrap();

        let fixture_scope = ScriptScope::new().with_owner("fixture-1");
        let test_scope = fixture_scope.clone().with_owner("test-1");
        assert_eq!(engine.evaluate("greeting", &fixture_scope).unwrap(), json!("hello"));
        assert_eq!(engine.evaluate("greeting", &test_scope).unwrap(), json!("hi"));
        assert_eq!(engine.execute_function("shout", &test_scope).unwrap(), json!("HELLO"));

        engine.unregister_script("test-1");
        assert!(!engine.is_registered("test-1"));
        assert_eq!(engine.evaluate("greeting", &test_scope).unwrap(), json!("hello"));

        engine.clear_state();
        assert!(engine.evaluate("greeting", &fixture_scope).is_err());
    }

    #[test]
    fn test_execute_file_defines_globals() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("initialize.script");
        std::fs::write(&path, "model.Ready = true\nfn ready() => model.Ready\n").unwrap();

        let engine = engine_with_model(json!({}));
        engine.execute_file(&path).unwrap();
        assert_eq!(
            engine.execute_function("ready", &ScriptScope::new()).unwrap(),
            json!(true)
        );
        assert!(engine.execute_file(&tmp.path().join("absent.script")).is_err());
    }

    #[test]
    fn test_recursion_is_bounded() {
        let engine = ExpressionEngine::new();
        engine.execute("fn loop() => loop()", &ScriptScope::new()).unwrap();
        let err = engine.execute_function("loop", &ScriptScope::new()).unwrap_err();
        assert!(err.to_string().contains("call depth"));
    }

    #[test]
    fn test_locals_are_read_only() {
        let engine = ExpressionEngine::new();
        let scope = ScriptScope::new().with_local("data", json!({"x": 1}));
        assert!(engine.execute("data.x = 2", &scope).is_err());
    }
}
