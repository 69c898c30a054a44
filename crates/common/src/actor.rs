//! Actors
//!
//! An actor is the executable leaf of a process graph. The engine never
//! introspects an actor: it builds one from the node's property bag through
//! the component type's factory and calls [`Actor::begin_process`].
//!
//! Built-in actors:
//!
//! | Type          | Properties                          |
//! |---------------|-------------------------------------|
//! | `Log`         | `message` or `expression`           |
//! | `Assign`      | `target`, `value`                   |
//! | `Assert`      | `condition`, optional `message`     |
//! | `Invoke`      | `function`                          |
//! | `Delay`       | `ms`                                |
//! | `Fail`        | optional `message`                  |
//! | `AttachImage` | `name`, `content`                   |

use crate::script::{display, ScriptEngine, ScriptScope};
use crate::trace::TraceRecorder;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Everything an actor may touch while it runs
#[derive(Clone)]
pub struct ActorContext {
    pub engine: Arc<dyn ScriptEngine>,
    pub scope: ScriptScope,
    pub trace: TraceRecorder,
    /// Display name of the node being executed
    pub node_name: String,
}

impl ActorContext {
    pub fn new(engine: Arc<dyn ScriptEngine>, scope: ScriptScope, trace: TraceRecorder) -> Self {
        Self {
            engine,
            scope,
            trace,
            node_name: String::new(),
        }
    }

    pub fn for_node(&self, name: &str) -> Self {
        Self {
            node_name: name.to_string(),
            ..self.clone()
        }
    }
}

/// Opaque executable step
#[async_trait]
pub trait Actor: Send + Sync {
    /// Run synchronously
    fn act(&self, ctx: &ActorContext) -> Result<()>;

    /// Run asynchronously; defaults to [`Actor::act`]
    async fn begin_process(&self, ctx: &ActorContext) -> Result<()> {
        self.act(ctx)
    }
}

fn required<'a>(actor: &str, props: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    props
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::ActorFailed {
            actor: actor.to_string(),
            message: format!("missing property '{}'", key),
        })
}

fn optional(props: &Map<String, Value>, key: &str) -> Option<String> {
    props.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Write a message into the trace
pub struct LogActor {
    message: Option<String>,
    expression: Option<String>,
}

impl LogActor {
    pub fn from_properties(props: &Map<String, Value>) -> Result<Arc<dyn Actor>> {
        let actor = Self {
            message: optional(props, "message"),
            expression: optional(props, "expression"),
        };
        if actor.message.is_none() && actor.expression.is_none() {
            return Err(Error::ActorFailed {
                actor: "Log".to_string(),
                message: "either 'message' or 'expression' is required".to_string(),
            });
        }
        Ok(Arc::new(actor))
    }
}

impl Actor for LogActor {
    fn act(&self, ctx: &ActorContext) -> Result<()> {
        let text = match &self.expression {
            Some(expr) => display(&ctx.engine.evaluate(expr, &ctx.scope)?),
            None => self.message.clone().unwrap_or_default(),
        };
        info!("[{}] {}", ctx.node_name, text);
        ctx.trace.message(text);
        Ok(())
    }
}

/// Assign the value of an expression to a variable or model member
pub struct AssignActor {
    target: String,
    value: String,
}

impl AssignActor {
    pub fn from_properties(props: &Map<String, Value>) -> Result<Arc<dyn Actor>> {
        Ok(Arc::new(Self {
            target: required("Assign", props, "target")?.to_string(),
            value: required("Assign", props, "value")?.to_string(),
        }))
    }
}

impl Actor for AssignActor {
    fn act(&self, ctx: &ActorContext) -> Result<()> {
        ctx.engine
            .execute(&format!("{} = {}", self.target, self.value), &ctx.scope)
    }
}

pub struct AssertActor {
    condition: String,
    message: Option<String>,
}

impl AssertActor {
    pub fn from_properties(props: &Map<String, Value>) -> Result<Arc<dyn Actor>> {
        Ok(Arc::new(Self {
            condition: required("Assert", props, "condition")?.to_string(),
            message: optional(props, "message"),
        }))
    }
}

impl Actor for AssertActor {
    fn act(&self, ctx: &ActorContext) -> Result<()> {
        match ctx.engine.evaluate(&self.condition, &ctx.scope)? {
            Value::Bool(true) => Ok(()),
            Value::Bool(false) => Err(Error::AssertionFailed(
                self.message
                    .clone()
                    .unwrap_or_else(|| self.condition.clone()),
            )),
            other => Err(Error::Script(format!(
                "assertion '{}' evaluated to {} instead of a boolean",
                self.condition, other
            ))),
        }
    }
}

/// Call a script function visible from the current scope
pub struct InvokeActor {
    function: String,
}

impl InvokeActor {
    pub fn from_properties(props: &Map<String, Value>) -> Result<Arc<dyn Actor>> {
        Ok(Arc::new(Self {
            function: required("Invoke", props, "function")?.to_string(),
        }))
    }
}

impl Actor for InvokeActor {
    fn act(&self, ctx: &ActorContext) -> Result<()> {
        let value = ctx.engine.execute_function(&self.function, &ctx.scope)?;
        debug!("{}() returned {}", self.function, value);
        Ok(())
    }
}

pub struct DelayActor {
    duration: Duration,
}

impl DelayActor {
    pub fn from_properties(props: &Map<String, Value>) -> Result<Arc<dyn Actor>> {
        let ms = props
            .get("ms")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::ActorFailed {
                actor: "Delay".to_string(),
                message: "property 'ms' must be a non-negative integer".to_string(),
            })?;
        Ok(Arc::new(Self {
            duration: Duration::from_millis(ms),
        }))
    }
}

#[async_trait]
impl Actor for DelayActor {
    fn act(&self, _ctx: &ActorContext) -> Result<()> {
        std::thread::sleep(self.duration);
        Ok(())
    }

    async fn begin_process(&self, _ctx: &ActorContext) -> Result<()> {
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}

/// Always fails; useful to mark unfinished steps
pub struct FailActor {
    message: String,
}

impl FailActor {
    pub fn from_properties(props: &Map<String, Value>) -> Result<Arc<dyn Actor>> {
        Ok(Arc::new(Self {
            message: optional(props, "message").unwrap_or_else(|| "failed".to_string()),
        }))
    }
}

impl Actor for FailActor {
    fn act(&self, ctx: &ActorContext) -> Result<()> {
        Err(Error::ActorFailed {
            actor: ctx.node_name.clone(),
            message: self.message.clone(),
        })
    }
}

/// Attach the evaluated `content` to the trace as an image
pub struct AttachImageActor {
    name: String,
    content: String,
}

impl AttachImageActor {
    pub fn from_properties(props: &Map<String, Value>) -> Result<Arc<dyn Actor>> {
        Ok(Arc::new(Self {
            name: required("AttachImage", props, "name")?.to_string(),
            content: required("AttachImage", props, "content")?.to_string(),
        }))
    }
}

impl Actor for AttachImageActor {
    fn act(&self, ctx: &ActorContext) -> Result<()> {
        let value = ctx.engine.evaluate(&self.content, &ctx.scope)?;
        ctx.trace.image(self.name.clone(), display(&value).into_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataModelInstance, ModuleIdentity};
    use crate::script::ExpressionEngine;
    use crate::types::TraceKind;
    use serde_json::json;

    fn context() -> ActorContext {
        let engine = ExpressionEngine::new();
        engine.bind_model(DataModelInstance {
            identity: ModuleIdentity::new("Demo", 1),
            value: json!({"Count": 1, "Name": "demo"}),
        });
        let trace = TraceRecorder::new();
        trace.begin();
        ActorContext::new(Arc::new(engine), ScriptScope::new(), trace).for_node("step")
    }

    fn props(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_log_and_attach_image_write_traces() {
        let ctx = context();
        LogActor::from_properties(&props(json!({"expression": "\"hello \" + model.Name"})))
            .unwrap()
            .begin_process(&ctx)
            .await
            .unwrap();
        AttachImageActor::from_properties(&props(json!({"name": "shot.png", "content": "model.Name"})))
            .unwrap()
            .begin_process(&ctx)
            .await
            .unwrap();

        let captured = ctx.trace.drain();
        assert_eq!(captured.records[0].content, "hello demo");
        assert_eq!(captured.records[1].kind, TraceKind::Image);
        assert_eq!(captured.images[0].bytes, b"demo".to_vec());
    }

    #[tokio::test]
    async fn test_assign_then_assert() {
        let ctx = context();
        AssignActor::from_properties(&props(json!({"target": "model.Count", "value": "model.Count + 41"})))
            .unwrap()
            .begin_process(&ctx)
            .await
            .unwrap();
        AssertActor::from_properties(&props(json!({"condition": "model.Count == 42"})))
            .unwrap()
            .begin_process(&ctx)
            .await
            .unwrap();

        let err = AssertActor::from_properties(&props(json!({"condition": "model.Count == 0", "message": "count reset"})))
            .unwrap()
            .begin_process(&ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AssertionFailed(ref m) if m == "count reset"));
    }

    #[tokio::test]
    async fn test_fail_reports_node_name() {
        let ctx = context();
        let err = FailActor::from_properties(&Map::new())
            .unwrap()
            .begin_process(&ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ActorFailed");
        assert!(err.to_string().contains("step"));
    }

    #[test]
    fn test_missing_properties_are_rejected() {
        assert!(AssignActor::from_properties(&props(json!({"target": "x"}))).is_err());
        assert!(LogActor::from_properties(&Map::new()).is_err());
        assert!(DelayActor::from_properties(&props(json!({"ms": "soon"}))).is_err());
    }
}
