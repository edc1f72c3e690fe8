use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::port::{Direction, PortSpec};
use super::signature::Signature;
use crate::core::error::{ComputeError, GraphError};
use crate::core::value::Value;

/// Lifecycle of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Idle,
    Queued,
    Running,
    Done,
    Errored,
}

impl NodeState {
    pub fn is_busy(self) -> bool {
        matches!(self, NodeState::Queued | NodeState::Running)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Idle => "idle",
            NodeState::Queued => "queued",
            NodeState::Running => "running",
            NodeState::Done => "done",
            NodeState::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Input values handed to a compute body, already cast to their declared types.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inputs {
    values: BTreeMap<String, Value>,
}

impl Inputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub(crate) fn insert(&mut self, name: String, value: Value) {
        self.values.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Like [`get`](Self::get), with a ready-made error for unset inputs.
    pub fn require(&self, name: &str) -> Result<&Value, ComputeError> {
        self.values
            .get(name)
            .ok_or_else(|| format!("input '{name}' has no value").into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

/// Output values assigned by a compute body. Outputs left out keep their value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outputs {
    values: Vec<(String, Value)>,
}

impl Outputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Assignments in the order they were made.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter().map(|(n, v)| (n, v))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn into_vec(self) -> Vec<(String, Value)> {
        self.values
    }

}

/// The asynchronous compute body of a node class.
#[async_trait]
pub trait NodeLogic: Send + Sync + 'static {
    async fn compute(&self, inputs: Inputs) -> Result<Outputs, ComputeError>;
}

/// Adapts an async closure into [`NodeLogic`].
pub struct FnLogic<F>(F);

#[async_trait]
impl<F, Fut> NodeLogic for FnLogic<F>
where
    F: Fn(Inputs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outputs, ComputeError>> + Send + 'static,
{
    async fn compute(&self, inputs: Inputs) -> Result<Outputs, ComputeError> {
        (self.0)(inputs).await
    }
}

/// Adapts a plain closure into [`NodeLogic`].
pub struct SyncFnLogic<F>(F);

#[async_trait]
impl<F> NodeLogic for SyncFnLogic<F>
where
    F: Fn(Inputs) -> Result<Outputs, ComputeError> + Send + Sync + 'static,
{
    async fn compute(&self, inputs: Inputs) -> Result<Outputs, ComputeError> {
        (self.0)(inputs)
    }
}

/// A node class: its ports, trigger behaviour and compute body.
pub struct NodeDefinition {
    class: String,
    description: String,
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
    trigger_on_create: bool,
    trigger_delay: Option<Duration>,
    min_trigger_interval: Option<Duration>,
    logic: Arc<dyn NodeLogic>,
}

impl NodeDefinition {
    pub fn builder(class: impl Into<String>) -> NodeDefinitionBuilder {
        NodeDefinitionBuilder::new(class)
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn inputs(&self) -> &[PortSpec] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PortSpec] {
        &self.outputs
    }

    pub fn input(&self, name: &str) -> Option<&PortSpec> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&PortSpec> {
        self.outputs.iter().find(|p| p.name == name)
    }

    pub fn trigger_on_create(&self) -> bool {
        self.trigger_on_create
    }

    /// Delay before compute; `None` means the graph default.
    pub fn trigger_delay(&self) -> Option<Duration> {
        self.trigger_delay
    }

    /// Least time between two queued runs; `None` means the graph default.
    pub fn min_trigger_interval(&self) -> Option<Duration> {
        self.min_trigger_interval
    }

    pub fn logic(&self) -> Arc<dyn NodeLogic> {
        self.logic.clone()
    }
}

impl fmt::Debug for NodeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeDefinition")
            .field("class", &self.class)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("trigger_on_create", &self.trigger_on_create)
            .finish()
    }
}

pub struct NodeDefinitionBuilder {
    class: String,
    description: String,
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
    trigger_on_create: bool,
    trigger_delay: Option<Duration>,
    min_trigger_interval: Option<Duration>,
    logic: Option<Arc<dyn NodeLogic>>,
    error: Option<GraphError>,
}

impl NodeDefinitionBuilder {
    fn new(class: impl Into<String>) -> Self {
        NodeDefinitionBuilder {
            class: class.into(),
            description: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            trigger_on_create: true,
            trigger_delay: None,
            min_trigger_interval: None,
            logic: None,
            error: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds a port; its direction decides whether it is an input or an output.
    pub fn port(mut self, spec: PortSpec) -> Self {
        match spec.direction {
            Direction::Input => self.inputs.push(spec),
            Direction::Output => self.outputs.push(spec),
        }
        self
    }

    pub fn input(self, name: impl Into<String>, type_id: impl Into<String>) -> Self {
        self.port(PortSpec::input(name, type_id))
    }

    pub fn output(self, name: impl Into<String>, type_id: impl Into<String>) -> Self {
        self.port(PortSpec::output(name, type_id))
    }

    /// Adds every port of a shorthand signature such as `"a: int, b: int -> sum: int"`.
    pub fn signature(mut self, shorthand: &str) -> Self {
        match shorthand.parse::<Signature>() {
            Ok(sig) => {
                for field in sig.inputs {
                    self = self.input(field.name, field.type_id);
                }
                for field in sig.outputs {
                    self = self.output(field.name, field.type_id);
                }
            }
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(e);
                }
            }
        }
        self
    }

    pub fn trigger_on_create(mut self, trigger: bool) -> Self {
        self.trigger_on_create = trigger;
        self
    }

    pub fn trigger_delay(mut self, delay: Duration) -> Self {
        self.trigger_delay = Some(delay);
        self
    }

    /// Spaces out runs: a run queued sooner than `interval` after the previous
    /// one waits for the remainder.
    pub fn min_trigger_interval(mut self, interval: Duration) -> Self {
        self.min_trigger_interval = Some(interval);
        self
    }

    pub fn logic<L: NodeLogic>(mut self, logic: L) -> Self {
        self.logic = Some(Arc::new(logic));
        self
    }

    /// Uses an async closure as the compute body.
    pub fn compute<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Inputs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Outputs, ComputeError>> + Send + 'static,
    {
        self.logic(FnLogic(f))
    }

    /// Uses a synchronous closure as the compute body.
    pub fn compute_sync<F>(self, f: F) -> Self
    where
        F: Fn(Inputs) -> Result<Outputs, ComputeError> + Send + Sync + 'static,
    {
        self.logic(SyncFnLogic(f))
    }

    pub fn build(self) -> Result<Arc<NodeDefinition>, GraphError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let mut seen = std::collections::HashSet::new();
        for port in self.inputs.iter().chain(self.outputs.iter()) {
            if !seen.insert(port.name.as_str()) {
                return Err(GraphError::DuplicatePort {
                    class: self.class.clone(),
                    port: port.name.clone(),
                });
            }
        }
        let logic = self
            .logic
            .ok_or_else(|| GraphError::MissingLogic(self.class.clone()))?;
        Ok(Arc::new(NodeDefinition {
            class: self.class,
            description: self.description,
            inputs: self.inputs,
            outputs: self.outputs,
            trigger_on_create: self.trigger_on_create,
            trigger_delay: self.trigger_delay,
            min_trigger_interval: self.min_trigger_interval,
            logic,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_from_signature() {
        let def = NodeDefinition::builder("add")
            .signature("a: int, b: int -> sum: int")
            .compute_sync(|_| Ok(Outputs::new()))
            .build()
            .unwrap();
        assert_eq!(def.inputs().len(), 2);
        assert_eq!(def.output("sum").unwrap().type_id, "int");
        assert!(def.trigger_on_create());
    }

    #[test]
    fn test_duplicate_port_rejected() {
        let err = NodeDefinition::builder("dup")
            .input("x", "int")
            .output("x", "int")
            .compute_sync(|_| Ok(Outputs::new()))
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicatePort { .. }));
    }

    #[test]
    fn test_missing_logic_and_bad_signature() {
        let err = NodeDefinition::builder("empty").build().unwrap_err();
        assert!(matches!(err, GraphError::MissingLogic(_)));

        let err = NodeDefinition::builder("bad")
            .signature("nothing here")
            .compute_sync(|_| Ok(Outputs::new()))
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidSignature(_)));
    }

    #[test]
    fn test_outputs_overwrite_keeps_order() {
        let mut out = Outputs::new().with("a", 1).with("b", 2);
        out.set("a", 3);
        let names: Vec<_> = out.iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(out.get("a"), Some(&Value::Int(3)));
    }

    #[tokio::test]
    async fn test_fn_logic_runs() {
        let def = NodeDefinition::builder("double")
            .signature("x: int -> y: int")
            .compute(|inputs: Inputs| async move {
                let x = inputs.require("x")?.as_int().unwrap_or(0);
                Ok::<_, ComputeError>(Outputs::new().with("y", x * 2))
            })
            .build()
            .unwrap();
        let out = def.logic().compute(Inputs::new().with("x", 4)).await.unwrap();
        assert_eq!(out.get("y"), Some(&Value::Int(8)));
        assert!(Inputs::new().require("x").is_err());
    }
}
