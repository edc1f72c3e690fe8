//! Nodes, ports and connections, and the operations that drive them.
//!
//! A [`Graph`] owns every node instance. Writing a value into an input stores
//! it (casting through the [`TypeRegistry`] when needed), notifies the port's
//! listeners and, when the input triggers, schedules its node on a
//! [`PropagationStack`]. A finished node stores its outputs, which fan out to
//! every connected input on the same stack.

mod execution;
pub mod node;
pub mod port;
pub mod registry;
pub mod signature;

pub use node::{
    FnLogic, Inputs, NodeDefinition, NodeDefinitionBuilder, NodeLogic, NodeState, Outputs,
    SyncFnLogic,
};
pub use port::{Direction, PortSpec, ValueConstraint};
pub use registry::NodeRegistry;
pub use signature::{Field, Signature};

pub use crate::core::ids::{NodeId, PortRef};

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::core::config::GraphConfig;
use crate::core::error::{Error, GraphError, Result, TypeError};
use crate::core::signal::{EventArgs, IncludeArgs, Instrument, SignalManager, Source};
use crate::core::stack::{PropagationStack, TaskId};
use crate::core::telemetry::Telemetry;
use crate::core::types::TypeRegistry;
use crate::core::validation::ValidationResult;
use crate::core::value::Value;
use execution::Effects;

/// Names of the events and signals emitted by graphs, nodes and ports.
pub mod events {
    /// Node: a run started.
    pub const TRIGGER: &str = "trigger";
    /// Node: a run finished; carries `state`.
    pub const TRIGGER_DONE: &str = "trigger_done";
    /// Node: removed from its graph.
    pub const REMOVE: &str = "remove";
    /// Port: stored value changed; carries `old` and `new`.
    pub const VALUE_CHANGED: &str = "value_changed";
    /// Port: a connection was made; carries `other`.
    pub const CONNECTED: &str = "connected";
    /// Port: a connection was removed; carries `other`.
    pub const DISCONNECTED: &str = "disconnected";
    /// Port: direct writes emit `before_set_value` with `value` and
    /// `after_set_value` with `value` and the stored `result`.
    pub const SET_VALUE: &str = "set_value";
    /// Graph: a node was added; carries `node` and `class`.
    pub const NODE_ADDED: &str = "node_added";
    /// Graph: a node was removed; carries `node`.
    pub const NODE_REMOVED: &str = "node_removed";

    /// Signal, node and graph: nothing queued or running.
    pub const IDLE: &str = "idle";
    /// Signal, node: pulsed when a run finishes.
    pub const TRIGGERED: &str = "triggered";
}

/// A directed output-to-input edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Connection {
    pub from: PortRef,
    pub to: PortRef,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectOptions {
    /// Drop the existing source of a single-source input instead of failing.
    pub replace: bool,
}

impl ConnectOptions {
    pub fn replace() -> Self {
        ConnectOptions { replace: true }
    }
}

pub(crate) struct PortSlot {
    spec: PortSpec,
    value: Option<Value>,
    /// Upstream outputs for an input, downstream inputs for an output.
    links: Vec<PortRef>,
    events: SignalManager,
}

pub(crate) struct ActiveTask {
    id: TaskId,
    abort: AbortHandle,
    stack: PropagationStack,
}

/// Finished and abandoned runs of a node, watched by callers whose request
/// was folded into work already under way.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RunCount {
    finished: u64,
    cancelled: u64,
    last: NodeState,
}

pub(crate) struct NodeEntry {
    definition: Arc<NodeDefinition>,
    inputs: Vec<PortSlot>,
    outputs: Vec<PortSlot>,
    state: NodeState,
    /// A trigger arrived that could not start yet.
    pending: bool,
    disabled: bool,
    trigger_delay: Duration,
    min_trigger_interval: Duration,
    /// When the last run was queued.
    last_trigger: Option<tokio::time::Instant>,
    active: Option<ActiveTask>,
    runs: watch::Sender<RunCount>,
    /// Bumped on every schedule and cancel; runs from older epochs are void.
    epoch: u64,
    events: SignalManager,
}

impl NodeEntry {
    fn slot(&self, name: &str) -> Option<&PortSlot> {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .find(|p| p.spec.name == name)
    }

    fn slot_mut(&mut self, name: &str) -> Option<&mut PortSlot> {
        self.inputs
            .iter_mut()
            .chain(self.outputs.iter_mut())
            .find(|p| p.spec.name == name)
    }

    fn missing_inputs(&self) -> Vec<&str> {
        self.inputs
            .iter()
            .filter(|p| p.spec.required && p.value.is_none())
            .map(|p| p.spec.name.as_str())
            .collect()
    }

    fn is_operable(&self) -> bool {
        self.missing_inputs().is_empty()
    }
}

#[derive(Default)]
pub(crate) struct GraphState {
    nodes: HashMap<NodeId, NodeEntry>,
    order: Vec<NodeId>,
}

impl GraphState {
    fn entry(&self, id: NodeId) -> Result<&NodeEntry, GraphError> {
        self.nodes.get(&id).ok_or(GraphError::UnknownNode(id))
    }

    fn entry_mut(&mut self, id: NodeId) -> Result<&mut NodeEntry, GraphError> {
        self.nodes.get_mut(&id).ok_or(GraphError::UnknownNode(id))
    }

    fn slot(&self, port: &PortRef) -> Result<&PortSlot, GraphError> {
        self.entry(port.node)?
            .slot(&port.port)
            .ok_or_else(|| GraphError::UnknownPort(port.clone()))
    }

    fn slot_mut(&mut self, port: &PortRef) -> Result<&mut PortSlot, GraphError> {
        self.entry_mut(port.node)?
            .slot_mut(&port.port)
            .ok_or_else(|| GraphError::UnknownPort(port.clone()))
    }

    fn spec(&self, port: &PortRef, direction: Direction) -> Result<&PortSpec, GraphError> {
        let slot = self.slot(port)?;
        if slot.spec.direction != direction {
            return Err(GraphError::UnknownPort(port.clone()));
        }
        Ok(&slot.spec)
    }

    fn is_busy(&self) -> bool {
        self.nodes.values().any(|n| n.state.is_busy())
    }
}

pub(crate) struct GraphInner {
    id: String,
    types: Arc<TypeRegistry>,
    library: NodeRegistry,
    config: GraphConfig,
    telemetry: Option<Arc<dyn Telemetry>>,
    state: Mutex<GraphState>,
    events: SignalManager,
}

/// A reactive computation graph.
///
/// Cloning yields another handle to the same graph. Graph state is only locked
/// for short, synchronous sections: listeners and compute bodies always run
/// with the lock released. Converters run under the lock and must not call
/// back into the graph.
#[derive(Clone)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
pub struct GraphBuilder {
    id: Option<String>,
    types: Option<Arc<TypeRegistry>>,
    library: Option<NodeRegistry>,
    config: GraphConfig,
    telemetry: Option<Arc<dyn Telemetry>>,
}

impl GraphBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Type registry to cast with; the process-wide one by default.
    pub fn types(mut self, types: Arc<TypeRegistry>) -> Self {
        self.types = Some(types);
        self
    }

    pub fn library(mut self, library: NodeRegistry) -> Self {
        self.library = Some(library);
        self
    }

    pub fn config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn build(self) -> Graph {
        let id = self
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let graph_events = SignalManager::new(Source::Graph(id.clone()));
        graph_events.set(events::IDLE);
        Graph {
            inner: Arc::new(GraphInner {
                id,
                types: self.types.unwrap_or_else(TypeRegistry::global),
                library: self.library.unwrap_or_default(),
                config: self.config,
                telemetry: self.telemetry,
                state: Mutex::new(GraphState::default()),
                events: graph_events,
            }),
        }
    }
}

impl Graph {
    pub fn new() -> Self {
        GraphBuilder::default().build()
    }

    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.inner.types
    }

    pub fn library(&self) -> &NodeRegistry {
        &self.inner.library
    }

    pub fn config(&self) -> &GraphConfig {
        &self.inner.config
    }

    /// Graph-level events: `node_added`, `node_removed`, and every node and port
    /// event relayed with `node` (and `port`) arguments.
    pub fn events(&self) -> &SignalManager {
        &self.inner.events
    }

    fn lock(&self) -> MutexGuard<'_, GraphState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn make_slots(&self, node: NodeId, specs: &[PortSpec]) -> Result<Vec<PortSlot>> {
        specs
            .iter()
            .map(|spec| -> Result<PortSlot> {
                if !self.inner.types.contains(&spec.type_id) {
                    return Err(TypeError::UnknownType(spec.type_id.clone()).into());
                }
                let value = match &spec.default {
                    Some(default) => Some(self.coerce(&spec.type_id, default.clone())?),
                    None => None,
                };
                Ok(PortSlot {
                    spec: spec.clone(),
                    value,
                    links: Vec::new(),
                    events: SignalManager::new(Source::Port(PortRef::new(node, &spec.name))),
                })
            })
            .collect()
    }

    /// Instantiates a node class. The returned stack holds the creation run,
    /// if the class triggers on creation and the node is operable.
    pub fn add_node(&self, definition: Arc<NodeDefinition>) -> Result<(NodeId, PropagationStack)> {
        let id = NodeId::new();
        let inputs = self.make_slots(id, definition.inputs())?;
        let outputs = self.make_slots(id, definition.outputs())?;
        let node_events = SignalManager::new(Source::Node(id));
        node_events.set(events::IDLE);
        let entry = NodeEntry {
            trigger_delay: definition
                .trigger_delay()
                .unwrap_or_else(|| self.inner.config.trigger_delay()),
            min_trigger_interval: definition
                .min_trigger_interval()
                .unwrap_or_else(|| self.inner.config.min_trigger_interval()),
            last_trigger: None,
            runs: watch::channel(RunCount {
                finished: 0,
                cancelled: 0,
                last: NodeState::Idle,
            })
            .0,
            definition: definition.clone(),
            inputs,
            outputs,
            state: NodeState::Idle,
            pending: false,
            disabled: false,
            active: None,
            epoch: 0,
            events: node_events,
        };

        let stack = PropagationStack::new();
        let mut effects = Effects::default();
        {
            let mut state = self.lock();
            state.nodes.insert(id, entry);
            state.order.push(id);
            effects.local(
                &self.inner.events,
                events::NODE_ADDED,
                EventArgs::new()
                    .with("node", id.to_string())
                    .with("class", definition.class()),
            );
            if definition.trigger_on_create() {
                if let Err(e) = self.schedule(&mut state, id, &stack, false, &mut effects) {
                    state.nodes.remove(&id);
                    state.order.retain(|n| *n != id);
                    return Err(e);
                }
            }
        }
        log::debug!("Added node {} ({}).", definition.class(), id);
        self.dispatch(effects)?;
        Ok((id, stack))
    }

    /// Instantiates a class from the graph's [`NodeRegistry`].
    pub fn add_node_by_class(&self, class: &str) -> Result<(NodeId, PropagationStack)> {
        let definition = self
            .inner
            .library
            .get(class)
            .ok_or_else(|| GraphError::UnknownNodeClass(class.to_string()))?;
        self.add_node(definition)
    }

    /// Cancels the node's task, disconnects its ports and drops it.
    pub fn remove_node(&self, id: NodeId) -> Result<()> {
        let mut effects = Effects::default();
        let removed = {
            let mut state = self.lock();
            state.entry(id)?;
            self.cancel_locked(&mut state, id);

            let mut links = Vec::new();
            if let Ok(entry) = state.entry(id) {
                for slot in &entry.inputs {
                    for src in &slot.links {
                        links.push((src.clone(), PortRef::new(id, &slot.spec.name)));
                    }
                }
                for slot in &entry.outputs {
                    for dst in &slot.links {
                        links.push((PortRef::new(id, &slot.spec.name), dst.clone()));
                    }
                }
            }
            for (from, to) in links {
                self.unlink(&mut state, &from, &to, &mut effects);
            }

            let removed = state.nodes.remove(&id);
            state.order.retain(|n| *n != id);
            if let Some(entry) = &removed {
                effects.emit(&entry.events, events::REMOVE, EventArgs::new());
            }
            effects.local(
                &self.inner.events,
                events::NODE_REMOVED,
                EventArgs::new().with("node", id.to_string()),
            );
            self.refresh_idle(&state);
            removed
        };
        let result = self.dispatch(effects);
        if let Some(entry) = removed {
            log::debug!("Removed node {} ({}).", entry.definition.class(), id);
            entry.events.clear_all();
            for slot in entry.inputs.iter().chain(entry.outputs.iter()) {
                slot.events.clear_all();
            }
        }
        result
    }

    /// Connects an output to an input; the argument order may be either way round.
    pub fn connect(
        &self,
        a: NodeId,
        a_port: &str,
        b: NodeId,
        b_port: &str,
    ) -> Result<PropagationStack> {
        self.connect_with(a, a_port, b, b_port, ConnectOptions::default())
    }

    /// Connects two ports. If the output already holds a value it is pushed into
    /// the input right away, possibly triggering the input's node on the
    /// returned stack.
    pub fn connect_with(
        &self,
        a: NodeId,
        a_port: &str,
        b: NodeId,
        b_port: &str,
        options: ConnectOptions,
    ) -> Result<PropagationStack> {
        let stack = PropagationStack::new();
        let mut effects = Effects::default();
        {
            let mut state = self.lock();
            let (from, to) = Self::orient(&state, PortRef::new(a, a_port), PortRef::new(b, b_port))?;
            let out_type = state.slot(&from)?.spec.type_id.clone();
            let (in_type, allow_multiple, existing) = {
                let slot = state.slot(&to)?;
                (slot.spec.type_id.clone(), slot.spec.allow_multiple, slot.links.clone())
            };
            if existing.contains(&from) {
                return Ok(stack);
            }
            self.check_compatible(&out_type, &in_type)
                .map_err(|source| GraphError::IncompatibleTypes {
                    from: from.clone(),
                    to: to.clone(),
                    source,
                })?;
            if !allow_multiple && !existing.is_empty() {
                if !options.replace {
                    return Err(GraphError::AlreadyConnected(to).into());
                }
                for src in existing {
                    self.unlink(&mut state, &src, &to, &mut effects);
                }
            }

            let current = {
                let out = state.slot_mut(&from)?;
                out.links.push(to.clone());
                effects.emit(
                    &out.events,
                    events::CONNECTED,
                    EventArgs::new().with("other", to.to_string()),
                );
                out.value.clone()
            };
            {
                let input = state.slot_mut(&to)?;
                input.links.push(from.clone());
                effects.emit(
                    &input.events,
                    events::CONNECTED,
                    EventArgs::new().with("other", from.to_string()),
                );
            }
            log::debug!("Connected {} -> {}.", from, to);
            if let Some(value) = current {
                self.deliver(&mut state, &to, value, &stack, &mut effects);
            }
        }
        self.dispatch(effects)?;
        Ok(stack)
    }

    /// Removes a connection. An input left without sources falls back to its
    /// default value without triggering.
    pub fn disconnect(&self, a: NodeId, a_port: &str, b: NodeId, b_port: &str) -> Result<()> {
        let mut effects = Effects::default();
        {
            let mut state = self.lock();
            let (from, to) = Self::orient(&state, PortRef::new(a, a_port), PortRef::new(b, b_port))?;
            if !state.slot(&to)?.links.contains(&from) {
                return Err(GraphError::NotConnected { from, to }.into());
            }
            self.unlink(&mut state, &from, &to, &mut effects);
        }
        self.dispatch(effects)
    }

    fn orient(state: &GraphState, a: PortRef, b: PortRef) -> Result<(PortRef, PortRef), GraphError> {
        let da = state.slot(&a)?.spec.direction;
        let db = state.slot(&b)?.spec.direction;
        match (da, db) {
            (Direction::Output, Direction::Input) => Ok((a, b)),
            (Direction::Input, Direction::Output) => Ok((b, a)),
            _ => Err(GraphError::InvalidDirection { from: a, to: b }),
        }
    }

    fn check_compatible(&self, out_type: &str, in_type: &str) -> Result<(), TypeError> {
        let types = &self.inner.types;
        let out_t = types
            .get(out_type)
            .ok_or_else(|| TypeError::UnknownType(out_type.to_string()))?;
        let in_t = types
            .get(in_type)
            .ok_or_else(|| TypeError::UnknownType(in_type.to_string()))?;
        if in_t.is_any() || out_t.is_any() || out_t.id() == in_t.id() {
            return Ok(());
        }
        types.casting_path(out_t.id(), in_t.id()).map(|_| ())
    }

    fn unlink(&self, state: &mut GraphState, from: &PortRef, to: &PortRef, effects: &mut Effects) {
        if let Ok(out) = state.slot_mut(from) {
            out.links.retain(|l| l != to);
            effects.emit(
                &out.events,
                events::DISCONNECTED,
                EventArgs::new().with("other", to.to_string()),
            );
        }
        if let Ok(input) = state.slot_mut(to) {
            input.links.retain(|l| l != from);
            effects.emit(
                &input.events,
                events::DISCONNECTED,
                EventArgs::new().with("other", from.to_string()),
            );
            if input.links.is_empty() {
                let restored = input.spec.default.clone();
                if restored != input.value {
                    let old = std::mem::replace(&mut input.value, restored.clone());
                    effects.emit(
                        &input.events,
                        events::VALUE_CHANGED,
                        EventArgs::new()
                            .with("old", old.unwrap_or_default())
                            .with("new", restored.unwrap_or_default()),
                    );
                }
            }
        }
        log::debug!("Disconnected {} -> {}.", from, to);
    }

    /// Writes a value into an input.
    ///
    /// Type and constraint failures are returned directly. On success the
    /// returned stack holds the node run this write caused, if any.
    pub fn set_input(&self, node: NodeId, port: &str, value: impl Into<Value>) -> Result<PropagationStack> {
        let value = value.into();
        let target = PortRef::new(node, port);
        let port_events = {
            let state = self.lock();
            state.spec(&target, Direction::Input)?;
            state.slot(&target)?.events.clone()
        };
        let stack = PropagationStack::new();
        Instrument::around(events::SET_VALUE)
            .include(IncludeArgs::All)
            .include_result(true)
            .call(&port_events, EventArgs::new().with("value", value.clone()), || {
                let mut effects = Effects::default();
                let stored = {
                    let mut state = self.lock();
                    let spec = state.spec(&target, Direction::Input)?.clone();
                    let stored = self.coerce_checked(&spec, value)?;
                    self.write_input(&mut state, &target, stored.clone(), &stack, &mut effects);
                    stored
                };
                self.dispatch(effects)?;
                Ok::<Value, Error>(stored)
            })?;
        Ok(stack)
    }

    /// Writes a value into an output and forwards it to every connected input.
    pub fn set_output(&self, node: NodeId, port: &str, value: impl Into<Value>) -> Result<PropagationStack> {
        let target = PortRef::new(node, port);
        let stack = PropagationStack::new();
        let mut effects = Effects::default();
        {
            let mut state = self.lock();
            let spec = state.spec(&target, Direction::Output)?.clone();
            let stored = self.coerce_checked(&spec, value.into())?;
            self.write_output(&mut state, &target, stored, &stack, &mut effects);
        }
        self.dispatch(effects)?;
        Ok(stack)
    }

    /// Current value of a port of either direction.
    pub fn value(&self, node: NodeId, port: &str) -> Result<Option<Value>> {
        Ok(self.lock().slot(&PortRef::new(node, port))?.value.clone())
    }

    pub fn input_value(&self, node: NodeId, port: &str) -> Result<Option<Value>> {
        let state = self.lock();
        let target = PortRef::new(node, port);
        state.spec(&target, Direction::Input)?;
        Ok(state.slot(&target)?.value.clone())
    }

    pub fn output_value(&self, node: NodeId, port: &str) -> Result<Option<Value>> {
        let state = self.lock();
        let target = PortRef::new(node, port);
        state.spec(&target, Direction::Output)?;
        Ok(state.slot(&target)?.value.clone())
    }

    /// Schedules the node now.
    ///
    /// A disabled or non-operable node reports the reason on its error channel;
    /// the error is returned when nobody listens there. The request is kept
    /// and runs once the node can.
    pub fn trigger(&self, id: NodeId) -> Result<PropagationStack> {
        self.request(id, true)
    }

    /// Schedules the node when possible, silently deferring otherwise.
    pub fn request_trigger(&self, id: NodeId) -> Result<PropagationStack> {
        self.request(id, false)
    }

    fn request(&self, id: NodeId, explicit: bool) -> Result<PropagationStack> {
        let stack = PropagationStack::new();
        let mut effects = Effects::default();
        {
            let mut state = self.lock();
            state.entry(id)?;
            log::debug!("Trigger requested for {}.", id);
            self.schedule(&mut state, id, &stack, explicit, &mut effects)?;
        }
        self.dispatch(effects)?;
        Ok(stack)
    }

    /// Cancels a queued or running task of the node. Returns whether there was one.
    pub fn cancel_trigger(&self, id: NodeId) -> Result<bool> {
        let mut state = self.lock();
        state.entry(id)?;
        let cancelled = self.cancel_locked(&mut state, id);
        self.refresh_idle(&state);
        Ok(cancelled)
    }

    fn cancel_locked(&self, state: &mut GraphState, id: NodeId) -> bool {
        let Ok(entry) = state.entry_mut(id) else {
            return false;
        };
        entry.epoch += 1;
        entry.pending = false;
        entry.runs.send_modify(|runs| runs.cancelled += 1);
        let was_busy = entry.state.is_busy();
        if let Some(active) = entry.active.take() {
            active.abort.abort();
            active.stack.remove(active.id);
            log::debug!("Cancelled {} of node {}.", active.id, id);
        }
        entry.state = NodeState::Idle;
        entry.events.set(events::IDLE);
        was_busy
    }

    pub fn enable(&self, id: NodeId) -> Result<PropagationStack> {
        let stack = PropagationStack::new();
        let mut effects = Effects::default();
        {
            let mut state = self.lock();
            let entry = state.entry_mut(id)?;
            entry.disabled = false;
            if entry.pending {
                self.schedule(&mut state, id, &stack, false, &mut effects)?;
            }
        }
        self.dispatch(effects)?;
        Ok(stack)
    }

    /// Stops the node from being scheduled. A run in progress finishes.
    pub fn disable(&self, id: NodeId) -> Result<()> {
        self.lock().entry_mut(id)?.disabled = true;
        Ok(())
    }

    pub fn is_enabled(&self, id: NodeId) -> Result<bool> {
        Ok(!self.lock().entry(id)?.disabled)
    }

    pub fn node_state(&self, id: NodeId) -> Result<NodeState> {
        Ok(self.lock().entry(id)?.state)
    }

    /// Whether every required input holds a value.
    pub fn is_operable(&self, id: NodeId) -> Result<bool> {
        Ok(self.lock().entry(id)?.is_operable())
    }

    pub fn definition(&self, id: NodeId) -> Result<Arc<NodeDefinition>> {
        Ok(self.lock().entry(id)?.definition.clone())
    }

    pub fn node_events(&self, id: NodeId) -> Result<SignalManager> {
        Ok(self.lock().entry(id)?.events.clone())
    }

    pub fn port_events(&self, node: NodeId, port: &str) -> Result<SignalManager> {
        Ok(self.lock().slot(&PortRef::new(node, port))?.events.clone())
    }

    /// Node ids in insertion order.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.lock().order.clone()
    }

    pub fn connections(&self) -> Vec<Connection> {
        let state = self.lock();
        let mut out = Vec::new();
        for id in &state.order {
            if let Some(entry) = state.nodes.get(id) {
                for slot in &entry.outputs {
                    for to in &slot.links {
                        out.push(Connection {
                            from: PortRef::new(*id, &slot.spec.name),
                            to: to.clone(),
                        });
                    }
                }
            }
        }
        out
    }

    /// Awaits until no node is queued or running, bounded by the configured
    /// wait timeout, then flushes telemetry.
    pub async fn wait_idle(&self) -> Result<()> {
        match self.inner.config.wait_timeout() {
            Some(after) => self.inner.events.wait_timeout(events::IDLE, after).await?,
            None => self.inner.events.wait(events::IDLE).await?,
        }
        if let Some(telemetry) = &self.inner.telemetry {
            telemetry.flush();
        }
        Ok(())
    }

    /// Static checks: required inputs that can never be filled are errors,
    /// disabled nodes and multi-step casts on connections are warnings.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        let state = self.lock();
        for id in &state.order {
            let Some(entry) = state.nodes.get(id) else {
                continue;
            };
            let class = entry.definition.class();
            for slot in &entry.inputs {
                if slot.spec.required && slot.value.is_none() && slot.links.is_empty() {
                    result.add_error(format!(
                        "{class} ({id}): required input '{}' has no value, default or connection",
                        slot.spec.name
                    ));
                }
            }
            if entry.disabled {
                result.add_warning(format!("{class} ({id}) is disabled"));
            }
            for slot in &entry.outputs {
                for to in &slot.links {
                    let Ok(target) = state.slot(to) else {
                        continue;
                    };
                    if let Ok(path) = self
                        .inner
                        .types
                        .casting_path(&slot.spec.type_id, &target.spec.type_id)
                    {
                        if path.len() > 1 {
                            result.add_warning(format!(
                                "{id}.{} -> {to} casts through {}",
                                slot.spec.name,
                                path.types().join(" -> ")
                            ));
                        }
                    }
                }
            }
        }
        result
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Graph")
            .field("id", &self.inner.id)
            .field("nodes", &state.order.len())
            .finish()
    }
}
