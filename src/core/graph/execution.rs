//! Scheduling and running node tasks, and moving values along connections.
//!
//! Everything that touches [`GraphState`] runs synchronously under the graph
//! lock and records what it wants to announce in [`Effects`]. The effects are
//! dispatched once the lock is released, so listeners may freely call back
//! into the graph.

use chrono::Utc;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::node::{Inputs, NodeLogic, NodeState, Outputs};
use super::port::PortSpec;
use super::{ActiveTask, Graph, GraphState, NodeEntry, events};
use crate::core::error::{Error, ExecutionError, GraphError, TypeError};
use crate::core::ids::{NodeId, PortRef};
use crate::core::signal::{EventArgs, SignalManager};
use crate::core::stack::{PropagationStack, PropagationTask, TaskId, TaskOutcome};
use crate::core::telemetry::TraceEntry;
use crate::core::value::Value;

struct Emission {
    emitter: SignalManager,
    name: &'static str,
    args: EventArgs,
    relay: bool,
}

/// Notifications collected under the graph lock.
#[derive(Default)]
pub(crate) struct Effects {
    emissions: Vec<Emission>,
    errors: Vec<(SignalManager, Error)>,
    traces: Vec<TraceEntry>,
}

impl Effects {
    /// A node or port event, also relayed to the graph.
    pub(crate) fn emit(&mut self, emitter: &SignalManager, name: &'static str, args: EventArgs) {
        self.emissions.push(Emission {
            emitter: emitter.clone(),
            name,
            args,
            relay: true,
        });
    }

    /// An event delivered on `emitter` only.
    pub(crate) fn local(&mut self, emitter: &SignalManager, name: &'static str, args: EventArgs) {
        self.emissions.push(Emission {
            emitter: emitter.clone(),
            name,
            args,
            relay: false,
        });
    }

    pub(crate) fn error(&mut self, emitter: &SignalManager, err: Error) {
        self.errors.push((emitter.clone(), err));
    }
}

struct Run {
    class: String,
    logic: Arc<dyn NodeLogic>,
    inputs: Result<Inputs, Error>,
}

/// Puts a task on `stack` that settles once `id` finishes `ahead` more runs,
/// or once that work is cancelled. Skipped when `stack` already holds the
/// node's task.
fn follow(entry: &NodeEntry, id: NodeId, ahead: u64, stack: &PropagationStack) {
    if entry.active.as_ref().is_some_and(|a| a.stack.same_as(stack)) {
        return;
    }
    if tokio::runtime::Handle::try_current().is_err() {
        log::debug!("No runtime to follow the run of {}.", id);
        return;
    }
    let mut runs = entry.runs.subscribe();
    let start = *runs.borrow();
    let target = start.finished + ahead;
    let task_id = PropagationTask::reserve_id();
    let task = PropagationTask::spawn_with_id(task_id, id, async move {
        let settled = runs
            .wait_for(|c| c.finished >= target || c.cancelled > start.cancelled)
            .await
            .map(|c| *c);
        let state = match settled {
            Ok(count) if count.finished >= target => count.last,
            _ => NodeState::Idle,
        };
        Ok(TaskOutcome {
            task: task_id,
            node: id,
            state,
        })
    });
    stack.append(task);
}

impl Graph {
    /// Delivers collected effects. Returns the first error no listener handled.
    pub(crate) fn dispatch(&self, effects: Effects) -> Result<(), Error> {
        let graph_events = &self.inner.events;
        for Emission {
            emitter,
            name,
            args,
            relay,
        } in effects.emissions
        {
            let relayed = relay.then(|| {
                let mut args = args.clone();
                if let Some(node) = emitter.source().node() {
                    args.insert("node", node.to_string());
                }
                if let Some(port) = emitter.source().port() {
                    args.insert("port", port);
                }
                args
            });
            if let Err(e) = emitter.emit(name, args) {
                log::warn!("Dropped '{}' event from {}: {}", name, emitter.source(), e);
            }
            if let Some(args) = relayed {
                if let Err(e) = graph_events.emit(name, args) {
                    log::warn!("Dropped relayed '{}' event: {}", name, e);
                }
            }
        }

        if let Some(telemetry) = &self.inner.telemetry {
            for trace in effects.traces {
                telemetry.record(trace);
            }
        }

        let mut unhandled = None;
        for (emitter, err) in effects.errors {
            if let Err(err) = emitter.error(err) {
                log::error!("Unhandled error from {}: {}", emitter.source(), err);
                if unhandled.is_none() {
                    unhandled = Some(err);
                }
            }
        }
        unhandled.map_or(Ok(()), Err)
    }

    pub(crate) fn refresh_idle(&self, state: &GraphState) {
        if state.is_busy() {
            self.inner.events.clear(events::IDLE);
        } else {
            self.inner.events.set(events::IDLE);
        }
    }

    /// Values that are not null are cast to `type_id` unless they already match.
    pub(crate) fn coerce(&self, type_id: &str, value: Value) -> Result<Value, TypeError> {
        if value.is_null() {
            return Ok(value);
        }
        self.inner.types.cast_if_needed(type_id, value)
    }

    /// Like [`coerce`](Self::coerce), then enforces the port's constraint.
    /// Null is accepted on every port.
    pub(crate) fn coerce_checked(&self, spec: &PortSpec, value: Value) -> Result<Value, TypeError> {
        if value.is_null() {
            return Ok(value);
        }
        let value = self.coerce(&spec.type_id, value)?;
        if let Some(constraint) = &spec.constraint {
            constraint
                .check(&value)
                .map_err(|reason| TypeError::ConstraintViolation {
                    port: spec.name.clone(),
                    reason,
                })?;
        }
        Ok(value)
    }

    /// Queues a run of `id` on `stack`, or records the request for later.
    ///
    /// `explicit` requests that cannot start report why on the node's error
    /// channel.
    pub(crate) fn schedule(
        &self,
        state: &mut GraphState,
        id: NodeId,
        stack: &PropagationStack,
        explicit: bool,
        effects: &mut Effects,
    ) -> Result<(), Error> {
        let entry = state.entry_mut(id)?;
        if entry.disabled {
            entry.pending = true;
            if explicit {
                effects.error(&entry.events, GraphError::Disabled(id).into());
            }
            return Ok(());
        }
        if !entry.is_operable() {
            entry.pending = true;
            if explicit {
                let reason = format!("missing input(s): {}", entry.missing_inputs().join(", "));
                effects.error(&entry.events, GraphError::NotOperable { node: id, reason }.into());
            }
            return Ok(());
        }
        match entry.state {
            NodeState::Queued => {
                log::debug!("{} is already queued, request absorbed.", id);
                follow(entry, id, 1, stack);
                return Ok(());
            }
            NodeState::Running => {
                entry.pending = true;
                follow(entry, id, 2, stack);
                return Ok(());
            }
            _ => {}
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(GraphError::NoRuntime(id).into());
        }

        let now = tokio::time::Instant::now();
        let throttle = entry
            .last_trigger
            .map(|last| entry.min_trigger_interval.saturating_sub(now - last))
            .unwrap_or_default();
        entry.last_trigger = Some(now);
        let wait = entry.trigger_delay + throttle;

        entry.pending = false;
        entry.epoch += 1;
        entry.state = NodeState::Queued;
        entry.events.clear(events::IDLE);
        let epoch = entry.epoch;
        let task_id = PropagationTask::reserve_id();
        let graph = self.clone();
        let task_stack = stack.clone();
        let task = PropagationTask::spawn_with_id(task_id, id, async move {
            graph.run_node(id, task_id, epoch, wait, task_stack).await
        });
        entry.active = Some(ActiveTask {
            id: task_id,
            abort: task.abort_handle(),
            stack: stack.clone(),
        });
        log::debug!("Queued {} ({}) as {}.", entry.definition.class(), id, task_id);
        stack.append(task);
        self.inner.events.clear(events::IDLE);
        Ok(())
    }

    async fn run_node(
        self,
        node: NodeId,
        task: TaskId,
        epoch: u64,
        wait: Duration,
        stack: PropagationStack,
    ) -> Result<TaskOutcome, Error> {
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        let Some(Run {
            class,
            logic,
            inputs,
        }) = self.begin_run(node, epoch)
        else {
            return Ok(TaskOutcome {
                task,
                node,
                state: NodeState::Idle,
            });
        };

        let started = Instant::now();
        let timestamp = Utc::now().timestamp_millis().max(0) as u64;
        let (inputs_json, result) = match inputs {
            Ok(inputs) => {
                let json = inputs.to_json();
                let computed = AssertUnwindSafe(logic.compute(inputs)).catch_unwind().await;
                let result = match computed {
                    Ok(Ok(outputs)) => Ok(outputs),
                    Ok(Err(source)) => Err(ExecutionError::Compute {
                        node,
                        class: class.clone(),
                        source,
                    }
                    .into()),
                    Err(_) => Err(ExecutionError::Panicked(node).into()),
                };
                (json, result)
            }
            Err(e) => (serde_json::Value::Null, Err(e)),
        };

        let trace = TraceEntry {
            timestamp,
            node,
            class,
            inputs: inputs_json,
            outputs: serde_json::Value::Null,
            status: String::new(),
            error: None,
            duration_ms: started.elapsed().as_millis() as u64,
            metadata: HashMap::from([("task".to_string(), task.to_string())]),
        };
        self.finish_run(node, task, epoch, result, trace, &stack)
    }

    /// Moves a queued node to running and snapshots its inputs.
    fn begin_run(&self, node: NodeId, epoch: u64) -> Option<Run> {
        let mut effects = Effects::default();
        let run = {
            let mut state = self.lock();
            let entry = state.nodes.get_mut(&node)?;
            if entry.epoch != epoch || entry.state != NodeState::Queued {
                return None;
            }
            if entry.disabled || !entry.is_operable() {
                entry.state = NodeState::Idle;
                entry.pending = true;
                entry.active = None;
                entry.runs.send_modify(|runs| runs.cancelled += 1);
                entry.events.set(events::IDLE);
                self.refresh_idle(&state);
                return None;
            }

            entry.state = NodeState::Running;
            effects.emit(&entry.events, events::TRIGGER, EventArgs::new());
            let mut inputs = Inputs::new();
            let mut failure = None;
            for slot in &entry.inputs {
                let Some(value) = slot.value.clone() else {
                    continue;
                };
                match self.coerce(&slot.spec.type_id, value) {
                    Ok(value) => inputs.insert(slot.spec.name.clone(), value),
                    Err(source) => {
                        failure = Some(ExecutionError::InputCast {
                            port: PortRef::new(node, &slot.spec.name),
                            source,
                        });
                        break;
                    }
                }
            }
            Run {
                class: entry.definition.class().to_string(),
                logic: entry.definition.logic(),
                inputs: match failure {
                    Some(e) => Err(e.into()),
                    None => Ok(inputs),
                },
            }
        };
        log::debug!("Running {} ({}).", run.class, node);
        if let Err(e) = self.dispatch(effects) {
            log::error!("Failed to announce run of {}: {}", node, e);
        }
        Some(run)
    }

    /// Stores the outputs of a run and returns the node to idle.
    fn finish_run(
        &self,
        node: NodeId,
        task: TaskId,
        epoch: u64,
        result: Result<Outputs, Error>,
        mut trace: TraceEntry,
        stack: &PropagationStack,
    ) -> Result<TaskOutcome, Error> {
        let mut effects = Effects::default();
        let (final_state, node_events) = {
            let mut state = self.lock();
            let current = state.nodes.get(&node).is_some_and(|e| e.epoch == epoch);
            if !current {
                log::debug!("Discarding results of a cancelled run of {}.", node);
                return Ok(TaskOutcome {
                    task,
                    node,
                    state: NodeState::Idle,
                });
            }

            let stored = result.and_then(|outputs| {
                self.store_outputs(&mut state, node, outputs, stack, &mut effects)
            });
            let entry = state.entry_mut(node)?;
            let final_state = match stored {
                Ok(outputs_json) => {
                    trace.outputs = outputs_json;
                    NodeState::Done
                }
                Err(e) => {
                    trace.error = Some(e.to_string());
                    effects.error(&entry.events, e);
                    NodeState::Errored
                }
            };
            trace.status = final_state.to_string();
            log::debug!("{} ({}) finished: {}.", trace.class, node, final_state);

            entry.state = NodeState::Idle;
            entry.active = None;
            entry.events.set(events::IDLE);
            effects.emit(
                &entry.events,
                events::TRIGGER_DONE,
                EventArgs::new().with("state", final_state.to_string()),
            );
            entry.runs.send_modify(|runs| {
                runs.finished += 1;
                runs.last = final_state;
            });
            let node_events = entry.events.clone();
            if entry.pending {
                if let Err(e) = self.schedule(&mut state, node, stack, false, &mut effects) {
                    effects.error(&node_events, e);
                }
                // A re-run that could not start releases whoever waits for it.
                if let Ok(entry) = state.entry(node) {
                    if entry.state != NodeState::Queued {
                        entry.runs.send_modify(|runs| runs.cancelled += 1);
                    }
                }
            }
            self.refresh_idle(&state);
            effects.traces.push(trace);
            (final_state, node_events)
        };

        let width = self.inner.config.pulse_width();
        tokio::spawn(async move {
            node_events.set_and_clear(events::TRIGGERED, width).await;
        });

        self.dispatch(effects)?;
        Ok(TaskOutcome {
            task,
            node,
            state: final_state,
        })
    }

    /// Casts every assigned output before storing any of them, then stores and
    /// forwards each one.
    fn store_outputs(
        &self,
        state: &mut GraphState,
        node: NodeId,
        outputs: Outputs,
        stack: &PropagationStack,
        effects: &mut Effects,
    ) -> Result<serde_json::Value, Error> {
        let mut cast = Vec::new();
        {
            let entry = state.entry(node)?;
            for (name, value) in outputs.into_vec() {
                let Some(spec) = entry.definition.output(&name) else {
                    return Err(ExecutionError::UnknownOutput { node, port: name }.into());
                };
                let value = self
                    .coerce(&spec.type_id, value)
                    .map_err(|source| ExecutionError::OutputCast {
                        port: PortRef::new(node, &name),
                        source,
                    })?;
                cast.push((name, value));
            }
        }
        let json = serde_json::Value::Object(
            cast.iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        );
        for (name, value) in cast {
            self.write_output(state, &PortRef::new(node, name), value, stack, effects);
        }
        Ok(json)
    }

    /// Stores an already cast output value and forwards it downstream.
    pub(crate) fn write_output(
        &self,
        state: &mut GraphState,
        port: &PortRef,
        value: Value,
        stack: &PropagationStack,
        effects: &mut Effects,
    ) {
        let targets = match state.slot_mut(port) {
            Ok(slot) => {
                let old = slot.value.replace(value.clone());
                effects.emit(
                    &slot.events,
                    events::VALUE_CHANGED,
                    EventArgs::new()
                        .with("old", old.unwrap_or_default())
                        .with("new", value.clone()),
                );
                slot.links.clone()
            }
            Err(e) => {
                log::warn!("Output write skipped: {}", e);
                return;
            }
        };
        for target in targets {
            self.deliver(state, &target, value.clone(), stack, effects);
        }
    }

    /// Carries a value across a connection into `target`.
    pub(crate) fn deliver(
        &self,
        state: &mut GraphState,
        target: &PortRef,
        value: Value,
        stack: &PropagationStack,
        effects: &mut Effects,
    ) {
        let (spec, node_events) = match state.entry(target.node) {
            Ok(entry) => match entry.slot(&target.port) {
                Some(slot) => (slot.spec.clone(), entry.events.clone()),
                None => return,
            },
            Err(_) => return,
        };
        match self.coerce_checked(&spec, value) {
            Ok(value) => {
                self.write_input(state, target, value, stack, effects);
            }
            Err(source) => {
                log::warn!("Could not deliver value to {}: {}", target, source);
                effects.error(
                    &node_events,
                    ExecutionError::InputCast {
                        port: target.clone(),
                        source,
                    }
                    .into(),
                );
            }
        }
    }

    /// Stores an already cast input value. Returns whether the value changed.
    pub(crate) fn write_input(
        &self,
        state: &mut GraphState,
        port: &PortRef,
        value: Value,
        stack: &PropagationStack,
        effects: &mut Effects,
    ) -> bool {
        let update_only = self.inner.config.update_only;
        let (triggers, pending) = {
            let Ok(entry) = state.entry_mut(port.node) else {
                return false;
            };
            let pending = entry.pending;
            let Some(slot) = entry.slot_mut(&port.port) else {
                return false;
            };
            if update_only {
                if let Some(old) = &slot.value {
                    if self.inner.types.equal(&slot.spec.type_id, old, &value) {
                        return false;
                    }
                }
            }
            let old = slot.value.replace(value.clone());
            effects.emit(
                &slot.events,
                events::VALUE_CHANGED,
                EventArgs::new()
                    .with("old", old.unwrap_or_default())
                    .with("new", value),
            );
            (slot.spec.does_trigger, pending)
        };
        if triggers || pending {
            if let Err(e) = self.schedule(state, port.node, stack, false, effects) {
                log::error!("Could not schedule {}: {}", port.node, e);
            }
        }
        true
    }
}
