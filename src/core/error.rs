use std::time::Duration;
use thiserror::Error;

use crate::core::ids::{NodeId, PortRef};
use crate::core::signal::Source;
use crate::core::value::ValueKind;

/// Error type returned by node compute bodies.
pub type ComputeError = Box<dyn std::error::Error + Send + Sync>;

/// Failures of the type registry and the casting graph.
#[derive(Debug, Error)]
pub enum TypeError {
    #[error("type '{0}' is not registered")]
    UnknownType(String),

    #[error("no registered type accepts values of kind '{0}'")]
    UnregisteredKind(ValueKind),

    #[error("no casting path from '{from}' to '{to}'")]
    NoCastingPath { from: String, to: String },

    #[error("cast from '{from}' to '{to}' failed: {reason}")]
    CastFailed {
        from: String,
        to: String,
        reason: String,
    },

    #[error("value rejected by '{port}': {reason}")]
    ConstraintViolation { port: String, reason: String },
}

/// Failures of the signal manager.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("event source mismatch: emitter is '{expected}' but arguments name '{found}'")]
    SourceMismatch { expected: Source, found: Source },

    #[error("timed out after {after:?} waiting for signal '{name}'")]
    Timeout { name: String, after: Duration },

    #[error("signal '{0}' was removed while being waited on")]
    SignalRemoved(String),
}

/// Failures caused by graph construction or by requests against the graph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),

    #[error("port '{0}' does not exist")]
    UnknownPort(PortRef),

    #[error("node class '{0}' is not registered")]
    UnknownNodeClass(String),

    #[error("cannot connect '{from}' to '{to}': connections run from an output to an input")]
    InvalidDirection { from: PortRef, to: PortRef },

    #[error("cannot connect '{from}' to '{to}'")]
    IncompatibleTypes {
        from: PortRef,
        to: PortRef,
        #[source]
        source: TypeError,
    },

    #[error("input '{0}' already has a source and does not allow multiple connections")]
    AlreadyConnected(PortRef),

    #[error("'{from}' is not connected to '{to}'")]
    NotConnected { from: PortRef, to: PortRef },

    #[error("node {node} is not operable: {reason}")]
    NotOperable { node: NodeId, reason: String },

    #[error("node {0} is disabled")]
    Disabled(NodeId),

    #[error("node class '{class}' declares port '{port}' twice")]
    DuplicatePort { class: String, port: String },

    #[error("node class '{0}' has no compute logic")]
    MissingLogic(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("no async runtime is available to run node {0}")]
    NoRuntime(NodeId),
}

/// Failures while running a node.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("node '{class}' ({node}) failed")]
    Compute {
        node: NodeId,
        class: String,
        #[source]
        source: ComputeError,
    },

    #[error("could not store value into '{port}'")]
    InputCast {
        port: PortRef,
        #[source]
        source: TypeError,
    },

    #[error("could not store value into '{port}'")]
    OutputCast {
        port: PortRef,
        #[source]
        source: TypeError,
    },

    #[error("node {node} assigned undeclared output '{port}'")]
    UnknownOutput { node: NodeId, port: String },

    #[error("task for node {0} panicked")]
    Panicked(NodeId),

    #[error("propagation did not settle within {0:?}")]
    Timeout(Duration),
}

/// Crate-level error, unifying every concern.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
