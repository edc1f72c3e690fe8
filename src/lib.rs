//! # nodeweave
//!
//! A reactive computation-graph kernel: nodes with typed input and output
//! ports, connections that cast values between types, and waves of async node
//! runs triggered by value changes.
//!
//! ## Features
//!
//! - **Type registry**: named types, converters between them, and shortest
//!   casting paths composed on demand
//! - **Signals**: async level signals, synchronous listeners and an error
//!   channel on every graph, node and port
//! - **Propagation stacks**: every write returns the wave of tasks it caused,
//!   drained newest first
//! - **Node execution model**: triggering, coalescing, cancellation and
//!   operability of node instances
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nodeweave::prelude::*;
//!
//! # async fn demo() -> nodeweave::error::Result<()> {
//! let add = NodeDefinition::builder("add")
//!     .signature("a: int, b: int -> sum: int")
//!     .compute_sync(|inputs| {
//!         let a = inputs.require("a")?.as_int().unwrap_or_default();
//!         let b = inputs.require("b")?.as_int().unwrap_or_default();
//!         Ok(Outputs::new().with("sum", a + b))
//!     })
//!     .build()?;
//!
//! let graph = Graph::new();
//! let (node, _) = graph.add_node(add)?;
//! graph.set_input(node, "a", 1)?;
//! graph.set_input(node, "b", 2)?.wait().await?;
//! assert_eq!(graph.output_value(node, "sum")?, Some(Value::Int(3)));
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`types`]: type descriptors, the registry and casting paths
//! - [`signal`]: signal managers, events and instrumentation
//! - [`stack`]: propagation tasks and stacks
//! - [`graph`]: node definitions, ports and the [`Graph`] itself
//! - [`prelude`]: commonly used types (import with `use nodeweave::prelude::*`)

// ============================================================================
// Core Module
// ============================================================================

mod core;

pub use crate::core::{
    config, error, graph, ids, messages, signal, stack, telemetry, types, validation, value,
};

// ============================================================================
// Public Re-exports - Granular Imports
// ============================================================================

pub use crate::core::config::GraphConfig;
pub use crate::core::error::{Error, Result};
pub use crate::core::graph::{
    ConnectOptions, Direction, Graph, GraphBuilder, Inputs, NodeDefinition, NodeLogic,
    NodeRegistry, NodeState, Outputs, PortSpec,
};
pub use crate::core::ids::{NodeId, PortRef};
pub use crate::core::signal::{Event, EventArgs, SignalManager, Source};
pub use crate::core::stack::{PropagationStack, TaskOutcome};
pub use crate::core::types::{TypeDescriptor, TypeRegistry};
pub use crate::core::value::Value;

// ============================================================================
// Prelude Module - Convenient Bulk Imports
// ============================================================================

/// Everything needed to declare node classes and drive a graph.
///
/// # Example
/// ```rust
/// use nodeweave::prelude::*;
/// ```
pub mod prelude {
    pub use super::core::error::ComputeError;
    pub use super::core::graph::events;
    pub use super::core::signal::{error_listener, listener};
    pub use super::{
        ConnectOptions, Direction, Error, Event, EventArgs, Graph, GraphConfig, Inputs,
        NodeDefinition, NodeId, NodeLogic, NodeState, Outputs, PortRef, PortSpec,
        PropagationStack, SignalManager, Source, TypeDescriptor, TypeRegistry, Value,
    };
}

// ============================================================================
// Library Metadata
// ============================================================================

/// The version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The name of this crate.
pub const NAME: &str = env!("CARGO_PKG_NAME");
