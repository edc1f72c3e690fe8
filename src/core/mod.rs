pub mod config;
pub mod error;
pub mod graph;
pub mod ids;
pub mod messages;
pub mod signal;
pub mod stack;
pub mod telemetry;
pub mod types;
pub mod validation;
pub mod value;
