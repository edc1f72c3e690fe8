use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::types::builtin;
use crate::core::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

/// Optional limits on the values a port accepts, checked after casting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueConstraint {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
    pub options: Vec<Value>,
}

impl ValueConstraint {
    pub fn range(min: f64, max: f64) -> Self {
        ValueConstraint {
            min: Some(min),
            max: Some(max),
            ..Default::default()
        }
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn one_of(options: impl IntoIterator<Item = Value>) -> Self {
        ValueConstraint {
            options: options.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn check(&self, value: &Value) -> Result<(), String> {
        if !self.options.is_empty() && !self.options.contains(value) {
            return Err(format!("{value} is not one of the allowed options"));
        }
        let Some(x) = value.as_f64() else {
            return Ok(());
        };
        if let Some(min) = self.min {
            if x < min {
                return Err(format!("{value} is below the minimum {min}"));
            }
        }
        if let Some(max) = self.max {
            if x > max {
                return Err(format!("{value} is above the maximum {max}"));
            }
        }
        if let Some(step) = self.step.filter(|s| *s > 0.0) {
            let steps = (x - self.min.unwrap_or(0.0)) / step;
            if (steps - steps.round()).abs() > 1e-9 {
                return Err(format!("{value} is not a multiple of the step {step}"));
            }
        }
        Ok(())
    }
}

/// Declaration of one named port on a node class.
#[derive(Debug, Clone)]
pub struct PortSpec {
    pub name: String,
    pub type_id: String,
    pub direction: Direction,
    /// Whether a new value on this input schedules the node.
    pub does_trigger: bool,
    /// Whether this input accepts more than one upstream connection.
    pub allow_multiple: bool,
    /// A required input must hold a value before the node can run.
    pub required: bool,
    pub default: Option<Value>,
    pub constraint: Option<ValueConstraint>,
    pub description: String,
}

impl PortSpec {
    fn new(name: impl Into<String>, type_id: impl Into<String>, direction: Direction) -> Self {
        PortSpec {
            name: name.into(),
            type_id: type_id.into(),
            direction,
            does_trigger: direction == Direction::Input,
            allow_multiple: direction == Direction::Output,
            required: direction == Direction::Input,
            default: None,
            constraint: None,
            description: String::new(),
        }
    }

    pub fn input(name: impl Into<String>, type_id: impl Into<String>) -> Self {
        Self::new(name, type_id, Direction::Input)
    }

    pub fn output(name: impl Into<String>, type_id: impl Into<String>) -> Self {
        Self::new(name, type_id, Direction::Output)
    }

    /// An input of the wildcard type.
    pub fn any(name: impl Into<String>) -> Self {
        Self::input(name, builtin::ANY)
    }

    pub fn with_trigger(mut self, does_trigger: bool) -> Self {
        self.does_trigger = does_trigger;
        self
    }

    pub fn allow_multiple(mut self, allow: bool) -> Self {
        if self.direction == Direction::Input {
            self.allow_multiple = allow;
        }
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_constraint(mut self, constraint: ValueConstraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn is_input(&self) -> bool {
        self.direction == Direction::Input
    }
}
