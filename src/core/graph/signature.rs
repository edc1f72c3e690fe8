use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::core::error::GraphError;
use crate::core::types::builtin;

/// A named, typed field of a [`Signature`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub type_id: String,
}

impl Field {
    pub fn new(name: impl Into<String>, type_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_id: type_id.into(),
        }
    }
}

/// Port layout of a node class in shorthand form.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Signature {
    pub inputs: Vec<Field>,
    pub outputs: Vec<Field>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, name: impl Into<String>, type_id: impl Into<String>) -> Self {
        self.inputs.push(Field::new(name, type_id));
        self
    }

    pub fn output(mut self, name: impl Into<String>, type_id: impl Into<String>) -> Self {
        self.outputs.push(Field::new(name, type_id));
        self
    }
}

fn parse_fields(part: &str) -> Result<Vec<Field>, GraphError> {
    part.split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(|f| {
            let (name, type_id) = match f.split_once(':') {
                Some((name, ty)) => (name.trim(), ty.trim()),
                None => (f, builtin::ANY),
            };
            if name.is_empty() || type_id.is_empty() {
                return Err(GraphError::InvalidSignature(format!("malformed field '{f}'")));
            }
            Ok(Field::new(name, type_id))
        })
        .collect()
}

impl FromStr for Signature {
    type Err = GraphError;

    /// Parses `"a: int, b: int -> sum: int"`. Untyped fields are `any`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split("->").collect();
        if parts.len() != 2 {
            return Err(GraphError::InvalidSignature(
                "signature must contain exactly one '->'".to_string(),
            ));
        }
        Ok(Signature {
            inputs: parse_fields(parts[0])?,
            outputs: parse_fields(parts[1])?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_typed_and_untyped() {
        let sig: Signature = "a: int, b -> sum: float".parse().unwrap();
        assert_eq!(sig.inputs, vec![Field::new("a", "int"), Field::new("b", "any")]);
        assert_eq!(sig.outputs, vec![Field::new("sum", "float")]);
    }

    #[test]
    fn test_no_inputs() {
        let sig: Signature = " -> now: datetime".parse().unwrap();
        assert!(sig.inputs.is_empty());
        assert_eq!(sig.outputs.len(), 1);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!("a, b".parse::<Signature>().is_err());
        assert!("a -> b -> c".parse::<Signature>().is_err());
        assert!("a: -> b".parse::<Signature>().is_err());
    }
}
