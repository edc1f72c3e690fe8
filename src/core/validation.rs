use std::fmt;

/// A problem found by [`Graph::validate`](crate::Graph::validate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    /// A node can never run as wired.
    Error(String),
    /// The graph runs, but maybe not as intended.
    Warning(String),
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::Error(msg) => write!(f, "error: {msg}"),
            ValidationIssue::Warning(msg) => write!(f, "warning: {msg}"),
        }
    }
}

/// The result of a graph validation pass.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.issues.push(ValidationIssue::Error(msg.into()));
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.issues.push(ValidationIssue::Warning(msg.into()));
    }

    pub fn is_safe(&self) -> bool {
        !self.issues.iter().any(|i| matches!(i, ValidationIssue::Error(_)))
    }

    pub fn has_warnings(&self) -> bool {
        self.issues.iter().any(|i| matches!(i, ValidationIssue::Warning(_)))
    }

    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.issues.iter().filter_map(|i| match i {
            ValidationIssue::Error(msg) => Some(msg.as_str()),
            ValidationIssue::Warning(_) => None,
        })
    }

    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.issues.iter().filter_map(|i| match i {
            ValidationIssue::Warning(msg) => Some(msg.as_str()),
            ValidationIssue::Error(_) => None,
        })
    }

    /// Writes every issue to the log, errors at error level.
    pub fn log_summary(&self) {
        if self.issues.is_empty() {
            log::info!("Graph validation passed: every required input can be filled.");
            return;
        }
        for issue in &self.issues {
            match issue {
                ValidationIssue::Error(msg) => log::error!("Validation error: {}", msg),
                ValidationIssue::Warning(msg) => log::warn!("Validation warning: {}", msg),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_make_result_unsafe() {
        let mut result = ValidationResult::new();
        assert!(result.is_safe());
        result.add_warning("node is disabled");
        assert!(result.is_safe());
        assert!(result.has_warnings());
        result.add_error("input 'a' has no source");
        assert!(!result.is_safe());
        assert_eq!(result.errors().collect::<Vec<_>>(), vec!["input 'a' has no source"]);
        assert_eq!(result.warnings().count(), 1);
    }

    #[test]
    fn test_issue_display() {
        assert_eq!(ValidationIssue::Error("x".into()).to_string(), "error: x");
        assert_eq!(ValidationIssue::Warning("y".into()).to_string(), "warning: y");
    }
}
