use std::fmt;
use std::sync::Arc;

use crate::core::value::{Value, ValueKind};

pub type TypecheckFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
pub type EqualityFn = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// A registered semantic value type.
///
/// A descriptor names the runtime kinds it accepts natively. Values of any other
/// kind must travel through the casting graph before a port of this type will
/// hold them.
#[derive(Clone)]
pub struct TypeDescriptor {
    id: String,
    accepts: Vec<ValueKind>,
    aliases: Vec<String>,
    accepts_any: bool,
    typecheck: Option<TypecheckFn>,
    equality: Option<EqualityFn>,
}

impl TypeDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        TypeDescriptor {
            id: id.into(),
            accepts: Vec::new(),
            aliases: Vec::new(),
            accepts_any: false,
            typecheck: None,
            equality: None,
        }
    }

    /// A wildcard type: every value typechecks against it.
    pub fn any(id: impl Into<String>) -> Self {
        TypeDescriptor {
            accepts_any: true,
            ..TypeDescriptor::new(id)
        }
    }

    /// Declares a runtime kind accepted natively.
    pub fn accepts(mut self, kind: ValueKind) -> Self {
        if !self.accepts.contains(&kind) {
            self.accepts.push(kind);
        }
        self
    }

    /// Registers an additional name the type can be looked up by.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        if !self.aliases.contains(&alias) {
            self.aliases.push(alias);
        }
        self
    }

    pub fn with_typecheck<F>(mut self, check: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.typecheck = Some(Arc::new(check));
        self
    }

    pub fn with_equality<F>(mut self, eq: F) -> Self
    where
        F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        self.equality = Some(Arc::new(eq));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn accepted_kinds(&self) -> &[ValueKind] {
        &self.accepts
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn is_any(&self) -> bool {
        self.accepts_any
    }

    /// True if `value` is already a native representation of this type.
    pub fn typecheck(&self, value: &Value) -> bool {
        if let Some(check) = &self.typecheck {
            return check(value);
        }
        self.accepts_any || self.accepts.contains(&value.kind())
    }

    pub fn equal(&self, a: &Value, b: &Value) -> bool {
        match &self.equality {
            Some(eq) => eq(a, b),
            None => a == b,
        }
    }

    /// Two descriptors describe the same type if every declared property matches
    /// and any overrides are the very same closures.
    pub(crate) fn same_as(&self, other: &TypeDescriptor) -> bool {
        fn same_fn<T: ?Sized>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
            match (a, b) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            }
        }
        self.id == other.id
            && self.accepts == other.accepts
            && self.aliases == other.aliases
            && self.accepts_any == other.accepts_any
            && same_fn(&self.typecheck, &other.typecheck)
            && same_fn(&self.equality, &other.equality)
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("id", &self.id)
            .field("accepts", &self.accepts)
            .field("aliases", &self.aliases)
            .field("accepts_any", &self.accepts_any)
            .field("custom_typecheck", &self.typecheck.is_some())
            .field("custom_equality", &self.equality.is_some())
            .finish()
    }
}
