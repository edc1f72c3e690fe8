//! Value-type registry and casting graph.
//!
//! Types are registered once, usually at startup, and looked up on every value
//! write. Converters form a directed graph; a value of one type reaches another
//! through the shortest chain of converters between them, and composed chains
//! are cached until the next converter is registered.

pub mod builtin;
mod casting;
mod descriptor;

pub use casting::{CastFn, CastingPath};
pub use descriptor::{EqualityFn, TypeDescriptor, TypecheckFn};

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::core::error::TypeError;
use crate::core::value::{Value, ValueKind};
use casting::CastGraph;

/// Outcome of [`TypeRegistry::register_type`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The descriptor is new.
    Added,
    /// An identical descriptor was already registered under this id.
    Unchanged,
    /// A different descriptor already owns the id; the new one was ignored.
    Conflict(String),
}

#[derive(Default)]
struct RegistryState {
    types: HashMap<String, Arc<TypeDescriptor>>,
    aliases: HashMap<String, String>,
    kinds: HashMap<ValueKind, String>,
    order: Vec<String>,
    casts: CastGraph,
    conflicts: Vec<String>,
}

impl RegistryState {
    fn resolve(&self, id: &str) -> Result<Arc<TypeDescriptor>, TypeError> {
        let canonical = self.aliases.get(id).map(String::as_str).unwrap_or(id);
        self.types
            .get(canonical)
            .cloned()
            .ok_or_else(|| TypeError::UnknownType(id.to_string()))
    }

    fn owner_of(&self, value: &Value) -> Result<Arc<TypeDescriptor>, TypeError> {
        let kind = value.kind();
        let id = self
            .kinds
            .get(&kind)
            .ok_or(TypeError::UnregisteredKind(kind))?;
        self.resolve(id)
    }
}

/// Catalogue of value types and the converters between them.
///
/// The registry is shared behind an [`Arc`]; every method takes `&self`.
/// Converters never run while the registry lock is held.
pub struct TypeRegistry {
    state: RwLock<RegistryState>,
}

static GLOBAL: OnceLock<Arc<TypeRegistry>> = OnceLock::new();

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        TypeRegistry {
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// A registry preloaded with the types and casts in [`builtin`].
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        builtin::install(&registry);
        registry
    }

    /// The process-wide registry, built with builtins on first use.
    pub fn global() -> Arc<TypeRegistry> {
        GLOBAL
            .get_or_init(|| Arc::new(TypeRegistry::with_builtins()))
            .clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a type under its id, its aliases and the runtime kinds it accepts.
    ///
    /// Re-registering an identical descriptor is a no-op. A different descriptor
    /// for an id that is already taken is recorded as a conflict and ignored.
    pub fn register_type(&self, descriptor: TypeDescriptor) -> Registration {
        let mut state = self.write();
        let id = descriptor.id().to_string();

        if let Some(existing) = state.types.get(&id) {
            if existing.same_as(&descriptor) {
                return Registration::Unchanged;
            }
            let msg = format!("type '{id}' is already registered with a different descriptor");
            log::error!("Type registration conflict: {}", msg);
            state.conflicts.push(msg.clone());
            return Registration::Conflict(msg);
        }
        if let Some(owner) = state.aliases.get(&id) {
            let msg = format!("type id '{id}' is already an alias of '{owner}'");
            log::error!("Type registration conflict: {}", msg);
            state.conflicts.push(msg.clone());
            return Registration::Conflict(msg);
        }

        for alias in descriptor.aliases() {
            if state.types.contains_key(alias) || state.aliases.contains_key(alias) {
                let msg = format!("alias '{alias}' of type '{id}' is already taken");
                log::warn!("{}, skipping it.", msg);
                state.conflicts.push(msg);
                continue;
            }
            state.aliases.insert(alias.clone(), id.clone());
        }
        for kind in descriptor.accepted_kinds() {
            if let Some(owner) = state.kinds.get(kind) {
                log::debug!("Kind '{}' stays owned by type '{}', not '{}'.", kind, owner, id);
                continue;
            }
            state.kinds.insert(kind.clone(), id.clone());
        }

        state.casts.add_type(&id);
        state.order.push(id.clone());
        state.types.insert(id, Arc::new(descriptor));
        Registration::Added
    }

    /// Adds a directed converter from `from` to `to`.
    pub fn register_cast<F>(&self, from: &str, to: &str, convert: F) -> Result<(), TypeError>
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        let mut state = self.write();
        let a = state.resolve(from)?;
        let b = state.resolve(to)?;
        state.casts.add_edge(a.id(), b.id(), Arc::new(convert))
    }

    /// Adds a converter and its inverse in one step.
    pub fn register_cast_pair<F, R>(
        &self,
        from: &str,
        to: &str,
        convert: F,
        reverse: R,
    ) -> Result<(), TypeError>
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
        R: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        let mut state = self.write();
        let a = state.resolve(from)?;
        let b = state.resolve(to)?;
        state.casts.add_edge(a.id(), b.id(), Arc::new(convert))?;
        state.casts.add_edge(b.id(), a.id(), Arc::new(reverse))
    }

    /// Looks a type up by id or alias.
    pub fn get(&self, id: &str) -> Option<Arc<TypeDescriptor>> {
        self.read().resolve(id).ok()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Canonical id for an id or alias.
    pub fn canonical(&self, id: &str) -> Result<String, TypeError> {
        self.read().resolve(id).map(|d| d.id().to_string())
    }

    /// Registered type ids in registration order.
    pub fn type_ids(&self) -> Vec<String> {
        self.read().order.clone()
    }

    /// The type that owns the runtime kind of `value`.
    pub fn type_of(&self, value: &Value) -> Result<Arc<TypeDescriptor>, TypeError> {
        self.read().owner_of(value)
    }

    /// Shortest chain of converters from one type to another.
    pub fn casting_path(&self, from: &str, to: &str) -> Result<CastingPath, TypeError> {
        {
            let state = self.read();
            let a = state.resolve(from)?;
            let b = state.resolve(to)?;
            if let Some(path) = state.casts.cached(a.id(), b.id()) {
                return Ok(path);
            }
        }
        let mut state = self.write();
        let a = state.resolve(from)?;
        let b = state.resolve(to)?;
        state.casts.path(a.id(), b.id())
    }

    pub fn can_cast(&self, from: &str, to: &str) -> bool {
        self.casting_path(from, to).is_ok()
    }

    /// Converts `value` to `target` through the casting graph.
    pub fn cast_value(&self, target: &str, value: Value) -> Result<Value, TypeError> {
        let source = self.type_of(&value)?;
        let path = self.casting_path(source.id(), target)?;
        path.apply(value)
    }

    /// Returns `value` untouched if `target` already accepts it, casting otherwise.
    pub fn cast_if_needed(&self, target: &str, value: Value) -> Result<Value, TypeError> {
        if self.typecheck(target, &value)? {
            return Ok(value);
        }
        self.cast_value(target, value)
    }

    pub fn typecheck(&self, id: &str, value: &Value) -> Result<bool, TypeError> {
        let descriptor = self.read().resolve(id)?;
        Ok(descriptor.typecheck(value))
    }

    /// Per-type equality, falling back to value equality for unknown types.
    pub fn equal(&self, id: &str, a: &Value, b: &Value) -> bool {
        match self.read().resolve(id) {
            Ok(descriptor) => descriptor.equal(a, b),
            Err(_) => a == b,
        }
    }

    /// Every registration conflict recorded so far.
    pub fn conflicts(&self) -> Vec<String> {
        self.read().conflicts.clone()
    }

    pub fn cast_count(&self) -> usize {
        self.read().casts.edge_count()
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("TypeRegistry")
            .field("types", &state.order)
            .field("casts", &state.casts.edge_count())
            .finish()
    }
}
