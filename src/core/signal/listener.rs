use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Event, Source, WILDCARD};
use crate::core::error::Error;

/// A synchronous event callback. Identity is the `Arc` allocation.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// A callback on the error channel, receiving the emitter and the error.
pub type ErrorListener = Arc<dyn Fn(&Source, &Error) + Send + Sync>;

/// Wraps a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wraps a closure as an [`ErrorListener`].
pub fn error_listener<F>(f: F) -> ErrorListener
where
    F: Fn(&Source, &Error) + Send + Sync + 'static,
{
    Arc::new(f)
}

struct Entry<L> {
    callback: L,
    once: bool,
}

trait SameCallback {
    fn same(&self, other: &Self) -> bool;
}

impl<T: ?Sized> SameCallback for Arc<T> {
    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

fn add<L: SameCallback>(entries: &mut Vec<Entry<L>>, callback: L, once: bool) {
    if entries.iter().any(|e| e.callback.same(&callback)) {
        return;
    }
    entries.push(Entry { callback, once });
}

/// Snapshot of the callbacks to run; once-entries are removed as they are taken.
fn take<L: Clone>(entries: &mut Vec<Entry<L>>) -> Vec<L> {
    let callbacks = entries.iter().map(|e| e.callback.clone()).collect();
    entries.retain(|e| !e.once);
    callbacks
}

#[derive(Default)]
struct Table {
    named: HashMap<String, Vec<Entry<Listener>>>,
    wildcard: Vec<Entry<Listener>>,
    errors: Vec<Entry<ErrorListener>>,
}

#[derive(Default)]
pub(super) struct ListenerRegistry {
    table: Mutex<Table>,
}

impl ListenerRegistry {
    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn on(&self, name: &str, callback: Listener, once: bool) {
        let mut table = self.lock();
        if name == WILDCARD {
            add(&mut table.wildcard, callback, once);
        } else {
            add(table.named.entry(name.to_string()).or_default(), callback, once);
        }
    }

    pub(super) fn off(&self, name: &str, callback: Option<&Listener>) {
        let mut table = self.lock();
        if name == WILDCARD {
            match callback {
                Some(cb) => table.wildcard.retain(|e| !e.callback.same(cb)),
                None => table.wildcard.clear(),
            }
            return;
        }
        let emptied = match (table.named.get_mut(name), callback) {
            (Some(entries), Some(cb)) => {
                entries.retain(|e| !e.callback.same(cb));
                entries.is_empty()
            }
            (Some(_), None) => true,
            (None, _) => false,
        };
        if emptied {
            table.named.remove(name);
        }
    }

    pub(super) fn has(&self, name: &str) -> bool {
        let table = self.lock();
        if name == WILDCARD {
            return !table.wildcard.is_empty();
        }
        table.named.get(name).is_some_and(|e| !e.is_empty())
    }

    /// Named callbacks first, then wildcard ones.
    pub(super) fn take_for(&self, name: &str) -> Vec<Listener> {
        let mut table = self.lock();
        let mut callbacks = Vec::new();
        let mut emptied = false;
        if let Some(entries) = table.named.get_mut(name) {
            callbacks = take(entries);
            emptied = entries.is_empty();
        }
        if emptied {
            table.named.remove(name);
        }
        callbacks.extend(take(&mut table.wildcard));
        callbacks
    }

    pub(super) fn on_error(&self, callback: ErrorListener, once: bool) {
        add(&mut self.lock().errors, callback, once);
    }

    pub(super) fn off_error(&self, callback: Option<&ErrorListener>) {
        let mut table = self.lock();
        match callback {
            Some(cb) => table.errors.retain(|e| !e.callback.same(cb)),
            None => table.errors.clear(),
        }
    }

    pub(super) fn has_error(&self) -> bool {
        !self.lock().errors.is_empty()
    }

    pub(super) fn take_errors(&self) -> Vec<ErrorListener> {
        take(&mut self.lock().errors)
    }

    pub(super) fn clear(&self) {
        *self.lock() = Table::default();
    }
}
