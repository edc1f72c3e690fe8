//! Per-object notification: async level signals, synchronous listeners and an
//! error channel.
//!
//! Every node, port and graph owns one [`SignalManager`]. Events always carry
//! the owner as their [`Source`].

mod async_signal;
mod instrument;
mod listener;

pub use instrument::{IncludeArgs, Instrument};
pub use listener::{ErrorListener, Listener, error_listener, listener};

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::core::error::{Error, SignalError};
use crate::core::ids::{NodeId, PortRef};
use crate::core::value::Value;
use async_signal::Signals;
use listener::ListenerRegistry;

/// Name under which wildcard listeners are registered.
pub const WILDCARD: &str = "*";

/// The object that emitted an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Source {
    Graph(String),
    Node(NodeId),
    Port(PortRef),
    Named(String),
}

impl Source {
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Source::Node(id) => Some(*id),
            Source::Port(port) => Some(port.node),
            _ => None,
        }
    }

    pub fn port(&self) -> Option<&str> {
        match self {
            Source::Port(port) => Some(&port.port),
            _ => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Graph(id) => write!(f, "graph:{id}"),
            Source::Node(id) => write!(f, "node:{id}"),
            Source::Port(port) => write!(f, "port:{port}"),
            Source::Named(name) => f.write_str(name),
        }
    }
}

/// Keyword arguments passed to [`SignalManager::emit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventArgs {
    src: Option<Source>,
    values: BTreeMap<String, Value>,
}

impl EventArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Names the emitter explicitly. `emit` rejects a mismatching source.
    pub fn with_src(mut self, src: Source) -> Self {
        self.src = Some(src);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn src(&self) -> Option<&Source> {
        self.src.as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A delivered emission.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub src: Source,
    pub args: BTreeMap<String, Value>,
}

impl Event {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.args.get(key)
    }

    /// Arguments rendered as a JSON object, with `src` included.
    pub fn args_json(&self) -> serde_json::Value {
        let mut data: serde_json::Map<String, serde_json::Value> = self
            .args
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        data.insert("src".to_string(), serde_json::Value::String(self.src.to_string()));
        serde_json::Value::Object(data)
    }
}

struct ManagerInner {
    source: Source,
    signals: Signals,
    listeners: ListenerRegistry,
}

/// Async signals plus synchronous listeners, owned by one object.
///
/// Cloning yields another handle to the same manager.
#[derive(Clone)]
pub struct SignalManager {
    inner: Arc<ManagerInner>,
}

impl SignalManager {
    pub fn new(source: Source) -> Self {
        SignalManager {
            inner: Arc::new(ManagerInner {
                source,
                signals: Signals::default(),
                listeners: ListenerRegistry::default(),
            }),
        }
    }

    /// The owner stamped on every emitted event.
    pub fn source(&self) -> &Source {
        &self.inner.source
    }

    // ---- async signals ----

    /// Activates `name`, releasing every pending and future waiter until cleared.
    pub fn set(&self, name: &str) {
        self.inner.signals.set(name);
    }

    pub fn clear(&self, name: &str) {
        self.inner.signals.clear(name);
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.inner.signals.is_set(name)
    }

    /// Suspends until `name` is active. Returns at once if it already is.
    pub async fn wait(&self, name: &str) -> Result<(), SignalError> {
        self.inner.signals.wait(name).await
    }

    pub async fn wait_timeout(&self, name: &str, after: Duration) -> Result<(), SignalError> {
        tokio::time::timeout(after, self.wait(name))
            .await
            .map_err(|_| SignalError::Timeout {
                name: name.to_string(),
                after,
            })?
    }

    /// Activates `name` and deactivates it again after `delay`.
    pub async fn set_and_clear(&self, name: &str, delay: Duration) {
        self.set(name);
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
        self.clear(name);
    }

    /// Forgets the signal. Pending waiters fail with [`SignalError::SignalRemoved`].
    pub fn remove_signal(&self, name: &str) {
        self.inner.signals.remove(name);
    }

    // ---- listeners ----

    /// Registers `callback` for `name` (or every event, for `"*"`).
    /// Registering the same callback twice has no effect.
    pub fn on(&self, name: &str, callback: Listener) {
        self.inner.listeners.on(name, callback, false);
    }

    /// Like [`on`](Self::on), but the callback is dropped after its first call.
    pub fn once(&self, name: &str, callback: Listener) {
        self.inner.listeners.on(name, callback, true);
    }

    /// Removes one callback, or every callback for `name` when `callback` is `None`.
    pub fn off(&self, name: &str, callback: Option<&Listener>) {
        self.inner.listeners.off(name, callback);
    }

    pub fn has_listeners(&self, name: &str) -> bool {
        self.inner.listeners.has(name)
    }

    /// Calls the listeners of `name`, then the wildcard listeners.
    ///
    /// Returns whether any listener fired. Fails if `args` names a source other
    /// than this manager's owner.
    pub fn emit(&self, name: &str, args: EventArgs) -> Result<bool, SignalError> {
        if let Some(src) = &args.src {
            if src != &self.inner.source {
                return Err(SignalError::SourceMismatch {
                    expected: self.inner.source.clone(),
                    found: src.clone(),
                });
            }
        }
        let callbacks = self.inner.listeners.take_for(name);
        if callbacks.is_empty() {
            return Ok(false);
        }
        let event = Event {
            name: name.to_string(),
            src: self.inner.source.clone(),
            args: args.values,
        };
        for callback in callbacks {
            callback(&event);
        }
        Ok(true)
    }

    // ---- error channel ----

    pub fn on_error(&self, callback: ErrorListener) {
        self.inner.listeners.on_error(callback, false);
    }

    pub fn once_error(&self, callback: ErrorListener) {
        self.inner.listeners.on_error(callback, true);
    }

    pub fn off_error(&self, callback: Option<&ErrorListener>) {
        self.inner.listeners.off_error(callback);
    }

    pub fn has_error_listeners(&self) -> bool {
        self.inner.listeners.has_error()
    }

    /// Delivers `err` to every error listener, or hands it back when nobody listens.
    pub fn error(&self, err: Error) -> Result<(), Error> {
        let callbacks = self.inner.listeners.take_errors();
        if callbacks.is_empty() {
            return Err(err);
        }
        for callback in callbacks {
            callback(&self.inner.source, &err);
        }
        Ok(())
    }

    /// Drops every listener, error listener and signal.
    pub fn clear_all(&self) {
        self.inner.listeners.clear();
        self.inner.signals.remove_all();
    }
}

impl fmt::Debug for SignalManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalManager")
            .field("source", &self.inner.source)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::GraphError;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager() -> SignalManager {
        SignalManager::new(Source::Named("test".into()))
    }

    fn counter() -> (Arc<AtomicUsize>, Listener) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        (count, listener(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_on_is_idempotent() {
        let events = manager();
        let (count, cb) = counter();
        events.on("tick", cb.clone());
        events.on("tick", cb);
        assert!(events.emit("tick", EventArgs::new()).unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_single_and_all() {
        let events = manager();
        let (a_count, a) = counter();
        let (b_count, b) = counter();
        events.on("tick", a.clone());
        events.on("tick", b);

        events.off("tick", Some(&a));
        events.emit("tick", EventArgs::new()).unwrap();
        assert_eq!(a_count.load(Ordering::SeqCst), 0);
        assert_eq!(b_count.load(Ordering::SeqCst), 1);

        events.off("tick", None);
        assert!(!events.has_listeners("tick"));
        assert!(!events.emit("tick", EventArgs::new()).unwrap());
    }

    #[test]
    fn test_once_fires_once() {
        let events = manager();
        let (count, cb) = counter();
        events.once("tick", cb);
        events.emit("tick", EventArgs::new()).unwrap();
        events.emit("tick", EventArgs::new()).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wildcard_runs_after_named_and_sees_name() {
        let events = manager();
        let log = Arc::new(Mutex::new(Vec::new()));
        let named = log.clone();
        let wild = log.clone();
        events.on(WILDCARD, listener(move |e| wild.lock().unwrap().push(format!("*:{}", e.name))));
        events.on("tick", listener(move |e| named.lock().unwrap().push(e.name.clone())));

        events.emit("tick", EventArgs::new().with("n", 1)).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["tick".to_string(), "*:tick".to_string()]);
    }

    #[test]
    fn test_event_carries_source_and_args() {
        let events = manager();
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        events.on("tick", listener(move |e| *slot.lock().unwrap() = Some(e.clone())));

        events
            .emit("tick", EventArgs::new().with("n", 3).with_src(Source::Named("test".into())))
            .unwrap();
        let event = seen.lock().unwrap().clone().unwrap();
        assert_eq!(event.src, Source::Named("test".into()));
        assert_eq!(event.get("n"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_mismatched_source_is_rejected() {
        let events = manager();
        let (count, cb) = counter();
        events.on("tick", cb);
        let err = events
            .emit("tick", EventArgs::new().with_src(Source::Named("other".into())))
            .unwrap_err();
        assert!(matches!(err, SignalError::SourceMismatch { .. }));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_error_without_listeners_is_returned() {
        let events = manager();
        let err = events
            .error(Error::from(GraphError::MissingLogic("x".into())))
            .unwrap_err();
        assert!(matches!(err, Error::Graph(GraphError::MissingLogic(_))));
    }

    #[test]
    fn test_error_reaches_every_listener() {
        let events = manager();
        let hits = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b"] {
            let hits = hits.clone();
            events.on_error(error_listener(move |src, err| {
                hits.lock().unwrap().push(format!("{tag} {src} {err}"));
            }));
        }
        events
            .error(Error::from(GraphError::MissingLogic("x".into())))
            .unwrap();
        let hits = hits.lock().unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].starts_with("a test"));
    }

    #[test]
    fn test_once_error_then_reraise() {
        let events = manager();
        events.once_error(error_listener(|_, _| {}));
        assert!(events.error(GraphError::MissingLogic("x".into()).into()).is_ok());
        assert!(events.error(GraphError::MissingLogic("x".into()).into()).is_err());
    }

    #[tokio::test]
    async fn test_all_waiters_released_by_one_set() {
        let events = manager();
        let mut handles = Vec::new();
        for _ in 0..5 {
            let events = events.clone();
            handles.push(tokio::spawn(async move { events.wait("go").await }));
        }
        tokio::task::yield_now().await;
        events.set("go");
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(events.is_set("go"));
        events.clear("go");
        assert!(!events.is_set("go"));
    }

    #[tokio::test]
    async fn test_wait_returns_when_already_set() {
        let events = manager();
        events.set("go");
        events.wait("go").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout() {
        let events = manager();
        let err = events
            .wait_timeout("never", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, SignalError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_pulse_releases_pending_waiter() {
        let events = manager();
        let waiter = {
            let events = events.clone();
            tokio::spawn(async move { events.wait("pulse").await })
        };
        tokio::task::yield_now().await;
        events.set_and_clear("pulse", Duration::ZERO).await;
        assert!(!events.is_set("pulse"));
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_remove_signal_fails_waiters() {
        let events = manager();
        let waiter = {
            let events = events.clone();
            tokio::spawn(async move { events.wait("gone").await })
        };
        tokio::task::yield_now().await;
        events.remove_signal("gone");
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, SignalError::SignalRemoved(_)));
    }
}
