use std::future::Future;

use super::{EventArgs, SignalManager};
use crate::core::error::SignalError;
use crate::core::value::Value;

/// Which keyword arguments an instrumented call forwards into its events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IncludeArgs {
    #[default]
    None,
    All,
    Only(Vec<String>),
}

/// Wraps a call so that `before_<name>` and/or `after_<name>` are emitted
/// around it.
///
/// ```
/// use nodeweave::signal::{Instrument, IncludeArgs, SignalManager, Source, EventArgs};
/// use nodeweave::error::SignalError;
///
/// let events = SignalManager::new(Source::Named("doc".into()));
/// let doubled: Result<i64, SignalError> = Instrument::around("double")
///     .include(IncludeArgs::All)
///     .include_result(true)
///     .call(&events, EventArgs::new().with("x", 21), || Ok(42));
/// assert_eq!(doubled.unwrap(), 42);
/// ```
#[derive(Debug, Clone)]
pub struct Instrument {
    name: String,
    before: bool,
    after: bool,
    include: IncludeArgs,
    include_result: bool,
}

impl Instrument {
    fn new(name: impl Into<String>, before: bool, after: bool) -> Self {
        Instrument {
            name: name.into(),
            before,
            after,
            include: IncludeArgs::None,
            include_result: false,
        }
    }

    pub fn before(name: impl Into<String>) -> Self {
        Self::new(name, true, false)
    }

    pub fn after(name: impl Into<String>) -> Self {
        Self::new(name, false, true)
    }

    pub fn around(name: impl Into<String>) -> Self {
        Self::new(name, true, true)
    }

    pub fn include(mut self, include: IncludeArgs) -> Self {
        self.include = include;
        self
    }

    /// Adds the returned value to the `after_` event as `result`.
    pub fn include_result(mut self, include: bool) -> Self {
        self.include_result = include;
        self
    }

    fn select(&self, kwargs: &EventArgs) -> EventArgs {
        let mut args = EventArgs::new();
        match &self.include {
            IncludeArgs::None => {}
            IncludeArgs::All => {
                for (k, v) in kwargs.iter() {
                    args.insert(k.clone(), v.clone());
                }
            }
            IncludeArgs::Only(keys) => {
                for key in keys {
                    if let Some(v) = kwargs.get(key) {
                        args.insert(key.clone(), v.clone());
                    }
                }
            }
        }
        args
    }

    fn emit_before(&self, emitter: &SignalManager, kwargs: &EventArgs) -> Result<(), SignalError> {
        if self.before {
            emitter.emit(&format!("before_{}", self.name), self.select(kwargs))?;
        }
        Ok(())
    }

    fn emit_after<T>(&self, emitter: &SignalManager, kwargs: &EventArgs, result: &T) -> Result<(), SignalError>
    where
        T: Clone + Into<Value>,
    {
        if self.after {
            let mut args = self.select(kwargs);
            if self.include_result {
                args.insert("result", result.clone().into());
            }
            emitter.emit(&format!("after_{}", self.name), args)?;
        }
        Ok(())
    }

    /// Runs `f` between the configured events. `after_` is skipped when `f` fails.
    pub fn call<T, E, F>(&self, emitter: &SignalManager, kwargs: EventArgs, f: F) -> Result<T, E>
    where
        T: Clone + Into<Value>,
        E: From<SignalError>,
        F: FnOnce() -> Result<T, E>,
    {
        self.emit_before(emitter, &kwargs)?;
        let result = f()?;
        self.emit_after(emitter, &kwargs, &result)?;
        Ok(result)
    }

    pub async fn call_async<T, E, Fut>(
        &self,
        emitter: &SignalManager,
        kwargs: EventArgs,
        fut: Fut,
    ) -> Result<T, E>
    where
        T: Clone + Into<Value>,
        E: From<SignalError>,
        Fut: Future<Output = Result<T, E>>,
    {
        self.emit_before(emitter, &kwargs)?;
        let result = fut.await?;
        self.emit_after(emitter, &kwargs, &result)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::signal::{Event, Source, listener};
    use std::sync::{Arc, Mutex};

    fn recording() -> (SignalManager, Arc<Mutex<Vec<Event>>>) {
        let events = SignalManager::new(Source::Named("inst".into()));
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        events.on("*", listener(move |e| sink.lock().unwrap().push(e.clone())));
        (events, log)
    }

    #[test]
    fn test_around_with_subset_and_result() {
        let (events, log) = recording();
        let out: Result<i64, SignalError> = Instrument::around("add")
            .include(IncludeArgs::Only(vec!["a".into()]))
            .include_result(true)
            .call(&events, EventArgs::new().with("a", 1).with("b", 2), || Ok(3));
        assert_eq!(out.unwrap(), 3);

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].name, "before_add");
        assert_eq!(log[0].get("a"), Some(&Value::Int(1)));
        assert_eq!(log[0].get("b"), None);
        assert_eq!(log[1].name, "after_add");
        assert_eq!(log[1].get("result"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_after_skipped_on_failure() {
        let (events, log) = recording();
        let out: Result<i64, SignalError> = Instrument::around("fail")
            .call(&events, EventArgs::new(), || Err(SignalError::SignalRemoved("x".into())));
        assert!(out.is_err());
        let names: Vec<_> = log.lock().unwrap().iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, vec!["before_fail"]);
    }

    #[tokio::test]
    async fn test_async_after_only_carries_all_args() {
        let (events, log) = recording();
        let out: Result<bool, SignalError> = Instrument::after("load")
            .include(IncludeArgs::All)
            .call_async(&events, EventArgs::new().with("path", "a.txt"), async { Ok(true) })
            .await;
        assert!(out.unwrap());
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].get("path"), Some(&Value::from("a.txt")));
        assert_eq!(log[0].get("result"), None);
    }
}
