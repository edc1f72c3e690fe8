use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;

use crate::core::error::SignalError;

#[derive(Debug, Clone, Copy, Default)]
struct SignalState {
    active: bool,
    /// Bumped on every inactive -> active transition, so a waiter that missed a
    /// short pulse still observes that it happened.
    raised: u64,
}

/// Lazily created named level signals.
#[derive(Default)]
pub(super) struct Signals {
    channels: Mutex<HashMap<String, watch::Sender<SignalState>>>,
}

impl Signals {
    fn with_channel<R>(&self, name: &str, f: impl FnOnce(&watch::Sender<SignalState>) -> R) -> R {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = channels
            .entry(name.to_string())
            .or_insert_with(|| watch::channel(SignalState::default()).0);
        f(sender)
    }

    pub(super) fn set(&self, name: &str) {
        self.with_channel(name, |tx| {
            tx.send_modify(|state| {
                if !state.active {
                    state.active = true;
                    state.raised += 1;
                }
            })
        });
    }

    pub(super) fn clear(&self, name: &str) {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = channels.get(name) {
            tx.send_if_modified(|state| std::mem::replace(&mut state.active, false));
        }
    }

    pub(super) fn is_set(&self, name: &str) -> bool {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.get(name).is_some_and(|tx| tx.borrow().active)
    }

    pub(super) async fn wait(&self, name: &str) -> Result<(), SignalError> {
        let mut rx = self.with_channel(name, |tx| tx.subscribe());
        let start = {
            let state = rx.borrow_and_update();
            if state.active {
                return Ok(());
            }
            state.raised
        };
        rx.wait_for(|state| state.active || state.raised > start)
            .await
            .map(|_| ())
            .map_err(|_| SignalError::SignalRemoved(name.to_string()))
    }

    pub(super) fn remove(&self, name: &str) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.remove(name);
    }

    pub(super) fn remove_all(&self) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.clear();
    }
}
