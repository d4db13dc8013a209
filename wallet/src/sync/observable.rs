//! Observable state with token-based observer handles.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Handle returned by [`Observable::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(u64);

type Observer<T> = Arc<dyn Fn(&T, &T) + Send + Sync>;

/// Holds a value and calls observers with `(old, new)` on every change.
pub struct Observable<T> {
    state: Mutex<T>,
    observers: Mutex<BTreeMap<SubscriptionToken, Observer<T>>>,
    next_token: AtomicU64,
}

impl<T: Clone + PartialEq> Observable<T> {
    pub fn new(state: T) -> Self {
        Self {
            state: Mutex::new(state),
            observers: Mutex::new(BTreeMap::new()),
            next_token: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> T {
        self.state.lock().clone()
    }

    /// Register an observer; it is called right away with the current value.
    pub fn subscribe(&self, observer: impl Fn(&T, &T) + Send + Sync + 'static) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::SeqCst));
        let observer: Observer<T> = Arc::new(observer);
        self.observers.lock().insert(token, observer.clone());

        let current = self.state();
        observer(&current, &current);
        token
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.observers.lock().remove(&token).is_some()
    }

    /// Store `state`, notifying observers when it differs from the current one.
    pub fn set(&self, state: T) {
        let old = {
            let mut current = self.state.lock();
            if *current == state {
                return;
            }
            std::mem::replace(&mut *current, state.clone())
        };

        let observers: Vec<Observer<T>> = self.observers.lock().values().cloned().collect();
        for observer in observers {
            observer(&old, &state);
        }
    }

    /// Apply `f` to a copy of the state and store the result.
    pub fn modify(&self, f: impl FnOnce(&mut T)) {
        let mut state = self.state();
        f(&mut state);
        self.set(state);
    }
}

/// Sync progress of one service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub is_syncing: bool,
    /// Message of the failure that ended the last sync
    pub last_error: Option<String>,
}

impl SyncStatus {
    pub fn syncing() -> Self {
        Self {
            is_syncing: true,
            last_error: None,
        }
    }

    pub fn synced() -> Self {
        Self::default()
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            is_syncing: false,
            last_error: Some(error.to_string()),
        }
    }
}
