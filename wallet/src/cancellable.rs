//! Single-slot store for in-flight calls.
//!
//! Running a call through the store aborts the one it supersedes, and a
//! superseded call always completes with [`WalletError::Cancelled`], even if
//! its future raced to completion.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::{abortable, AbortHandle};
use parking_lot::Mutex;

use crate::error::WalletError;

#[derive(Default)]
pub struct CancellableCallStore {
    current: Mutex<Option<(u64, AbortHandle)>>,
    next_id: AtomicU64,
}

impl CancellableCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `call` in the slot, aborting the previous call.
    pub async fn run<T, F>(&self, call: F) -> Result<T, WalletError>
    where
        F: Future<Output = Result<T, WalletError>>,
    {
        let (call, handle) = abortable(call);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Some((_, previous)) = self.current.lock().replace((id, handle)) {
            previous.abort();
        }

        let result = call.await;

        let latest = {
            let mut current = self.current.lock();
            let latest = matches!(current.as_ref(), Some((current_id, _)) if *current_id == id);
            if latest {
                *current = None;
            }
            latest
        };

        match result {
            Ok(result) if latest => result,
            _ => Err(WalletError::Cancelled),
        }
    }

    /// Abort the call in the slot, if any.
    pub fn cancel(&self) {
        if let Some((_, handle)) = self.current.lock().take() {
            handle.abort();
        }
    }

    pub fn has_call(&self) -> bool {
        self.current.lock().is_some()
    }
}

impl Drop for CancellableCallStore {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_completes() {
        let store = CancellableCallStore::new();
        let value = store.run(async { Ok::<_, WalletError>(5) }).await.unwrap();
        assert_eq!(value, 5);
        assert!(!store.has_call());
    }

    #[tokio::test]
    async fn test_superseded_call_is_cancelled() {
        let store = Arc::new(CancellableCallStore::new());

        let first = tokio::spawn({
            let store = store.clone();
            async move {
                store
                    .run(async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok::<_, WalletError>(1)
                    })
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.has_call());

        let second = store.run(async { Ok::<_, WalletError>(2) }).await;
        assert_eq!(second, Ok(2));
        assert_eq!(first.await.unwrap(), Err(WalletError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel() {
        let store = Arc::new(CancellableCallStore::new());
        let pending = tokio::spawn({
            let store = store.clone();
            async move {
                store
                    .run(futures::future::pending::<Result<(), WalletError>>())
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.cancel();
        assert_eq!(pending.await.unwrap(), Err(WalletError::Cancelled));
    }

    #[tokio::test]
    async fn test_errors_pass_through() {
        let store = CancellableCallStore::new();
        let result = store
            .run(async { Err::<(), _>(WalletError::Rpc("down".into())) })
            .await;
        assert_eq!(result, Err(WalletError::Rpc("down".into())));
    }
}
