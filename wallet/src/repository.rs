//! Fetch/save/delete contract for local persistence.
//!
//! The concrete database belongs to the embedding application; services only
//! see [`Repository`]. [`InMemoryRepository`] implements the contract for tests
//! and for short-lived tools such as the CLI.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::error::WalletError;

/// Capacity of the change notification channel of [`InMemoryRepository`].
const CHANGE_CHANNEL_CAPACITY: usize = 256;

pub trait Identifiable {
    fn identifier(&self) -> String;
}

/// One row-level change produced by a save.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataChange<T> {
    Insert(T),
    Update(T),
    Delete(String),
}

impl<T> DataChange<T> {
    pub fn item(&self) -> Option<&T> {
        match self {
            Self::Insert(item) | Self::Update(item) => Some(item),
            Self::Delete(_) => None,
        }
    }
}

#[async_trait]
pub trait Repository<T>: Send + Sync
where
    T: Identifiable + Clone + Send + Sync + 'static,
{
    async fn fetch(&self, identifier: &str) -> Result<Option<T>, WalletError>;

    async fn fetch_all(&self) -> Result<Vec<T>, WalletError>;

    /// Upsert `updating` then remove `deleting`, as one batch.
    async fn save(&self, updating: Vec<T>, deleting: Vec<String>) -> Result<(), WalletError>;

    /// Stream of applied change batches. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<Vec<DataChange<T>>>;
}

pub type SharedRepository<T> = Arc<dyn Repository<T>>;

pub struct InMemoryRepository<T> {
    items: RwLock<BTreeMap<String, T>>,
    changes: broadcast::Sender<Vec<DataChange<T>>>,
}

impl<T: Clone> InMemoryRepository<T> {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            items: RwLock::new(BTreeMap::new()),
            changes,
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl<T: Clone> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> Repository<T> for InMemoryRepository<T>
where
    T: Identifiable + Clone + PartialEq + Send + Sync + 'static,
{
    async fn fetch(&self, identifier: &str) -> Result<Option<T>, WalletError> {
        Ok(self.items.read().get(identifier).cloned())
    }

    async fn fetch_all(&self) -> Result<Vec<T>, WalletError> {
        Ok(self.items.read().values().cloned().collect())
    }

    async fn save(&self, updating: Vec<T>, deleting: Vec<String>) -> Result<(), WalletError> {
        let mut changes = Vec::with_capacity(updating.len() + deleting.len());
        {
            let mut items = self.items.write();
            for item in updating {
                let identifier = item.identifier();
                match items.get(&identifier) {
                    Some(existing) if *existing == item => {}
                    Some(_) => {
                        items.insert(identifier, item.clone());
                        changes.push(DataChange::Update(item));
                    }
                    None => {
                        items.insert(identifier, item.clone());
                        changes.push(DataChange::Insert(item));
                    }
                }
            }
            for identifier in deleting {
                if items.remove(&identifier).is_some() {
                    changes.push(DataChange::Delete(identifier));
                }
            }
        }

        if !changes.is_empty() {
            // No receivers is fine: nobody observes this repository yet.
            let _ = self.changes.send(changes);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Vec<DataChange<T>>> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Row {
        id: &'static str,
        value: u32,
    }

    impl Identifiable for Row {
        fn identifier(&self) -> String {
            self.id.to_string()
        }
    }

    #[tokio::test]
    async fn test_save_reports_insert_update_delete() {
        let repository = InMemoryRepository::<Row>::new();
        let mut changes = repository.subscribe();

        repository
            .save(vec![Row { id: "a", value: 1 }], vec![])
            .await
            .unwrap();
        assert_eq!(
            changes.recv().await.unwrap(),
            vec![DataChange::Insert(Row { id: "a", value: 1 })]
        );

        repository
            .save(
                vec![Row { id: "a", value: 1 }, Row { id: "b", value: 2 }],
                vec!["missing".into()],
            )
            .await
            .unwrap();
        // Unchanged rows and unknown deletions produce no change.
        assert_eq!(
            changes.recv().await.unwrap(),
            vec![DataChange::Insert(Row { id: "b", value: 2 })]
        );

        repository
            .save(vec![Row { id: "b", value: 3 }], vec!["a".into()])
            .await
            .unwrap();
        assert_eq!(
            changes.recv().await.unwrap(),
            vec![
                DataChange::Update(Row { id: "b", value: 3 }),
                DataChange::Delete("a".into())
            ]
        );
        assert_eq!(repository.len(), 1);
        assert_eq!(repository.fetch("b").await.unwrap().unwrap().value, 3);
    }
}
