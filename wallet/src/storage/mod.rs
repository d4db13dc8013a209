//! Storage keys, one-shot queries and callback subscriptions.

pub mod key;
pub mod path;
pub mod query;
pub mod subscription;

use codec::Encode;

use crate::error::WalletError;
use crate::repository::Identifiable;
use crate::runtime::CoderFactory;

pub use key::{map_key, storage_key, LocalStorageKeyFactory};
pub use path::{ConstantPath, StoragePath};
pub use query::StorageQuery;
pub use subscription::{
    scale_decoder, BatchStorageValue, BatchStorageValues, CallbackBatchStorageSubscription,
    CallbackStorageSubscription, FromBatchStorage, StorageDecoder, StorageUpdate,
    SubscriptionContext,
};

/// Raw storage value cached locally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainStorageItem {
    pub identifier: String,
    pub data: Vec<u8>,
}

impl Identifiable for ChainStorageItem {
    fn identifier(&self) -> String {
        self.identifier.clone()
    }
}

/// One storage entry to watch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageRequest {
    pub path: StoragePath,
    /// Cache row identifier; empty disables caching
    pub local_key: String,
    /// SCALE-encoded map keys
    pub params: Vec<Vec<u8>>,
}

impl StorageRequest {
    pub fn value(path: StoragePath, local_key: impl Into<String>) -> Self {
        Self {
            path,
            local_key: local_key.into(),
            params: Vec::new(),
        }
    }

    pub fn map(path: StoragePath, local_key: impl Into<String>, param: &impl Encode) -> Self {
        Self {
            path,
            local_key: local_key.into(),
            params: vec![param.encode()],
        }
    }

    pub fn double_map(
        path: StoragePath,
        local_key: impl Into<String>,
        first: &impl Encode,
        second: &impl Encode,
    ) -> Self {
        Self {
            path,
            local_key: local_key.into(),
            params: vec![first.encode(), second.encode()],
        }
    }

    pub fn encode_key(&self, coder: &CoderFactory) -> Result<Vec<u8>, WalletError> {
        storage_key(coder, self.path, &self.params)
    }
}

/// A storage request tagged with the key its value is reported under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchStorageRequest {
    pub request: StorageRequest,
    pub mapping_key: Option<String>,
}

impl BatchStorageRequest {
    pub fn new(request: StorageRequest, mapping_key: impl Into<String>) -> Self {
        Self {
            request,
            mapping_key: Some(mapping_key.into()),
        }
    }
}

/// Value of a field in a partial state change: `Undefined` when the field was
/// not part of the notification, `Defined(None)` when the chain removed it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UncertainStorage<T> {
    Undefined,
    Defined(Option<T>),
}

impl<T> Default for UncertainStorage<T> {
    fn default() -> Self {
        Self::Undefined
    }
}

impl<T: Clone> UncertainStorage<T> {
    pub fn is_defined(&self) -> bool {
        matches!(self, Self::Defined(_))
    }

    /// Defined value, else `previous`.
    pub fn value_or(&self, previous: Option<T>) -> Option<T> {
        match self {
            Self::Defined(value) => value.clone(),
            Self::Undefined => previous,
        }
    }

    /// Defined value, else the previous possibly-unknown value.
    pub fn or_previous(&self, previous: &Self) -> Self {
        match self {
            Self::Defined(_) => self.clone(),
            Self::Undefined => previous.clone(),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> UncertainStorage<U> {
        match self {
            Self::Defined(value) => UncertainStorage::Defined(value.map(f)),
            Self::Undefined => UncertainStorage::Undefined,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncertain_keeps_previous() {
        let previous = UncertainStorage::Defined(Some(5u32));
        assert_eq!(UncertainStorage::Undefined.or_previous(&previous), previous);
        assert_eq!(
            UncertainStorage::Defined(None).or_previous(&previous),
            UncertainStorage::Defined(None)
        );
        assert_eq!(UncertainStorage::<u32>::Undefined.value_or(Some(1)), Some(1));
        assert_eq!(UncertainStorage::Defined(None).value_or(Some(1)), None);
    }
}
