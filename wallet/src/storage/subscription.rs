//! Callback storage subscriptions over `state_subscribeStorage`.
//!
//! Each subscription runs in its own task: the key is encoded with the current
//! coder factory, the RPC subscription is opened (retrying transient failures
//! with exponential backoff), then every notification is cached, decoded with
//! the coder factory current at that moment and handed to the callback. The
//! callback is awaited before the next notification is read, so consumers see
//! updates in arrival order.
//!
//! Dropping the subscription, or calling `unsubscribe`, aborts the task, which
//! drops the RPC stream and unsubscribes on the node.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use codec::Decode;
use futures::StreamExt;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::error::WalletError;
use crate::hex_util::{decode_hex, encode_hex, parse_hash};
use crate::repository::SharedRepository;
use crate::rpc::{methods, RpcSubscription, SharedRpcEngine, StorageChangeSet};
use crate::runtime::{CoderFactory, SharedRuntimeProvider};
use crate::storage::{BatchStorageRequest, ChainStorageItem, StorageRequest, UncertainStorage};

/// Collaborators shared by every subscription of one chain.
#[derive(Clone)]
pub struct SubscriptionContext {
    pub engine: SharedRpcEngine,
    pub runtime_provider: SharedRuntimeProvider,
    /// Raw value cache; `None` disables caching for every request
    pub cache: Option<SharedRepository<ChainStorageItem>>,
    pub config: SyncConfig,
    /// Account ids of the chain are 20 bytes
    pub ethereum_accounts: bool,
}

impl SubscriptionContext {
    pub fn new(engine: SharedRpcEngine, runtime_provider: SharedRuntimeProvider) -> Self {
        Self {
            engine,
            runtime_provider,
            cache: None,
            config: SyncConfig::default(),
            ethereum_accounts: false,
        }
    }

    pub fn with_ethereum_accounts(mut self, ethereum_accounts: bool) -> Self {
        self.ethereum_accounts = ethereum_accounts;
        self
    }

    pub fn with_cache(mut self, cache: SharedRepository<ChainStorageItem>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    async fn subscribe_storage(&self, keys: &[String]) -> Result<RpcSubscription, WalletError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .engine
                .subscribe(
                    methods::STATE_SUBSCRIBE_STORAGE,
                    vec![json!(keys)],
                    methods::STATE_UNSUBSCRIBE_STORAGE,
                )
                .await
            {
                Ok(subscription) => return Ok(subscription),
                Err(e) if e.is_transient() && attempt < self.config.subscription_retry_attempts => {
                    let delay = self.config.subscription_retry_delay(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "storage subscription failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn cache_value(&self, local_key: &str, value: Option<&Vec<u8>>) -> Result<(), WalletError> {
        let Some(cache) = self.cache.as_ref().filter(|_| !local_key.is_empty()) else {
            return Ok(());
        };
        match value {
            Some(data) => {
                let item = ChainStorageItem {
                    identifier: local_key.to_string(),
                    data: data.clone(),
                };
                cache.save(vec![item], vec![]).await
            }
            None => cache.save(vec![], vec![local_key.to_string()]).await,
        }
    }
}

/// Raw value of `key` in the change set: `None` when the key is not part of
/// it, `Some(None)` when the key was removed.
fn find_change(change_set: &StorageChangeSet, key: &str) -> Result<Option<Option<Vec<u8>>>, WalletError> {
    let change = change_set
        .changes
        .iter()
        .rev()
        .find(|(changed_key, _)| changed_key.eq_ignore_ascii_case(key));
    match change {
        Some((_, Some(raw))) => Ok(Some(Some(decode_hex(raw)?))),
        Some((_, None)) => Ok(Some(None)),
        None => Ok(None),
    }
}

fn parse_change_set(item: Result<serde_json::Value, WalletError>) -> Result<StorageChangeSet, WalletError> {
    Ok(serde_json::from_value(item?)?)
}

/// Decodes raw storage bytes with the coder factory of the moment.
pub type StorageDecoder<T> =
    Arc<dyn Fn(&[u8], &CoderFactory) -> Result<T, WalletError> + Send + Sync>;

/// Decoder for values with a static SCALE layout.
pub fn scale_decoder<T: Decode + 'static>() -> StorageDecoder<T> {
    Arc::new(|mut bytes: &[u8], _: &CoderFactory| Ok(T::decode(&mut bytes)?))
}

/// One decoded notification of a single-key subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageUpdate<T> {
    pub value: Option<T>,
    pub block_hash: Option<[u8; 32]>,
}

pub struct CallbackStorageSubscription<T> {
    task: JoinHandle<()>,
    _value: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> CallbackStorageSubscription<T> {
    pub fn new<F, Fut>(
        request: StorageRequest,
        context: SubscriptionContext,
        decoder: StorageDecoder<T>,
        callback: F,
    ) -> Self
    where
        F: Fn(Result<StorageUpdate<T>, WalletError>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let task = tokio::spawn(async move {
            if let Err(e) = run_single(&request, &context, &decoder, &callback).await {
                tracing::debug!(path = %request.path, error = %e, "storage subscription stopped");
                callback(Err(e)).await;
            }
        });
        Self {
            task,
            _value: PhantomData,
        }
    }

    pub fn unsubscribe(&self) {
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl<T> Drop for CallbackStorageSubscription<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_single<T, F, Fut>(
    request: &StorageRequest,
    context: &SubscriptionContext,
    decoder: &StorageDecoder<T>,
    callback: &F,
) -> Result<(), WalletError>
where
    F: Fn(Result<StorageUpdate<T>, WalletError>) -> Fut,
    Fut: Future<Output = ()>,
{
    let coder = context.runtime_provider.fetch_coder_factory().await?;
    let key = encode_hex(&request.encode_key(&coder)?);
    let mut stream = context.subscribe_storage(std::slice::from_ref(&key)).await?;
    tracing::debug!(path = %request.path, "storage subscription opened");

    while let Some(item) = stream.next().await {
        let change_set = parse_change_set(item)?;
        let Some(raw) = find_change(&change_set, &key)? else {
            continue;
        };
        let block_hash = parse_hash(&change_set.block).ok();

        if let Err(e) = context.cache_value(&request.local_key, raw.as_ref()).await {
            tracing::warn!(path = %request.path, error = %e, "failed to cache storage value");
        }

        let coder = context.runtime_provider.fetch_coder_factory().await?;
        let update = raw
            .as_deref()
            .map(|bytes| decoder(bytes, &coder))
            .transpose()
            .map(|value| StorageUpdate { value, block_hash });
        callback(update).await;
    }

    Err(WalletError::SubscriptionClosed(request.path.to_string()))
}

/// One changed entry of a batch notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchStorageValue {
    pub mapping_key: Option<String>,
    pub value: Option<Vec<u8>>,
}

/// Entries of one batch notification that changed, in request order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchStorageValues {
    pub values: Vec<BatchStorageValue>,
    pub block_hash: Option<[u8; 32]>,
    /// Copied from [`SubscriptionContext::ethereum_accounts`]
    pub ethereum_accounts: bool,
}

impl BatchStorageValues {
    pub fn get(&self, mapping_key: &str) -> Option<&BatchStorageValue> {
        self.values
            .iter()
            .find(|value| value.mapping_key.as_deref() == Some(mapping_key))
    }

    /// Decode the entry reported under `mapping_key`, `Undefined` if it did not change.
    pub fn decode_with<T>(
        &self,
        mapping_key: &str,
        decode: impl FnOnce(&[u8]) -> Result<T, WalletError>,
    ) -> Result<UncertainStorage<T>, WalletError> {
        match self.get(mapping_key) {
            None => Ok(UncertainStorage::Undefined),
            Some(BatchStorageValue { value: None, .. }) => Ok(UncertainStorage::Defined(None)),
            Some(BatchStorageValue {
                value: Some(bytes), ..
            }) => Ok(UncertainStorage::Defined(Some(decode(bytes)?))),
        }
    }

    pub fn decode<T: Decode>(&self, mapping_key: &str) -> Result<UncertainStorage<T>, WalletError> {
        self.decode_with(mapping_key, |mut bytes| Ok(T::decode(&mut bytes)?))
    }
}

/// Typed view of a batch notification.
pub trait FromBatchStorage: Sized {
    fn from_batch(values: &BatchStorageValues, coder: &CoderFactory) -> Result<Self, WalletError>;
}

pub struct CallbackBatchStorageSubscription<T> {
    task: JoinHandle<()>,
    _value: PhantomData<fn() -> T>,
}

impl<T: FromBatchStorage + Send + 'static> CallbackBatchStorageSubscription<T> {
    pub fn new<F, Fut>(requests: Vec<BatchStorageRequest>, context: SubscriptionContext, callback: F) -> Self
    where
        F: Fn(Result<T, WalletError>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let task = tokio::spawn(async move {
            if let Err(e) = run_batch(&requests, &context, &callback).await {
                tracing::debug!(error = %e, "batch storage subscription stopped");
                callback(Err(e)).await;
            }
        });
        Self {
            task,
            _value: PhantomData,
        }
    }

    pub fn unsubscribe(&self) {
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl<T> Drop for CallbackBatchStorageSubscription<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_batch<T, F, Fut>(
    requests: &[BatchStorageRequest],
    context: &SubscriptionContext,
    callback: &F,
) -> Result<(), WalletError>
where
    T: FromBatchStorage,
    F: Fn(Result<T, WalletError>) -> Fut,
    Fut: Future<Output = ()>,
{
    if requests.is_empty() {
        return Err(WalletError::InvalidArgument("batch subscription without requests"));
    }

    let coder = context.runtime_provider.fetch_coder_factory().await?;
    let keys = requests
        .iter()
        .map(|request| request.request.encode_key(&coder).map(|key| encode_hex(&key)))
        .collect::<Result<Vec<_>, WalletError>>()?;
    let mut stream = context.subscribe_storage(&keys).await?;
    tracing::debug!(keys = keys.len(), "batch storage subscription opened");

    while let Some(item) = stream.next().await {
        let change_set = parse_change_set(item)?;
        let mut values = BatchStorageValues {
            values: Vec::new(),
            block_hash: parse_hash(&change_set.block).ok(),
            ethereum_accounts: context.ethereum_accounts,
        };

        for (request, key) in requests.iter().zip(&keys) {
            let Some(raw) = find_change(&change_set, key)? else {
                continue;
            };
            if let Err(e) = context.cache_value(&request.request.local_key, raw.as_ref()).await {
                tracing::warn!(path = %request.request.path, error = %e, "failed to cache storage value");
            }
            values.values.push(BatchStorageValue {
                mapping_key: request.mapping_key.clone(),
                value: raw,
            });
        }

        if values.values.is_empty() {
            continue;
        }

        let coder = context.runtime_provider.fetch_coder_factory().await?;
        callback(T::from_batch(&values, &coder)).await;
    }

    Err(WalletError::SubscriptionClosed("batch storage".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_change_last_wins() {
        let change_set = StorageChangeSet {
            block: format!("0x{}", "00".repeat(32)),
            changes: vec![
                ("0xAB".into(), Some("0x01".into())),
                ("0xcd".into(), None),
                ("0xab".into(), Some("0x02".into())),
            ],
        };
        assert_eq!(find_change(&change_set, "0xab").unwrap(), Some(Some(vec![2])));
        assert_eq!(find_change(&change_set, "0xcd").unwrap(), Some(None));
        assert_eq!(find_change(&change_set, "0xef").unwrap(), None);
    }

    #[test]
    fn test_batch_values_decode() {
        let values = BatchStorageValues {
            values: vec![
                BatchStorageValue {
                    mapping_key: Some("era".into()),
                    value: Some(7u32.to_le_bytes().to_vec()),
                },
                BatchStorageValue {
                    mapping_key: Some("ledger".into()),
                    value: None,
                },
            ],
            ..Default::default()
        };
        assert_eq!(values.decode::<u32>("era").unwrap(), UncertainStorage::Defined(Some(7)));
        assert_eq!(values.decode::<u32>("ledger").unwrap(), UncertainStorage::Defined(None));
        assert_eq!(values.decode::<u32>("nomination").unwrap(), UncertainStorage::Undefined);
    }
}
