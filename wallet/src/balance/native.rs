//! Native balance: `System.Account`, `Balances.Locks` and `Balances.Holds`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::balance::types::{AccountInfo, BalanceHold, BalanceLock};
use crate::balance::{report_update, BalanceUpdater, BalanceUpdaterContext};
use crate::error::WalletError;
use crate::runtime::CoderFactory;
use crate::storage::{
    BatchStorageRequest, BatchStorageValues, CallbackBatchStorageSubscription, FromBatchStorage,
    LocalStorageKeyFactory, StoragePath, StorageRequest, UncertainStorage,
};
use crate::sync::observable::{Observable, SyncStatus};

const ACCOUNT: &str = "account";
const LOCKS: &str = "locks";
const HOLDS: &str = "holds";

#[derive(Clone, Debug, PartialEq, Eq)]
struct NativeBalanceChange {
    account: UncertainStorage<AccountInfo>,
    locks: UncertainStorage<Vec<BalanceLock>>,
    holds: UncertainStorage<Vec<BalanceHold>>,
    block_hash: Option<[u8; 32]>,
}

impl FromBatchStorage for NativeBalanceChange {
    fn from_batch(values: &BatchStorageValues, _coder: &CoderFactory) -> Result<Self, WalletError> {
        Ok(Self {
            account: values.decode(ACCOUNT)?,
            locks: values.decode(LOCKS)?,
            holds: values.decode(HOLDS)?,
            block_hash: values.block_hash,
        })
    }
}

struct Inner {
    context: BalanceUpdaterContext,
    status: Observable<SyncStatus>,
    subscription: Mutex<Option<CallbackBatchStorageSubscription<NativeBalanceChange>>>,
}

pub struct NativeBalanceUpdater {
    inner: Arc<Inner>,
}

impl NativeBalanceUpdater {
    pub fn new(context: BalanceUpdaterContext) -> Self {
        Self {
            inner: Arc::new(Inner {
                context,
                status: Observable::new(SyncStatus::default()),
                subscription: Mutex::new(None),
            }),
        }
    }
}

impl Inner {
    fn request(&self, path: StoragePath, mapping_key: &str) -> BatchStorageRequest {
        let context = &self.context;
        let local_key = LocalStorageKeyFactory::create(path, &context.chain_asset_id.chain_id, Some(&context.account_id));
        BatchStorageRequest::new(StorageRequest::map(path, local_key, &context.account_id), mapping_key)
    }

    fn subscribe(self: &Arc<Self>, coder: &CoderFactory) -> CallbackBatchStorageSubscription<NativeBalanceChange> {
        let mut requests = vec![
            self.request(StoragePath::SYSTEM_ACCOUNT, ACCOUNT),
            self.request(StoragePath::BALANCES_LOCKS, LOCKS),
        ];
        // Holds only exist on runtimes with fungible holds.
        let holds = StoragePath::BALANCES_HOLDS;
        if coder.storage_entry(holds.pallet, holds.item).is_ok() {
            requests.push(self.request(holds, HOLDS));
        }

        let weak = Arc::downgrade(self);
        CallbackBatchStorageSubscription::new(requests, self.context.subscriptions.clone(), move |result| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    let result = inner.apply(result).await;
                    report_update(&inner.status, &inner.context.chain_asset_id, &result);
                }
            }
        })
    }

    async fn apply(&self, result: Result<NativeBalanceChange, WalletError>) -> Result<(), WalletError> {
        let change = result?;
        let context = &self.context;

        if let UncertainStorage::Defined(info) = &change.account {
            let remote = info
                .as_ref()
                .map(|info| info.to_balance(&context.chain_asset_id, &context.account_id));
            context.save_balance(remote, change.block_hash).await?;
        }

        if let UncertainStorage::Defined(locks) = change.locks {
            let locks = locks
                .unwrap_or_default()
                .iter()
                .map(|lock| lock.to_lock(&context.chain_asset_id, &context.account_id))
                .collect();
            context.replace_locks(locks).await?;
        }

        if let UncertainStorage::Defined(holds) = change.holds {
            let holds = holds
                .unwrap_or_default()
                .iter()
                .map(|hold| hold.to_hold(&context.chain_asset_id, &context.account_id))
                .collect();
            context.replace_holds(holds).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BalanceUpdater for NativeBalanceUpdater {
    async fn setup(&self) {
        let mut subscription = self.inner.subscription.lock().await;
        if subscription.as_ref().is_some_and(|s| s.is_active()) {
            return;
        }
        self.inner.status.set(SyncStatus::syncing());

        let provider = &self.inner.context.subscriptions.runtime_provider;
        match provider.fetch_coder_factory().await {
            Ok(coder) => *subscription = Some(self.inner.subscribe(&coder)),
            Err(e) => report_update(&self.inner.status, &self.inner.context.chain_asset_id, &Err(e)),
        }
    }

    async fn throttle(&self) {
        *self.inner.subscription.lock().await = None;
        self.inner.status.set(SyncStatus::default());
    }

    fn status(&self) -> &Observable<SyncStatus> {
        &self.inner.status
    }
}
