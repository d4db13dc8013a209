//! Balance reconciliation.
//!
//! Updaters watch balance storage of one `(chain asset, account)` and keep the
//! local rows in line with it. A remote balance that is zero or absent deletes
//! the local row; a zero row is never stored. Lock and hold sets are replaced
//! as a whole on every change.

pub mod assets;
pub mod native;
pub mod service;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;

use crate::address::AccountId;
use crate::error::WalletError;
use crate::events::{SharedEventCenter, WalletEvent};
use crate::history::{BlockHistoryProcessor, TransactionHistoryItem};
use crate::model::{AssetBalance, AssetHold, AssetLock, ChainAssetId};
use crate::repository::{DataChange, Identifiable, InMemoryRepository, SharedRepository};
use crate::storage::SubscriptionContext;
use crate::sync::observable::{Observable, SyncStatus};

pub use assets::AssetsBalanceUpdater;
pub use native::NativeBalanceUpdater;
pub use service::{BalanceSubscription, BalanceSubscriptionService};

#[async_trait]
pub trait BalanceUpdater: Send + Sync {
    async fn setup(&self);

    async fn throttle(&self);

    fn status(&self) -> &Observable<SyncStatus>;
}

pub type SharedBalanceUpdater = Arc<dyn BalanceUpdater>;

#[derive(Clone)]
pub struct BalanceRepositories {
    pub balances: SharedRepository<AssetBalance>,
    pub locks: SharedRepository<AssetLock>,
    pub holds: SharedRepository<AssetHold>,
    pub history: SharedRepository<TransactionHistoryItem>,
}

impl BalanceRepositories {
    pub fn in_memory() -> Self {
        Self {
            balances: Arc::new(InMemoryRepository::new()),
            locks: Arc::new(InMemoryRepository::new()),
            holds: Arc::new(InMemoryRepository::new()),
            history: Arc::new(InMemoryRepository::new()),
        }
    }
}

/// Change to apply for a freshly decoded remote balance.
pub fn balance_change(
    local: Option<&AssetBalance>,
    remote: Option<AssetBalance>,
) -> Option<DataChange<AssetBalance>> {
    match remote.filter(|remote| remote.total() > 0) {
        Some(remote) => match local {
            Some(local) if *local == remote => None,
            Some(_) => Some(DataChange::Update(remote)),
            None => Some(DataChange::Insert(remote)),
        },
        None => local.map(|local| DataChange::Delete(local.identifier())),
    }
}

/// Rows to upsert and identifiers to delete so that `local` becomes `remote`.
/// `None` when nothing changes.
pub fn replace_set<T>(local: &[T], remote: Vec<T>) -> Option<(Vec<T>, Vec<String>)>
where
    T: Identifiable + PartialEq,
{
    let remote_ids: Vec<String> = remote.iter().map(Identifiable::identifier).collect();
    let deleting: Vec<String> = local
        .iter()
        .map(Identifiable::identifier)
        .filter(|id| !remote_ids.contains(id))
        .collect();
    let updating: Vec<T> = remote
        .into_iter()
        .filter(|item| !local.contains(item))
        .collect();

    if updating.is_empty() && deleting.is_empty() {
        None
    } else {
        Some((updating, deleting))
    }
}

/// Collaborators of the updaters of one `(chain asset, account)`.
#[derive(Clone)]
pub struct BalanceUpdaterContext {
    pub chain_asset_id: ChainAssetId,
    pub account_id: AccountId,
    pub ethereum: bool,
    pub repositories: BalanceRepositories,
    pub event_center: SharedEventCenter,
    pub history: Option<Arc<BlockHistoryProcessor>>,
    pub subscriptions: SubscriptionContext,
}

impl BalanceUpdaterContext {
    fn owns(&self, chain_asset_id: &ChainAssetId, account_id: &AccountId) -> bool {
        *chain_asset_id == self.chain_asset_id && *account_id == self.account_id
    }

    /// Reconcile the balance row; returns whether it changed.
    pub async fn save_balance(
        &self,
        remote: Option<AssetBalance>,
        block_hash: Option<[u8; 32]>,
    ) -> Result<bool, WalletError> {
        let identifier = AssetBalance::identifier_for(&self.chain_asset_id, &self.account_id);
        let local = self.repositories.balances.fetch(&identifier).await?;

        let Some(change) = balance_change(local.as_ref(), remote) else {
            return Ok(false);
        };
        tracing::debug!(asset = %self.chain_asset_id, ?change, "balance changed");
        match change {
            DataChange::Insert(balance) | DataChange::Update(balance) => {
                self.repositories.balances.save(vec![balance], vec![]).await?
            }
            DataChange::Delete(identifier) => {
                self.repositories.balances.save(vec![], vec![identifier]).await?
            }
        }

        self.event_center.notify(WalletEvent::AssetBalanceChanged {
            chain_asset_id: self.chain_asset_id.clone(),
            account_id: self.account_id.clone(),
            block_hash,
        });
        if let (Some(history), Some(block_hash)) = (&self.history, block_hash) {
            if let Err(e) = history.process(block_hash).await {
                tracing::warn!(asset = %self.chain_asset_id, error = %e, "failed to process block transactions");
            }
        }
        Ok(true)
    }

    pub async fn replace_locks(&self, remote: Vec<AssetLock>) -> Result<bool, WalletError> {
        let local: Vec<AssetLock> = self
            .repositories
            .locks
            .fetch_all()
            .await?
            .into_iter()
            .filter(|lock| self.owns(&lock.chain_asset_id, &lock.account_id))
            .collect();
        self.apply_set(&self.repositories.locks, &local, remote).await
    }

    pub async fn replace_holds(&self, remote: Vec<AssetHold>) -> Result<bool, WalletError> {
        let local: Vec<AssetHold> = self
            .repositories
            .holds
            .fetch_all()
            .await?
            .into_iter()
            .filter(|hold| self.owns(&hold.chain_asset_id, &hold.account_id))
            .collect();
        self.apply_set(&self.repositories.holds, &local, remote).await
    }

    async fn apply_set<T>(
        &self,
        repository: &SharedRepository<T>,
        local: &[T],
        remote: Vec<T>,
    ) -> Result<bool, WalletError>
    where
        T: Identifiable + PartialEq + Clone + Send + Sync + 'static,
    {
        let Some((updating, deleting)) = replace_set(local, remote) else {
            return Ok(false);
        };
        repository.save(updating, deleting).await?;
        self.event_center.notify(WalletEvent::AssetLocksChanged {
            chain_asset_id: self.chain_asset_id.clone(),
            account_id: self.account_id.clone(),
        });
        Ok(true)
    }
}

/// Record the outcome of one balance update on `status`.
fn report_update(status: &Observable<SyncStatus>, chain_asset_id: &ChainAssetId, result: &Result<(), WalletError>) {
    match result {
        Ok(()) => status.set(SyncStatus::synced()),
        Err(e) => {
            tracing::warn!(asset = %chain_asset_id, error = %e, "balance update failed");
            status.set(SyncStatus::failed(e));
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::events::EventCenter;
    use crate::rpc::SharedRpcEngine;
    use crate::testing::polkadot_provider;

    pub fn context(engine: SharedRpcEngine, chain_asset_id: ChainAssetId, account_id: AccountId) -> BalanceUpdaterContext {
        BalanceUpdaterContext {
            chain_asset_id,
            account_id,
            ethereum: false,
            repositories: BalanceRepositories::in_memory(),
            event_center: Arc::new(EventCenter::default()),
            history: None,
            subscriptions: SubscriptionContext::new(engine, polkadot_provider()),
        }
    }
}
