//! Offchain staking data (APY, rewards, stake assignment) from an indexer.
//!
//! Any trigger (setup, stakeable asset change, resolved account change,
//! explicit refresh) schedules a resync; triggers arriving within the debounce
//! window collapse into one indexer request. Each sync rewrites the wallet's
//! offchain parts wholesale.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::address::AccountId;
use crate::config::SyncConfig;
use crate::error::WalletError;
use crate::model::{ChainAsset, MetaAccount, StakingType};
use crate::repository::{DataChange, Identifiable, SharedRepository};
use crate::sync::observable::{Observable, SyncStatus};
use crate::sync::staking::model::{OffchainPart, OptionWithWallet, ResolvedAccount, StakingOption};
use crate::sync::staking::MultistakingUpdateService;

/// Account the indexer should report on for one staking option.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OffchainAccount {
    pub option: StakingOption,
    pub account_id: AccountId,
    pub rewards_account_id: Option<AccountId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OffchainRequest {
    pub wallet_id: String,
    pub accounts: Vec<OffchainAccount>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OffchainStakingItem {
    pub option: StakingOption,
    pub max_apy: Option<f64>,
    pub has_assigned_stake: bool,
    pub total_rewards: Option<u128>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct OffchainResponse {
    pub items: Vec<OffchainStakingItem>,
}

/// Staking indexer (SubQuery-like) queried for the offchain parts.
#[async_trait]
pub trait OffchainIndexer: Send + Sync {
    async fn fetch(&self, request: OffchainRequest) -> Result<OffchainResponse, WalletError>;
}

struct OffchainTasks {
    trigger: mpsc::UnboundedSender<()>,
    worker: JoinHandle<()>,
    watcher: JoinHandle<()>,
}

impl Drop for OffchainTasks {
    fn drop(&mut self) {
        self.worker.abort();
        self.watcher.abort();
    }
}

struct Inner {
    wallet: MetaAccount,
    indexer: Arc<dyn OffchainIndexer>,
    repository: SharedRepository<OffchainPart>,
    resolved_accounts: SharedRepository<ResolvedAccount>,
    debounce: Duration,
    status: Observable<SyncStatus>,
    chain_assets: Mutex<Vec<(ChainAsset, StakingType)>>,
    tasks: Mutex<Option<OffchainTasks>>,
}

pub struct OffchainMultistakingUpdateService {
    inner: Arc<Inner>,
}

impl OffchainMultistakingUpdateService {
    pub fn new(
        wallet: MetaAccount,
        indexer: Arc<dyn OffchainIndexer>,
        repository: SharedRepository<OffchainPart>,
        resolved_accounts: SharedRepository<ResolvedAccount>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                wallet,
                indexer,
                repository,
                resolved_accounts,
                debounce: config.offchain_debounce,
                status: Observable::new(SyncStatus::default()),
                chain_assets: Mutex::new(Vec::new()),
                tasks: Mutex::new(None),
            }),
        }
    }

    /// Replace the stakeable chain assets and schedule a resync on change.
    pub fn set_chain_assets(&self, chain_assets: Vec<(ChainAsset, StakingType)>) {
        let changed = {
            let mut current = self.inner.chain_assets.lock();
            let changed = *current != chain_assets;
            *current = chain_assets;
            changed
        };
        if changed {
            self.inner.schedule_sync();
        }
    }

    /// Schedule a resync regardless of changes.
    pub fn refresh(&self) {
        self.inner.schedule_sync();
    }
}

impl Inner {
    fn schedule_sync(&self) {
        let scheduled = self
            .tasks
            .lock()
            .as_ref()
            .map(|tasks| tasks.trigger.send(()).is_ok())
            .unwrap_or(false);
        if scheduled {
            self.status.modify(|status| {
                status.is_syncing = true;
                status.last_error = None;
            });
        }
    }

    fn wallet_accounts(&self) -> BTreeSet<AccountId> {
        self.chain_assets
            .lock()
            .iter()
            .filter_map(|(chain_asset, _)| self.wallet.fetch(&chain_asset.chain))
            .map(|response| response.account_id)
            .collect()
    }

    async fn sync(&self) -> Result<(), WalletError> {
        let chain_assets = self.chain_assets.lock().clone();
        let resolved = self.resolved_accounts.fetch_all().await?;

        let accounts: Vec<OffchainAccount> = chain_assets
            .iter()
            .filter_map(|(chain_asset, staking_type)| {
                let wallet_account = self.wallet.fetch(&chain_asset.chain)?.account_id;
                let option = StakingOption {
                    chain_asset_id: chain_asset.chain_asset_id(),
                    staking_type: *staking_type,
                };
                let resolved = resolved.iter().find(|resolved| {
                    resolved.wallet_account_id == wallet_account && resolved.staking_option == option
                });
                Some(OffchainAccount {
                    option,
                    account_id: resolved
                        .map(|resolved| resolved.resolved_account_id.clone())
                        .unwrap_or(wallet_account),
                    rewards_account_id: resolved.and_then(|resolved| resolved.rewards_account_id.clone()),
                })
            })
            .collect();

        let response = if accounts.is_empty() {
            OffchainResponse::default()
        } else {
            self.indexer
                .fetch(OffchainRequest {
                    wallet_id: self.wallet.meta_id.clone(),
                    accounts: accounts.clone(),
                })
                .await?
        };

        let requested: BTreeSet<&StakingOption> = accounts.iter().map(|account| &account.option).collect();
        let parts: Vec<OffchainPart> = response
            .items
            .into_iter()
            .filter(|item| requested.contains(&item.option))
            .map(|item| OffchainPart {
                option: OptionWithWallet {
                    wallet_id: self.wallet.meta_id.clone(),
                    option: item.option,
                },
                max_apy: item.max_apy,
                has_assigned_stake: item.has_assigned_stake,
                total_rewards: item.total_rewards,
            })
            .collect();

        let keep: BTreeSet<String> = parts.iter().map(Identifiable::identifier).collect();
        let stale: Vec<String> = self
            .repository
            .fetch_all()
            .await?
            .into_iter()
            .filter(|part| part.option.wallet_id == self.wallet.meta_id)
            .map(|part| part.identifier())
            .filter(|identifier| !keep.contains(identifier))
            .collect();

        tracing::debug!(
            wallet = %self.wallet.meta_id,
            parts = parts.len(),
            stale = stale.len(),
            "offchain staking synced"
        );
        self.repository.save(parts, stale).await
    }
}

async fn run_worker(inner: Weak<Inner>, mut trigger: mpsc::UnboundedReceiver<()>, debounce: Duration) {
    while trigger.recv().await.is_some() {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(debounce) => break,
                next = trigger.recv() => {
                    if next.is_none() {
                        return;
                    }
                }
            }
        }

        let Some(inner) = inner.upgrade() else {
            return;
        };
        match inner.sync().await {
            Ok(()) => inner.status.set(SyncStatus::synced()),
            Err(e) => {
                tracing::warn!(wallet = %inner.wallet.meta_id, error = %e, "offchain staking sync failed");
                inner.status.set(SyncStatus::failed(e));
            }
        }
    }
}

async fn watch_resolved_accounts(inner: Weak<Inner>, mut changes: broadcast::Receiver<Vec<DataChange<ResolvedAccount>>>) {
    loop {
        let relevant = match changes.recv().await {
            Ok(changes) => {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                let accounts = inner.wallet_accounts();
                changes.iter().any(|change| match change.item() {
                    Some(resolved) => accounts.contains(&resolved.wallet_account_id),
                    None => true,
                })
            }
            Err(broadcast::error::RecvError::Lagged(_)) => true,
            Err(broadcast::error::RecvError::Closed) => return,
        };

        if relevant {
            match inner.upgrade() {
                Some(inner) => inner.schedule_sync(),
                None => return,
            }
        }
    }
}

#[async_trait]
impl MultistakingUpdateService for OffchainMultistakingUpdateService {
    async fn setup(&self) {
        {
            let mut tasks = self.inner.tasks.lock();
            if tasks.is_some() {
                drop(tasks);
                if self.inner.status.state().last_error.is_some() {
                    self.inner.schedule_sync();
                }
                return;
            }
            let (trigger, receiver) = mpsc::unbounded_channel();
            let weak = Arc::downgrade(&self.inner);
            let worker = tokio::spawn(run_worker(weak.clone(), receiver, self.inner.debounce));
            let watcher = tokio::spawn(watch_resolved_accounts(
                weak,
                self.inner.resolved_accounts.subscribe(),
            ));
            *tasks = Some(OffchainTasks {
                trigger,
                worker,
                watcher,
            });
        }
        self.inner.status.set(SyncStatus::syncing());
        self.inner.schedule_sync();
    }

    async fn throttle(&self) {
        self.inner.tasks.lock().take();
        self.inner.status.set(SyncStatus::default());
    }

    fn status(&self) -> &Observable<SyncStatus> {
        &self.inner.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChainAssetId, CryptoType, WalletType};
    use crate::repository::{InMemoryRepository, Repository};
    use crate::testing::{account, polkadot_chain};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingIndexer {
        calls: AtomicUsize,
        last_request: Mutex<Option<OffchainRequest>>,
    }

    #[async_trait]
    impl OffchainIndexer for CountingIndexer {
        async fn fetch(&self, request: OffchainRequest) -> Result<OffchainResponse, WalletError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let items = request
                .accounts
                .iter()
                .map(|account| OffchainStakingItem {
                    option: account.option.clone(),
                    max_apy: Some(0.14),
                    has_assigned_stake: true,
                    total_rewards: Some(1_000),
                })
                .collect();
            *self.last_request.lock() = Some(request);
            Ok(OffchainResponse { items })
        }
    }

    fn wallet() -> MetaAccount {
        MetaAccount {
            meta_id: "w1".into(),
            name: "Main".into(),
            wallet_type: WalletType::Secrets,
            substrate_account_id: Some(account(1)),
            substrate_public_key: Some(vec![1u8; 32]),
            substrate_crypto_type: CryptoType::Sr25519,
            ethereum_address: None,
            ethereum_public_key: None,
            chain_accounts: vec![],
        }
    }

    fn service(indexer: Arc<CountingIndexer>) -> (OffchainMultistakingUpdateService, Arc<InMemoryRepository<OffchainPart>>, Arc<InMemoryRepository<ResolvedAccount>>) {
        let repository = Arc::new(InMemoryRepository::new());
        let resolved = Arc::new(InMemoryRepository::new());
        let service = OffchainMultistakingUpdateService::new(
            wallet(),
            indexer,
            repository.clone(),
            resolved.clone(),
            &SyncConfig::default(),
        );
        (service, repository, resolved)
    }

    #[tokio::test(start_paused = true)]
    async fn test_triggers_are_debounced() {
        let indexer = Arc::new(CountingIndexer::default());
        let (service, repository, _) = service(indexer.clone());
        service.set_chain_assets(polkadot_chain().staking_chain_assets());
        service.setup().await;
        service.refresh();
        tokio::time::sleep(Duration::from_millis(500)).await;
        service.refresh();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(indexer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(repository.len(), 2);
        assert_eq!(service.status().state(), SyncStatus::synced());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolved_account_replaces_wallet_account() {
        let indexer = Arc::new(CountingIndexer::default());
        let (service, repository, resolved) = service(indexer.clone());
        let chain = polkadot_chain();
        service.set_chain_assets(chain.staking_chain_assets());
        service.setup().await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(indexer.calls.load(Ordering::SeqCst), 1);

        let option = StakingOption {
            chain_asset_id: ChainAssetId::new(chain.chain_id.clone(), 0),
            staking_type: StakingType::NominationPools,
        };
        resolved
            .save(
                vec![ResolvedAccount {
                    staking_option: option.clone(),
                    wallet_account_id: account(1),
                    resolved_account_id: account(7),
                    rewards_account_id: Some(account(1)),
                }],
                vec![],
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(indexer.calls.load(Ordering::SeqCst), 2);
        let request = indexer.last_request.lock().clone().unwrap();
        let pool_account = request
            .accounts
            .iter()
            .find(|account| account.option == option)
            .unwrap();
        assert_eq!(pool_account.account_id, account(7));
        assert_eq!(pool_account.rewards_account_id, Some(account(1)));

        service.set_chain_assets(vec![]);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(repository.is_empty());
    }
}
