//! Orchestration of the staking sub-services of one wallet.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::context::SharedChainRegistry;
use crate::model::{ChainAsset, ChainModel, MetaAccount, StakingType};
use crate::repository::DataChange;
use crate::storage::SubscriptionContext;
use crate::sync::observable::{Observable, SubscriptionToken, SyncStatus};
use crate::sync::staking::model::StakingOption;
use crate::sync::staking::mythos::MythosMultistakingUpdateService;
use crate::sync::staking::offchain::{OffchainIndexer, OffchainMultistakingUpdateService};
use crate::sync::staking::parachain::ParachainMultistakingUpdateService;
use crate::sync::staking::pools::PoolsMultistakingUpdateService;
use crate::sync::staking::relaychain::RelaychainMultistakingUpdateService;
use crate::sync::staking::{MultistakingRepositories, MultistakingUpdateService, StakingServiceContext};

/// Syncing flags of every running sub-service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MultistakingSyncState {
    pub is_onchain_syncing: BTreeMap<StakingOption, bool>,
    pub is_offchain_syncing: bool,
}

impl MultistakingSyncState {
    pub fn is_syncing(&self) -> bool {
        self.is_offchain_syncing || self.is_onchain_syncing.values().any(|syncing| *syncing)
    }
}

struct OnchainUpdater {
    service: Arc<dyn MultistakingUpdateService>,
    token: SubscriptionToken,
}

struct OffchainUpdater {
    service: Arc<OffchainMultistakingUpdateService>,
    token: SubscriptionToken,
}

#[derive(Default)]
struct ServiceState {
    wallet: Option<MetaAccount>,
    onchain: BTreeMap<StakingOption, OnchainUpdater>,
    offchain: Option<OffchainUpdater>,
    chain_watcher: Option<JoinHandle<()>>,
    is_active: bool,
}

struct Inner {
    registry: SharedChainRegistry,
    repositories: MultistakingRepositories,
    indexer: Arc<dyn OffchainIndexer>,
    config: SyncConfig,
    sync_state: Observable<MultistakingSyncState>,
    state: Mutex<ServiceState>,
}

/// Keeps staking dashboard parts of the selected wallet in sync with every
/// chain of the registry.
pub struct MultistakingSyncService {
    inner: Arc<Inner>,
}

impl MultistakingSyncService {
    pub fn new(
        registry: SharedChainRegistry,
        repositories: MultistakingRepositories,
        indexer: Arc<dyn OffchainIndexer>,
        config: SyncConfig,
        wallet: Option<MetaAccount>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                repositories,
                indexer,
                config,
                sync_state: Observable::new(MultistakingSyncState::default()),
                state: Mutex::new(ServiceState {
                    wallet,
                    ..Default::default()
                }),
            }),
        }
    }

    /// Start syncing. On a running service this restarts sub-services whose
    /// subscriptions stopped.
    pub async fn setup(&self) {
        let mut state = self.inner.state.lock().await;
        if state.is_active {
            for updater in state.onchain.values() {
                updater.service.setup().await;
            }
            if let Some(offchain) = &state.offchain {
                offchain.service.setup().await;
            }
            return;
        }
        state.is_active = true;

        let changes = self.inner.registry.subscribe_chains();
        state.chain_watcher = Some(tokio::spawn(watch_chains(Arc::downgrade(&self.inner), changes)));
        self.inner.build_all(&mut state).await;
    }

    pub async fn throttle(&self) {
        let mut state = self.inner.state.lock().await;
        if !state.is_active {
            return;
        }
        state.is_active = false;
        if let Some(watcher) = state.chain_watcher.take() {
            watcher.abort();
        }
        self.inner.teardown(&mut state).await;
    }

    /// Switch to `wallet`, rebuilding every sub-service.
    pub async fn update(&self, wallet: MetaAccount) {
        let mut state = self.inner.state.lock().await;
        tracing::debug!(wallet = %wallet.meta_id, "multistaking wallet changed");
        self.inner.teardown(&mut state).await;
        state.wallet = Some(wallet);
        if state.is_active {
            self.inner.build_all(&mut state).await;
        }
    }

    /// Force an offchain resync.
    pub async fn refresh_offchain(&self) {
        let state = self.inner.state.lock().await;
        if let Some(offchain) = &state.offchain {
            offchain.service.refresh();
        }
    }

    pub fn sync_state(&self) -> MultistakingSyncState {
        self.inner.sync_state.state()
    }

    /// Observe sync state changes; `observer` is called right away.
    pub fn subscribe_sync_state(
        &self,
        observer: impl Fn(&MultistakingSyncState, &MultistakingSyncState) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        self.inner.sync_state.subscribe(observer)
    }

    pub fn unsubscribe_sync_state(&self, token: SubscriptionToken) -> bool {
        self.inner.sync_state.unsubscribe(token)
    }
}

impl Drop for MultistakingSyncService {
    fn drop(&mut self) {
        if let Ok(mut state) = self.inner.state.try_lock() {
            if let Some(watcher) = state.chain_watcher.take() {
                watcher.abort();
            }
        }
    }
}

fn supported(staking_type: StakingType) -> bool {
    staking_type != StakingType::Unsupported
}

impl Inner {
    fn stakable_chain_assets(&self) -> Vec<(ChainAsset, StakingType)> {
        self.registry
            .chains()
            .iter()
            .flat_map(ChainModel::staking_chain_assets)
            .filter(|(_, staking_type)| supported(*staking_type))
            .collect()
    }

    fn create_onchain_service(
        &self,
        wallet: &MetaAccount,
        chain_asset: ChainAsset,
        staking_type: StakingType,
    ) -> Option<Arc<dyn MultistakingUpdateService>> {
        let chain_id = chain_asset.chain.chain_id.clone();
        let account = wallet.fetch(&chain_asset.chain)?;
        let (Some(connection), Some(runtime_provider)) = (
            self.registry.connection(&chain_id),
            self.registry.runtime_provider(&chain_id),
        ) else {
            tracing::warn!(chain = %chain_id, "no connection for staking chain");
            return None;
        };

        let mut subscriptions = SubscriptionContext::new(connection, runtime_provider)
            .with_config(self.config.clone())
            .with_ethereum_accounts(chain_asset.chain.is_ethereum_based());
        if let Some(cache) = &self.repositories.cache {
            subscriptions = subscriptions.with_cache(cache.clone());
        }
        let context = StakingServiceContext {
            wallet_id: wallet.meta_id.clone(),
            account_id: account.account_id,
            chain_asset,
            staking_type,
            subscriptions,
        };

        let repositories = &self.repositories;
        let service: Arc<dyn MultistakingUpdateService> = match staking_type {
            StakingType::Relaychain | StakingType::AuraRelaychain | StakingType::Azero => Arc::new(
                RelaychainMultistakingUpdateService::new(context, repositories.relaychain.clone()),
            ),
            StakingType::Parachain | StakingType::Turing => Arc::new(
                ParachainMultistakingUpdateService::new(context, repositories.parachain.clone()),
            ),
            StakingType::NominationPools => Arc::new(PoolsMultistakingUpdateService::new(
                context,
                repositories.pools.clone(),
                repositories.resolved_accounts.clone(),
            )),
            StakingType::Mythos => Arc::new(MythosMultistakingUpdateService::new(
                context,
                repositories.mythos.clone(),
            )),
            StakingType::Unsupported => return None,
        };
        Some(service)
    }

    async fn add_option(
        self: &Arc<Self>,
        state: &mut ServiceState,
        chain_asset: ChainAsset,
        staking_type: StakingType,
    ) {
        let option = StakingOption {
            chain_asset_id: chain_asset.chain_asset_id(),
            staking_type,
        };
        if state.onchain.contains_key(&option) {
            return;
        }
        let Some(wallet) = state.wallet.as_ref() else {
            return;
        };
        let Some(service) = self.create_onchain_service(wallet, chain_asset, staking_type) else {
            return;
        };

        let weak = Arc::downgrade(self);
        let observed = option.clone();
        let token = service.status().subscribe(move |_, status: &SyncStatus| {
            if let Some(inner) = weak.upgrade() {
                let is_syncing = status.is_syncing;
                inner.sync_state.modify(|sync_state| {
                    sync_state.is_onchain_syncing.insert(observed.clone(), is_syncing);
                });
            }
        });
        service.setup().await;
        tracing::debug!(option = %option, "staking updater started");
        state.onchain.insert(option, OnchainUpdater { service, token });
    }

    async fn remove_option(&self, state: &mut ServiceState, option: &StakingOption) {
        let Some(updater) = state.onchain.remove(option) else {
            return;
        };
        updater.service.status().unsubscribe(updater.token);
        updater.service.throttle().await;
        self.sync_state.modify(|sync_state| {
            sync_state.is_onchain_syncing.remove(option);
        });
        tracing::debug!(option = %option, "staking updater removed");
    }

    async fn add_chain(self: &Arc<Self>, state: &mut ServiceState, chain: &ChainModel) {
        for (chain_asset, staking_type) in chain.staking_chain_assets() {
            if supported(staking_type) {
                self.add_option(state, chain_asset, staking_type).await;
            }
        }
    }

    async fn update_chain(self: &Arc<Self>, state: &mut ServiceState, chain: &ChainModel) {
        let current: BTreeSet<StakingOption> = chain
            .staking_chain_assets()
            .iter()
            .map(|(chain_asset, staking_type)| StakingOption {
                chain_asset_id: chain_asset.chain_asset_id(),
                staking_type: *staking_type,
            })
            .collect();
        let removed: Vec<StakingOption> = state
            .onchain
            .keys()
            .filter(|option| option.chain_asset_id.chain_id == chain.chain_id && !current.contains(option))
            .cloned()
            .collect();
        for option in &removed {
            self.remove_option(state, option).await;
        }
        self.add_chain(state, chain).await;
    }

    async fn remove_chain(&self, state: &mut ServiceState, chain_id: &str) {
        let removed: Vec<StakingOption> = state
            .onchain
            .keys()
            .filter(|option| option.chain_asset_id.chain_id == chain_id)
            .cloned()
            .collect();
        for option in &removed {
            self.remove_option(state, option).await;
        }
    }

    async fn build_all(self: &Arc<Self>, state: &mut ServiceState) {
        for chain in self.registry.chains() {
            self.add_chain(state, &chain).await;
        }

        let Some(wallet) = state.wallet.clone() else {
            return;
        };
        let service = Arc::new(OffchainMultistakingUpdateService::new(
            wallet,
            self.indexer.clone(),
            self.repositories.offchain.clone(),
            self.repositories.resolved_accounts.clone(),
            &self.config,
        ));
        let weak = Arc::downgrade(self);
        let token = service.status().subscribe(move |_, status: &SyncStatus| {
            if let Some(inner) = weak.upgrade() {
                let is_syncing = status.is_syncing;
                inner
                    .sync_state
                    .modify(|sync_state| sync_state.is_offchain_syncing = is_syncing);
            }
        });
        service.set_chain_assets(self.stakable_chain_assets());
        service.setup().await;
        state.offchain = Some(OffchainUpdater { service, token });
    }

    async fn teardown(&self, state: &mut ServiceState) {
        let options: Vec<StakingOption> = state.onchain.keys().cloned().collect();
        for option in &options {
            self.remove_option(state, option).await;
        }
        if let Some(offchain) = state.offchain.take() {
            offchain.service.status().unsubscribe(offchain.token);
            offchain.service.throttle().await;
        }
        self.sync_state.set(MultistakingSyncState::default());
    }

    async fn handle_chain_changes(self: &Arc<Self>, changes: Option<Vec<DataChange<ChainModel>>>) {
        let mut state = self.state.lock().await;
        if !state.is_active {
            return;
        }

        match changes {
            Some(changes) => {
                for change in changes {
                    match change {
                        DataChange::Insert(chain) => self.add_chain(&mut state, &chain).await,
                        DataChange::Update(chain) => self.update_chain(&mut state, &chain).await,
                        DataChange::Delete(chain_id) => self.remove_chain(&mut state, &chain_id).await,
                    }
                }
            }
            None => {
                // Missed notifications: reconcile against the registry.
                let chains = self.registry.chains();
                let known: BTreeSet<&str> = chains.iter().map(|chain| chain.chain_id.as_str()).collect();
                let stale: BTreeSet<String> = state
                    .onchain
                    .keys()
                    .map(|option| option.chain_asset_id.chain_id.clone())
                    .filter(|chain_id| !known.contains(chain_id.as_str()))
                    .collect();
                for chain_id in &stale {
                    self.remove_chain(&mut state, chain_id).await;
                }
                for chain in &chains {
                    self.update_chain(&mut state, chain).await;
                }
            }
        }

        if let Some(offchain) = &state.offchain {
            offchain.service.set_chain_assets(self.stakable_chain_assets());
        }
    }
}

async fn watch_chains(
    inner: std::sync::Weak<Inner>,
    mut changes: broadcast::Receiver<Vec<DataChange<ChainModel>>>,
) {
    loop {
        let changes = match changes.recv().await {
            Ok(changes) => Some(changes),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "chain change notifications lagged");
                None
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.handle_chain_changes(changes).await;
    }
}
