//! Balance updaters for every asset of a wallet.

use std::sync::Arc;

use crate::address::AccountId;
use crate::balance::{
    AssetsBalanceUpdater, BalanceRepositories, BalanceUpdaterContext, NativeBalanceUpdater, SharedBalanceUpdater,
};
use crate::config::SyncConfig;
use crate::context::SharedChainRegistry;
use crate::error::WalletError;
use crate::events::SharedEventCenter;
use crate::history::BlockHistoryProcessor;
use crate::model::{AssetType, ChainAssetId, MetaAccount};
use crate::repository::SharedRepository;
use crate::storage::{ChainStorageItem, SubscriptionContext};

/// Running updaters of one `(chain, account)`. Dropping it stops them.
pub struct BalanceSubscription {
    pub chain_id: String,
    pub account_id: AccountId,
    updaters: Vec<SharedBalanceUpdater>,
}

impl BalanceSubscription {
    pub fn updaters(&self) -> &[SharedBalanceUpdater] {
        &self.updaters
    }

    pub fn is_syncing(&self) -> bool {
        self.updaters
            .iter()
            .any(|updater| updater.status().state().is_syncing)
    }

    pub async fn throttle(self) {
        for updater in &self.updaters {
            updater.throttle().await;
        }
    }
}

pub struct BalanceSubscriptionService {
    registry: SharedChainRegistry,
    repositories: BalanceRepositories,
    event_center: SharedEventCenter,
    config: SyncConfig,
    cache: Option<SharedRepository<ChainStorageItem>>,
}

impl BalanceSubscriptionService {
    pub fn new(
        registry: SharedChainRegistry,
        repositories: BalanceRepositories,
        event_center: SharedEventCenter,
        config: SyncConfig,
    ) -> Self {
        Self {
            registry,
            repositories,
            event_center,
            config,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: SharedRepository<ChainStorageItem>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Start updaters for every supported asset of `chain_id`.
    pub async fn subscribe_account(
        &self,
        chain_id: &str,
        account_id: AccountId,
    ) -> Result<BalanceSubscription, WalletError> {
        let chain = self
            .registry
            .chain(chain_id)
            .ok_or(WalletError::InvalidState("chain is not registered"))?;
        let engine = self.registry.connection_or_error(chain_id)?;
        let runtime_provider = self.registry.runtime_provider_or_error(chain_id)?;

        let mut subscriptions = SubscriptionContext::new(engine.clone(), runtime_provider.clone())
            .with_config(self.config.clone())
            .with_ethereum_accounts(chain.is_ethereum_based());
        if let Some(cache) = &self.cache {
            subscriptions = subscriptions.with_cache(cache.clone());
        }
        let history = Arc::new(
            BlockHistoryProcessor::new(
                engine,
                runtime_provider,
                account_id.clone(),
                chain.clone(),
                self.repositories.history.clone(),
            )
            .with_event_center(self.event_center.clone()),
        );

        let mut updaters: Vec<SharedBalanceUpdater> = Vec::new();
        for asset in &chain.assets {
            let context = BalanceUpdaterContext {
                chain_asset_id: ChainAssetId::new(chain.chain_id.clone(), asset.asset_id),
                account_id: account_id.clone(),
                ethereum: chain.is_ethereum_based(),
                repositories: self.repositories.clone(),
                event_center: self.event_center.clone(),
                history: Some(history.clone()),
                subscriptions: subscriptions.clone(),
            };
            let updater: SharedBalanceUpdater = match &asset.asset_type {
                AssetType::Native => Arc::new(NativeBalanceUpdater::new(context)),
                AssetType::Statemine { pallet, asset_id } => {
                    match AssetsBalanceUpdater::new(context, pallet, *asset_id) {
                        Ok(updater) => Arc::new(updater),
                        Err(e) => {
                            tracing::debug!(chain = %chain_id, asset = asset.asset_id, error = %e, "skipping asset");
                            continue;
                        }
                    }
                }
                AssetType::Orml { .. } | AssetType::Evm { .. } => {
                    tracing::debug!(chain = %chain_id, asset = asset.asset_id, "no balance updater for asset type");
                    continue;
                }
            };
            updater.setup().await;
            updaters.push(updater);
        }

        tracing::info!(chain = %chain_id, updaters = updaters.len(), "balance subscriptions started");
        Ok(BalanceSubscription {
            chain_id: chain_id.to_string(),
            account_id,
            updaters,
        })
    }

    /// Subscribe every registered chain the wallet has an account on.
    /// Chains that fail are logged and skipped.
    pub async fn subscribe_wallet(&self, wallet: &MetaAccount) -> Vec<BalanceSubscription> {
        let mut subscriptions = Vec::new();
        for chain in self.registry.chains() {
            let Some(account) = wallet.fetch(&chain) else {
                continue;
            };
            match self.subscribe_account(&chain.chain_id, account.account_id).await {
                Ok(subscription) => subscriptions.push(subscription),
                Err(e) => tracing::warn!(chain = %chain.chain_id, error = %e, "balance subscription failed"),
            }
        }
        subscriptions
    }
}
