//! Multistaking sync: one on-chain update service per
//! `(wallet, chain asset, staking type)` plus an offchain indexer service,
//! orchestrated by [`MultistakingSyncService`].

pub mod model;
pub mod mythos;
pub mod offchain;
pub mod parachain;
pub mod pools;
pub mod relaychain;
pub mod service;
pub mod state;
pub mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::address::AccountId;
use crate::error::WalletError;
use crate::model::{ChainAsset, StakingType};
use crate::repository::{InMemoryRepository, SharedRepository};
use crate::storage::{ChainStorageItem, LocalStorageKeyFactory, StoragePath, SubscriptionContext};
use crate::sync::observable::{Observable, SyncStatus};

pub use model::{
    DashboardItem, DashboardState, MythosPart, NominationPoolPart, OffchainPart, OnchainPart,
    OptionWithWallet, ParachainPart, RelaychainPart, ResolvedAccount, StakingOption,
};
pub use mythos::MythosMultistakingUpdateService;
pub use offchain::{
    OffchainAccount, OffchainIndexer, OffchainMultistakingUpdateService, OffchainRequest,
    OffchainResponse, OffchainStakingItem,
};
pub use parachain::ParachainMultistakingUpdateService;
pub use pools::PoolsMultistakingUpdateService;
pub use relaychain::RelaychainMultistakingUpdateService;
pub use service::{MultistakingSyncService, MultistakingSyncState};

/// Lifecycle shared by every staking sub-service.
#[async_trait]
pub trait MultistakingUpdateService: Send + Sync {
    /// Start subscriptions; the status turns to syncing.
    async fn setup(&self);

    /// Stop subscriptions and drop accumulated state.
    async fn throttle(&self);

    fn status(&self) -> &Observable<SyncStatus>;
}

/// What an on-chain sub-service syncs and how it reaches the chain.
#[derive(Clone)]
pub struct StakingServiceContext {
    pub wallet_id: String,
    pub account_id: AccountId,
    pub chain_asset: ChainAsset,
    pub staking_type: StakingType,
    pub subscriptions: SubscriptionContext,
}

impl StakingServiceContext {
    pub fn chain_id(&self) -> &str {
        &self.chain_asset.chain.chain_id
    }

    pub fn staking_option(&self) -> StakingOption {
        StakingOption {
            chain_asset_id: self.chain_asset.chain_asset_id(),
            staking_type: self.staking_type,
        }
    }

    pub fn option_with_wallet(&self) -> OptionWithWallet {
        OptionWithWallet {
            wallet_id: self.wallet_id.clone(),
            option: self.staking_option(),
        }
    }

    pub fn ethereum(&self) -> bool {
        self.chain_asset.chain.is_ethereum_based()
    }

    pub fn local_key(&self, path: StoragePath, account_id: Option<&AccountId>) -> String {
        LocalStorageKeyFactory::create(path, self.chain_id(), account_id)
    }
}

/// Persistence of everything the staking services write.
#[derive(Clone)]
pub struct MultistakingRepositories {
    pub relaychain: SharedRepository<RelaychainPart>,
    pub parachain: SharedRepository<ParachainPart>,
    pub pools: SharedRepository<NominationPoolPart>,
    pub mythos: SharedRepository<MythosPart>,
    pub offchain: SharedRepository<OffchainPart>,
    pub resolved_accounts: SharedRepository<ResolvedAccount>,
    /// Raw storage cache handed to subscriptions
    pub cache: Option<SharedRepository<ChainStorageItem>>,
}

impl MultistakingRepositories {
    pub fn in_memory() -> Self {
        Self {
            relaychain: Arc::new(InMemoryRepository::new()),
            parachain: Arc::new(InMemoryRepository::new()),
            pools: Arc::new(InMemoryRepository::new()),
            mythos: Arc::new(InMemoryRepository::new()),
            offchain: Arc::new(InMemoryRepository::new()),
            resolved_accounts: Arc::new(InMemoryRepository::new()),
            cache: Some(Arc::new(InMemoryRepository::new())),
        }
    }

    /// Dashboard of `wallet_id`: every option with an on-chain or offchain
    /// part, merged.
    pub async fn dashboard(&self, wallet_id: &str) -> Result<Vec<DashboardItem>, WalletError> {
        let mut onchain: BTreeMap<OptionWithWallet, OnchainPart> = BTreeMap::new();
        for part in self.relaychain.fetch_all().await? {
            onchain.insert(part.option.clone(), OnchainPart::Relaychain(part));
        }
        for part in self.parachain.fetch_all().await? {
            onchain.insert(part.option.clone(), OnchainPart::Parachain(part));
        }
        for part in self.pools.fetch_all().await? {
            onchain.insert(part.option.clone(), OnchainPart::NominationPool(part));
        }
        for part in self.mythos.fetch_all().await? {
            onchain.insert(part.option.clone(), OnchainPart::Mythos(part));
        }
        let offchain: BTreeMap<OptionWithWallet, OffchainPart> = self
            .offchain
            .fetch_all()
            .await?
            .into_iter()
            .map(|part| (part.option.clone(), part))
            .collect();

        let mut options: Vec<&OptionWithWallet> = onchain.keys().chain(offchain.keys()).collect();
        options.sort();
        options.dedup();

        Ok(options
            .into_iter()
            .filter(|option| option.wallet_id == wallet_id)
            .filter_map(|option| DashboardItem::merge(onchain.get(option), offchain.get(option)))
            .collect())
    }
}

/// Record the outcome of one sync step on `status`.
pub(crate) fn report_sync<T>(status: &Observable<SyncStatus>, option: &OptionWithWallet, result: &Result<T, WalletError>) {
    match result {
        Ok(_) => status.set(SyncStatus::synced()),
        Err(e) => {
            tracing::warn!(option = %option.identifier(), error = %e, "staking sync failed");
            status.set(SyncStatus::failed(e));
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::model::StakingType;
    use crate::rpc::SharedRpcEngine;
    use crate::testing::{polkadot_chain, polkadot_provider};

    pub fn context(engine: SharedRpcEngine, account_id: AccountId, staking_type: StakingType) -> StakingServiceContext {
        let chain = polkadot_chain();
        let asset = chain.assets[0].clone();
        StakingServiceContext {
            wallet_id: "w1".into(),
            account_id,
            chain_asset: ChainAsset { chain, asset },
            staking_type,
            subscriptions: SubscriptionContext::new(engine, polkadot_provider()),
        }
    }

    /// Poll `check` until it holds or about two seconds pass.
    pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        false
    }
}
