//! Parachain staking (`parachain-staking`, Moonbeam-like chains).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::address::AccountId;
use crate::cancellable::CancellableCallStore;
use crate::error::WalletError;
use crate::repository::SharedRepository;
use crate::storage::{
    CallbackStorageSubscription, StorageQuery, StoragePath, StorageRequest, StorageUpdate,
};
use crate::sync::observable::{Observable, SyncStatus};
use crate::sync::staking::model::{OptionWithWallet, ParachainPart};
use crate::sync::staking::state::ParachainState;
use crate::sync::staking::types::{account_decoder, DecodeWithAccounts, Delegator};
use crate::sync::staking::{report_sync, MultistakingUpdateService, StakingServiceContext};

#[derive(Default)]
struct ParachainSyncState {
    subscription: Option<CallbackStorageSubscription<Delegator>>,
}

struct Inner {
    context: StakingServiceContext,
    option: OptionWithWallet,
    repository: SharedRepository<ParachainPart>,
    status: Observable<SyncStatus>,
    collators_call: CancellableCallStore,
    state: Mutex<ParachainSyncState>,
}

pub struct ParachainMultistakingUpdateService {
    inner: Arc<Inner>,
}

impl ParachainMultistakingUpdateService {
    pub fn new(context: StakingServiceContext, repository: SharedRepository<ParachainPart>) -> Self {
        let option = context.option_with_wallet();
        Self {
            inner: Arc::new(Inner {
                context,
                option,
                repository,
                status: Observable::new(SyncStatus::default()),
                collators_call: CancellableCallStore::new(),
                state: Mutex::new(ParachainSyncState::default()),
            }),
        }
    }
}

impl Inner {
    fn subscribe(self: &Arc<Self>) -> CallbackStorageSubscription<Delegator> {
        let account = &self.context.account_id;
        let request = StorageRequest::map(
            StoragePath::PARACHAIN_STAKING_DELEGATOR_STATE,
            self.context
                .local_key(StoragePath::PARACHAIN_STAKING_DELEGATOR_STATE, Some(account)),
            account,
        );

        let weak = Arc::downgrade(self);
        CallbackStorageSubscription::new(
            request,
            self.context.subscriptions.clone(),
            account_decoder(self.context.ethereum()),
            move |result| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_delegator(result).await;
                    }
                }
            },
        )
    }

    async fn selected_candidates(&self) -> Result<Vec<AccountId>, WalletError> {
        let subscriptions = &self.context.subscriptions;
        let query = StorageQuery::new(subscriptions.engine.clone(), subscriptions.runtime_provider.clone());
        let request = StorageRequest::value(StoragePath::PARACHAIN_STAKING_SELECTED_CANDIDATES, "");
        let raw = query.fetch_raw(&request, None).await?;
        match raw {
            Some(bytes) => Vec::<AccountId>::decode_bytes(&bytes, self.context.ethereum()),
            None => Ok(Vec::new()),
        }
    }

    async fn handle_delegator(&self, result: Result<StorageUpdate<Delegator>, WalletError>) {
        let result = self.apply_delegator(result).await;
        if matches!(result, Err(WalletError::Cancelled)) {
            return;
        }
        report_sync(&self.status, &self.option, &result);
    }

    async fn apply_delegator(
        &self,
        result: Result<StorageUpdate<Delegator>, WalletError>,
    ) -> Result<(), WalletError> {
        let delegator = result?.value;
        let should_have_active_collator = match &delegator {
            Some(delegator) if !delegator.delegations.is_empty() => {
                let selected = self.collators_call.run(self.selected_candidates()).await?;
                delegator.collators().any(|collator| selected.contains(collator))
            }
            _ => false,
        };

        let _guard = self.state.lock().await;
        let part = ParachainPart {
            option: self.option.clone(),
            state: Some(ParachainState {
                delegator,
                should_have_active_collator,
            }),
        };
        self.repository.save(vec![part], vec![]).await
    }
}

#[async_trait]
impl MultistakingUpdateService for ParachainMultistakingUpdateService {
    async fn setup(&self) {
        let mut state = self.inner.state.lock().await;
        if state.subscription.as_ref().is_some_and(|s| s.is_active()) {
            return;
        }
        self.inner.status.set(SyncStatus::syncing());
        state.subscription = Some(self.inner.subscribe());
    }

    async fn throttle(&self) {
        self.inner.collators_call.cancel();
        let mut state = self.inner.state.lock().await;
        state.subscription = None;
        self.inner.status.set(SyncStatus::default());
    }

    fn status(&self) -> &Observable<SyncStatus> {
        &self.inner.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StakingType;
    use crate::repository::{InMemoryRepository, Repository};
    use crate::storage::{map_key, storage_key};
    use crate::sync::staking::model::DashboardState;
    use crate::sync::staking::test_support::{context, eventually};
    use crate::testing::{account, polkadot_coder, MockRpcEngine};
    use codec::{Compact, Encode};

    fn delegator_bytes(id: &AccountId, collator: &AccountId, amount: u128) -> Vec<u8> {
        let mut bytes = id.encode();
        Compact(1u32).encode_to(&mut bytes);
        collator.encode_to(&mut bytes);
        amount.encode_to(&mut bytes);
        amount.encode_to(&mut bytes);
        bytes
    }

    #[tokio::test]
    async fn test_delegator_with_selected_collator() {
        let coder = polkadot_coder();
        let engine = Arc::new(MockRpcEngine::new());
        let delegator = account(1);
        let collator = account(9);
        engine.set_storage(
            &map_key(&coder, StoragePath::PARACHAIN_STAKING_DELEGATOR_STATE, &delegator).unwrap(),
            Some(&delegator_bytes(&delegator, &collator, 1_000)),
        );
        let mut selected = Compact(1u32).encode();
        collator.encode_to(&mut selected);
        engine.set_storage(
            &storage_key(&coder, StoragePath::PARACHAIN_STAKING_SELECTED_CANDIDATES, &[]).unwrap(),
            Some(&selected),
        );

        let repository = Arc::new(InMemoryRepository::<ParachainPart>::new());
        let service = ParachainMultistakingUpdateService::new(
            context(engine.clone(), delegator, StakingType::Parachain),
            repository.clone(),
        );
        service.setup().await;

        assert!(eventually(|| repository.len() == 1).await);
        let part = repository.fetch_all().await.unwrap().remove(0);
        let state = part.state.clone().unwrap();
        assert!(state.should_have_active_collator);
        assert_eq!(state.delegator.map(|d| d.total), Some(1_000));
        assert_eq!(part.state(), DashboardState::Inactive);
    }

    #[tokio::test]
    async fn test_no_delegator_skips_collator_lookup() {
        let engine = Arc::new(MockRpcEngine::new());
        let repository = Arc::new(InMemoryRepository::<ParachainPart>::new());
        let service = ParachainMultistakingUpdateService::new(
            context(engine.clone(), account(1), StakingType::Parachain),
            repository.clone(),
        );
        service.setup().await;

        assert!(eventually(|| repository.len() == 1).await);
        assert_eq!(engine.request_count(crate::rpc::methods::STATE_GET_STORAGE), 0);
        assert!(eventually(|| !service.status().state().is_syncing).await);
    }
}
