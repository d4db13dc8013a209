//! Mythos collator staking (`pallet-collator-staking`).

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
use crate::sync::staking::model::{MythosPart, OptionWithWallet};
use crate::sync::staking::state::MythosState;
use crate::sync::staking::types::{account_decoder, DecodeWithAccounts, UserStakeInfo};
use crate::sync::staking::{report_sync, MultistakingUpdateService, StakingServiceContext};

struct Inner {
    context: StakingServiceContext,
    option: OptionWithWallet,
    repository: SharedRepository<MythosPart>,
    status: Observable<SyncStatus>,
    session_call: CancellableCallStore,
    subscription: Mutex<Option<CallbackStorageSubscription<UserStakeInfo>>>,
}

pub struct MythosMultistakingUpdateService {
    inner: Arc<Inner>,
}

impl MythosMultistakingUpdateService {
    pub fn new(context: StakingServiceContext, repository: SharedRepository<MythosPart>) -> Self {
        let option = context.option_with_wallet();
        Self {
            inner: Arc::new(Inner {
                context,
                option,
                repository,
                status: Observable::new(SyncStatus::default()),
                session_call: CancellableCallStore::new(),
                subscription: Mutex::new(None),
            }),
        }
    }
}

impl Inner {
    fn subscribe(self: &Arc<Self>) -> CallbackStorageSubscription<UserStakeInfo> {
        let account = &self.context.account_id;
        let request = StorageRequest::map(
            StoragePath::COLLATOR_STAKING_USER_STAKE,
            self.context
                .local_key(StoragePath::COLLATOR_STAKING_USER_STAKE, Some(account)),
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
                        inner.handle_user_stake(result).await;
                    }
                }
            },
        )
    }

    async fn session_validators(&self) -> Result<Vec<AccountId>, WalletError> {
        let subscriptions = &self.context.subscriptions;
        let query = StorageQuery::new(subscriptions.engine.clone(), subscriptions.runtime_provider.clone());
        let request = StorageRequest::value(StoragePath::SESSION_VALIDATORS, "");
        match query.fetch_raw(&request, None).await? {
            Some(bytes) => Vec::<AccountId>::decode_bytes(&bytes, self.context.ethereum()),
            None => Ok(Vec::new()),
        }
    }

    async fn handle_user_stake(&self, result: Result<StorageUpdate<UserStakeInfo>, WalletError>) {
        let result = self.apply_user_stake(result).await;
        if matches!(result, Err(WalletError::Cancelled)) {
            return;
        }
        report_sync(&self.status, &self.option, &result);
    }

    async fn apply_user_stake(
        &self,
        result: Result<StorageUpdate<UserStakeInfo>, WalletError>,
    ) -> Result<(), WalletError> {
        let user_stake = result?.value;
        let should_have_active_collator = match &user_stake {
            Some(stake) if !stake.candidates.is_empty() => {
                let validators = self.session_call.run(self.session_validators()).await?;
                stake.candidates.iter().any(|candidate| validators.contains(candidate))
            }
            _ => false,
        };

        let part = MythosPart {
            option: self.option.clone(),
            state: Some(MythosState {
                user_stake,
                should_have_active_collator,
            }),
        };
        self.repository.save(vec![part], vec![]).await
    }
}

#[async_trait]
impl MultistakingUpdateService for MythosMultistakingUpdateService {
    async fn setup(&self) {
        let mut subscription = self.inner.subscription.lock().await;
        if subscription.as_ref().is_some_and(|s| s.is_active()) {
            return;
        }
        self.inner.status.set(SyncStatus::syncing());
        *subscription = Some(self.inner.subscribe());
    }

    async fn throttle(&self) {
        self.inner.session_call.cancel();
        *self.inner.subscription.lock().await = None;
        self.inner.status.set(SyncStatus::default());
    }

    fn status(&self) -> &Observable<SyncStatus> {
        &self.inner.status
    }
}
