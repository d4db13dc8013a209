//! Nomination pool staking.
//!
//! `NominationPools.PoolMembers` of the wallet account decides which pool to
//! follow. Joining a pool resolves its bonded account and watches the pool's
//! staking ledger, nominations and `BondedPools` entry. The merged state is
//! persisted after every change, so the dashboard reflects partial data.

use std::sync::Arc;

use async_trait::async_trait;
use codec::Encode;
use tokio::sync::Mutex;

use crate::address::AccountId;
use crate::error::WalletError;
use crate::repository::SharedRepository;
use crate::storage::{
    scale_decoder, BatchStorageRequest, CallbackBatchStorageSubscription,
    CallbackStorageSubscription, ConstantPath, LocalStorageKeyFactory, StoragePath, StorageRequest,
    StorageUpdate,
};
use crate::sync::observable::{Observable, SyncStatus};
use crate::sync::staking::model::{NominationPoolPart, OptionWithWallet, ResolvedAccount};
use crate::sync::staking::state::{keys, NominationPoolState, NominationPoolStateChange};
use crate::sync::staking::types::{PoolId, PoolMember};
use crate::sync::staking::{report_sync, MultistakingUpdateService, StakingServiceContext};

const MODULE_PREFIX: &[u8; 4] = b"modl";

/// Sub-accounts a pool owns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode)]
pub enum PoolAccountType {
    Bonded,
    Reward,
}

/// `modl ++ pallet_id ++ account_type ++ pool_id`, zero-padded to 32 bytes.
pub fn derive_pool_account(pallet_id: &[u8; 8], pool_id: PoolId, account_type: PoolAccountType) -> AccountId {
    let mut bytes = [0u8; 32];
    let mut seed = MODULE_PREFIX.to_vec();
    seed.extend_from_slice(pallet_id);
    (account_type, pool_id).encode_to(&mut seed);
    bytes[..seed.len()].copy_from_slice(&seed);
    AccountId::from(bytes)
}

#[derive(Default)]
struct PoolsSyncState {
    member_subscription: Option<CallbackStorageSubscription<PoolMember>>,
    pool_subscription: Option<CallbackBatchStorageSubscription<NominationPoolStateChange>>,
    pool: Option<NominationPoolState>,
}

struct Inner {
    context: StakingServiceContext,
    option: OptionWithWallet,
    repository: SharedRepository<NominationPoolPart>,
    resolved_accounts: SharedRepository<ResolvedAccount>,
    status: Observable<SyncStatus>,
    state: Mutex<PoolsSyncState>,
}

pub struct PoolsMultistakingUpdateService {
    inner: Arc<Inner>,
}

impl PoolsMultistakingUpdateService {
    pub fn new(
        context: StakingServiceContext,
        repository: SharedRepository<NominationPoolPart>,
        resolved_accounts: SharedRepository<ResolvedAccount>,
    ) -> Self {
        let option = context.option_with_wallet();
        Self {
            inner: Arc::new(Inner {
                context,
                option,
                repository,
                resolved_accounts,
                status: Observable::new(SyncStatus::default()),
                state: Mutex::new(PoolsSyncState::default()),
            }),
        }
    }
}

impl Inner {
    fn subscribe_member(self: &Arc<Self>) -> CallbackStorageSubscription<PoolMember> {
        let account = &self.context.account_id;
        let request = StorageRequest::map(
            StoragePath::NOMINATION_POOLS_POOL_MEMBERS,
            self.context
                .local_key(StoragePath::NOMINATION_POOLS_POOL_MEMBERS, Some(account)),
            account,
        );

        let weak = Arc::downgrade(self);
        CallbackStorageSubscription::new(
            request,
            self.context.subscriptions.clone(),
            scale_decoder(),
            move |result| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_member(result).await;
                    }
                }
            },
        )
    }

    fn subscribe_pool(
        self: &Arc<Self>,
        pool_account: &AccountId,
        pool_id: PoolId,
    ) -> CallbackBatchStorageSubscription<NominationPoolStateChange> {
        let context = &self.context;
        let requests = vec![
            BatchStorageRequest::new(
                StorageRequest::value(
                    StoragePath::STAKING_ACTIVE_ERA,
                    context.local_key(StoragePath::STAKING_ACTIVE_ERA, None),
                ),
                keys::ERA,
            ),
            BatchStorageRequest::new(
                StorageRequest::map(
                    StoragePath::STAKING_LEDGER,
                    context.local_key(StoragePath::STAKING_LEDGER, Some(pool_account)),
                    pool_account,
                ),
                keys::LEDGER,
            ),
            BatchStorageRequest::new(
                StorageRequest::map(
                    StoragePath::STAKING_NOMINATORS,
                    context.local_key(StoragePath::STAKING_NOMINATORS, Some(pool_account)),
                    pool_account,
                ),
                keys::NOMINATION,
            ),
            BatchStorageRequest::new(
                StorageRequest::map(
                    StoragePath::NOMINATION_POOLS_BONDED_POOLS,
                    LocalStorageKeyFactory::create_with_suffix(
                        StoragePath::NOMINATION_POOLS_BONDED_POOLS,
                        context.chain_id(),
                        &pool_id.encode(),
                    ),
                    &pool_id,
                ),
                keys::BONDED_POOL,
            ),
        ];

        let weak = Arc::downgrade(self);
        CallbackBatchStorageSubscription::new(requests, context.subscriptions.clone(), move |result| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_pool_change(result).await;
                }
            }
        })
    }

    fn resolved_account_id(&self) -> String {
        ResolvedAccount::identifier_for(&self.context.account_id, &self.option.option)
    }

    async fn save_part(&self, pool: Option<NominationPoolState>) -> Result<(), WalletError> {
        let part = NominationPoolPart {
            option: self.option.clone(),
            state: pool,
        };
        self.repository.save(vec![part], vec![]).await
    }

    async fn handle_member(self: &Arc<Self>, result: Result<StorageUpdate<PoolMember>, WalletError>) {
        let mut state = self.state.lock().await;
        let result = self.apply_member(&mut state, result).await;
        report_sync(&self.status, &self.option, &result);
    }

    async fn apply_member(
        self: &Arc<Self>,
        state: &mut PoolsSyncState,
        result: Result<StorageUpdate<PoolMember>, WalletError>,
    ) -> Result<(), WalletError> {
        let Some(member) = result?.value else {
            tracing::debug!(option = %self.option.identifier(), "not a pool member");
            state.pool_subscription = None;
            state.pool = None;
            self.save_part(None).await?;
            return self
                .resolved_accounts
                .save(vec![], vec![self.resolved_account_id()])
                .await;
        };

        if let Some(pool) = state.pool.as_ref().filter(|pool| pool.pool_id() == member.pool_id) {
            let pool = pool.applying_member(member);
            state.pool = Some(pool.clone());
            return self.save_part(Some(pool)).await;
        }

        let coder = self
            .context
            .subscriptions
            .runtime_provider
            .fetch_coder_factory()
            .await?;
        let path = ConstantPath::NOMINATION_POOLS_PALLET_ID;
        let pallet_id: [u8; 8] = coder.constant(path.pallet, path.name)?;
        let pool_id = member.pool_id;
        let pool_account = derive_pool_account(&pallet_id, pool_id, PoolAccountType::Bonded);
        tracing::debug!(
            option = %self.option.identifier(),
            pool_id,
            pool_account = %pool_account,
            "following nomination pool"
        );

        let resolved = ResolvedAccount {
            staking_option: self.option.option.clone(),
            wallet_account_id: self.context.account_id.clone(),
            resolved_account_id: pool_account.clone(),
            rewards_account_id: Some(self.context.account_id.clone()),
        };
        self.resolved_accounts.save(vec![resolved], vec![]).await?;

        state.pool_subscription = None;
        let pool = NominationPoolState::new(member);
        state.pool = Some(pool.clone());
        self.save_part(Some(pool)).await?;
        state.pool_subscription = Some(self.subscribe_pool(&pool_account, pool_id));
        Ok(())
    }

    async fn handle_pool_change(&self, result: Result<NominationPoolStateChange, WalletError>) {
        let mut state = self.state.lock().await;
        let result = match result {
            Ok(change) => match state.pool.as_ref().map(|pool| pool.applying(&change)) {
                Some(pool) => {
                    state.pool = Some(pool.clone());
                    self.save_part(Some(pool)).await
                }
                None => Ok(()),
            },
            Err(e) => Err(e),
        };
        report_sync(&self.status, &self.option, &result);
    }
}

#[async_trait]
impl MultistakingUpdateService for PoolsMultistakingUpdateService {
    async fn setup(&self) {
        let mut state = self.inner.state.lock().await;
        let running = state.member_subscription.as_ref().is_some_and(|s| s.is_active())
            && state.pool_subscription.as_ref().map_or(true, |s| s.is_active());
        if running {
            return;
        }
        if state.member_subscription.is_some() {
            tracing::debug!(option = %self.inner.option.identifier(), "restarting stopped pool subscriptions");
        }
        *state = PoolsSyncState::default();
        self.inner.status.set(SyncStatus::syncing());
        state.member_subscription = Some(self.inner.subscribe_member());
    }

    async fn throttle(&self) {
        let mut state = self.inner.state.lock().await;
        *state = PoolsSyncState::default();
        self.inner.status.set(SyncStatus::default());
    }

    fn status(&self) -> &Observable<SyncStatus> {
        &self.inner.status
    }
}
