//! Relaychain staking (`pallet-staking`).
//!
//! The wallet account may be a stash or a controller. `Staking.Bonded` and
//! `Staking.Ledger` of the account are watched together to resolve the pair;
//! once resolved, era, ledger, nominations and validator prefs are watched in
//! one batch and the part is persisted as soon as all four are known.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::address::AccountId;
use crate::error::WalletError;
use crate::repository::SharedRepository;
use crate::runtime::CoderFactory;
use crate::storage::{
    BatchStorageRequest, BatchStorageValues, CallbackBatchStorageSubscription, FromBatchStorage,
    StoragePath, StorageRequest, UncertainStorage,
};
use crate::sync::observable::{Observable, SyncStatus};
use crate::sync::staking::model::{OptionWithWallet, RelaychainPart};
use crate::sync::staking::state::{keys, RelaychainAccumulator, RelaychainStateChange};
use crate::sync::staking::types::{DecodeWithAccounts, StakingLedger};
use crate::sync::staking::{report_sync, MultistakingUpdateService, StakingServiceContext};

const BONDED: &str = "bonded";

/// `Staking.Bonded` and `Staking.Ledger` of the wallet account.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct StashChange {
    bonded: UncertainStorage<AccountId>,
    ledger: UncertainStorage<StakingLedger>,
}

impl FromBatchStorage for StashChange {
    fn from_batch(values: &BatchStorageValues, _coder: &CoderFactory) -> Result<Self, WalletError> {
        Ok(Self {
            bonded: values.decode_with(BONDED, |bytes| AccountId::decode_bytes(bytes, values.ethereum_accounts))?,
            ledger: values.decode_with(keys::LEDGER, |bytes| {
                StakingLedger::decode_bytes(bytes, values.ethereum_accounts)
            })?,
        })
    }
}

/// `(stash, controller)` of a bonded account.
type StakingPair = (AccountId, AccountId);

#[derive(Default)]
struct RelaychainSyncState {
    stash_subscription: Option<CallbackBatchStorageSubscription<StashChange>>,
    state_subscription: Option<CallbackBatchStorageSubscription<RelaychainStateChange>>,
    bonded: UncertainStorage<AccountId>,
    ledger: UncertainStorage<StakingLedger>,
    /// `None` until both lookups answered; `Some(None)` when not bonded
    pair: Option<Option<StakingPair>>,
    accumulator: Option<RelaychainAccumulator>,
}

struct Inner {
    context: StakingServiceContext,
    option: OptionWithWallet,
    repository: SharedRepository<RelaychainPart>,
    status: Observable<SyncStatus>,
    state: Mutex<RelaychainSyncState>,
}

pub struct RelaychainMultistakingUpdateService {
    inner: Arc<Inner>,
}

impl RelaychainMultistakingUpdateService {
    pub fn new(context: StakingServiceContext, repository: SharedRepository<RelaychainPart>) -> Self {
        let option = context.option_with_wallet();
        Self {
            inner: Arc::new(Inner {
                context,
                option,
                repository,
                status: Observable::new(SyncStatus::default()),
                state: Mutex::new(RelaychainSyncState::default()),
            }),
        }
    }
}

impl Inner {
    fn subscribe_stash(self: &Arc<Self>) -> CallbackBatchStorageSubscription<StashChange> {
        let account = &self.context.account_id;
        let requests = vec![
            BatchStorageRequest::new(
                StorageRequest::map(
                    StoragePath::STAKING_BONDED,
                    self.context.local_key(StoragePath::STAKING_BONDED, Some(account)),
                    account,
                ),
                BONDED,
            ),
            BatchStorageRequest::new(
                StorageRequest::map(
                    StoragePath::STAKING_LEDGER,
                    self.context.local_key(StoragePath::STAKING_LEDGER, Some(account)),
                    account,
                ),
                keys::LEDGER,
            ),
        ];

        let weak = Arc::downgrade(self);
        CallbackBatchStorageSubscription::new(requests, self.context.subscriptions.clone(), move |result| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_stash_change(result).await;
                }
            }
        })
    }

    fn subscribe_state(
        self: &Arc<Self>,
        stash: &AccountId,
        controller: &AccountId,
    ) -> CallbackBatchStorageSubscription<RelaychainStateChange> {
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
                    context.local_key(StoragePath::STAKING_LEDGER, Some(controller)),
                    controller,
                ),
                keys::LEDGER,
            ),
            BatchStorageRequest::new(
                StorageRequest::map(
                    StoragePath::STAKING_NOMINATORS,
                    context.local_key(StoragePath::STAKING_NOMINATORS, Some(stash)),
                    stash,
                ),
                keys::NOMINATION,
            ),
            BatchStorageRequest::new(
                StorageRequest::map(
                    StoragePath::STAKING_VALIDATORS,
                    context.local_key(StoragePath::STAKING_VALIDATORS, Some(stash)),
                    stash,
                ),
                keys::VALIDATOR_PREFS,
            ),
        ];

        let weak = Arc::downgrade(self);
        CallbackBatchStorageSubscription::new(requests, context.subscriptions.clone(), move |result| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_state_change(result).await;
                }
            }
        })
    }

    async fn handle_stash_change(self: &Arc<Self>, result: Result<StashChange, WalletError>) {
        let mut state = self.state.lock().await;
        let change = match result {
            Ok(change) => change,
            Err(e) => return report_sync(&self.status, &self.option, &Err::<(), _>(e)),
        };

        state.bonded = change.bonded.or_previous(&state.bonded);
        state.ledger = change.ledger.or_previous(&state.ledger);
        let (UncertainStorage::Defined(bonded), UncertainStorage::Defined(ledger)) =
            (&state.bonded, &state.ledger)
        else {
            return;
        };

        let account = &self.context.account_id;
        let pair = match (ledger, bonded) {
            (Some(ledger), _) => Some((ledger.stash.clone(), account.clone())),
            (None, Some(controller)) => Some((account.clone(), controller.clone())),
            (None, None) => None,
        };
        if state.pair.as_ref() == Some(&pair) {
            return;
        }

        state.pair = Some(pair.clone());
        state.state_subscription = None;
        state.accumulator = None;

        match pair {
            Some((stash, controller)) => {
                tracing::debug!(
                    option = %self.option.identifier(),
                    stash = %stash,
                    controller = %controller,
                    "relaychain staking account resolved"
                );
                state.accumulator = Some(RelaychainAccumulator::new(stash.clone(), controller.clone()));
                state.state_subscription = Some(self.subscribe_state(&stash, &controller));
            }
            None => {
                let part = RelaychainPart {
                    option: self.option.clone(),
                    state: None,
                };
                let result = self.repository.save(vec![part], vec![]).await;
                report_sync(&self.status, &self.option, &result);
            }
        }
    }

    async fn handle_state_change(&self, result: Result<RelaychainStateChange, WalletError>) {
        let mut state = self.state.lock().await;
        let change = match result {
            Ok(change) => change,
            Err(e) => return report_sync(&self.status, &self.option, &Err::<(), _>(e)),
        };
        let Some(accumulator) = state.accumulator.as_ref().map(|current| current.applying(&change)) else {
            return;
        };
        let snapshot = accumulator.state();
        state.accumulator = Some(accumulator);

        if let Some(snapshot) = snapshot {
            let part = RelaychainPart {
                option: self.option.clone(),
                state: Some(snapshot),
            };
            let result = self.repository.save(vec![part], vec![]).await;
            report_sync(&self.status, &self.option, &result);
        }
    }
}

#[async_trait]
impl MultistakingUpdateService for RelaychainMultistakingUpdateService {
    async fn setup(&self) {
        let mut state = self.inner.state.lock().await;
        let running = state.stash_subscription.as_ref().is_some_and(|s| s.is_active())
            && state.state_subscription.as_ref().map_or(true, |s| s.is_active());
        if running {
            return;
        }
        if state.stash_subscription.is_some() {
            tracing::debug!(option = %self.inner.option.identifier(), "restarting stopped relaychain subscriptions");
        }
        // Account resolution starts over so the state batch is reopened too.
        *state = RelaychainSyncState::default();
        self.inner.status.set(SyncStatus::syncing());
        state.stash_subscription = Some(self.inner.subscribe_stash());
    }

    async fn throttle(&self) {
        let mut state = self.inner.state.lock().await;
        *state = RelaychainSyncState::default();
        self.inner.status.set(SyncStatus::default());
    }

    fn status(&self) -> &Observable<SyncStatus> {
        &self.inner.status
    }
}
