//! `pallet-assets` balances: the account entry together with the asset
//! details, whose status can freeze every holder.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::balance::types::{asset_balance, AssetAccount, AssetDetails};
use crate::balance::{report_update, BalanceUpdater, BalanceUpdaterContext};
use crate::error::WalletError;
use crate::runtime::CoderFactory;
use crate::storage::{
    BatchStorageRequest, BatchStorageValues, CallbackBatchStorageSubscription, FromBatchStorage,
    LocalStorageKeyFactory, StoragePath, StorageRequest, UncertainStorage,
};
use crate::sync::observable::{Observable, SyncStatus};
use crate::sync::staking::types::DecodeWithAccounts;

const ACCOUNT: &str = "account";
const DETAILS: &str = "details";

#[derive(Clone, Debug, PartialEq, Eq)]
struct AssetsChange {
    account: UncertainStorage<AssetAccount>,
    /// Undecoded: its layout depends on the account id width
    details: UncertainStorage<Vec<u8>>,
    block_hash: Option<[u8; 32]>,
}

impl FromBatchStorage for AssetsChange {
    fn from_batch(values: &BatchStorageValues, _coder: &CoderFactory) -> Result<Self, WalletError> {
        Ok(Self {
            account: values.decode(ACCOUNT)?,
            details: values.decode_with(DETAILS, |bytes| Ok(bytes.to_vec()))?,
            block_hash: values.block_hash,
        })
    }
}

#[derive(Default)]
struct AssetsState {
    subscription: Option<CallbackBatchStorageSubscription<AssetsChange>>,
    account: UncertainStorage<AssetAccount>,
    details: UncertainStorage<AssetDetails>,
}

struct Inner {
    context: BalanceUpdaterContext,
    account_path: StoragePath,
    details_path: StoragePath,
    /// On-chain asset id
    asset_id: u32,
    status: Observable<SyncStatus>,
    state: Mutex<AssetsState>,
}

pub struct AssetsBalanceUpdater {
    inner: Arc<Inner>,
}

impl AssetsBalanceUpdater {
    /// Updater for `asset_id` of the `pallet` instance.
    pub fn new(context: BalanceUpdaterContext, pallet: &str, asset_id: u32) -> Result<Self, WalletError> {
        let (Some(account_path), Some(details_path)) =
            (StoragePath::assets_account(pallet), StoragePath::assets_details(pallet))
        else {
            return Err(WalletError::MissingPallet(pallet.to_string()));
        };

        Ok(Self {
            inner: Arc::new(Inner {
                context,
                account_path,
                details_path,
                asset_id,
                status: Observable::new(SyncStatus::default()),
                state: Mutex::new(AssetsState::default()),
            }),
        })
    }
}

impl Inner {
    fn subscribe(self: &Arc<Self>) -> CallbackBatchStorageSubscription<AssetsChange> {
        let context = &self.context;
        let chain_id = &context.chain_asset_id.chain_id;
        let mut account_suffix = self.asset_id.to_le_bytes().to_vec();
        account_suffix.extend_from_slice(context.account_id.as_bytes());

        let requests = vec![
            BatchStorageRequest::new(
                StorageRequest::double_map(
                    self.account_path,
                    LocalStorageKeyFactory::create_with_suffix(self.account_path, chain_id, &account_suffix),
                    &self.asset_id,
                    &context.account_id,
                ),
                ACCOUNT,
            ),
            BatchStorageRequest::new(
                StorageRequest::map(
                    self.details_path,
                    LocalStorageKeyFactory::create_with_suffix(
                        self.details_path,
                        chain_id,
                        &self.asset_id.to_le_bytes(),
                    ),
                    &self.asset_id,
                ),
                DETAILS,
            ),
        ];

        let weak = Arc::downgrade(self);
        CallbackBatchStorageSubscription::new(requests, context.subscriptions.clone(), move |result| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    let result = inner.apply(result).await;
                    report_update(&inner.status, &inner.context.chain_asset_id, &result);
                }
            }
        })
    }

    async fn apply(&self, result: Result<AssetsChange, WalletError>) -> Result<(), WalletError> {
        let change = result?;
        let ethereum = self.context.ethereum;
        let details = match change.details {
            UncertainStorage::Defined(bytes) => UncertainStorage::Defined(
                bytes
                    .map(|bytes| AssetDetails::decode_bytes(&bytes, ethereum))
                    .transpose()?,
            ),
            UncertainStorage::Undefined => UncertainStorage::Undefined,
        };

        let mut state = self.state.lock().await;
        state.account = change.account.or_previous(&state.account);
        state.details = details.or_previous(&state.details);
        let (UncertainStorage::Defined(account), UncertainStorage::Defined(details)) = (&state.account, &state.details)
        else {
            return Ok(());
        };

        // Details-only changes carry no transfers of this account.
        let block_hash = change.account.is_defined().then_some(change.block_hash).flatten();
        let remote = asset_balance(
            &self.context.chain_asset_id,
            &self.context.account_id,
            account.as_ref(),
            details.as_ref(),
        );
        self.context.save_balance(remote, block_hash).await?;
        Ok(())
    }
}

#[async_trait]
impl BalanceUpdater for AssetsBalanceUpdater {
    async fn setup(&self) {
        let mut state = self.inner.state.lock().await;
        if state.subscription.as_ref().is_some_and(|s| s.is_active()) {
            return;
        }
        self.inner.status.set(SyncStatus::syncing());
        state.subscription = Some(self.inner.subscribe());
    }

    async fn throttle(&self) {
        let mut state = self.inner.state.lock().await;
        *state = AssetsState::default();
        self.inner.status.set(SyncStatus::default());
    }

    fn status(&self) -> &Observable<SyncStatus> {
        &self.inner.status
    }
}
