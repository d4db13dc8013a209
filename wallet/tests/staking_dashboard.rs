use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codec::{Compact, Encode};
use substrate_wallet::address::AccountId;
use substrate_wallet::config::SyncConfig;
use substrate_wallet::context::ChainContext;
use substrate_wallet::model::{CryptoType, MetaAccount, StakingType, WalletType};
use substrate_wallet::repository::{DataChange, Identifiable, InMemoryRepository, Repository};
use substrate_wallet::storage::{map_key, storage_key, StoragePath};
use substrate_wallet::sync::staking::model::{DashboardState, RelaychainPart};
use substrate_wallet::sync::staking::offchain::{OffchainIndexer, OffchainRequest, OffchainResponse};
use substrate_wallet::sync::{MultistakingRepositories, MultistakingSyncService};
use substrate_wallet::testing::{account, polkadot_chain, polkadot_coder, polkadot_provider, MockRpcEngine};
use substrate_wallet::WalletError;
use tokio::sync::broadcast;

/// In-memory repository that counts save batches.
struct CountingRepository<T> {
    inner: InMemoryRepository<T>,
    saves: AtomicUsize,
}

impl<T: Clone> CountingRepository<T> {
    fn new() -> Self {
        Self {
            inner: InMemoryRepository::new(),
            saves: AtomicUsize::new(0),
        }
    }

    fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T> Repository<T> for CountingRepository<T>
where
    T: Identifiable + Clone + PartialEq + Send + Sync + 'static,
{
    async fn fetch(&self, identifier: &str) -> Result<Option<T>, WalletError> {
        self.inner.fetch(identifier).await
    }

    async fn fetch_all(&self) -> Result<Vec<T>, WalletError> {
        self.inner.fetch_all().await
    }

    async fn save(&self, updating: Vec<T>, deleting: Vec<String>) -> Result<(), WalletError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(updating, deleting).await
    }

    fn subscribe(&self) -> broadcast::Receiver<Vec<DataChange<T>>> {
        self.inner.subscribe()
    }
}

async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

struct EmptyIndexer;

#[async_trait]
impl OffchainIndexer for EmptyIndexer {
    async fn fetch(&self, _request: OffchainRequest) -> Result<OffchainResponse, WalletError> {
        Ok(OffchainResponse::default())
    }
}

fn wallet(byte: u8) -> MetaAccount {
    MetaAccount {
        meta_id: "w1".into(),
        name: "main".into(),
        wallet_type: WalletType::Secrets,
        substrate_account_id: Some(account(byte)),
        substrate_public_key: Some(vec![byte; 32]),
        substrate_crypto_type: CryptoType::Sr25519,
        ethereum_address: None,
        ethereum_public_key: None,
        chain_accounts: vec![],
    }
}

fn ledger(stash: &AccountId, active: u128) -> Vec<u8> {
    let mut bytes = stash.encode();
    Compact(active).encode_to(&mut bytes);
    Compact(active).encode_to(&mut bytes);
    Vec::<(Compact<u128>, Compact<u32>)>::new().encode_to(&mut bytes);
    Vec::<u32>::new().encode_to(&mut bytes);
    bytes
}

#[tokio::test]
async fn relaychain_part_persisted_once_all_fields_known() {
    let coder = polkadot_coder();
    let stash = account(1);
    let bonded_key = map_key(&coder, StoragePath::STAKING_BONDED, &stash).unwrap();
    let ledger_key = map_key(&coder, StoragePath::STAKING_LEDGER, &stash).unwrap();
    let era_key = storage_key(&coder, StoragePath::STAKING_ACTIVE_ERA, &[]).unwrap();
    let nominators_key = map_key(&coder, StoragePath::STAKING_NOMINATORS, &stash).unwrap();
    let validators_key = map_key(&coder, StoragePath::STAKING_VALIDATORS, &stash).unwrap();

    // Self-controlled stash whose ledger is not there yet; nominations and
    // validator prefs have not been reported by the node.
    let engine = Arc::new(MockRpcEngine::new());
    engine.set_storage(&bonded_key, Some(&stash.encode()));
    engine.set_storage(&era_key, Some(&(40u32, None::<u64>).encode()));
    engine.withhold_initial_value(&nominators_key);
    engine.withhold_initial_value(&validators_key);

    let registry = Arc::new(ChainContext::new());
    registry.add_chain(polkadot_chain(), engine.clone(), polkadot_provider());
    let relaychain = Arc::new(CountingRepository::<RelaychainPart>::new());
    let repositories = MultistakingRepositories {
        relaychain: relaychain.clone(),
        ..MultistakingRepositories::in_memory()
    };
    let service = MultistakingSyncService::new(
        registry,
        repositories.clone(),
        Arc::new(EmptyIndexer),
        SyncConfig {
            offchain_debounce: Duration::from_millis(10),
            ..Default::default()
        },
        Some(wallet(1)),
    );
    service.setup().await;

    // Era and an empty ledger arrive first: nothing is persisted.
    assert!(eventually(|| engine.subscribed_to(&nominators_key)).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(relaychain.saves(), 0);
    assert!(relaychain.fetch_all().await.unwrap().is_empty());

    engine.set_storage_batch(&[
        (ledger_key, Some(ledger(&stash, 250))),
        (nominators_key, None),
        (validators_key, None),
    ]);
    assert!(eventually(|| relaychain.saves() == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(relaychain.saves(), 1);

    let parts = relaychain.fetch_all().await.unwrap();
    assert_eq!(parts.len(), 1);
    let state = parts[0].state.clone().unwrap();
    assert_eq!(state.stash, stash);
    assert_eq!(state.controller, stash);
    assert_eq!(state.era.map(|era| era.index), Some(40));

    let item = repositories
        .dashboard("w1")
        .await
        .unwrap()
        .into_iter()
        .find(|item| item.option.option.staking_type == StakingType::Relaychain)
        .expect("relaychain dashboard item");
    assert_eq!(item.stake, Some(250));
    assert_eq!(item.state, DashboardState::Inactive);

    service.throttle().await;
}
