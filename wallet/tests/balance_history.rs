use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use codec::Encode;
use substrate_wallet::balance::types::{AccountData, AccountInfo};
use substrate_wallet::balance::{BalanceRepositories, BalanceSubscriptionService};
use substrate_wallet::config::SyncConfig;
use substrate_wallet::context::ChainContext;
use substrate_wallet::events::{EventCenter, WalletEvent};
use substrate_wallet::extrinsic::RuntimeCall;
use substrate_wallet::model::{AssetBalance, ChainAssetId};
use substrate_wallet::repository::Repository;
use substrate_wallet::rpc::methods;
use substrate_wallet::storage::{map_key, StoragePath};
use substrate_wallet::testing::{
    account, block_json, polkadot_chain, polkadot_coder, polkadot_provider, signed_extrinsic, MockRpcEngine,
    POLKADOT_CHAIN_ID,
};

fn account_info(free: u128) -> Vec<u8> {
    AccountInfo {
        nonce: 0,
        consumers: 0,
        providers: 1,
        sufficients: 0,
        data: AccountData {
            free,
            ..Default::default()
        },
    }
    .encode()
}

async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn transfer_is_recorded_and_zero_balance_removed() {
    let owner = account(1);
    let engine = Arc::new(MockRpcEngine::new());
    let system_key = map_key(&polkadot_coder(), StoragePath::SYSTEM_ACCOUNT, &owner).unwrap();
    engine.set_storage(&system_key, Some(&account_info(100)));

    let registry = Arc::new(ChainContext::new());
    registry.add_chain(polkadot_chain(), engine.clone(), polkadot_provider());
    let repositories = BalanceRepositories::in_memory();
    let event_center = Arc::new(EventCenter::default());
    let mut events = event_center.subscribe();
    let service = BalanceSubscriptionService::new(
        registry,
        repositories.clone(),
        event_center.clone(),
        SyncConfig::default(),
    );
    let subscription = service.subscribe_account(POLKADOT_CHAIN_ID, owner.clone()).await.unwrap();

    let identifier = AssetBalance::identifier_for(&ChainAssetId::new(POLKADOT_CHAIN_ID, 0), &owner);
    let balances = repositories.balances.clone();
    assert!(
        wait_until(|| {
            let balances = balances.clone();
            let identifier = identifier.clone();
            async move { matches!(balances.fetch(&identifier).await, Ok(Some(row)) if row.free == 100) }
        })
        .await
    );

    let transfer = signed_extrinsic(&owner, 4, RuntimeCall::transfer_keep_alive(&account(2), 60)).unwrap();
    let block = block_json(12, &[transfer]);
    engine.on(methods::CHAIN_GET_BLOCK, move |_| Ok(block.clone()));
    engine.set_storage(&system_key, Some(&account_info(40)));

    let history = repositories.history.clone();
    assert!(
        wait_until(|| {
            let history = history.clone();
            async move { history.fetch_all().await.map(|items| items.len() == 1).unwrap_or(false) }
        })
        .await
    );
    let item = history.fetch_all().await.unwrap().remove(0);
    assert!(item.is_outgoing());
    assert_eq!(item.peer, Some(account(2)));
    assert_eq!(item.amount, Some(60));
    assert_eq!(item.nonce, Some(4));
    assert_eq!(item.block_number, 12);

    let mut processed = false;
    while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
        if let WalletEvent::TransactionsProcessed { count, .. } = event {
            assert_eq!(count, 1);
            processed = true;
            break;
        }
    }
    assert!(processed);

    engine.set_storage(&system_key, Some(&account_info(0)));
    assert!(
        wait_until(|| {
            let balances = balances.clone();
            let identifier = identifier.clone();
            async move { matches!(balances.fetch(&identifier).await, Ok(None)) }
        })
        .await
    );

    subscription.throttle().await;
}
