use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use proptest::prelude::*;
use substrate_wallet::extrinsic::call::{CallArg, CallPath, RuntimeCall};
use substrate_wallet::extrinsic::proxy::ProxyGraph;
use substrate_wallet::extrinsic::sender::{ExtrinsicSenderResolution, ExtrinsicSenderResolver, ProxySenderResolver};
use substrate_wallet::extrinsic::splitter::pack;
use substrate_wallet::extrinsic::ExtrinsicBuilder;
use substrate_wallet::model::{ChainAccount, CryptoType, MetaAccount, ProxyAccount, ProxyType, WalletType};
use substrate_wallet::repository::{InMemoryRepository, Repository};
use substrate_wallet::testing::{account, polkadot_chain};
use substrate_wallet::WalletError;

fn proxied(id: &str, account_byte: u8, proxy_byte: u8, proxy_type: ProxyType) -> MetaAccount {
    MetaAccount {
        meta_id: id.into(),
        name: id.into(),
        wallet_type: WalletType::Proxied,
        substrate_account_id: None,
        substrate_public_key: None,
        substrate_crypto_type: CryptoType::Sr25519,
        ethereum_address: None,
        ethereum_public_key: None,
        chain_accounts: vec![ChainAccount {
            chain_id: polkadot_chain().chain_id,
            account_id: account(account_byte),
            public_key: vec![],
            crypto_type: CryptoType::Sr25519,
            proxy: Some(ProxyAccount {
                account_id: account(proxy_byte),
                proxy_type,
            }),
        }],
    }
}

fn secrets(id: &str, account_byte: u8) -> MetaAccount {
    MetaAccount {
        meta_id: id.into(),
        name: id.into(),
        wallet_type: WalletType::Secrets,
        substrate_account_id: Some(account(account_byte)),
        substrate_public_key: Some(vec![account_byte; 32]),
        substrate_crypto_type: CryptoType::Sr25519,
        ethereum_address: None,
        ethereum_public_key: None,
        chain_accounts: vec![],
    }
}

fn chill() -> RuntimeCall {
    RuntimeCall::new(CallPath::new("Staking", "chill"))
}

/// Real accounts of nested `Proxy.proxy` calls, outermost first.
fn proxy_reals(call: &RuntimeCall) -> Vec<Vec<u8>> {
    let mut reals = Vec::new();
    let mut current = call;
    while current.path == CallPath::proxy() {
        let (Some(CallArg::Encoded(real)), Some(CallArg::Call(inner))) = (current.args.first(), current.args.get(2))
        else {
            break;
        };
        reals.push(real.clone());
        current = inner;
    }
    reals
}

async fn resolve(wallets: Vec<MetaAccount>) -> Result<(ExtrinsicSenderResolution, Vec<ExtrinsicBuilder>), WalletError> {
    let repository = Arc::new(InMemoryRepository::new());
    repository.save(wallets.clone(), vec![]).await?;
    let resolver = ProxySenderResolver::new(wallets[0].clone(), polkadot_chain(), repository);
    let builder = ExtrinsicBuilder::new(1, 1, [0u8; 32]).adding_call(chill());
    resolver.resolve_sender(vec![builder]).await
}

#[tokio::test]
async fn nested_proxy_is_signed_by_end_of_chain() {
    // A is proxied by B for staking, B is proxied by C for anything; C signs.
    let wallets = vec![
        proxied("a", 1, 2, ProxyType::Staking),
        proxied("b", 2, 3, ProxyType::Any),
        secrets("c", 3),
    ];
    let (resolution, builders) = resolve(wallets).await.unwrap();

    let ExtrinsicSenderResolution::Proxy(proxy) = resolution else {
        panic!("expected proxy resolution");
    };
    assert_eq!(proxy.proxy_account.meta_id, "c");
    assert_eq!(proxy.proxied_account.account_id, account(1));
    assert_eq!(proxy.paths[&chill().path].len(), 2);

    let call = &builders[0].calls()[0];
    let reals = proxy_reals(call);
    assert_eq!(reals.len(), 2);
    // Outer hop acts for B, inner hop for A.
    assert!(reals[0].ends_with(account(2).as_bytes()));
    assert!(reals[1].ends_with(account(1).as_bytes()));
}

#[tokio::test]
async fn proxy_cycle_terminates() {
    let wallets = vec![
        proxied("a", 1, 2, ProxyType::Any),
        proxied("b", 2, 3, ProxyType::Any),
        proxied("c", 3, 1, ProxyType::Any),
    ];
    let graph = ProxyGraph::build(&wallets, &polkadot_chain());
    let paths = graph.find_paths(&account(1), &BTreeSet::from([ProxyType::Any]));
    assert_eq!(paths.len(), 2);
    assert!(paths.iter().all(|path| path.len() <= 2));

    // Nobody in the cycle can sign.
    let err = resolve(wallets).await.err().unwrap();
    assert!(matches!(err, WalletError::ProxyNotFound(_)));
}

#[tokio::test]
async fn transfer_needs_any_proxy() {
    let wallets = vec![proxied("a", 1, 2, ProxyType::Staking), secrets("b", 2)];
    let repository = Arc::new(InMemoryRepository::new());
    repository.save(wallets.clone(), vec![]).await.unwrap();
    let resolver = ProxySenderResolver::new(wallets[0].clone(), polkadot_chain(), repository);

    let builder = ExtrinsicBuilder::new(1, 1, [0u8; 32]).adding_call(RuntimeCall::transfer_keep_alive(&account(9), 10));
    let err = resolver.resolve_sender(vec![builder]).await.err().unwrap();
    assert!(matches!(err, WalletError::ProxyNotFound(_)));
}

fn call(index: usize) -> RuntimeCall {
    RuntimeCall::new(CallPath::new("Test", format!("call_{index}")))
}

proptest! {
    #[test]
    fn packing_respects_limit_and_is_greedy(
        weights in proptest::collection::vec(1u64..=100, 1..40),
        limit in 100u64..=300,
    ) {
        let calls: Vec<RuntimeCall> = (0..weights.len()).map(call).collect();
        let by_path: BTreeMap<CallPath, u64> = calls
            .iter()
            .zip(&weights)
            .map(|(call, weight)| (call.path.clone(), *weight))
            .collect();

        let chunks = pack(calls.clone(), &by_path, limit).unwrap();

        let flattened: Vec<RuntimeCall> = chunks.iter().flatten().cloned().collect();
        prop_assert_eq!(flattened, calls);

        let totals: Vec<u64> = chunks
            .iter()
            .map(|chunk| chunk.iter().map(|call| by_path[&call.path]).sum())
            .collect();
        for total in &totals {
            prop_assert!(*total <= limit);
        }
        // No chunk could have taken the first call of the next one.
        for (index, chunk) in chunks.iter().enumerate().skip(1) {
            let first = by_path[&chunk[0].path];
            prop_assert!(totals[index - 1] + first > limit);
        }
    }
}
