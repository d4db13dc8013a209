//! Checks against a running Substrate node.
//!
//! Tests marked with #[ignore] require a node on `ws://127.0.0.1:9944`
//! (override with `WALLET_ENDPOINT`).

use std::sync::Arc;

use substrate_wallet::rpc::{JsonRpcEngineExt, SharedRpcEngine, WsRpcEngine};
use substrate_wallet::runtime::{RpcRuntimeProvider, RuntimeProvider};

fn endpoint() -> String {
    std::env::var("WALLET_ENDPOINT").unwrap_or_else(|_| "ws://127.0.0.1:9944".to_string())
}

#[tokio::test]
#[ignore]
async fn connects_and_reads_runtime_version() {
    let engine = WsRpcEngine::connect(&endpoint()).await.expect("connect");
    assert!(engine.is_connected().await);

    let version = engine.runtime_version().await.expect("runtime version");
    assert!(version.spec_version > 0);
    let genesis = engine.genesis_hash().await.expect("genesis");
    assert_ne!(genesis, [0u8; 32]);
}

#[tokio::test]
#[ignore]
async fn metadata_snapshot_matches_runtime_version() {
    let engine: SharedRpcEngine = Arc::new(WsRpcEngine::connect(&endpoint()).await.expect("connect"));
    let provider = RpcRuntimeProvider::new(engine.clone());

    let factory = provider.fetch_coder_factory().await.expect("coder factory");
    let version = engine.runtime_version().await.expect("runtime version");
    assert_eq!(factory.spec_version, version.spec_version);
    assert!(factory.has_pallet("System"));

    // Second fetch is served from the cache.
    let again = provider.fetch_coder_factory().await.expect("coder factory");
    assert!(Arc::ptr_eq(&factory, &again));
}
