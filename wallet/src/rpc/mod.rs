//! JSON-RPC transport seam.
//!
//! Services talk to a node through [`JsonRpcEngine`]; the typed helpers in
//! [`JsonRpcEngineExt`] implement the Substrate method set on top of it.

pub mod types;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::WalletError;
use crate::hex_util::{decode_hex, encode_hex, parse_hash};

pub use types::{
    ChainProperties, ExtrinsicStatus, Header, RuntimeDispatchInfoJson, RuntimeVersion,
    SignedBlock, StorageChangeSet,
};
pub use ws::WsRpcEngine;

pub mod methods {
    pub const CHAIN_GET_BLOCK_HASH: &str = "chain_getBlockHash";
    pub const CHAIN_GET_HEADER: &str = "chain_getHeader";
    pub const CHAIN_GET_FINALIZED_HEAD: &str = "chain_getFinalizedHead";
    pub const CHAIN_GET_BLOCK: &str = "chain_getBlock";
    pub const STATE_GET_RUNTIME_VERSION: &str = "state_getRuntimeVersion";
    pub const STATE_GET_METADATA: &str = "state_getMetadata";
    pub const STATE_SUBSCRIBE_RUNTIME_VERSION: &str = "state_subscribeRuntimeVersion";
    pub const STATE_UNSUBSCRIBE_RUNTIME_VERSION: &str = "state_unsubscribeRuntimeVersion";
    pub const STATE_GET_STORAGE: &str = "state_getStorage";
    pub const STATE_CALL: &str = "state_call";
    pub const STATE_SUBSCRIBE_STORAGE: &str = "state_subscribeStorage";
    pub const STATE_UNSUBSCRIBE_STORAGE: &str = "state_unsubscribeStorage";
    pub const SYSTEM_ACCOUNT_NEXT_INDEX: &str = "system_accountNextIndex";
    pub const SYSTEM_CHAIN: &str = "system_chain";
    pub const SYSTEM_PROPERTIES: &str = "system_properties";
    pub const AUTHOR_SUBMIT_EXTRINSIC: &str = "author_submitExtrinsic";
    pub const AUTHOR_SUBMIT_AND_WATCH_EXTRINSIC: &str = "author_submitAndWatchExtrinsic";
    pub const AUTHOR_UNWATCH_EXTRINSIC: &str = "author_unwatchExtrinsic";
    pub const PAYMENT_QUERY_INFO: &str = "payment_queryInfo";
}

/// Notifications of one subscription. Dropping the stream unsubscribes.
pub type RpcSubscription = BoxStream<'static, Result<Value, WalletError>>;

/// Black-box request/subscribe interface to one chain connection.
#[async_trait]
pub trait JsonRpcEngine: Send + Sync {
    /// Perform a request; `timeout` overrides the engine's policy.
    async fn request(
        &self,
        method: &str,
        params: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, WalletError>;

    async fn subscribe(
        &self,
        method: &str,
        params: Vec<Value>,
        unsubscribe_method: &str,
    ) -> Result<RpcSubscription, WalletError>;
}

pub type SharedRpcEngine = Arc<dyn JsonRpcEngine>;

/// Typed Substrate methods available on every engine.
#[async_trait]
pub trait JsonRpcEngineExt: JsonRpcEngine {
    async fn call<R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<R, WalletError> {
        let value = self.request(method, params, None).await?;
        serde_json::from_value(value)
            .map_err(|e| WalletError::Rpc(format!("{method}: unexpected response: {e}")))
    }

    /// Hash of block `number`, or of the best block when `None`.
    async fn block_hash(&self, number: Option<u64>) -> Result<[u8; 32], WalletError> {
        let params = number.map(|n| vec![json!(n)]).unwrap_or_default();
        let hash: Option<String> = self.call(methods::CHAIN_GET_BLOCK_HASH, params).await?;
        let hash = hash.ok_or_else(|| WalletError::Rpc(format!("block {number:?} not found")))?;
        parse_hash(&hash)
    }

    async fn genesis_hash(&self) -> Result<[u8; 32], WalletError> {
        self.block_hash(Some(0)).await
    }

    async fn header(&self, hash: Option<[u8; 32]>) -> Result<Header, WalletError> {
        let params = hash.map(|h| vec![json!(encode_hex(&h))]).unwrap_or_default();
        let header: Option<Header> = self.call(methods::CHAIN_GET_HEADER, params).await?;
        header.ok_or_else(|| WalletError::Rpc("header not found".into()))
    }

    async fn finalized_head(&self) -> Result<[u8; 32], WalletError> {
        let hash: String = self.call(methods::CHAIN_GET_FINALIZED_HEAD, vec![]).await?;
        parse_hash(&hash)
    }

    async fn block(&self, hash: [u8; 32]) -> Result<SignedBlock, WalletError> {
        let block: Option<SignedBlock> = self
            .call(methods::CHAIN_GET_BLOCK, vec![json!(encode_hex(&hash))])
            .await?;
        block.ok_or_else(|| WalletError::Rpc(format!("block {} not found", encode_hex(&hash))))
    }

    async fn runtime_version(&self) -> Result<RuntimeVersion, WalletError> {
        self.call(methods::STATE_GET_RUNTIME_VERSION, vec![]).await
    }

    async fn metadata_bytes(&self) -> Result<Vec<u8>, WalletError> {
        let raw: String = self.call(methods::STATE_GET_METADATA, vec![]).await?;
        decode_hex(&raw)
    }

    async fn storage(
        &self,
        key: &[u8],
        at: Option<[u8; 32]>,
    ) -> Result<Option<Vec<u8>>, WalletError> {
        let mut params = vec![json!(encode_hex(key))];
        if let Some(at) = at {
            params.push(json!(encode_hex(&at)));
        }
        let raw: Option<String> = self.call(methods::STATE_GET_STORAGE, params).await?;
        raw.map(|raw| decode_hex(&raw)).transpose()
    }

    async fn state_call(&self, api_method: &str, data: &[u8]) -> Result<Vec<u8>, WalletError> {
        let raw: String = self
            .call(
                methods::STATE_CALL,
                vec![json!(api_method), json!(encode_hex(data))],
            )
            .await?;
        decode_hex(&raw)
    }

    async fn account_next_index(&self, address: &str) -> Result<u32, WalletError> {
        self.call(methods::SYSTEM_ACCOUNT_NEXT_INDEX, vec![json!(address)])
            .await
    }

    async fn submit_extrinsic(&self, extrinsic: &[u8]) -> Result<[u8; 32], WalletError> {
        let hash: String = self
            .call(
                methods::AUTHOR_SUBMIT_EXTRINSIC,
                vec![json!(encode_hex(extrinsic))],
            )
            .await?;
        parse_hash(&hash)
    }

    async fn query_info(&self, extrinsic: &[u8]) -> Result<RuntimeDispatchInfoJson, WalletError> {
        self.call(methods::PAYMENT_QUERY_INFO, vec![json!(encode_hex(extrinsic))])
            .await
    }

    async fn system_chain(&self) -> Result<String, WalletError> {
        self.call(methods::SYSTEM_CHAIN, vec![]).await
    }

    async fn system_properties(&self) -> Result<ChainProperties, WalletError> {
        self.call(methods::SYSTEM_PROPERTIES, vec![]).await
    }
}

impl<E: JsonRpcEngine + ?Sized> JsonRpcEngineExt for E {}
