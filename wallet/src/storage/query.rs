//! One-shot storage reads through `state_getStorage`.

use codec::Decode;

use crate::error::WalletError;
use crate::rpc::{JsonRpcEngineExt, SharedRpcEngine};
use crate::runtime::SharedRuntimeProvider;
use crate::storage::StorageRequest;

pub struct StorageQuery {
    engine: SharedRpcEngine,
    runtime_provider: SharedRuntimeProvider,
}

impl StorageQuery {
    pub fn new(engine: SharedRpcEngine, runtime_provider: SharedRuntimeProvider) -> Self {
        Self {
            engine,
            runtime_provider,
        }
    }

    pub async fn fetch_raw(
        &self,
        request: &StorageRequest,
        at: Option<[u8; 32]>,
    ) -> Result<Option<Vec<u8>>, WalletError> {
        let coder = self.runtime_provider.fetch_coder_factory().await?;
        let key = request.encode_key(&coder)?;
        self.engine.storage(&key, at).await
    }

    pub async fn fetch<T: Decode>(
        &self,
        request: &StorageRequest,
        at: Option<[u8; 32]>,
    ) -> Result<Option<T>, WalletError> {
        self.fetch_raw(request, at)
            .await?
            .map(|bytes| T::decode(&mut bytes.as_slice()).map_err(WalletError::from))
            .transpose()
    }
}
