//! Sources of the current [`CoderFactory`].
//!
//! Long-lived services must ask the provider for the factory on every use
//! instead of holding on to one: a runtime upgrade replaces it.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::WalletError;
use crate::rpc::{methods, JsonRpcEngineExt, RuntimeVersion, SharedRpcEngine};
use crate::runtime::coder::CoderFactory;

#[async_trait]
pub trait RuntimeProvider: Send + Sync {
    /// Coder factory of the runtime currently live on chain.
    async fn fetch_coder_factory(&self) -> Result<Arc<CoderFactory>, WalletError>;
}

pub type SharedRuntimeProvider = Arc<dyn RuntimeProvider>;

/// Downloads metadata over RPC and caches it per spec version.
///
/// A `state_subscribeRuntimeVersion` stream tracks the live spec version, so
/// a fetch whose snapshot matches it is answered without any RPC. Without an
/// open stream every fetch checks `state_getRuntimeVersion` first.
pub struct RpcRuntimeProvider {
    engine: SharedRpcEngine,
    cached: RwLock<Option<Arc<CoderFactory>>>,
    /// Spec version last announced by the node; `None` while no stream is open
    announced: Arc<RwLock<Option<u32>>>,
    /// Held only while metadata downloads so concurrent callers share one
    download: Mutex<()>,
    watcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl RpcRuntimeProvider {
    pub fn new(engine: SharedRpcEngine) -> Self {
        Self {
            engine,
            cached: RwLock::new(None),
            announced: Arc::new(RwLock::new(None)),
            download: Mutex::new(()),
            watcher: parking_lot::Mutex::new(None),
        }
    }

    /// Drop the cached snapshot; the next fetch downloads metadata again.
    pub fn invalidate(&self) {
        *self.cached.write() = None;
    }

    /// Snapshot matching the announced spec version.
    fn current(&self) -> Option<Arc<CoderFactory>> {
        let announced = (*self.announced.read())?;
        self.cached
            .read()
            .as_ref()
            .filter(|factory| factory.spec_version == announced)
            .cloned()
    }

    fn cached_for(&self, spec_version: u32) -> Option<Arc<CoderFactory>> {
        self.cached
            .read()
            .as_ref()
            .filter(|factory| factory.spec_version == spec_version)
            .cloned()
    }

    fn ensure_version_watcher(&self) {
        let mut watcher = self.watcher.lock();
        if watcher.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let engine = self.engine.clone();
        let announced = self.announced.clone();
        *watcher = Some(tokio::spawn(async move {
            if let Err(e) = watch_runtime_version(engine, &announced).await {
                tracing::debug!(error = %e, "runtime version stream stopped");
            }
            *announced.write() = None;
        }));
    }

    async fn download(&self, version: RuntimeVersion) -> Result<Arc<CoderFactory>, WalletError> {
        let _download = self.download.lock().await;
        // Another caller may have finished the same download meanwhile.
        if let Some(factory) = self.cached_for(version.spec_version) {
            return Ok(factory);
        }
        if let Some(previous) = self.cached.read().as_ref() {
            tracing::info!(
                local = previous.spec_version,
                remote = version.spec_version,
                "runtime upgraded, refreshing metadata"
            );
        }

        let metadata = self.engine.metadata_bytes().await?;

        // An upgrade between the two calls would pair metadata with the wrong version.
        let confirmed = self.engine.runtime_version().await?;
        if confirmed.spec_version != version.spec_version {
            return Err(WalletError::InvalidMetadata {
                local: version.spec_version,
                remote: confirmed.spec_version,
            });
        }

        let factory = Arc::new(CoderFactory::from_metadata(&metadata, &version)?);
        tracing::debug!(
            spec_version = factory.spec_version,
            tx_version = factory.tx_version,
            "coder factory ready"
        );
        *self.cached.write() = Some(factory.clone());
        Ok(factory)
    }
}

impl Drop for RpcRuntimeProvider {
    fn drop(&mut self) {
        if let Some(task) = self.watcher.get_mut().take() {
            task.abort();
        }
    }
}

async fn watch_runtime_version(
    engine: SharedRpcEngine,
    announced: &RwLock<Option<u32>>,
) -> Result<(), WalletError> {
    let mut stream = engine
        .subscribe(
            methods::STATE_SUBSCRIBE_RUNTIME_VERSION,
            vec![],
            methods::STATE_UNSUBSCRIBE_RUNTIME_VERSION,
        )
        .await?;
    while let Some(notification) = stream.next().await {
        let version: RuntimeVersion = serde_json::from_value(notification?).map_err(|e| {
            WalletError::Serialization(format!("runtime version notification: {e}"))
        })?;
        tracing::trace!(spec_version = version.spec_version, "runtime version announced");
        *announced.write() = Some(version.spec_version);
    }
    Err(WalletError::SubscriptionClosed(
        methods::STATE_SUBSCRIBE_RUNTIME_VERSION.into(),
    ))
}

#[async_trait]
impl RuntimeProvider for RpcRuntimeProvider {
    async fn fetch_coder_factory(&self) -> Result<Arc<CoderFactory>, WalletError> {
        self.ensure_version_watcher();
        if let Some(factory) = self.current() {
            return Ok(factory);
        }

        let version = self.engine.runtime_version().await?;
        if let Some(factory) = self.cached_for(version.spec_version) {
            return Ok(factory);
        }
        self.download(version).await
    }
}

/// Fixed factory, replaceable to simulate runtime upgrades.
pub struct StaticRuntimeProvider {
    factory: RwLock<Arc<CoderFactory>>,
}

impl StaticRuntimeProvider {
    pub fn new(factory: CoderFactory) -> Self {
        Self {
            factory: RwLock::new(Arc::new(factory)),
        }
    }

    pub fn replace(&self, factory: CoderFactory) {
        *self.factory.write() = Arc::new(factory);
    }
}

#[async_trait]
impl RuntimeProvider for StaticRuntimeProvider {
    async fn fetch_coder_factory(&self) -> Result<Arc<CoderFactory>, WalletError> {
        Ok(self.factory.read().clone())
    }
}
