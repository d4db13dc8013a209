//! Chain registry handed to every service constructor.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::error::WalletError;
use crate::model::{ChainId, ChainModel};
use crate::repository::DataChange;
use crate::rpc::SharedRpcEngine;
use crate::runtime::SharedRuntimeProvider;

const CHAIN_CHANGES_CAPACITY: usize = 64;

/// Per-chain connection and runtime lookup.
pub trait ChainRegistry: Send + Sync {
    fn connection(&self, chain_id: &str) -> Option<SharedRpcEngine>;

    fn runtime_provider(&self, chain_id: &str) -> Option<SharedRuntimeProvider>;

    fn chain(&self, chain_id: &str) -> Option<ChainModel>;

    fn chains(&self) -> Vec<ChainModel>;

    /// Chain set changes after the moment of subscription.
    fn subscribe_chains(&self) -> broadcast::Receiver<Vec<DataChange<ChainModel>>>;

    fn connection_or_error(&self, chain_id: &str) -> Result<SharedRpcEngine, WalletError> {
        self.connection(chain_id)
            .ok_or_else(|| WalletError::Rpc(format!("no connection for chain {chain_id}")))
    }

    fn runtime_provider_or_error(&self, chain_id: &str) -> Result<SharedRuntimeProvider, WalletError> {
        self.runtime_provider(chain_id)
            .ok_or_else(|| WalletError::Rpc(format!("no runtime provider for chain {chain_id}")))
    }
}

pub type SharedChainRegistry = Arc<dyn ChainRegistry>;

struct ChainEntry {
    chain: ChainModel,
    connection: SharedRpcEngine,
    runtime_provider: SharedRuntimeProvider,
}

/// In-process registry populated by the application at setup.
pub struct ChainContext {
    entries: RwLock<BTreeMap<ChainId, ChainEntry>>,
    changes: broadcast::Sender<Vec<DataChange<ChainModel>>>,
}

impl ChainContext {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHAIN_CHANGES_CAPACITY);
        Self {
            entries: RwLock::new(BTreeMap::new()),
            changes,
        }
    }

    /// Add or replace a chain, notifying subscribers with an insert or update.
    pub fn add_chain(
        &self,
        chain: ChainModel,
        connection: SharedRpcEngine,
        runtime_provider: SharedRuntimeProvider,
    ) {
        let change = {
            let mut entries = self.entries.write();
            let previous = entries.insert(
                chain.chain_id.clone(),
                ChainEntry {
                    chain: chain.clone(),
                    connection,
                    runtime_provider,
                },
            );
            if previous.is_some() {
                DataChange::Update(chain)
            } else {
                DataChange::Insert(chain)
            }
        };
        let _ = self.changes.send(vec![change]);
    }

    pub fn remove_chain(&self, chain_id: &str) {
        let removed = self.entries.write().remove(chain_id).is_some();
        if removed {
            tracing::debug!(chain = %chain_id, "chain removed from registry");
            let _ = self.changes.send(vec![DataChange::Delete(chain_id.to_string())]);
        }
    }
}

impl Default for ChainContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainRegistry for ChainContext {
    fn connection(&self, chain_id: &str) -> Option<SharedRpcEngine> {
        self.entries
            .read()
            .get(chain_id)
            .map(|entry| entry.connection.clone())
    }

    fn runtime_provider(&self, chain_id: &str) -> Option<SharedRuntimeProvider> {
        self.entries
            .read()
            .get(chain_id)
            .map(|entry| entry.runtime_provider.clone())
    }

    fn chain(&self, chain_id: &str) -> Option<ChainModel> {
        self.entries
            .read()
            .get(chain_id)
            .map(|entry| entry.chain.clone())
    }

    fn chains(&self) -> Vec<ChainModel> {
        self.entries
            .read()
            .values()
            .map(|entry| entry.chain.clone())
            .collect()
    }

    fn subscribe_chains(&self) -> broadcast::Receiver<Vec<DataChange<ChainModel>>> {
        self.changes.subscribe()
    }
}
