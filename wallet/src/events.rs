//! Process-wide domain events.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::address::AccountId;
use crate::model::{ChainAssetId, ChainId};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalletEvent {
    /// A balance row was inserted, updated or deleted.
    AssetBalanceChanged {
        chain_asset_id: ChainAssetId,
        account_id: AccountId,
        block_hash: Option<[u8; 32]>,
    },
    /// The lock or hold set of an account changed.
    AssetLocksChanged {
        chain_asset_id: ChainAssetId,
        account_id: AccountId,
    },
    /// Matched transfers of a block were stored.
    TransactionsProcessed {
        chain_id: ChainId,
        block_hash: [u8; 32],
        count: usize,
    },
}

/// Broadcast hub for [`WalletEvent`]s. Slow receivers lag rather than block
/// the sender.
pub struct EventCenter {
    sender: broadcast::Sender<WalletEvent>,
}

pub type SharedEventCenter = Arc<EventCenter>;

impl EventCenter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn notify(&self, event: WalletEvent) {
        tracing::trace!(?event, "wallet event");
        // No receivers is not an error.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventCenter {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}
