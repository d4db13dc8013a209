//! Local transaction history recovered from blocks.
//!
//! When a balance subscription reports a change it also reports the block the
//! change landed in. The block body is fetched with `chain_getBlock`, every
//! extrinsic is decoded and matched with [`TransferCall::parse`], and the ones
//! involving the account are stored as [`TransactionHistoryItem`]s.

use chrono::{DateTime, TimeZone, Utc};
use codec::{Compact, Decode};
use serde::{Deserialize, Serialize};

use crate::address::AccountId;
use crate::error::WalletError;
use crate::events::{SharedEventCenter, WalletEvent};
use crate::extrinsic::{decode_extrinsic, extrinsic_hash, CallPath, DecodedExtrinsic};
use crate::model::{ChainAssetId, ChainModel};
use crate::repository::{Identifiable, SharedRepository};
use crate::rpc::{JsonRpcEngineExt, SharedRpcEngine};
use crate::runtime::{CoderFactory, SharedRuntimeProvider};
use crate::transfer::TransferCall;

/// One extrinsic of a block that involves the tracked account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionHistoryItem {
    pub chain_asset_id: ChainAssetId,
    /// Account whose history this item belongs to
    pub account_id: AccountId,
    pub block_hash: [u8; 32],
    pub block_number: u64,
    pub extrinsic_index: u32,
    pub extrinsic_hash: [u8; 32],
    pub call: CallPath,
    pub sender: AccountId,
    /// Counterparty of a transfer: the receiver when the account sent it,
    /// the sender otherwise
    pub peer: Option<AccountId>,
    pub amount: Option<u128>,
    pub nonce: Option<u32>,
    pub tip: u128,
    /// Block time from the `Timestamp.set` inherent
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TransactionHistoryItem {
    pub fn is_outgoing(&self) -> bool {
        self.sender == self.account_id
    }
}

impl Identifiable for TransactionHistoryItem {
    fn identifier(&self) -> String {
        format!(
            "{}-{}-{}",
            self.chain_asset_id,
            self.account_id.to_hex(),
            hex::encode(self.extrinsic_hash)
        )
    }
}

/// Matches extrinsics of one chain against one account.
pub struct ExtrinsicProcessor {
    account_id: AccountId,
    chain: ChainModel,
}

/// Position of an extrinsic inside its block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockPosition {
    pub block_hash: [u8; 32],
    pub block_number: u64,
    pub extrinsic_index: u32,
    pub timestamp: Option<DateTime<Utc>>,
}

impl ExtrinsicProcessor {
    pub fn new(account_id: AccountId, chain: ChainModel) -> Self {
        Self { account_id, chain }
    }

    /// History item for `extrinsic`, if it is signed and the account sent it
    /// or receives its transfer.
    pub fn process(
        &self,
        extrinsic: &[u8],
        position: BlockPosition,
        coder: &CoderFactory,
    ) -> Option<TransactionHistoryItem> {
        let decoded = match decode_extrinsic(extrinsic, coder, self.chain.is_ethereum_based(), &[]) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::trace!(index = position.extrinsic_index, error = %e, "skipping undecodable extrinsic");
                return None;
            }
        };
        let DecodedExtrinsic { signer, extra, call } = decoded;
        let sender = signer?;
        let matched = TransferCall::parse(&call, coder, &self.chain)?;

        let is_sender = sender == self.account_id;
        if !matched.involves(&self.account_id, Some(&sender)) {
            return None;
        }
        if !matched.is_transfer() && !is_sender {
            return None;
        }

        let peer = if is_sender {
            matched.destination().cloned()
        } else {
            Some(sender.clone())
        };
        let asset_id = matched.asset_id(&self.chain)?;

        Some(TransactionHistoryItem {
            chain_asset_id: ChainAssetId::new(self.chain.chain_id.clone(), asset_id),
            account_id: self.account_id.clone(),
            block_hash: position.block_hash,
            block_number: position.block_number,
            extrinsic_index: position.extrinsic_index,
            extrinsic_hash: extrinsic_hash(extrinsic),
            call: matched.path().clone(),
            sender,
            peer,
            amount: matched.amount(),
            nonce: extra.nonce,
            tip: extra.tip,
            timestamp: position.timestamp,
        })
    }
}

/// Time of the block carrying `extrinsics`, read from its unsigned
/// `Timestamp.set` inherent.
pub fn block_timestamp(extrinsics: &[Vec<u8>], coder: &CoderFactory) -> Option<DateTime<Utc>> {
    let (pallet, call) = coder.call_index("Timestamp", "set").ok()?;
    extrinsics.iter().find_map(|extrinsic| {
        let decoded = decode_extrinsic(extrinsic, coder, false, &[]).ok()?;
        if decoded.signer.is_some() {
            return None;
        }
        if decoded.call.get(..2)? != [pallet, call] {
            return None;
        }
        let Compact(millis) = Compact::<u64>::decode(&mut &decoded.call[2..]).ok()?;
        Utc.timestamp_millis_opt(i64::try_from(millis).ok()?).single()
    })
}

/// Fetches blocks on demand and stores the matched history of one account.
pub struct BlockHistoryProcessor {
    engine: SharedRpcEngine,
    runtime_provider: SharedRuntimeProvider,
    processor: ExtrinsicProcessor,
    repository: SharedRepository<TransactionHistoryItem>,
    event_center: Option<SharedEventCenter>,
}

impl BlockHistoryProcessor {
    pub fn new(
        engine: SharedRpcEngine,
        runtime_provider: SharedRuntimeProvider,
        account_id: AccountId,
        chain: ChainModel,
        repository: SharedRepository<TransactionHistoryItem>,
    ) -> Self {
        Self {
            engine,
            runtime_provider,
            processor: ExtrinsicProcessor::new(account_id, chain),
            repository,
            event_center: None,
        }
    }

    pub fn with_event_center(mut self, event_center: SharedEventCenter) -> Self {
        self.event_center = Some(event_center);
        self
    }

    pub fn chain_id(&self) -> &str {
        &self.processor.chain.chain_id
    }

    /// Match every extrinsic of `block_hash` and store the results.
    pub async fn process(&self, block_hash: [u8; 32]) -> Result<Vec<TransactionHistoryItem>, WalletError> {
        let block = self.engine.block(block_hash).await?;
        let block_number = block.block.header.block_number()?;
        let coder = self.runtime_provider.fetch_coder_factory().await?;

        let extrinsics = block.extrinsics()?;
        let timestamp = block_timestamp(&extrinsics, &coder);

        let items: Vec<TransactionHistoryItem> = extrinsics
            .iter()
            .enumerate()
            .filter_map(|(index, extrinsic)| {
                let position = BlockPosition {
                    block_hash,
                    block_number,
                    extrinsic_index: index as u32,
                    timestamp,
                };
                self.processor.process(extrinsic, position, &coder)
            })
            .collect();

        tracing::debug!(
            chain = %self.chain_id(),
            block = block_number,
            matched = items.len(),
            "processed block transactions"
        );
        if items.is_empty() {
            return Ok(items);
        }

        self.repository.save(items.clone(), vec![]).await?;
        if let Some(event_center) = &self.event_center {
            event_center.notify(WalletEvent::TransactionsProcessed {
                chain_id: self.chain_id().to_string(),
                block_hash,
                count: items.len(),
            });
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::events::EventCenter;
    use crate::extrinsic::RuntimeCall;
    use crate::repository::{InMemoryRepository, Repository};
    use crate::rpc::methods;
    use crate::testing::{
        account, block_json, mock_block_hash, polkadot_chain, polkadot_coder, polkadot_provider, signed_extrinsic,
        timestamp_inherent, MockRpcEngine,
    };

    fn position() -> BlockPosition {
        BlockPosition {
            block_hash: mock_block_hash(7),
            block_number: 7,
            extrinsic_index: 1,
            timestamp: None,
        }
    }

    #[test]
    fn test_incoming_transfer_names_sender_as_peer() {
        let coder = polkadot_coder();
        let extrinsic = signed_extrinsic(&account(1), 3, RuntimeCall::transfer_keep_alive(&account(2), 500)).unwrap();
        let processor = ExtrinsicProcessor::new(account(2), polkadot_chain());

        let item = processor.process(&extrinsic, position(), &coder).unwrap();
        assert!(!item.is_outgoing());
        assert_eq!(item.peer, Some(account(1)));
        assert_eq!(item.amount, Some(500));
        assert_eq!(item.nonce, Some(3));
        assert_eq!(item.chain_asset_id.asset_id, 0);
        assert_eq!(item.extrinsic_hash, extrinsic_hash(&extrinsic));
    }

    #[test]
    fn test_foreign_calls_are_skipped() {
        let coder = polkadot_coder();
        let processor = ExtrinsicProcessor::new(account(5), polkadot_chain());

        let transfer = signed_extrinsic(&account(1), 0, RuntimeCall::transfer_keep_alive(&account(2), 1)).unwrap();
        assert!(processor.process(&transfer, position(), &coder).is_none());

        let chill = signed_extrinsic(&account(1), 0, RuntimeCall::new(CallPath::new("Staking", "chill"))).unwrap();
        assert!(processor.process(&chill, position(), &coder).is_none());
        assert!(processor.process(&[0x01, 0x02], position(), &coder).is_none());
    }

    #[test]
    fn test_own_generic_call_is_recorded() {
        let coder = polkadot_coder();
        let processor = ExtrinsicProcessor::new(account(1), polkadot_chain());
        let chill = signed_extrinsic(&account(1), 9, RuntimeCall::new(CallPath::new("Staking", "chill"))).unwrap();

        let item = processor.process(&chill, position(), &coder).unwrap();
        assert!(item.is_outgoing());
        assert_eq!(item.peer, None);
        assert_eq!(item.call, CallPath::new("Staking", "chill"));
    }

    #[test]
    fn test_block_without_inherent_has_no_timestamp() {
        let coder = polkadot_coder();
        let transfer = signed_extrinsic(&account(1), 0, RuntimeCall::transfer_keep_alive(&account(2), 1)).unwrap();
        assert_eq!(block_timestamp(&[transfer.clone()], &coder), None);

        let time = block_timestamp(&[timestamp_inherent(6_000), transfer], &coder).unwrap();
        assert_eq!(time.timestamp(), 6);
    }

    #[tokio::test]
    async fn test_block_processing_stores_matches() {
        let engine = Arc::new(MockRpcEngine::new());
        let ours = signed_extrinsic(&account(1), 0, RuntimeCall::transfer_keep_alive(&account(2), 10)).unwrap();
        let foreign = signed_extrinsic(&account(3), 0, RuntimeCall::transfer_keep_alive(&account(4), 10)).unwrap();
        engine.respond(
            methods::CHAIN_GET_BLOCK,
            block_json(42, &[timestamp_inherent(1_700_000_000_000), foreign, ours]),
        );

        let repository = Arc::new(InMemoryRepository::<TransactionHistoryItem>::new());
        let center = Arc::new(EventCenter::default());
        let mut events = center.subscribe();
        let processor = BlockHistoryProcessor::new(
            engine.clone(),
            polkadot_provider(),
            account(1),
            polkadot_chain(),
            repository.clone(),
        )
        .with_event_center(center);

        let items = processor.process(mock_block_hash(42)).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].block_number, 42);
        assert_eq!(items[0].extrinsic_index, 2);
        assert_eq!(items[0].timestamp.map(|time| time.timestamp_millis()), Some(1_700_000_000_000));
        assert_eq!(repository.fetch_all().await.unwrap(), items);
        assert!(matches!(
            events.recv().await.unwrap(),
            WalletEvent::TransactionsProcessed { count: 1, .. }
        ));
    }
}
