pub mod address;
pub mod balance;
pub mod cancellable;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod extrinsic;
pub mod hashing;
pub mod hex_util;
pub mod history;
pub mod model;
pub mod repository;
pub mod rpc;
pub mod runtime;
pub mod storage;
pub mod sync;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transfer;

pub use address::{AccountId, AddressFormat};
pub use balance::{BalanceRepositories, BalanceSubscriptionService, BalanceUpdater};
pub use cancellable::CancellableCallStore;
pub use config::{ExtrinsicConfig, RpcConfig, SyncConfig, WalletConfig};
pub use context::{ChainContext, ChainRegistry, SharedChainRegistry};
pub use error::WalletError;
pub use events::{EventCenter, SharedEventCenter, WalletEvent};
pub use extrinsic::{ExtrinsicOperationFactory, ExtrinsicService, ExtrinsicSplitter, ProxyGraph};
pub use history::{BlockHistoryProcessor, TransactionHistoryItem};
pub use model::{ChainAssetId, ChainModel, MetaAccount};
pub use repository::{DataChange, InMemoryRepository, Repository, SharedRepository};
pub use rpc::{JsonRpcEngine, JsonRpcEngineExt, SharedRpcEngine, WsRpcEngine};
pub use runtime::{CoderFactory, RpcRuntimeProvider, RuntimeProvider, SharedRuntimeProvider};
pub use sync::{MultistakingSyncService, Observable, SyncStatus};
pub use transfer::TransferCall;
