//! Static chain, wallet and balance models shared by every service.

pub mod account;
pub mod balance;
pub mod chain;

pub use account::{
    ChainAccount, ChainAccountResponse, CryptoType, MetaAccount, ProxyAccount, ProxyType,
    WalletType,
};
pub use balance::{AssetBalance, AssetHold, AssetLock};
pub use chain::{AssetModel, AssetType, ChainAsset, ChainAssetId, ChainId, ChainModel, ChainOptions, StakingType};
