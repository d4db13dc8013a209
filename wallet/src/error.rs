use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WalletError {
    #[error("account does not exist for chain {0}")]
    AccountNotExists(String),

    #[error("invalid chain address: {0}")]
    InvalidChainAddress(String),

    #[error("invalid ethereum address: {0}")]
    InvalidEthereumAddress(String),

    #[error("unexpected type extras: {0}")]
    UnexpectedTypeExtras(String),

    #[error("invalid metadata: local spec version {local}, remote {remote}")]
    InvalidMetadata { local: u32, remote: u32 },

    #[error("chain {0} has no native asset")]
    MissingNativeAsset(String),

    #[error("runtime metadata missing pallet {0}")]
    MissingPallet(String),

    #[error("runtime metadata missing storage {0}")]
    MissingStorage(String),

    #[error("runtime metadata missing call {0}")]
    MissingCall(String),

    #[error("runtime metadata missing constant {0}")]
    MissingConstant(String),

    #[error("extrinsic call {call} exceeds weight limit ({weight} > {limit})")]
    ExtrinsicTooLarge { call: String, weight: u64, limit: u64 },

    #[error("weight not found for call {0}")]
    WeightNotFound(String),

    #[error("invalid extrinsic index {index} (only {count} extrinsics)")]
    InvalidExtrinsicIndex { index: usize, count: usize },

    #[error("no calls to build extrinsic")]
    NoCalls,

    #[error("no proxy path found for {0}")]
    ProxyNotFound(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("rpc call {0} timed out")]
    Timeout(String),

    #[error("subscription closed: {0}")]
    SubscriptionClosed(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid wallet state: {0}")]
    InvalidState(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl WalletError {
    /// Transport failures worth retrying on the next sync attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Rpc(_) | Self::Timeout(_) | Self::SubscriptionClosed(_)
        )
    }
}

impl From<codec::Error> for WalletError {
    fn from(err: codec::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<hex::FromHexError> for WalletError {
    fn from(err: hex::FromHexError) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<jsonrpsee::core::ClientError> for WalletError {
    fn from(err: jsonrpsee::core::ClientError) -> Self {
        Self::Rpc(err.to_string())
    }
}

impl From<std::io::Error> for WalletError {
    fn from(err: std::io::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
