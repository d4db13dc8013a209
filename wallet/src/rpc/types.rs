//! Wire types of the Substrate JSON-RPC methods used by the wallet.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::WalletError;
use crate::hex_util::{decode_hex, parse_hash, parse_hex_u64};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeVersion {
    #[serde(default)]
    pub spec_name: String,
    pub spec_version: u32,
    pub transaction_version: u32,
    /// `(api id hex, version)` pairs
    #[serde(default)]
    pub apis: Vec<(String, u32)>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub parent_hash: String,
    /// Hex-encoded block number
    pub number: String,
}

impl Header {
    pub fn block_number(&self) -> Result<u64, WalletError> {
        parse_hex_u64(&self.number)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    /// Hex-encoded opaque extrinsics
    pub extrinsics: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBlock {
    pub block: Block,
}

impl SignedBlock {
    pub fn extrinsics(&self) -> Result<Vec<Vec<u8>>, WalletError> {
        self.block
            .extrinsics
            .iter()
            .map(|raw| decode_hex(raw))
            .collect()
    }
}

/// Lifecycle notification of `author_submitAndWatchExtrinsic`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExtrinsicStatus {
    Future,
    Ready,
    Broadcast(Vec<String>),
    InBlock(String),
    Retracted(String),
    FinalityTimeout(String),
    Finalized(String),
    Usurped(String),
    Dropped,
    Invalid,
}

impl ExtrinsicStatus {
    /// No further notifications follow a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finalized(_)
                | Self::FinalityTimeout(_)
                | Self::Usurped(_)
                | Self::Dropped
                | Self::Invalid
        )
    }

    pub fn block_hash(&self) -> Option<[u8; 32]> {
        match self {
            Self::InBlock(hash) | Self::Finalized(hash) | Self::Retracted(hash) => {
                parse_hash(hash).ok()
            }
            _ => None,
        }
    }
}

/// One `state_storage` notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageChangeSet {
    pub block: String,
    /// `(key, value)`; a `None` value means the key was removed
    pub changes: Vec<(String, Option<String>)>,
}

/// Weight as returned by `payment_queryInfo`: a bare number on weight v1
/// runtimes, a struct on v2.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WeightJson {
    V1(u64),
    V2 {
        #[serde(alias = "refTime")]
        ref_time: u64,
        #[serde(alias = "proofSize", default)]
        proof_size: u64,
    },
}

impl WeightJson {
    pub fn ref_time(&self) -> u64 {
        match self {
            Self::V1(weight) => *weight,
            Self::V2 { ref_time, .. } => *ref_time,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeDispatchInfoJson {
    pub weight: WeightJson,
    #[serde(default)]
    pub class: String,
    #[serde(deserialize_with = "number_or_string")]
    pub partial_fee: u128,
}

fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(number) => number
            .as_u64()
            .map(u128::from)
            .ok_or_else(|| serde::de::Error::custom("fee is not an unsigned integer")),
        Value::String(raw) => {
            let parsed = match raw.strip_prefix("0x") {
                Some(hex) => u128::from_str_radix(hex, 16),
                None => raw.parse::<u128>(),
            };
            parsed.map_err(serde::de::Error::custom)
        }
        other => Err(serde::de::Error::custom(format!("unexpected fee value {other}"))),
    }
}

/// Subset of `system_properties` the wallet reads.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainProperties {
    #[serde(default)]
    pub ss58_format: Option<u16>,
    #[serde(default)]
    pub token_decimals: Option<Value>,
    #[serde(default)]
    pub token_symbol: Option<Value>,
    #[serde(default)]
    pub is_ethereum: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extrinsic_status_parsing() {
        let ready: ExtrinsicStatus = serde_json::from_str(r#""ready""#).unwrap();
        assert_eq!(ready, ExtrinsicStatus::Ready);
        assert!(!ready.is_terminal());

        let hash = format!("0x{}", "11".repeat(32));
        let in_block: ExtrinsicStatus =
            serde_json::from_value(serde_json::json!({ "inBlock": hash })).unwrap();
        assert_eq!(in_block.block_hash(), Some([0x11; 32]));

        let finalized: ExtrinsicStatus =
            serde_json::from_value(serde_json::json!({ "finalized": hash })).unwrap();
        assert!(finalized.is_terminal());
    }

    #[test]
    fn test_query_info_both_weight_versions() {
        let v2: RuntimeDispatchInfoJson = serde_json::from_str(
            r#"{"weight":{"ref_time":150000000,"proof_size":3593},"class":"normal","partialFee":"15600000"}"#,
        )
        .unwrap();
        assert_eq!(v2.weight.ref_time(), 150_000_000);
        assert_eq!(v2.partial_fee, 15_600_000);

        let v1: RuntimeDispatchInfoJson =
            serde_json::from_str(r#"{"weight":125000000,"class":"normal","partialFee":1000}"#)
                .unwrap();
        assert_eq!(v1.weight.ref_time(), 125_000_000);
        assert_eq!(v1.partial_fee, 1000);
    }

    #[test]
    fn test_header_number() {
        let header: Header =
            serde_json::from_str(r#"{"parentHash":"0x00","number":"0x10"}"#).unwrap();
        assert_eq!(header.block_number().unwrap(), 16);
    }
}
