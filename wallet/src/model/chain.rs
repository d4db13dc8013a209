use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::AddressFormat;
use crate::error::WalletError;

/// Genesis hash in hex without `0x`.
pub type ChainId = String;

/// Identifies one asset on one chain.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainAssetId {
    pub chain_id: ChainId,
    pub asset_id: u32,
}

impl ChainAssetId {
    pub fn new(chain_id: impl Into<ChainId>, asset_id: u32) -> Self {
        Self {
            chain_id: chain_id.into(),
            asset_id,
        }
    }
}

impl fmt::Display for ChainAssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.chain_id, self.asset_id)
    }
}

/// Staking mechanisms a chain asset can expose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StakingType {
    Relaychain,
    AuraRelaychain,
    Azero,
    Parachain,
    Turing,
    NominationPools,
    Mythos,
    #[serde(other)]
    Unsupported,
}

impl StakingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relaychain => "relaychain",
            Self::AuraRelaychain => "aura-relaychain",
            Self::Azero => "azero",
            Self::Parachain => "parachain",
            Self::Turing => "turing",
            Self::NominationPools => "nomination-pools",
            Self::Mythos => "mythos",
            Self::Unsupported => "unsupported",
        }
    }
}

/// How balances of an asset are stored on chain.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AssetType {
    Native,
    /// `pallet-assets` instance, e.g. Asset Hub.
    Statemine {
        #[serde(default = "default_assets_pallet")]
        pallet: String,
        asset_id: u32,
    },
    /// ORML tokens; the currency id is stored SCALE-encoded.
    Orml {
        #[serde(with = "hex_bytes")]
        currency_id: Vec<u8>,
    },
    Evm {
        contract: String,
    },
}

fn default_assets_pallet() -> String {
    "Assets".to_string()
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetModel {
    pub asset_id: u32,
    pub symbol: String,
    pub precision: u16,
    pub asset_type: AssetType,
    #[serde(default)]
    pub staking: Vec<StakingType>,
}

impl AssetModel {
    pub fn is_native(&self) -> bool {
        matches!(self.asset_type, AssetType::Native)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainOptions {
    /// `Proxy` pallet is available
    #[serde(default)]
    pub has_proxy: bool,
    /// Fees are queried through `state_call` instead of `payment_queryInfo`
    #[serde(default)]
    pub fee_via_runtime_call: bool,
}

/// Static chain descriptor owned by the chain registry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainModel {
    pub chain_id: ChainId,
    pub name: String,
    pub address_format: AddressFormat,
    pub assets: Vec<AssetModel>,
    #[serde(default)]
    pub block_time_ms: Option<u64>,
    #[serde(default)]
    pub options: ChainOptions,
}

impl ChainModel {
    pub fn is_ethereum_based(&self) -> bool {
        matches!(self.address_format, AddressFormat::Ethereum)
    }

    pub fn asset(&self, asset_id: u32) -> Option<&AssetModel> {
        self.assets.iter().find(|asset| asset.asset_id == asset_id)
    }

    pub fn native_asset(&self) -> Result<&AssetModel, WalletError> {
        self.assets
            .iter()
            .find(|asset| asset.is_native())
            .ok_or_else(|| WalletError::MissingNativeAsset(self.chain_id.clone()))
    }

    pub fn chain_asset(&self, asset_id: u32) -> Option<ChainAsset> {
        self.asset(asset_id).map(|asset| ChainAsset {
            chain: self.clone(),
            asset: asset.clone(),
        })
    }

    /// Every `(chain asset, staking type)` pair this chain supports.
    pub fn staking_chain_assets(&self) -> Vec<(ChainAsset, StakingType)> {
        self.assets
            .iter()
            .flat_map(|asset| {
                asset.staking.iter().map(move |staking| {
                    (
                        ChainAsset {
                            chain: self.clone(),
                            asset: asset.clone(),
                        },
                        *staking,
                    )
                })
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainAsset {
    pub chain: ChainModel,
    pub asset: AssetModel,
}

impl ChainAsset {
    pub fn chain_asset_id(&self) -> ChainAssetId {
        ChainAssetId::new(self.chain.chain_id.clone(), self.asset.asset_id)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(value)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(raw.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_json_roundtrip() {
        let json = r#"{
            "chain_id": "91b171bb158e2d3848fa23a9f1c25182fb8e20313b2c1eb49219da7a70ce90c3",
            "name": "Polkadot",
            "address_format": {"Substrate": {"ss58_prefix": 0}},
            "assets": [
                {"asset_id": 0, "symbol": "DOT", "precision": 10,
                 "asset_type": {"type": "native"},
                 "staking": ["relaychain", "nominationPools", "somethingNew"]}
            ],
            "options": {"has_proxy": true}
        }"#;
        let chain: ChainModel = serde_json::from_str(json).unwrap();
        assert_eq!(chain.native_asset().unwrap().symbol, "DOT");
        assert!(chain.options.has_proxy);
        assert!(!chain.options.fee_via_runtime_call);

        let options = chain.staking_chain_assets();
        let types: Vec<_> = options.iter().map(|(_, staking)| *staking).collect();
        assert_eq!(
            types,
            vec![
                StakingType::Relaychain,
                StakingType::NominationPools,
                StakingType::Unsupported
            ]
        );
    }

    #[test]
    fn test_missing_native_asset() {
        let chain = ChainModel {
            chain_id: "00".into(),
            name: "Empty".into(),
            address_format: AddressFormat::Ethereum,
            assets: vec![],
            block_time_ms: None,
            options: ChainOptions::default(),
        };
        assert!(matches!(
            chain.native_asset(),
            Err(WalletError::MissingNativeAsset(_))
        ));
    }
}
