//! Account identifiers and their human-readable address forms.
//!
//! Substrate chains use SS58 (base58 with a blake2b-512 checksum), EVM-style
//! chains use `0x`-prefixed 20 byte hex.

use std::fmt;

use blake2::{Blake2b512, Digest};
use codec::{Decode, Encode, Input, Output};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::WalletError;

pub const SUBSTRATE_ACCOUNT_LEN: usize = 32;
pub const ETHEREUM_ACCOUNT_LEN: usize = 20;

const SS58_CHECKSUM_PREFIX: &[u8] = b"SS58PRE";
const SS58_CHECKSUM_LEN: usize = 2;

/// Raw account id, 20 bytes on EVM chains and 32 bytes elsewhere.
///
/// Encodes as the raw bytes without a length prefix, matching
/// `AccountId32`/`AccountId20` on chain.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(Vec<u8>);

impl AccountId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, WalletError> {
        let bytes = bytes.into();
        match bytes.len() {
            SUBSTRATE_ACCOUNT_LEN | ETHEREUM_ACCOUNT_LEN => Ok(Self(bytes)),
            _ => Err(WalletError::InvalidArgument("account id must be 20 or 32 bytes")),
        }
    }

    pub fn from_hex(value: &str) -> Result<Self, WalletError> {
        Self::new(hex::decode(value.trim_start_matches("0x"))?)
    }

    /// Decode a raw `AccountId20` or `AccountId32` from SCALE input.
    pub fn decode_sized<I: Input>(input: &mut I, ethereum: bool) -> Result<Self, codec::Error> {
        if ethereum {
            Ok(Self(<[u8; ETHEREUM_ACCOUNT_LEN]>::decode(input)?.to_vec()))
        } else {
            Ok(Self(<[u8; SUBSTRATE_ACCOUNT_LEN]>::decode(input)?.to_vec()))
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_ethereum(&self) -> bool {
        self.0.len() == ETHEREUM_ACCOUNT_LEN
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }

    /// Render for the given chain address format.
    pub fn to_address(&self, format: AddressFormat) -> Result<String, WalletError> {
        match format {
            AddressFormat::Ethereum => {
                if !self.is_ethereum() {
                    return Err(WalletError::InvalidEthereumAddress(self.to_hex()));
                }
                Ok(self.to_hex())
            }
            AddressFormat::Substrate { ss58_prefix } => ss58_encode(&self.0, ss58_prefix),
        }
    }

    /// Parse an address string for the given chain address format.
    pub fn from_address(address: &str, format: AddressFormat) -> Result<Self, WalletError> {
        match format {
            AddressFormat::Ethereum => {
                let bytes = address
                    .strip_prefix("0x")
                    .and_then(|raw| hex::decode(raw).ok())
                    .filter(|bytes| bytes.len() == ETHEREUM_ACCOUNT_LEN)
                    .ok_or_else(|| WalletError::InvalidEthereumAddress(address.to_string()))?;
                Ok(Self(bytes))
            }
            AddressFormat::Substrate { ss58_prefix } => {
                let (prefix, bytes) = ss58_decode(address)?;
                if prefix != ss58_prefix {
                    return Err(WalletError::InvalidChainAddress(address.to_string()));
                }
                Ok(Self(bytes))
            }
        }
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.to_hex())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl AsRef<[u8]> for AccountId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for AccountId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<[u8; 20]> for AccountId {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes.to_vec())
    }
}

impl Encode for AccountId {
    fn size_hint(&self) -> usize {
        self.0.len()
    }

    fn encode_to<T: Output + ?Sized>(&self, dest: &mut T) {
        dest.write(&self.0);
    }
}

impl Serialize for AccountId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

/// Address rendering rule of a chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressFormat {
    Substrate { ss58_prefix: u16 },
    Ethereum,
}

pub fn ss58_encode(account: &[u8], prefix: u16) -> Result<String, WalletError> {
    if prefix > 0x3fff {
        return Err(WalletError::InvalidArgument("ss58 prefix out of range"));
    }
    let mut data = match prefix {
        0..=63 => vec![prefix as u8],
        _ => {
            let first = ((prefix & 0b0000_0000_1111_1100) as u8 >> 2) | 0b0100_0000;
            let second = ((prefix >> 8) as u8) | (((prefix & 0b0000_0000_0000_0011) as u8) << 6);
            vec![first, second]
        }
    };
    data.extend_from_slice(account);
    let checksum = ss58_checksum(&data);
    data.extend_from_slice(&checksum[..SS58_CHECKSUM_LEN]);
    Ok(bs58::encode(data).into_string())
}

pub fn ss58_decode(address: &str) -> Result<(u16, Vec<u8>), WalletError> {
    let invalid = || WalletError::InvalidChainAddress(address.to_string());
    let data = bs58::decode(address).into_vec().map_err(|_| invalid())?;
    let (prefix, prefix_len) = match data.first() {
        Some(&first) if first < 64 => (u16::from(first), 1),
        Some(&first) if first < 128 => {
            let second = *data.get(1).ok_or_else(invalid)?;
            let lower = (first << 2) | (second >> 6);
            let upper = second & 0b0011_1111;
            (u16::from(lower) | (u16::from(upper) << 8), 2)
        }
        _ => return Err(invalid()),
    };
    let body_len = data
        .len()
        .checked_sub(prefix_len + SS58_CHECKSUM_LEN)
        .ok_or_else(invalid)?;
    if body_len != SUBSTRATE_ACCOUNT_LEN && body_len != ETHEREUM_ACCOUNT_LEN {
        return Err(invalid());
    }
    let (payload, checksum) = data.split_at(prefix_len + body_len);
    if ss58_checksum(payload)[..SS58_CHECKSUM_LEN] != *checksum {
        return Err(invalid());
    }
    Ok((prefix, payload[prefix_len..].to_vec()))
}

fn ss58_checksum(data: &[u8]) -> [u8; 64] {
    let mut hasher = Blake2b512::new();
    hasher.update(SS58_CHECKSUM_PREFIX);
    hasher.update(data);
    hasher.finalize().into()
}
