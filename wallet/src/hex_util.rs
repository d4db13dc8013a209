//! `0x`-prefixed hex helpers for the JSON-RPC wire format.

use crate::error::WalletError;

pub fn encode_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn decode_hex(value: &str) -> Result<Vec<u8>, WalletError> {
    Ok(hex::decode(value.trim_start_matches("0x"))?)
}

/// Parse a 32 byte hash.
pub fn parse_hash(value: &str) -> Result<[u8; 32], WalletError> {
    let bytes = decode_hex(value)?;
    bytes
        .try_into()
        .map_err(|_| WalletError::Serialization(format!("expected 32-byte hash, got {value}")))
}

/// Parse a hex quantity such as a header block number.
pub fn parse_hex_u64(value: &str) -> Result<u64, WalletError> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|e| WalletError::Serialization(format!("invalid hex number {value}: {e}")))
}
