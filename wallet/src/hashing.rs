//! Storage hashers and the hash helpers used across the crate.

use serde::{Deserialize, Serialize};

pub use sp_crypto_hashing::{blake2_128, blake2_256, twox_128, twox_256, twox_64};

/// Hasher applied to a storage map key, as declared in runtime metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageHasher {
    Blake2_128,
    Blake2_256,
    Blake2_128Concat,
    Twox128,
    Twox256,
    Twox64Concat,
    Identity,
}

impl StorageHasher {
    /// Hash `data` and append the result to `out`.
    pub fn hash_into(self, data: &[u8], out: &mut Vec<u8>) {
        match self {
            Self::Blake2_128 => out.extend_from_slice(&blake2_128(data)),
            Self::Blake2_256 => out.extend_from_slice(&blake2_256(data)),
            Self::Blake2_128Concat => {
                out.extend_from_slice(&blake2_128(data));
                out.extend_from_slice(data);
            }
            Self::Twox128 => out.extend_from_slice(&twox_128(data)),
            Self::Twox256 => out.extend_from_slice(&twox_256(data)),
            Self::Twox64Concat => {
                out.extend_from_slice(&twox_64(data));
                out.extend_from_slice(data);
            }
            Self::Identity => out.extend_from_slice(data),
        }
    }

    /// Hash prefix length for concat hashers, `None` when the key is not recoverable.
    pub fn concat_prefix_len(self) -> Option<usize> {
        match self {
            Self::Blake2_128Concat => Some(16),
            Self::Twox64Concat => Some(8),
            Self::Identity => Some(0),
            _ => None,
        }
    }
}

/// `twox_128(pallet) ++ twox_128(item)`
pub fn storage_prefix(pallet: &str, item: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(&twox_128(pallet.as_bytes()));
    key.extend_from_slice(&twox_128(item.as_bytes()));
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_account_prefix() {
        // Well-known prefix of System.Account on every Substrate chain.
        let prefix = storage_prefix("System", "Account");
        assert_eq!(
            hex::encode(prefix),
            "26aa394eea5630e07c48ae0c9558cef7b99d880ec681799c0cf30e8886371da9"
        );
    }

    #[test]
    fn test_concat_hashers_keep_key() {
        let mut out = Vec::new();
        StorageHasher::Twox64Concat.hash_into(&[1, 2, 3], &mut out);
        assert_eq!(out.len(), 8 + 3);
        assert_eq!(&out[8..], &[1, 2, 3]);

        out.clear();
        StorageHasher::Blake2_128Concat.hash_into(&[9; 32], &mut out);
        assert_eq!(out.len(), 16 + 32);
        assert_eq!(StorageHasher::Blake2_128Concat.concat_prefix_len(), Some(16));
        assert_eq!(StorageHasher::Twox128.concat_prefix_len(), None);
    }
}
