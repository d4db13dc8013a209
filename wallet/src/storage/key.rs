//! Storage key encoding.

use codec::Encode;

use crate::address::AccountId;
use crate::error::WalletError;
use crate::hashing::storage_prefix;
use crate::runtime::CoderFactory;
use crate::storage::path::StoragePath;

/// Raw key of `path` with SCALE-encoded map keys `params`, hashed with the
/// hashers the runtime declares for the entry.
pub fn storage_key(
    coder: &CoderFactory,
    path: StoragePath,
    params: &[Vec<u8>],
) -> Result<Vec<u8>, WalletError> {
    let entry = coder.storage_entry(path.pallet, path.item)?;
    if params.len() > entry.hashers.len() {
        return Err(WalletError::UnexpectedTypeExtras(format!(
            "{path} takes {} keys, got {}",
            entry.hashers.len(),
            params.len()
        )));
    }

    let mut key = storage_prefix(path.pallet, path.item);
    for (param, hasher) in params.iter().zip(&entry.hashers) {
        hasher.hash_into(param, &mut key);
    }
    Ok(key)
}

/// Key of a storage value or of a map entry with a single key.
pub fn map_key(
    coder: &CoderFactory,
    path: StoragePath,
    param: &impl Encode,
) -> Result<Vec<u8>, WalletError> {
    storage_key(coder, path, &[param.encode()])
}

/// Identifier of a cached storage row.
pub struct LocalStorageKeyFactory;

impl LocalStorageKeyFactory {
    pub fn create(path: StoragePath, chain_id: &str, account_id: Option<&AccountId>) -> String {
        match account_id {
            Some(account_id) => format!("{chain_id}:{path}:{}", hex::encode(account_id.as_bytes())),
            None => format!("{chain_id}:{path}"),
        }
    }

    /// Row key for entries keyed by something other than an account.
    pub fn create_with_suffix(path: StoragePath, chain_id: &str, suffix: &[u8]) -> String {
        format!("{chain_id}:{path}:{}", hex::encode(suffix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::StorageHasher;

    const ALICE: [u8; 32] = [
        0xd4, 0x35, 0x93, 0xc7, 0x15, 0xfd, 0xd3, 0x1c, 0x61, 0x14, 0x1a, 0xbd, 0x04, 0xa9, 0x9f,
        0xd6, 0x82, 0x2c, 0x85, 0x58, 0x85, 0x4c, 0xcd, 0xe3, 0x9a, 0x56, 0x84, 0xe7, 0xa5, 0x6d,
        0xa2, 0x7d,
    ];

    fn coder() -> CoderFactory {
        CoderFactory::builder(1, 1)
            .storage("System", "Account", &[StorageHasher::Blake2_128Concat])
            .storage("Staking", "ActiveEra", &[])
            .build()
    }

    #[test]
    fn test_system_account_key() {
        let key = map_key(&coder(), StoragePath::SYSTEM_ACCOUNT, &ALICE).unwrap();
        // Well-known System.Account key of Alice.
        assert_eq!(
            hex::encode(&key),
            "26aa394eea5630e07c48ae0c9558cef7b99d880ec681799c0cf30e8886371da9\
             de1e86a9a8c739864cf3cc5ec2bea59fd43593c715fdd31c61141abd04a99fd6\
             822c8558854ccde39a5684e7a56da27d"
        );
    }

    #[test]
    fn test_plain_value_rejects_params() {
        let err = storage_key(&coder(), StoragePath::STAKING_ACTIVE_ERA, &[vec![1]]).unwrap_err();
        assert!(matches!(err, WalletError::UnexpectedTypeExtras(_)));
        assert_eq!(
            storage_key(&coder(), StoragePath::STAKING_ACTIVE_ERA, &[]).unwrap().len(),
            32
        );
    }

    #[test]
    fn test_missing_entry() {
        let err = storage_key(&coder(), StoragePath::STAKING_LEDGER, &[]).unwrap_err();
        assert!(matches!(err, WalletError::MissingPallet(_)));
    }

    #[test]
    fn test_local_keys_are_distinct() {
        let account = AccountId::from(ALICE);
        let a = LocalStorageKeyFactory::create(StoragePath::STAKING_LEDGER, "polkadot", Some(&account));
        let b = LocalStorageKeyFactory::create(StoragePath::STAKING_LEDGER, "kusama", Some(&account));
        let c = LocalStorageKeyFactory::create(StoragePath::STAKING_ACTIVE_ERA, "polkadot", None);
        assert_ne!(a, b);
        assert_eq!(c, "polkadot:Staking.ActiveEra");
    }
}
