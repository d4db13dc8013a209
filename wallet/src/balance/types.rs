//! On-chain balance layouts.

use codec::{Decode, Encode, Input};

use crate::address::AccountId;
use crate::model::{AssetBalance, AssetHold, AssetLock, ChainAssetId};
use crate::sync::staking::types::DecodeWithAccounts;

/// `pallet_balances::AccountData` with the `frozen` + `flags` layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct AccountData {
    pub free: u128,
    pub reserved: u128,
    pub frozen: u128,
    pub flags: u128,
}

/// `frame_system::AccountInfo`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct AccountInfo {
    pub nonce: u32,
    pub consumers: u32,
    pub providers: u32,
    pub sufficients: u32,
    pub data: AccountData,
}

impl AccountInfo {
    pub fn to_balance(&self, chain_asset_id: &ChainAssetId, account_id: &AccountId) -> AssetBalance {
        AssetBalance {
            chain_asset_id: chain_asset_id.clone(),
            account_id: account_id.clone(),
            free: self.data.free,
            reserved: self.data.reserved,
            frozen: self.data.frozen,
            blocked: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub enum LockReasons {
    Fee,
    Misc,
    All,
}

/// Entry of `Balances.Locks`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub struct BalanceLock {
    pub id: [u8; 8],
    pub amount: u128,
    pub reasons: LockReasons,
}

impl BalanceLock {
    /// Identifier with trailing padding removed, e.g. `staking`.
    pub fn display_id(&self) -> String {
        String::from_utf8_lossy(&self.id)
            .trim_end_matches(['\0', ' '])
            .to_string()
    }

    pub fn to_lock(&self, chain_asset_id: &ChainAssetId, account_id: &AccountId) -> AssetLock {
        AssetLock {
            chain_asset_id: chain_asset_id.clone(),
            account_id: account_id.clone(),
            lock_id: self.display_id(),
            amount: self.amount,
        }
    }
}

/// Entry of `Balances.Holds`: the runtime hold reason is an outer enum of
/// pallet variants, each wrapping the pallet's own reason enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub struct BalanceHold {
    pub id: [u8; 2],
    pub amount: u128,
}

impl BalanceHold {
    pub fn to_hold(&self, chain_asset_id: &ChainAssetId, account_id: &AccountId) -> AssetHold {
        AssetHold {
            chain_asset_id: chain_asset_id.clone(),
            account_id: account_id.clone(),
            reason: format!("{}-{}", self.id[0], self.id[1]),
            amount: self.amount,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub enum AssetAccountStatus {
    Liquid,
    Frozen,
    Blocked,
}

/// Leading fields of `pallet_assets::AssetAccount`; the existence reason and
/// extra that follow are not needed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub struct AssetAccount {
    pub balance: u128,
    pub status: AssetAccountStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub enum AssetStatus {
    Live,
    Frozen,
    Destroying,
}

/// `pallet_assets::AssetDetails`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetDetails {
    pub owner: AccountId,
    pub issuer: AccountId,
    pub admin: AccountId,
    pub freezer: AccountId,
    pub supply: u128,
    pub deposit: u128,
    pub min_balance: u128,
    pub is_sufficient: bool,
    pub accounts: u32,
    pub sufficients: u32,
    pub approvals: u32,
    pub status: AssetStatus,
}

impl DecodeWithAccounts for AssetDetails {
    fn decode_with<I: Input>(input: &mut I, ethereum: bool) -> Result<Self, codec::Error> {
        Ok(Self {
            owner: AccountId::decode_sized(input, ethereum)?,
            issuer: AccountId::decode_sized(input, ethereum)?,
            admin: AccountId::decode_sized(input, ethereum)?,
            freezer: AccountId::decode_sized(input, ethereum)?,
            supply: u128::decode(input)?,
            deposit: u128::decode(input)?,
            min_balance: u128::decode(input)?,
            is_sufficient: bool::decode(input)?,
            accounts: u32::decode(input)?,
            sufficients: u32::decode(input)?,
            approvals: u32::decode(input)?,
            status: AssetStatus::decode(input)?,
        })
    }
}

/// Balance row for an asset account; `None` for an absent or empty account.
pub fn asset_balance(
    chain_asset_id: &ChainAssetId,
    account_id: &AccountId,
    account: Option<&AssetAccount>,
    details: Option<&AssetDetails>,
) -> Option<AssetBalance> {
    let account = account.filter(|account| account.balance > 0)?;
    let is_frozen = account.status == AssetAccountStatus::Frozen
        || details.is_some_and(|details| details.status == AssetStatus::Frozen);

    Some(AssetBalance {
        chain_asset_id: chain_asset_id.clone(),
        account_id: account_id.clone(),
        free: account.balance,
        reserved: 0,
        frozen: if is_frozen { account.balance } else { 0 },
        blocked: account.status == AssetAccountStatus::Blocked,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn account_info(free: u128, reserved: u128, frozen: u128) -> Vec<u8> {
        AccountInfo {
            nonce: 1,
            providers: 1,
            data: AccountData {
                free,
                reserved,
                frozen,
                flags: 0,
            },
            ..Default::default()
        }
        .encode()
    }

    pub fn asset_details(owner: &AccountId, status: AssetStatus) -> Vec<u8> {
        let mut bytes = Vec::new();
        for _ in 0..4 {
            owner.encode_to(&mut bytes);
        }
        (1_000_000u128, 0u128, 1u128, true, 5u32, 5u32, 0u32, status).encode_to(&mut bytes);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::asset_details;
    use super::*;
    use crate::testing::account;

    #[test]
    fn test_lock_id_padding_is_trimmed() {
        let lock = BalanceLock {
            id: *b"staking ",
            amount: 10,
            reasons: LockReasons::All,
        };
        assert_eq!(lock.display_id(), "staking");

        let lock = BalanceLock {
            id: *b"vesting\0",
            ..lock
        };
        assert_eq!(lock.display_id(), "vesting");
    }

    #[test]
    fn test_hold_reason() {
        let hold = BalanceHold { id: [7, 1], amount: 3 };
        let hold = hold.to_hold(&ChainAssetId::new("aa", 0), &account(1));
        assert_eq!(hold.reason, "7-1");
    }

    #[test]
    fn test_asset_details_decode() {
        let bytes = asset_details(&account(1), AssetStatus::Frozen);
        let details = AssetDetails::decode_bytes(&bytes, false).unwrap();
        assert_eq!(details.owner, account(1));
        assert_eq!(details.supply, 1_000_000);
        assert!(details.is_sufficient);
        assert_eq!(details.status, AssetStatus::Frozen);
    }

    #[test]
    fn test_frozen_asset_freezes_whole_balance() {
        let id = ChainAssetId::new("aa", 1);
        let account_row = AssetAccount {
            balance: 50,
            status: AssetAccountStatus::Liquid,
        };
        let details = AssetDetails::decode_bytes(&asset_details(&account(1), AssetStatus::Frozen), false).unwrap();

        let balance = asset_balance(&id, &account(2), Some(&account_row), Some(&details)).unwrap();
        assert_eq!(balance.frozen, 50);
        assert_eq!(balance.transferable(), 0);

        let empty = AssetAccount {
            balance: 0,
            status: AssetAccountStatus::Liquid,
        };
        assert_eq!(asset_balance(&id, &account(2), Some(&empty), None), None);
        assert_eq!(asset_balance(&id, &account(2), None, None), None);
    }
}
