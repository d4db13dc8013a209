use serde::{Deserialize, Serialize};

use crate::address::AccountId;
use crate::model::chain::ChainAssetId;
use crate::repository::Identifiable;

/// Balance of one account for one chain asset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub chain_asset_id: ChainAssetId,
    pub account_id: AccountId,
    pub free: u128,
    pub reserved: u128,
    pub frozen: u128,
    /// Account is blocked or frozen by the asset admin
    #[serde(default)]
    pub blocked: bool,
}

impl AssetBalance {
    pub fn identifier_for(chain_asset_id: &ChainAssetId, account_id: &AccountId) -> String {
        format!("{}-{}", chain_asset_id, account_id.to_hex())
    }

    pub fn total(&self) -> u128 {
        self.free.saturating_add(self.reserved)
    }

    pub fn transferable(&self) -> u128 {
        if self.blocked {
            return 0;
        }
        self.free.saturating_sub(self.frozen)
    }

    /// Same on-chain amounts, ignoring identity fields.
    pub fn same_amounts(&self, other: &Self) -> bool {
        self.free == other.free
            && self.reserved == other.reserved
            && self.frozen == other.frozen
            && self.blocked == other.blocked
    }
}

impl Identifiable for AssetBalance {
    fn identifier(&self) -> String {
        Self::identifier_for(&self.chain_asset_id, &self.account_id)
    }
}

/// Named balance lock (`Balances.Locks`) or freeze.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetLock {
    pub chain_asset_id: ChainAssetId,
    pub account_id: AccountId,
    /// Lock id decoded as UTF-8 with trailing padding removed
    pub lock_id: String,
    pub amount: u128,
}

impl Identifiable for AssetLock {
    fn identifier(&self) -> String {
        format!(
            "{}-{}-lock-{}",
            self.chain_asset_id,
            self.account_id.to_hex(),
            self.lock_id
        )
    }
}

/// Hold placed by a runtime module (`Balances.Holds`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetHold {
    pub chain_asset_id: ChainAssetId,
    pub account_id: AccountId,
    /// Hold reason as `pallet index`-`reason index`
    pub reason: String,
    pub amount: u128,
}

impl Identifiable for AssetHold {
    fn identifier(&self) -> String {
        format!(
            "{}-{}-hold-{}",
            self.chain_asset_id,
            self.account_id.to_hex(),
            self.reason
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transferable_respects_frozen_and_blocked() {
        let mut balance = AssetBalance {
            chain_asset_id: ChainAssetId::new("aa", 0),
            account_id: AccountId::new(vec![0u8; 32]).unwrap(),
            free: 100,
            reserved: 20,
            frozen: 30,
            blocked: false,
        };
        assert_eq!(balance.total(), 120);
        assert_eq!(balance.transferable(), 70);
        balance.blocked = true;
        assert_eq!(balance.transferable(), 0);
    }
}
