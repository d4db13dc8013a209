//! SCALE layouts of the staking storage entries the sync services watch.
//!
//! Account ids are 20 bytes on EVM chains, so types holding accounts decode
//! through [`DecodeWithAccounts`] instead of `codec::Decode`.

use std::sync::Arc;

use codec::{Compact, Decode, Input};

use crate::address::AccountId;
use crate::error::WalletError;
use crate::runtime::CoderFactory;
use crate::storage::StorageDecoder;

pub type EraIndex = u32;
pub type PoolId = u32;

/// Decoding for types that embed account ids of chain-dependent width.
pub trait DecodeWithAccounts: Sized {
    fn decode_with<I: Input>(input: &mut I, ethereum: bool) -> Result<Self, codec::Error>;

    fn decode_bytes(mut bytes: &[u8], ethereum: bool) -> Result<Self, WalletError> {
        Ok(Self::decode_with(&mut bytes, ethereum)?)
    }
}

impl DecodeWithAccounts for AccountId {
    fn decode_with<I: Input>(input: &mut I, ethereum: bool) -> Result<Self, codec::Error> {
        AccountId::decode_sized(input, ethereum)
    }
}

impl<T: DecodeWithAccounts> DecodeWithAccounts for Vec<T> {
    fn decode_with<I: Input>(input: &mut I, ethereum: bool) -> Result<Self, codec::Error> {
        let Compact(len) = Compact::<u32>::decode(input)?;
        (0..len).map(|_| T::decode_with(input, ethereum)).collect()
    }
}

/// Storage decoder for account-holding types.
pub fn account_decoder<T: DecodeWithAccounts + 'static>(ethereum: bool) -> StorageDecoder<T> {
    Arc::new(move |bytes: &[u8], _: &CoderFactory| T::decode_bytes(bytes, ethereum))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Decode)]
pub struct ActiveEraInfo {
    pub index: EraIndex,
    pub start: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Decode)]
pub struct UnlockChunk {
    #[codec(compact)]
    pub value: u128,
    #[codec(compact)]
    pub era: EraIndex,
}

/// Leading fields of `Staking.Ledger`; claimed reward history is skipped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StakingLedger {
    pub stash: AccountId,
    pub total: u128,
    pub active: u128,
    pub unlocking: Vec<UnlockChunk>,
}

impl DecodeWithAccounts for StakingLedger {
    fn decode_with<I: Input>(input: &mut I, ethereum: bool) -> Result<Self, codec::Error> {
        Ok(Self {
            stash: AccountId::decode_sized(input, ethereum)?,
            total: Compact::<u128>::decode(input)?.0,
            active: Compact::<u128>::decode(input)?.0,
            unlocking: Vec::decode(input)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Nominations {
    pub targets: Vec<AccountId>,
    pub submitted_in: EraIndex,
    pub suppressed: bool,
}

impl DecodeWithAccounts for Nominations {
    fn decode_with<I: Input>(input: &mut I, ethereum: bool) -> Result<Self, codec::Error> {
        Ok(Self {
            targets: Vec::decode_with(input, ethereum)?,
            submitted_in: EraIndex::decode(input)?,
            suppressed: bool::decode(input)?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Decode)]
pub struct ValidatorPrefs {
    /// Perbill
    #[codec(compact)]
    pub commission: u32,
    pub blocked: bool,
}

/// `NominationPools.PoolMembers` entry.
#[derive(Clone, Debug, PartialEq, Eq, Decode)]
pub struct PoolMember {
    pub pool_id: PoolId,
    pub points: u128,
    pub last_recorded_reward_counter: u128,
    pub unbonding_eras: Vec<(EraIndex, u128)>,
}

/// Leading fields of `NominationPools.BondedPools`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BondedPoolInner {
    pub commission: Option<u32>,
    pub member_counter: u32,
    pub points: u128,
}

impl DecodeWithAccounts for BondedPoolInner {
    fn decode_with<I: Input>(input: &mut I, ethereum: bool) -> Result<Self, codec::Error> {
        Ok(Self {
            commission: decode_pool_commission(input, ethereum)?,
            member_counter: u32::decode(input)?,
            points: u128::decode(input)?,
        })
    }
}

/// `Commission { current, max, change_rate, throttle_from, claim_permission }`,
/// keeping only the current rate.
fn decode_pool_commission<I: Input>(input: &mut I, ethereum: bool) -> Result<Option<u32>, codec::Error> {
    let current = match input.read_byte()? {
        0 => None,
        1 => {
            let perbill = u32::decode(input)?;
            AccountId::decode_sized(input, ethereum)?;
            Some(perbill)
        }
        _ => return Err("invalid commission option".into()),
    };
    let _max = Option::<u32>::decode(input)?;
    // change_rate: Option<{ max_increase: Perbill, min_delay: BlockNumber }>
    let _change_rate = Option::<(u32, u32)>::decode(input)?;
    let _throttle_from = Option::<u32>::decode(input)?;
    // claim_permission: Option<Permissionless | Account(AccountId)>
    match input.read_byte()? {
        0 => {}
        1 => match input.read_byte()? {
            0 => {}
            1 => {
                AccountId::decode_sized(input, ethereum)?;
            }
            _ => return Err("invalid commission claim permission".into()),
        },
        _ => return Err("invalid commission claim permission option".into()),
    }
    Ok(current)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DelegatorBond {
    pub owner: AccountId,
    pub amount: u128,
}

/// Leading fields of `ParachainStaking.DelegatorState`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delegator {
    pub id: AccountId,
    pub delegations: Vec<DelegatorBond>,
    pub total: u128,
}

impl DecodeWithAccounts for DelegatorBond {
    fn decode_with<I: Input>(input: &mut I, ethereum: bool) -> Result<Self, codec::Error> {
        Ok(Self {
            owner: AccountId::decode_sized(input, ethereum)?,
            amount: u128::decode(input)?,
        })
    }
}

impl DecodeWithAccounts for Delegator {
    fn decode_with<I: Input>(input: &mut I, ethereum: bool) -> Result<Self, codec::Error> {
        Ok(Self {
            id: AccountId::decode_sized(input, ethereum)?,
            delegations: Vec::decode_with(input, ethereum)?,
            total: u128::decode(input)?,
        })
    }
}

impl Delegator {
    pub fn collators(&self) -> impl Iterator<Item = &AccountId> {
        self.delegations.iter().map(|bond| &bond.owner)
    }
}

/// `CollatorStaking.UserStake` entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserStakeInfo {
    pub stake: u128,
    pub maybe_last_unstake: Option<(u128, u32)>,
    pub candidates: Vec<AccountId>,
    pub maybe_last_reward_session: Option<u32>,
}

impl DecodeWithAccounts for UserStakeInfo {
    fn decode_with<I: Input>(input: &mut I, ethereum: bool) -> Result<Self, codec::Error> {
        Ok(Self {
            stake: u128::decode(input)?,
            maybe_last_unstake: Option::decode(input)?,
            candidates: Vec::decode_with(input, ethereum)?,
            maybe_last_reward_session: Option::decode(input)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::Encode;

    #[test]
    fn test_ledger_ignores_trailing_fields() {
        let mut bytes = [7u8; 32].to_vec();
        Compact(100u128).encode_to(&mut bytes);
        Compact(80u128).encode_to(&mut bytes);
        vec![(Compact(20u128), Compact(5u32))].encode_to(&mut bytes);
        vec![1u32, 2, 3].encode_to(&mut bytes);

        let ledger = StakingLedger::decode_bytes(&bytes, false).unwrap();
        assert_eq!(ledger.stash, AccountId::from([7u8; 32]));
        assert_eq!(ledger.active, 80);
        assert_eq!(ledger.unlocking, vec![UnlockChunk { value: 20, era: 5 }]);
    }

    #[test]
    fn test_delegator_with_evm_accounts() {
        let mut bytes = [1u8; 20].to_vec();
        Compact(1u32).encode_to(&mut bytes);
        bytes.extend([2u8; 20]);
        500u128.encode_to(&mut bytes);
        500u128.encode_to(&mut bytes);

        let delegator = Delegator::decode_bytes(&bytes, true).unwrap();
        assert_eq!(delegator.total, 500);
        assert_eq!(delegator.collators().collect::<Vec<_>>(), vec![&AccountId::from([2u8; 20])]);
    }

    #[test]
    fn test_bonded_pool_with_commission() {
        let mut bytes = vec![1];
        50_000_000u32.encode_to(&mut bytes);
        bytes.extend([3u8; 32]);
        Some(100_000_000u32).encode_to(&mut bytes);
        None::<(u32, u32)>.encode_to(&mut bytes);
        None::<u32>.encode_to(&mut bytes);
        bytes.extend([1, 0]);
        12u32.encode_to(&mut bytes);
        1_000u128.encode_to(&mut bytes);

        let pool = BondedPoolInner::decode_bytes(&bytes, false).unwrap();
        assert_eq!(pool.commission, Some(50_000_000));
        assert_eq!(pool.member_counter, 12);
        assert_eq!(pool.points, 1_000);
    }
}
