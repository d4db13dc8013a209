//! Accumulated chain state of each staking type.
//!
//! Batch notifications carry only the entries that changed. A field the
//! notification did not mention keeps its previous value; a field it reports
//! as removed becomes `None`.

use crate::address::AccountId;
use crate::error::WalletError;
use crate::runtime::CoderFactory;
use crate::storage::{BatchStorageValues, FromBatchStorage, UncertainStorage};
use crate::sync::staking::types::{
    ActiveEraInfo, BondedPoolInner, DecodeWithAccounts, Delegator, Nominations, PoolId, PoolMember,
    StakingLedger, UserStakeInfo, ValidatorPrefs,
};

pub mod keys {
    pub const ERA: &str = "era";
    pub const LEDGER: &str = "ledger";
    pub const NOMINATION: &str = "nomination";
    pub const VALIDATOR_PREFS: &str = "validatorPrefs";
    pub const BONDED_POOL: &str = "bonded";
}

fn decode_accounts<T: DecodeWithAccounts>(
    values: &BatchStorageValues,
    key: &str,
) -> Result<UncertainStorage<T>, WalletError> {
    values.decode_with(key, |bytes| T::decode_bytes(bytes, values.ethereum_accounts))
}

/// One relaychain batch notification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelaychainStateChange {
    pub era: UncertainStorage<ActiveEraInfo>,
    pub ledger: UncertainStorage<StakingLedger>,
    pub nomination: UncertainStorage<Nominations>,
    pub validator_prefs: UncertainStorage<ValidatorPrefs>,
}

impl FromBatchStorage for RelaychainStateChange {
    fn from_batch(values: &BatchStorageValues, _coder: &CoderFactory) -> Result<Self, WalletError> {
        Ok(Self {
            era: values.decode(keys::ERA)?,
            ledger: decode_accounts(values, keys::LEDGER)?,
            nomination: decode_accounts(values, keys::NOMINATION)?,
            validator_prefs: values.decode(keys::VALIDATOR_PREFS)?,
        })
    }
}

/// Relaychain fields seen so far; each starts unknown.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelaychainAccumulator {
    pub stash: AccountId,
    pub controller: AccountId,
    pub era: UncertainStorage<ActiveEraInfo>,
    pub ledger: UncertainStorage<StakingLedger>,
    pub nomination: UncertainStorage<Nominations>,
    pub validator_prefs: UncertainStorage<ValidatorPrefs>,
}

impl RelaychainAccumulator {
    pub fn new(stash: AccountId, controller: AccountId) -> Self {
        Self {
            stash,
            controller,
            era: UncertainStorage::Undefined,
            ledger: UncertainStorage::Undefined,
            nomination: UncertainStorage::Undefined,
            validator_prefs: UncertainStorage::Undefined,
        }
    }

    pub fn applying(&self, change: &RelaychainStateChange) -> Self {
        Self {
            stash: self.stash.clone(),
            controller: self.controller.clone(),
            era: change.era.or_previous(&self.era),
            ledger: change.ledger.or_previous(&self.ledger),
            nomination: change.nomination.or_previous(&self.nomination),
            validator_prefs: change.validator_prefs.or_previous(&self.validator_prefs),
        }
    }

    /// State to persist, once every field has been defined at least once.
    pub fn state(&self) -> Option<RelaychainState> {
        match (&self.era, &self.ledger, &self.nomination, &self.validator_prefs) {
            (
                UncertainStorage::Defined(era),
                UncertainStorage::Defined(ledger),
                UncertainStorage::Defined(nomination),
                UncertainStorage::Defined(validator_prefs),
            ) => Some(RelaychainState {
                stash: self.stash.clone(),
                controller: self.controller.clone(),
                era: *era,
                ledger: ledger.clone(),
                nomination: nomination.clone(),
                validator_prefs: *validator_prefs,
            }),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelaychainState {
    pub stash: AccountId,
    pub controller: AccountId,
    pub era: Option<ActiveEraInfo>,
    pub ledger: Option<StakingLedger>,
    pub nomination: Option<Nominations>,
    pub validator_prefs: Option<ValidatorPrefs>,
}

impl RelaychainState {
    /// Era the position started participating in: nomination submission, or
    /// the current era for a validator.
    pub fn started_in(&self) -> Option<u32> {
        match (&self.nomination, &self.validator_prefs) {
            (Some(nomination), _) => Some(nomination.submitted_in),
            (None, Some(_)) => self.era.map(|era| era.index.saturating_sub(1)),
            (None, None) => None,
        }
    }
}

/// One nomination pool batch notification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NominationPoolStateChange {
    pub era: UncertainStorage<ActiveEraInfo>,
    pub ledger: UncertainStorage<StakingLedger>,
    pub nomination: UncertainStorage<Nominations>,
    pub bonded_pool: UncertainStorage<BondedPoolInner>,
}

impl FromBatchStorage for NominationPoolStateChange {
    fn from_batch(values: &BatchStorageValues, _coder: &CoderFactory) -> Result<Self, WalletError> {
        Ok(Self {
            era: values.decode(keys::ERA)?,
            ledger: decode_accounts(values, keys::LEDGER)?,
            nomination: decode_accounts(values, keys::NOMINATION)?,
            bonded_pool: decode_accounts(values, keys::BONDED_POOL)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NominationPoolState {
    pub pool_member: PoolMember,
    pub era: Option<ActiveEraInfo>,
    pub ledger: Option<StakingLedger>,
    pub nomination: Option<Nominations>,
    pub bonded_pool: Option<BondedPoolInner>,
}

impl NominationPoolState {
    pub fn new(pool_member: PoolMember) -> Self {
        Self {
            pool_member,
            era: None,
            ledger: None,
            nomination: None,
            bonded_pool: None,
        }
    }

    pub fn pool_id(&self) -> PoolId {
        self.pool_member.pool_id
    }

    pub fn applying(&self, change: &NominationPoolStateChange) -> Self {
        Self {
            pool_member: self.pool_member.clone(),
            era: change.era.value_or(self.era),
            ledger: change.ledger.value_or(self.ledger.clone()),
            nomination: change.nomination.value_or(self.nomination.clone()),
            bonded_pool: change.bonded_pool.value_or(self.bonded_pool.clone()),
        }
    }

    pub fn applying_member(&self, pool_member: PoolMember) -> Self {
        Self {
            pool_member,
            ..self.clone()
        }
    }

    /// Member points converted to the pool's active stake.
    pub fn member_stake(&self) -> Option<u128> {
        let ledger = self.ledger.as_ref()?;
        let pool = self.bonded_pool.as_ref()?;
        if pool.points == 0 {
            return Some(0);
        }
        let stake = primitive_mul_div(self.pool_member.points, ledger.active, pool.points);
        Some(stake)
    }
}

/// `a * b / c` without intermediate overflow for realistic balances.
fn primitive_mul_div(a: u128, b: u128, c: u128) -> u128 {
    match a.checked_mul(b) {
        Some(product) => product / c,
        None => (a / c).saturating_mul(b),
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParachainState {
    pub delegator: Option<Delegator>,
    /// One of the delegated collators is in the selected set
    pub should_have_active_collator: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MythosState {
    pub user_stake: Option<UserStakeInfo>,
    /// One of the staked candidates is a session validator
    pub should_have_active_collator: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BatchStorageValue;
    use codec::{Compact, Encode};
    use proptest::prelude::*;

    fn era(index: u32) -> ActiveEraInfo {
        ActiveEraInfo { index, start: None }
    }

    fn accumulator() -> RelaychainAccumulator {
        RelaychainAccumulator::new(AccountId::from([1u8; 32]), AccountId::from([1u8; 32]))
    }

    #[test]
    fn test_incomplete_until_every_field_defined() {
        let state = accumulator().applying(&RelaychainStateChange {
            era: UncertainStorage::Defined(Some(era(10))),
            ledger: UncertainStorage::Defined(None),
            ..Default::default()
        });
        assert!(state.state().is_none());

        let state = state.applying(&RelaychainStateChange {
            nomination: UncertainStorage::Defined(None),
            validator_prefs: UncertainStorage::Defined(None),
            ..Default::default()
        });
        let complete = state.state().unwrap();
        assert_eq!(complete.era, Some(era(10)));
        assert_eq!(complete.ledger, None);
    }

    #[test]
    fn test_batch_decoding() {
        let values = BatchStorageValues {
            values: vec![
                BatchStorageValue {
                    mapping_key: Some(keys::ERA.into()),
                    value: Some((7u32, Some(1_000u64)).encode()),
                },
                BatchStorageValue {
                    mapping_key: Some(keys::NOMINATION.into()),
                    value: None,
                },
            ],
            ..Default::default()
        };
        let coder = crate::testing::polkadot_coder();
        let change = RelaychainStateChange::from_batch(&values, &coder).unwrap();
        assert_eq!(change.era, UncertainStorage::Defined(Some(ActiveEraInfo { index: 7, start: Some(1_000) })));
        assert_eq!(change.nomination, UncertainStorage::Defined(None));
        assert_eq!(change.ledger, UncertainStorage::Undefined);
    }

    #[test]
    fn test_batch_decoding_ethereum_accounts() {
        let stash = AccountId::from([7u8; 20]);
        let mut ledger = stash.encode();
        Compact(90u128).encode_to(&mut ledger);
        Compact(80u128).encode_to(&mut ledger);
        Vec::<(Compact<u128>, Compact<u32>)>::new().encode_to(&mut ledger);
        Vec::<u32>::new().encode_to(&mut ledger);

        let mut values = BatchStorageValues {
            values: vec![BatchStorageValue {
                mapping_key: Some(keys::LEDGER.into()),
                value: Some(ledger),
            }],
            ethereum_accounts: true,
            ..Default::default()
        };
        let coder = crate::testing::polkadot_coder();
        let change = RelaychainStateChange::from_batch(&values, &coder).unwrap();
        let UncertainStorage::Defined(Some(decoded)) = change.ledger else {
            panic!("ledger not decoded");
        };
        assert_eq!(decoded.stash, stash);
        assert_eq!(decoded.active, 80);

        // The same bytes do not form a 32 byte ledger.
        values.ethereum_accounts = false;
        assert!(RelaychainStateChange::from_batch(&values, &coder).is_err());
    }

    fn uncertain_era() -> impl Strategy<Value = UncertainStorage<ActiveEraInfo>> {
        prop_oneof![
            Just(UncertainStorage::Undefined),
            Just(UncertainStorage::Defined(None)),
            (0u32..100).prop_map(|index| UncertainStorage::Defined(Some(era(index)))),
        ]
    }

    proptest! {
        #[test]
        fn prop_merge_defined_wins(previous in uncertain_era(), update in uncertain_era()) {
            let base = RelaychainAccumulator { era: previous.clone(), ..accumulator() };
            let merged = base.applying(&RelaychainStateChange { era: update.clone(), ..Default::default() });
            if update.is_defined() {
                prop_assert_eq!(merged.era, update);
            } else {
                prop_assert_eq!(merged.era, previous);
            }
        }
    }

    #[test]
    fn test_pool_member_stake() {
        let member = PoolMember {
            pool_id: 1,
            points: 50,
            last_recorded_reward_counter: 0,
            unbonding_eras: vec![],
        };
        let state = NominationPoolState::new(member).applying(&NominationPoolStateChange {
            ledger: UncertainStorage::Defined(Some(StakingLedger {
                stash: AccountId::from([2u8; 32]),
                total: 400,
                active: 400,
                unlocking: vec![],
            })),
            bonded_pool: UncertainStorage::Defined(Some(BondedPoolInner {
                commission: None,
                member_counter: 2,
                points: 100,
            })),
            ..Default::default()
        });
        assert_eq!(state.member_stake(), Some(200));
        assert_eq!(state.era, None);
    }
}
