use std::fmt;

/// `(pallet, item)` pair naming one storage entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoragePath {
    pub pallet: &'static str,
    pub item: &'static str,
}

impl StoragePath {
    pub const fn new(pallet: &'static str, item: &'static str) -> Self {
        Self { pallet, item }
    }

    pub const SYSTEM_ACCOUNT: Self = Self::new("System", "Account");
    pub const BALANCES_LOCKS: Self = Self::new("Balances", "Locks");
    pub const BALANCES_HOLDS: Self = Self::new("Balances", "Holds");

    pub const STAKING_BONDED: Self = Self::new("Staking", "Bonded");
    pub const STAKING_LEDGER: Self = Self::new("Staking", "Ledger");
    pub const STAKING_ACTIVE_ERA: Self = Self::new("Staking", "ActiveEra");
    pub const STAKING_NOMINATORS: Self = Self::new("Staking", "Nominators");
    pub const STAKING_VALIDATORS: Self = Self::new("Staking", "Validators");

    pub const PARACHAIN_STAKING_DELEGATOR_STATE: Self =
        Self::new("ParachainStaking", "DelegatorState");
    pub const PARACHAIN_STAKING_SELECTED_CANDIDATES: Self =
        Self::new("ParachainStaking", "SelectedCandidates");

    pub const NOMINATION_POOLS_POOL_MEMBERS: Self = Self::new("NominationPools", "PoolMembers");
    pub const NOMINATION_POOLS_BONDED_POOLS: Self = Self::new("NominationPools", "BondedPools");

    pub const COLLATOR_STAKING_USER_STAKE: Self = Self::new("CollatorStaking", "UserStake");
    pub const SESSION_VALIDATORS: Self = Self::new("Session", "Validators");

    /// `Account` entry of a `pallet-assets` instance keyed by `u32` ids.
    pub fn assets_account(pallet: &str) -> Option<Self> {
        assets_instance(pallet).map(|pallet| Self::new(pallet, "Account"))
    }

    /// `Asset` (details) entry of a `pallet-assets` instance.
    pub fn assets_details(pallet: &str) -> Option<Self> {
        assets_instance(pallet).map(|pallet| Self::new(pallet, "Asset"))
    }
}

const ASSETS_INSTANCES: &[&str] = &["Assets", "PoolAssets", "LocalAssets"];

fn assets_instance(pallet: &str) -> Option<&'static str> {
    ASSETS_INSTANCES.iter().copied().find(|instance| *instance == pallet)
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.pallet, self.item)
    }
}

/// `(pallet, constant)` pair naming one runtime constant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConstantPath {
    pub pallet: &'static str,
    pub name: &'static str,
}

impl ConstantPath {
    pub const fn new(pallet: &'static str, name: &'static str) -> Self {
        Self { pallet, name }
    }

    pub const BLOCK_HASH_COUNT: Self = Self::new("System", "BlockHashCount");
    pub const BLOCK_WEIGHTS: Self = Self::new("System", "BlockWeights");
    pub const BABE_EXPECTED_BLOCK_TIME: Self = Self::new("Babe", "ExpectedBlockTime");
    pub const AURA_SLOT_DURATION: Self = Self::new("Aura", "SlotDuration");
    pub const TIMESTAMP_MINIMUM_PERIOD: Self = Self::new("Timestamp", "MinimumPeriod");
    pub const NOMINATION_POOLS_PALLET_ID: Self = Self::new("NominationPools", "PalletId");
}
