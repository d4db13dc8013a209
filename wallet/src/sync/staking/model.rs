//! Dashboard records persisted by the staking sync services.
//!
//! Each service writes its own part keyed by [`OptionWithWallet`]; the
//! displayed [`DashboardItem`] merges an on-chain part with the offchain one
//! at read time.

use std::fmt;

use crate::address::AccountId;
use crate::model::{ChainAssetId, StakingType};
use crate::repository::Identifiable;
use crate::sync::staking::state::{
    MythosState, NominationPoolState, ParachainState, RelaychainState,
};

/// One staking product of a chain asset.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StakingOption {
    pub chain_asset_id: ChainAssetId,
    pub staking_type: StakingType,
}

impl fmt::Display for StakingOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.chain_asset_id, self.staking_type.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OptionWithWallet {
    pub wallet_id: String,
    pub option: StakingOption,
}

impl OptionWithWallet {
    pub fn identifier(&self) -> String {
        format!("{}-{}", self.wallet_id, self.option)
    }
}

/// Account a staking product actually uses on chain for a wallet account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedAccount {
    pub staking_option: StakingOption,
    pub wallet_account_id: AccountId,
    pub resolved_account_id: AccountId,
    pub rewards_account_id: Option<AccountId>,
}

impl ResolvedAccount {
    pub fn identifier_for(wallet_account_id: &AccountId, option: &StakingOption) -> String {
        format!("{}-{}", wallet_account_id.to_hex(), option)
    }
}

impl Identifiable for ResolvedAccount {
    fn identifier(&self) -> String {
        Self::identifier_for(&self.wallet_account_id, &self.staking_option)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DashboardState {
    Active,
    Inactive,
    Waiting,
    None,
}

/// Display state of a staking position.
pub fn derive_state(
    has_stake: bool,
    started: bool,
    has_assigned_stake: bool,
    expected_onchain: bool,
) -> DashboardState {
    match (has_stake, started, has_assigned_stake, expected_onchain) {
        (false, ..) => DashboardState::None,
        (true, false, ..) => DashboardState::Inactive,
        (true, true, true, _) => DashboardState::Active,
        (true, true, false, true) => DashboardState::Inactive,
        (true, true, false, false) => DashboardState::Waiting,
    }
}

/// On-chain facts a part contributes to the dashboard.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OnchainSummary {
    pub stake: Option<u128>,
    pub started: bool,
    /// The position should already be earning if it is healthy
    pub expected_onchain: bool,
}

impl OnchainSummary {
    pub fn has_stake(&self) -> bool {
        self.stake.map(|stake| stake > 0).unwrap_or(false)
    }

    /// State from chain data alone, without indexer knowledge of assignment.
    pub fn state(&self) -> DashboardState {
        derive_state(self.has_stake(), self.started, false, self.expected_onchain)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelaychainPart {
    pub option: OptionWithWallet,
    pub state: Option<RelaychainState>,
}

impl RelaychainPart {
    pub fn summary(&self) -> OnchainSummary {
        let Some(state) = &self.state else {
            return OnchainSummary::default();
        };
        let started_in = state.started_in();
        OnchainSummary {
            stake: state.ledger.as_ref().map(|ledger| ledger.active),
            started: started_in.is_some(),
            expected_onchain: match (started_in, &state.era) {
                (Some(started_in), Some(era)) => started_in < era.index,
                _ => false,
            },
        }
    }

    pub fn state(&self) -> DashboardState {
        self.summary().state()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParachainPart {
    pub option: OptionWithWallet,
    pub state: Option<ParachainState>,
}

impl ParachainPart {
    pub fn summary(&self) -> OnchainSummary {
        let Some(delegator) = self.state.as_ref().and_then(|state| state.delegator.as_ref()) else {
            return OnchainSummary::default();
        };
        OnchainSummary {
            stake: Some(delegator.total),
            started: !delegator.delegations.is_empty(),
            expected_onchain: self
                .state
                .as_ref()
                .map(|state| state.should_have_active_collator)
                .unwrap_or(false),
        }
    }

    pub fn state(&self) -> DashboardState {
        self.summary().state()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NominationPoolPart {
    pub option: OptionWithWallet,
    pub state: Option<NominationPoolState>,
}

impl NominationPoolPart {
    pub fn summary(&self) -> OnchainSummary {
        let Some(state) = &self.state else {
            return OnchainSummary::default();
        };
        let submitted_in = state.nomination.as_ref().map(|nomination| nomination.submitted_in);
        OnchainSummary {
            stake: state.member_stake(),
            started: submitted_in.is_some(),
            expected_onchain: match (submitted_in, &state.era) {
                (Some(submitted_in), Some(era)) => submitted_in < era.index,
                _ => false,
            },
        }
    }

    pub fn state(&self) -> DashboardState {
        self.summary().state()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MythosPart {
    pub option: OptionWithWallet,
    pub state: Option<MythosState>,
}

impl MythosPart {
    pub fn summary(&self) -> OnchainSummary {
        let Some(stake) = self.state.as_ref().and_then(|state| state.user_stake.as_ref()) else {
            return OnchainSummary::default();
        };
        OnchainSummary {
            stake: Some(stake.stake),
            started: !stake.candidates.is_empty(),
            expected_onchain: self
                .state
                .as_ref()
                .map(|state| state.should_have_active_collator)
                .unwrap_or(false),
        }
    }

    pub fn state(&self) -> DashboardState {
        self.summary().state()
    }
}

/// Indexer view of a staking position.
#[derive(Clone, Debug, PartialEq)]
pub struct OffchainPart {
    pub option: OptionWithWallet,
    pub max_apy: Option<f64>,
    pub has_assigned_stake: bool,
    pub total_rewards: Option<u128>,
}

macro_rules! identifiable_part {
    ($($part:ty),*) => {
        $(impl Identifiable for $part {
            fn identifier(&self) -> String {
                self.option.identifier()
            }
        })*
    };
}

identifiable_part!(RelaychainPart, ParachainPart, NominationPoolPart, MythosPart, OffchainPart);

/// On-chain part of any staking type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OnchainPart {
    Relaychain(RelaychainPart),
    Parachain(ParachainPart),
    NominationPool(NominationPoolPart),
    Mythos(MythosPart),
}

impl OnchainPart {
    pub fn option(&self) -> &OptionWithWallet {
        match self {
            Self::Relaychain(part) => &part.option,
            Self::Parachain(part) => &part.option,
            Self::NominationPool(part) => &part.option,
            Self::Mythos(part) => &part.option,
        }
    }

    pub fn summary(&self) -> OnchainSummary {
        match self {
            Self::Relaychain(part) => part.summary(),
            Self::Parachain(part) => part.summary(),
            Self::NominationPool(part) => part.summary(),
            Self::Mythos(part) => part.summary(),
        }
    }
}

/// Displayed staking position.
#[derive(Clone, Debug, PartialEq)]
pub struct DashboardItem {
    pub option: OptionWithWallet,
    pub stake: Option<u128>,
    pub has_assigned_stake: bool,
    pub max_apy: Option<f64>,
    pub total_rewards: Option<u128>,
    pub state: DashboardState,
}

impl DashboardItem {
    /// Merge the parts of one option; either may be missing.
    pub fn merge(onchain: Option<&OnchainPart>, offchain: Option<&OffchainPart>) -> Option<Self> {
        let option = onchain
            .map(OnchainPart::option)
            .or(offchain.map(|part| &part.option))?
            .clone();
        let summary = onchain.map(OnchainPart::summary).unwrap_or_default();
        let has_assigned_stake = offchain.map(|part| part.has_assigned_stake).unwrap_or(false);

        Some(Self {
            option,
            stake: summary.stake,
            has_assigned_stake,
            max_apy: offchain.and_then(|part| part.max_apy),
            total_rewards: offchain.and_then(|part| part.total_rewards),
            state: derive_state(
                summary.has_stake(),
                summary.started,
                has_assigned_stake,
                summary.expected_onchain,
            ),
        })
    }
}
