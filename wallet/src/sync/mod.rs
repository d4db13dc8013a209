//! Background synchronization services.

pub mod observable;
pub mod staking;

pub use observable::{Observable, SubscriptionToken, SyncStatus};
pub use staking::{
    MultistakingRepositories, MultistakingSyncService, MultistakingSyncState, MultistakingUpdateService,
};
