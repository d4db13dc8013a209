//! Runtime metadata snapshots and where to get them from.

pub mod coder;
pub mod provider;

pub use coder::{CoderFactory, CoderFactoryBuilder, PalletInfo, StorageEntryInfo};
pub use provider::{RpcRuntimeProvider, RuntimeProvider, SharedRuntimeProvider, StaticRuntimeProvider};
