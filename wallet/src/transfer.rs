//! Recognition of transfer-like calls.
//!
//! A call is matched against a closed set of shapes in a fixed order:
//! native balances transfer, `pallet-assets` transfer, ORML tokens transfer,
//! EVM transact, and finally any other call known to the runtime.

use codec::{Compact, Decode};

use crate::address::AccountId;
use crate::extrinsic::call::{decode_lookup, CallPath};
use crate::model::{AssetType, ChainModel};
use crate::runtime::CoderFactory;

const NATIVE_TRANSFERS: &[&str] = &["transfer", "transfer_allow_death", "transfer_keep_alive", "transfer_all"];
const ASSETS_TRANSFERS: &[&str] = &["transfer", "transfer_keep_alive"];
const ORML_MODULES: &[&str] = &["Tokens", "Currencies"];
const ORML_TRANSFERS: &[&str] = &["transfer", "transfer_keep_alive"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferCall {
    Native {
        path: CallPath,
        dest: AccountId,
        /// `None` for `transfer_all`
        amount: Option<u128>,
    },
    Assets {
        path: CallPath,
        /// Chain-local id of the matched asset
        asset_id: u32,
        dest: AccountId,
        amount: u128,
    },
    Orml {
        path: CallPath,
        asset_id: u32,
        dest: AccountId,
        amount: u128,
    },
    EvmTransact {
        path: CallPath,
    },
    Generic {
        path: CallPath,
    },
}

impl TransferCall {
    /// Match an encoded call (pallet index, call index, args) of `chain`.
    /// `None` when the runtime does not know the call.
    pub fn parse(call: &[u8], coder: &CoderFactory, chain: &ChainModel) -> Option<Self> {
        let (&pallet_index, rest) = call.split_first()?;
        let (&call_index, args) = rest.split_first()?;
        let (module, name) = coder.call_name(pallet_index, call_index)?;
        let path = CallPath::new(module, name);
        let ethereum = chain.is_ethereum_based();

        let parsed = parse_native(&path, args, ethereum)
            .or_else(|| parse_assets(&path, args, chain, ethereum))
            .or_else(|| parse_orml(&path, args, chain, ethereum))
            .unwrap_or_else(|| {
                if path.module_name == "Ethereum" && path.call_name == "transact" {
                    Self::EvmTransact { path }
                } else {
                    Self::Generic { path }
                }
            });
        Some(parsed)
    }

    pub fn path(&self) -> &CallPath {
        match self {
            Self::Native { path, .. }
            | Self::Assets { path, .. }
            | Self::Orml { path, .. }
            | Self::EvmTransact { path }
            | Self::Generic { path } => path,
        }
    }

    pub fn destination(&self) -> Option<&AccountId> {
        match self {
            Self::Native { dest, .. } | Self::Assets { dest, .. } | Self::Orml { dest, .. } => Some(dest),
            Self::EvmTransact { .. } | Self::Generic { .. } => None,
        }
    }

    pub fn amount(&self) -> Option<u128> {
        match self {
            Self::Native { amount, .. } => *amount,
            Self::Assets { amount, .. } | Self::Orml { amount, .. } => Some(*amount),
            Self::EvmTransact { .. } | Self::Generic { .. } => None,
        }
    }

    pub fn is_transfer(&self) -> bool {
        matches!(self, Self::Native { .. } | Self::Assets { .. } | Self::Orml { .. })
    }

    /// Chain-local asset the call moves or pays with.
    pub fn asset_id(&self, chain: &ChainModel) -> Option<u32> {
        match self {
            Self::Assets { asset_id, .. } | Self::Orml { asset_id, .. } => Some(*asset_id),
            Self::Native { .. } | Self::EvmTransact { .. } | Self::Generic { .. } => chain
                .native_asset()
                .map(|asset| asset.asset_id)
                .ok()
                .or_else(|| chain.assets.first().map(|asset| asset.asset_id)),
        }
    }

    /// Whether `account` sent the call or receives its transfer.
    pub fn involves(&self, account: &AccountId, sender: Option<&AccountId>) -> bool {
        sender == Some(account) || self.destination() == Some(account)
    }
}

fn parse_native(path: &CallPath, mut args: &[u8], ethereum: bool) -> Option<TransferCall> {
    if path.module_name != "Balances" || !NATIVE_TRANSFERS.contains(&path.call_name.as_str()) {
        return None;
    }
    let dest = decode_lookup(&mut args, ethereum).ok()?;
    let amount = if path.call_name == "transfer_all" {
        None
    } else {
        Some(Compact::<u128>::decode(&mut args).ok()?.0)
    };
    Some(TransferCall::Native {
        path: path.clone(),
        dest,
        amount,
    })
}

fn parse_assets(path: &CallPath, mut args: &[u8], chain: &ChainModel, ethereum: bool) -> Option<TransferCall> {
    if !ASSETS_TRANSFERS.contains(&path.call_name.as_str()) {
        return None;
    }
    let is_assets_pallet = chain.assets.iter().any(|asset| {
        matches!(&asset.asset_type, AssetType::Statemine { pallet, .. } if *pallet == path.module_name)
    });
    if !is_assets_pallet {
        return None;
    }

    let Compact(remote_id) = Compact::<u32>::decode(&mut args).ok()?;
    let dest = decode_lookup(&mut args, ethereum).ok()?;
    let Compact(amount) = Compact::<u128>::decode(&mut args).ok()?;
    let asset = chain.assets.iter().find(|asset| match &asset.asset_type {
        AssetType::Statemine { pallet, asset_id } => *pallet == path.module_name && *asset_id == remote_id,
        _ => false,
    })?;

    Some(TransferCall::Assets {
        path: path.clone(),
        asset_id: asset.asset_id,
        dest,
        amount,
    })
}

fn parse_orml(path: &CallPath, mut args: &[u8], chain: &ChainModel, ethereum: bool) -> Option<TransferCall> {
    if !ORML_MODULES.contains(&path.module_name.as_str())
        || !ORML_TRANSFERS.contains(&path.call_name.as_str())
    {
        return None;
    }
    let dest = decode_lookup(&mut args, ethereum).ok()?;

    // The currency id has no length prefix: match it against known encodings.
    chain.assets.iter().find_map(|asset| {
        let AssetType::Orml { currency_id } = &asset.asset_type else {
            return None;
        };
        let mut rest = args.strip_prefix(currency_id.as_slice())?;
        let Compact(amount) = Compact::<u128>::decode(&mut rest).ok()?;
        Some(TransferCall::Orml {
            path: path.clone(),
            asset_id: asset.asset_id,
            dest: dest.clone(),
            amount,
        })
    })
}
