//! Runtime calls addressed by pallet and call name.
//!
//! Calls are kept symbolic until an extrinsic is built so that the pallet and
//! call indices always come from the coder factory of the moment.

use std::fmt;

use codec::{Compact, Encode, Input};
use serde::{Deserialize, Serialize};

use crate::address::AccountId;
use crate::error::WalletError;
use crate::model::ProxyType;
use crate::runtime::CoderFactory;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallPath {
    pub module_name: String,
    pub call_name: String,
}

impl CallPath {
    pub fn new(module_name: impl Into<String>, call_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            call_name: call_name.into(),
        }
    }

    pub fn utility_batch_all() -> Self {
        Self::new("Utility", "batch_all")
    }

    pub fn proxy() -> Self {
        Self::new("Proxy", "proxy")
    }
}

impl fmt::Display for CallPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module_name, self.call_name)
    }
}

/// One argument of a call: already SCALE-encoded bytes, a nested call, or a
/// compact-prefixed list of nested calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallArg {
    Encoded(Vec<u8>),
    Call(Box<RuntimeCall>),
    Calls(Vec<RuntimeCall>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeCall {
    pub path: CallPath,
    pub args: Vec<CallArg>,
}

impl RuntimeCall {
    pub fn new(path: CallPath) -> Self {
        Self {
            path,
            args: Vec::new(),
        }
    }

    /// Append a SCALE-encoded argument.
    pub fn arg(mut self, value: impl Encode) -> Self {
        self.args.push(CallArg::Encoded(value.encode()));
        self
    }

    pub fn raw_arg(mut self, bytes: Vec<u8>) -> Self {
        self.args.push(CallArg::Encoded(bytes));
        self
    }

    /// `Balances.transfer_keep_alive(dest, #[compact] value)`
    pub fn transfer_keep_alive(dest: &AccountId, value: u128) -> Self {
        Self::new(CallPath::new("Balances", "transfer_keep_alive"))
            .raw_arg(encode_lookup(dest))
            .arg(Compact(value))
    }

    /// `Utility.batch_all(calls)`
    pub fn batch_all(calls: Vec<RuntimeCall>) -> Self {
        Self {
            path: CallPath::utility_batch_all(),
            args: vec![CallArg::Calls(calls)],
        }
    }

    /// `Proxy.proxy(real, force_proxy_type, call)`; the proxy type is left to
    /// the runtime so any matching delegation applies.
    pub fn proxy(real: &AccountId, force_proxy_type: Option<ProxyType>, call: RuntimeCall) -> Self {
        let force_proxy_type = match force_proxy_type {
            Some(proxy_type) => {
                let mut encoded = vec![1u8];
                encoded.push(proxy_type_index(&proxy_type));
                encoded
            }
            None => vec![0u8],
        };
        Self {
            path: CallPath::proxy(),
            args: vec![
                CallArg::Encoded(encode_lookup(real)),
                CallArg::Encoded(force_proxy_type),
                CallArg::Call(Box::new(call)),
            ],
        }
    }

    /// Every call path reachable from this call, nested calls included.
    pub fn paths(&self) -> Vec<&CallPath> {
        let mut paths = vec![&self.path];
        for arg in &self.args {
            match arg {
                CallArg::Encoded(_) => {}
                CallArg::Call(call) => paths.extend(call.paths()),
                CallArg::Calls(calls) => calls.iter().for_each(|call| paths.extend(call.paths())),
            }
        }
        paths
    }

    pub fn encode_with(&self, coder: &CoderFactory) -> Result<Vec<u8>, WalletError> {
        let mut out = Vec::new();
        self.encode_into(coder, &mut out)?;
        Ok(out)
    }

    fn encode_into(&self, coder: &CoderFactory, out: &mut Vec<u8>) -> Result<(), WalletError> {
        let (pallet_index, call_index) =
            coder.call_index(&self.path.module_name, &self.path.call_name)?;
        out.push(pallet_index);
        out.push(call_index);
        for arg in &self.args {
            match arg {
                CallArg::Encoded(bytes) => out.extend_from_slice(bytes),
                CallArg::Call(call) => call.encode_into(coder, out)?,
                CallArg::Calls(calls) => {
                    Compact(calls.len() as u32).encode_to(out);
                    for call in calls {
                        call.encode_into(coder, out)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// `MultiAddress::Id` on substrate chains, the bare 20 bytes on EVM chains.
pub fn encode_lookup(account: &AccountId) -> Vec<u8> {
    if account.is_ethereum() {
        account.as_bytes().to_vec()
    } else {
        let mut encoded = Vec::with_capacity(33);
        encoded.push(0u8);
        encoded.extend_from_slice(account.as_bytes());
        encoded
    }
}

/// Inverse of [`encode_lookup`]; also accepts `MultiAddress::Address32` and
/// `MultiAddress::Address20`.
pub fn decode_lookup(input: &mut &[u8], ethereum: bool) -> Result<AccountId, WalletError> {
    if ethereum {
        return Ok(AccountId::decode_sized(input, true)?);
    }
    match input.read_byte()? {
        0 | 3 => Ok(AccountId::decode_sized(input, false)?),
        4 => Ok(AccountId::decode_sized(input, true)?),
        other => Err(WalletError::UnexpectedTypeExtras(format!(
            "unsupported address variant {other}"
        ))),
    }
}

/// Variant index of the Polkadot relay chain `ProxyType` enum.
fn proxy_type_index(proxy_type: &ProxyType) -> u8 {
    match proxy_type {
        ProxyType::Any => 0,
        ProxyType::NonTransfer => 1,
        ProxyType::Governance => 2,
        ProxyType::Staking => 3,
        ProxyType::IdentityJudgement => 5,
        ProxyType::CancelProxy => 6,
        ProxyType::Auction => 7,
        ProxyType::NominationPools => 8,
        ProxyType::Other(_) => 0,
    }
}
