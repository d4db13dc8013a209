//! Proxy delegation graph.
//!
//! Edges come from the proxied wallets the user holds: a proxied wallet for
//! account `A` with proxy `B` means `B` may act for `A`. Paths are searched
//! from the proxied account towards accounts the user can sign with.

use std::collections::{BTreeMap, BTreeSet};

use crate::address::AccountId;
use crate::extrinsic::call::{CallPath, RuntimeCall};
use crate::model::{ChainModel, MetaAccount, ProxyType};

/// Key of one delegation edge.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyGraphKey {
    pub proxy: AccountId,
    pub proxied: AccountId,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProxyGraphValue {
    pub proxy_types: BTreeSet<ProxyType>,
    /// Wallets whose account on the chain is the proxy account
    pub proxy_wallets: BTreeSet<String>,
}

/// One hop of a path: `proxy` acts for `proxied`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyPathComponent {
    pub proxied: AccountId,
    pub proxy: AccountId,
    /// Granted types that allow the call at this hop
    pub proxy_types: BTreeSet<ProxyType>,
    pub proxy_wallets: BTreeSet<String>,
}

/// Non-empty chain of hops, first hop acting for the original account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyPath {
    pub components: Vec<ProxyPathComponent>,
}

impl ProxyPath {
    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Account that signs at the end of the path.
    pub fn final_proxy(&self) -> Option<&ProxyPathComponent> {
        self.components.last()
    }

    /// Wrap `call` in `Proxy.proxy` once per hop, innermost first.
    pub fn wrap(&self, call: RuntimeCall) -> RuntimeCall {
        self.components
            .iter()
            .fold(call, |call, component| RuntimeCall::proxy(&component.proxied, None, call))
    }
}

/// Types a nested hop needs: the outer proxy only dispatches `Proxy.proxy`.
pub fn nested_proxy_types() -> BTreeSet<ProxyType> {
    BTreeSet::from([ProxyType::Any, ProxyType::NonTransfer])
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProxyGraph {
    edges: BTreeMap<ProxyGraphKey, ProxyGraphValue>,
}

impl ProxyGraph {
    pub fn build(wallets: &[MetaAccount], chain: &ChainModel) -> Self {
        let mut edges: BTreeMap<ProxyGraphKey, ProxyGraphValue> = BTreeMap::new();

        for wallet in wallets {
            let Some(proxy) = wallet.proxy(&chain.chain_id) else {
                continue;
            };
            let Some(proxied) = wallet.fetch(chain) else {
                continue;
            };
            edges
                .entry(ProxyGraphKey {
                    proxy: proxy.account_id.clone(),
                    proxied: proxied.account_id,
                })
                .or_default()
                .proxy_types
                .insert(proxy.proxy_type.clone());
        }

        for (key, value) in edges.iter_mut() {
            value.proxy_wallets = wallets
                .iter()
                .filter(|wallet| {
                    wallet
                        .fetch(chain)
                        .map(|account| account.account_id == key.proxy)
                        .unwrap_or(false)
                })
                .map(|wallet| wallet.meta_id.clone())
                .collect();
        }

        Self { edges }
    }

    pub fn edges(&self) -> &BTreeMap<ProxyGraphKey, ProxyGraphValue> {
        &self.edges
    }

    /// Every path from `proxied` whose first hop grants one of `allowed`.
    pub fn find_paths(&self, proxied: &AccountId, allowed: &BTreeSet<ProxyType>) -> Vec<ProxyPath> {
        let mut paths = Vec::new();
        let mut visited = BTreeSet::from([proxied.clone()]);
        self.search(proxied, allowed, &mut visited, &[], &mut paths);
        paths
    }

    fn search(
        &self,
        proxied: &AccountId,
        allowed: &BTreeSet<ProxyType>,
        visited: &mut BTreeSet<AccountId>,
        prefix: &[ProxyPathComponent],
        paths: &mut Vec<ProxyPath>,
    ) {
        let nested = nested_proxy_types();
        for (key, value) in self.edges.iter().filter(|(key, _)| key.proxied == *proxied) {
            if visited.contains(&key.proxy) {
                continue;
            }
            let proxy_types: BTreeSet<ProxyType> =
                value.proxy_types.intersection(allowed).cloned().collect();
            if proxy_types.is_empty() {
                continue;
            }

            let mut components = prefix.to_vec();
            components.push(ProxyPathComponent {
                proxied: key.proxied.clone(),
                proxy: key.proxy.clone(),
                proxy_types,
                proxy_wallets: value.proxy_wallets.clone(),
            });
            paths.push(ProxyPath {
                components: components.clone(),
            });

            visited.insert(key.proxy.clone());
            self.search(&key.proxy, &nested, visited, &components, paths);
            visited.remove(&key.proxy);
        }
    }
}

/// Proxy types under which the runtime lets a proxy dispatch `call`.
pub fn required_proxy_types(call: &RuntimeCall) -> BTreeSet<ProxyType> {
    let mut required: Option<BTreeSet<ProxyType>> = None;
    for path in call.paths() {
        if let Some(types) = proxy_types_for_path(path) {
            required = Some(match required {
                Some(current) => current.intersection(&types).cloned().collect(),
                None => types,
            });
        }
    }
    required.unwrap_or_else(nested_proxy_types)
}

/// `None` for wrapper pallets that defer to the calls they carry.
fn proxy_types_for_path(path: &CallPath) -> Option<BTreeSet<ProxyType>> {
    use ProxyType::*;

    let types = match path.module_name.as_str() {
        "Utility" | "Proxy" | "Multisig" => return None,
        "Balances" | "Assets" | "Tokens" | "Currencies" | "XTokens" | "Ethereum" => {
            BTreeSet::from([Any])
        }
        "NominationPools" => BTreeSet::from([Any, NonTransfer, Staking, NominationPools]),
        "Staking" | "ParachainStaking" | "CollatorStaking" | "FastUnstake" | "VoterList" => {
            BTreeSet::from([Any, NonTransfer, Staking])
        }
        "ConvictionVoting" | "Referenda" | "Democracy" | "Treasury" | "Bounties" => {
            BTreeSet::from([Any, NonTransfer, Governance])
        }
        _ => BTreeSet::from([Any, NonTransfer]),
    };
    Some(types)
}
