//! Who signs an extrinsic: the wallet itself, or a chain of proxies acting
//! for it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::WalletError;
use crate::extrinsic::builder::ExtrinsicBuilder;
use crate::extrinsic::call::CallPath;
use crate::extrinsic::fee::{FeePayer, FeePayerReason};
use crate::extrinsic::proxy::{required_proxy_types, ProxyGraph, ProxyPath};
use crate::model::{ChainAccountResponse, ChainModel, MetaAccount, WalletType};
use crate::repository::SharedRepository;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedProxy {
    /// Account that signs
    pub proxy_account: ChainAccountResponse,
    /// Account the calls act for
    pub proxied_account: ChainAccountResponse,
    pub paths: BTreeMap<CallPath, ProxyPath>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtrinsicSenderResolution {
    Current(ChainAccountResponse),
    Proxy(ResolvedProxy),
}

impl ExtrinsicSenderResolution {
    /// Account whose nonce and signature the extrinsic carries.
    pub fn account(&self) -> &ChainAccountResponse {
        match self {
            Self::Current(account) => account,
            Self::Proxy(proxy) => &proxy.proxy_account,
        }
    }

    pub fn fee_payer(&self) -> Option<FeePayer> {
        match self {
            Self::Current(_) => None,
            Self::Proxy(proxy) => Some(FeePayer {
                account_id: proxy.proxy_account.account_id.clone(),
                reason: FeePayerReason::Proxy,
            }),
        }
    }
}

#[async_trait]
pub trait ExtrinsicSenderResolver: Send + Sync {
    /// Pick the signer and rewrite the builders' calls for it.
    async fn resolve_sender(
        &self,
        builders: Vec<ExtrinsicBuilder>,
    ) -> Result<(ExtrinsicSenderResolution, Vec<ExtrinsicBuilder>), WalletError>;
}

pub type SharedSenderResolver = Arc<dyn ExtrinsicSenderResolver>;

/// The wallet's own account signs.
pub struct CurrentSenderResolver {
    account: ChainAccountResponse,
}

impl CurrentSenderResolver {
    pub fn new(account: ChainAccountResponse) -> Self {
        Self { account }
    }
}

#[async_trait]
impl ExtrinsicSenderResolver for CurrentSenderResolver {
    async fn resolve_sender(
        &self,
        builders: Vec<ExtrinsicBuilder>,
    ) -> Result<(ExtrinsicSenderResolution, Vec<ExtrinsicBuilder>), WalletError> {
        Ok((ExtrinsicSenderResolution::Current(self.account.clone()), builders))
    }
}

/// A proxied wallet's calls are signed by a wallet reachable through the
/// proxy graph and wrapped in `Proxy.proxy` once per hop.
pub struct ProxySenderResolver {
    proxied_wallet: MetaAccount,
    chain: ChainModel,
    wallets: SharedRepository<MetaAccount>,
}

impl ProxySenderResolver {
    pub fn new(proxied_wallet: MetaAccount, chain: ChainModel, wallets: SharedRepository<MetaAccount>) -> Self {
        Self {
            proxied_wallet,
            chain,
            wallets,
        }
    }
}

/// Signing wallet candidate at the end of a path.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct SignerRank {
    not_secrets: bool,
    longest_path: usize,
    meta_id: String,
}

#[async_trait]
impl ExtrinsicSenderResolver for ProxySenderResolver {
    async fn resolve_sender(
        &self,
        builders: Vec<ExtrinsicBuilder>,
    ) -> Result<(ExtrinsicSenderResolution, Vec<ExtrinsicBuilder>), WalletError> {
        let proxied_account = self.proxied_wallet.fetch_or_error(&self.chain)?;
        let wallets = self.wallets.fetch_all().await?;
        let wallets_by_id: BTreeMap<&str, &MetaAccount> = wallets
            .iter()
            .map(|wallet| (wallet.meta_id.as_str(), wallet))
            .collect();
        let graph = ProxyGraph::build(&wallets, &self.chain);

        let mut candidates_per_call: BTreeMap<CallPath, Vec<ProxyPath>> = BTreeMap::new();
        for builder in &builders {
            for call in builder.calls() {
                if candidates_per_call.contains_key(&call.path) {
                    continue;
                }
                let paths = graph.find_paths(&proxied_account.account_id, &required_proxy_types(call));
                candidates_per_call.insert(call.path.clone(), paths);
            }
        }

        // Signing wallets able to finish every call, with their worst path length.
        let mut signers: Option<BTreeMap<String, usize>> = None;
        for paths in candidates_per_call.values() {
            let mut reachable: BTreeMap<String, usize> = BTreeMap::new();
            for path in paths {
                let Some(last) = path.final_proxy() else {
                    continue;
                };
                for meta_id in &last.proxy_wallets {
                    let can_sign = wallets_by_id
                        .get(meta_id.as_str())
                        .map(|wallet| wallet.wallet_type.can_sign())
                        .unwrap_or(false);
                    if can_sign {
                        let entry = reachable.entry(meta_id.clone()).or_insert(usize::MAX);
                        *entry = (*entry).min(path.len());
                    }
                }
            }
            signers = Some(match signers {
                None => reachable,
                Some(current) => current
                    .into_iter()
                    .filter_map(|(meta_id, len)| {
                        reachable.get(&meta_id).map(|other| (meta_id, len.max(*other)))
                    })
                    .collect(),
            });
        }

        let best = signers
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(meta_id, longest_path)| {
                let wallet = wallets_by_id.get(meta_id.as_str())?;
                Some(SignerRank {
                    not_secrets: wallet.wallet_type != WalletType::Secrets,
                    longest_path,
                    meta_id,
                })
            })
            .min()
            .ok_or_else(|| WalletError::ProxyNotFound(proxied_account.account_id.to_hex()))?;

        let signer_wallet = wallets_by_id
            .get(best.meta_id.as_str())
            .ok_or_else(|| WalletError::ProxyNotFound(best.meta_id.clone()))?;
        let proxy_account = signer_wallet.fetch_or_error(&self.chain)?;

        let mut paths = BTreeMap::new();
        for (call_path, candidates) in candidates_per_call {
            let path = candidates
                .into_iter()
                .filter(|path| {
                    path.final_proxy()
                        .map(|last| last.proxy_wallets.contains(&best.meta_id))
                        .unwrap_or(false)
                })
                .min_by_key(ProxyPath::len)
                .ok_or_else(|| WalletError::ProxyNotFound(call_path.to_string()))?;
            paths.insert(call_path, path);
        }

        let builders = builders
            .into_iter()
            .map(|builder| {
                let calls = builder
                    .calls()
                    .iter()
                    .map(|call| match paths.get(&call.path) {
                        Some(path) => Ok(path.wrap(call.clone())),
                        None => Err(WalletError::ProxyNotFound(call.path.to_string())),
                    })
                    .collect::<Result<Vec<_>, WalletError>>()?;
                Ok(builder.with_calls(calls))
            })
            .collect::<Result<Vec<_>, WalletError>>()?;

        tracing::debug!(
            proxied = %proxied_account.account_id,
            proxy = %proxy_account.account_id,
            "resolved proxy sender"
        );

        Ok((
            ExtrinsicSenderResolution::Proxy(ResolvedProxy {
                proxy_account,
                proxied_account,
                paths,
            }),
            builders,
        ))
    }
}

/// Resolver for `wallet`: proxied wallets go through the proxy graph.
pub fn resolver_for(
    wallet: &MetaAccount,
    chain: &ChainModel,
    wallets: SharedRepository<MetaAccount>,
) -> Result<SharedSenderResolver, WalletError> {
    if wallet.wallet_type == WalletType::Proxied {
        Ok(Arc::new(ProxySenderResolver::new(wallet.clone(), chain.clone(), wallets)))
    } else {
        Ok(Arc::new(CurrentSenderResolver::new(wallet.fetch_or_error(chain)?)))
    }
}
