use serde::{Deserialize, Serialize};

use crate::address::AccountId;
use crate::error::WalletError;
use crate::model::chain::{ChainId, ChainModel};
use crate::repository::Identifiable;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CryptoType {
    Sr25519,
    Ed25519,
    Ecdsa,
    Ethereum,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WalletType {
    Secrets,
    WatchOnly,
    Ledger,
    PolkadotVault,
    Proxied,
}

impl WalletType {
    /// Wallets that can produce signatures locally.
    pub fn can_sign(&self) -> bool {
        !matches!(self, Self::WatchOnly | Self::Proxied)
    }
}

/// Proxy permission scopes of `pallet-proxy`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProxyType {
    Any,
    NonTransfer,
    Governance,
    Staking,
    IdentityJudgement,
    CancelProxy,
    Auction,
    NominationPools,
    Other(String),
}

/// Delegation recorded on a proxied wallet: `account_id` may act for the wallet.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyAccount {
    pub account_id: AccountId,
    pub proxy_type: ProxyType,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainAccount {
    pub chain_id: ChainId,
    pub account_id: AccountId,
    pub public_key: Vec<u8>,
    pub crypto_type: CryptoType,
    #[serde(default)]
    pub proxy: Option<ProxyAccount>,
}

/// A wallet as stored by the application.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetaAccount {
    pub meta_id: String,
    pub name: String,
    pub wallet_type: WalletType,
    #[serde(default)]
    pub substrate_account_id: Option<AccountId>,
    #[serde(default)]
    pub substrate_public_key: Option<Vec<u8>>,
    pub substrate_crypto_type: CryptoType,
    #[serde(default)]
    pub ethereum_address: Option<AccountId>,
    #[serde(default)]
    pub ethereum_public_key: Option<Vec<u8>>,
    #[serde(default)]
    pub chain_accounts: Vec<ChainAccount>,
}

/// Concrete account of a wallet on one chain.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainAccountResponse {
    pub meta_id: String,
    pub chain_id: ChainId,
    pub name: String,
    pub account_id: AccountId,
    pub public_key: Vec<u8>,
    pub crypto_type: CryptoType,
    pub is_chain_account: bool,
    pub wallet_type: WalletType,
}

impl Identifiable for MetaAccount {
    fn identifier(&self) -> String {
        self.meta_id.clone()
    }
}

impl MetaAccount {
    pub fn chain_account(&self, chain_id: &str) -> Option<&ChainAccount> {
        self.chain_accounts
            .iter()
            .find(|account| account.chain_id == chain_id)
    }

    /// Resolve the account used on `chain`: a chain-specific account wins over
    /// the shared substrate or ethereum account.
    pub fn fetch(&self, chain: &ChainModel) -> Option<ChainAccountResponse> {
        if let Some(account) = self.chain_account(&chain.chain_id) {
            return Some(ChainAccountResponse {
                meta_id: self.meta_id.clone(),
                chain_id: chain.chain_id.clone(),
                name: self.name.clone(),
                account_id: account.account_id.clone(),
                public_key: account.public_key.clone(),
                crypto_type: account.crypto_type,
                is_chain_account: true,
                wallet_type: self.wallet_type,
            });
        }

        let (account_id, public_key, crypto_type) = if chain.is_ethereum_based() {
            (
                self.ethereum_address.clone()?,
                self.ethereum_public_key.clone().unwrap_or_default(),
                CryptoType::Ethereum,
            )
        } else {
            (
                self.substrate_account_id.clone()?,
                self.substrate_public_key.clone().unwrap_or_default(),
                self.substrate_crypto_type,
            )
        };

        Some(ChainAccountResponse {
            meta_id: self.meta_id.clone(),
            chain_id: chain.chain_id.clone(),
            name: self.name.clone(),
            account_id,
            public_key,
            crypto_type,
            is_chain_account: false,
            wallet_type: self.wallet_type,
        })
    }

    pub fn fetch_or_error(&self, chain: &ChainModel) -> Result<ChainAccountResponse, WalletError> {
        self.fetch(chain)
            .ok_or_else(|| WalletError::AccountNotExists(chain.chain_id.clone()))
    }

    /// Proxy delegation of a proxied wallet on `chain_id`.
    pub fn proxy(&self, chain_id: &str) -> Option<&ProxyAccount> {
        if self.wallet_type != WalletType::Proxied {
            return None;
        }
        self.chain_account(chain_id)?.proxy.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressFormat;
    use crate::model::chain::ChainOptions;

    fn chain(id: &str, format: AddressFormat) -> ChainModel {
        ChainModel {
            chain_id: id.into(),
            name: id.into(),
            address_format: format,
            assets: vec![],
            block_time_ms: None,
            options: ChainOptions::default(),
        }
    }

    fn wallet() -> MetaAccount {
        MetaAccount {
            meta_id: "w1".into(),
            name: "Main".into(),
            wallet_type: WalletType::Secrets,
            substrate_account_id: Some(AccountId::new(vec![1u8; 32]).unwrap()),
            substrate_public_key: Some(vec![1u8; 32]),
            substrate_crypto_type: CryptoType::Sr25519,
            ethereum_address: Some(AccountId::new(vec![2u8; 20]).unwrap()),
            ethereum_public_key: None,
            chain_accounts: vec![ChainAccount {
                chain_id: "special".into(),
                account_id: AccountId::new(vec![3u8; 32]).unwrap(),
                public_key: vec![3u8; 32],
                crypto_type: CryptoType::Ed25519,
                proxy: None,
            }],
        }
    }

    #[test]
    fn test_fetch_prefers_chain_account() {
        let wallet = wallet();
        let response = wallet
            .fetch(&chain("special", AddressFormat::Substrate { ss58_prefix: 42 }))
            .unwrap();
        assert!(response.is_chain_account);
        assert_eq!(response.crypto_type, CryptoType::Ed25519);

        let response = wallet
            .fetch(&chain("other", AddressFormat::Substrate { ss58_prefix: 42 }))
            .unwrap();
        assert!(!response.is_chain_account);
        assert_eq!(response.account_id.as_bytes(), &[1u8; 32]);

        let response = wallet.fetch(&chain("evm", AddressFormat::Ethereum)).unwrap();
        assert_eq!(response.crypto_type, CryptoType::Ethereum);
        assert!(response.account_id.is_ethereum());
    }

    #[test]
    fn test_fetch_or_error_without_account() {
        let mut wallet = wallet();
        wallet.ethereum_address = None;
        let err = wallet
            .fetch_or_error(&chain("evm", AddressFormat::Ethereum))
            .unwrap_err();
        assert!(matches!(err, WalletError::AccountNotExists(_)));
    }
}
