//! Signing seam. Key material lives outside this crate; extrinsics are signed
//! through a [`Signer`] supplied by the caller.

use std::sync::Arc;

use crate::error::WalletError;
use crate::model::CryptoType;

/// Context handed to a signer alongside the payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigningContext {
    pub chain_id: String,
    pub meta_id: String,
    pub crypto_type: CryptoType,
}

pub trait Signer: Send + Sync {
    /// Raw signature over `payload`: 64 bytes for sr25519/ed25519, 65 for
    /// ecdsa and ethereum.
    fn sign(&self, payload: &[u8], context: &SigningContext) -> Result<Vec<u8>, WalletError>;
}

pub type SharedSigner = Arc<dyn Signer>;

/// Zero signature of the right shape, for fee estimation.
#[derive(Clone, Copy, Debug, Default)]
pub struct DummySigner;

impl Signer for DummySigner {
    fn sign(&self, _payload: &[u8], context: &SigningContext) -> Result<Vec<u8>, WalletError> {
        Ok(vec![0u8; signature_len(context.crypto_type)])
    }
}

pub fn signature_len(crypto_type: CryptoType) -> usize {
    match crypto_type {
        CryptoType::Sr25519 | CryptoType::Ed25519 => 64,
        CryptoType::Ecdsa | CryptoType::Ethereum => 65,
    }
}

/// `MultiSignature` on substrate chains, the bare signature on EVM chains.
pub fn encode_signature(crypto_type: CryptoType, signature: &[u8]) -> Result<Vec<u8>, WalletError> {
    if signature.len() != signature_len(crypto_type) {
        return Err(WalletError::InvalidArgument("signature length does not match crypto type"));
    }
    let variant = match crypto_type {
        CryptoType::Ed25519 => 0u8,
        CryptoType::Sr25519 => 1,
        CryptoType::Ecdsa => 2,
        CryptoType::Ethereum => return Ok(signature.to_vec()),
    };
    let mut encoded = Vec::with_capacity(signature.len() + 1);
    encoded.push(variant);
    encoded.extend_from_slice(signature);
    Ok(encoded)
}
