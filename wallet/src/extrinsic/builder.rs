//! Signed extrinsic assembly and decoding.
//!
//! Layout of a version 4 signed extrinsic:
//! `compact(len) ++ 0x84 ++ address ++ signature ++ extra ++ call`.
//! The signature covers `call ++ extra ++ additional_signed`, hashed with
//! blake2-256 when longer than 256 bytes.

use codec::{Compact, Decode, Encode, Input};

use crate::address::AccountId;
use crate::error::WalletError;
use crate::extrinsic::call::{decode_lookup, encode_lookup, RuntimeCall};
use crate::extrinsic::era::Era;
use crate::extrinsic::extension::{
    decode_extra, encode_extensions, DecodedExtra, ExtensionParams, SharedSignedExtension,
};
use crate::extrinsic::signer::{encode_signature, Signer, SigningContext};
use crate::model::CryptoType;
use crate::runtime::CoderFactory;

const EXTRINSIC_VERSION: u8 = 4;
const SIGNED_FLAG: u8 = 0b1000_0000;
const MAX_UNHASHED_PAYLOAD: usize = 256;

#[derive(Clone)]
pub struct ExtrinsicBuilder {
    spec_version: u32,
    tx_version: u32,
    genesis_hash: [u8; 32],
    era: Era,
    era_block_hash: [u8; 32],
    nonce: u32,
    tip: u128,
    signature_format: CryptoType,
    address: Option<AccountId>,
    custom_extensions: Vec<SharedSignedExtension>,
    calls: Vec<RuntimeCall>,
}

impl ExtrinsicBuilder {
    /// Immortal builder; the era block hash defaults to the genesis hash.
    pub fn new(spec_version: u32, tx_version: u32, genesis_hash: [u8; 32]) -> Self {
        Self {
            spec_version,
            tx_version,
            genesis_hash,
            era: Era::Immortal,
            era_block_hash: genesis_hash,
            nonce: 0,
            tip: 0,
            signature_format: CryptoType::Sr25519,
            address: None,
            custom_extensions: Vec::new(),
            calls: Vec::new(),
        }
    }

    pub fn with_era(mut self, era: Era, block_hash: [u8; 32]) -> Self {
        self.era = era;
        self.era_block_hash = block_hash;
        self
    }

    pub fn with_nonce(mut self, nonce: u32) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn with_tip(mut self, tip: u128) -> Self {
        self.tip = tip;
        self
    }

    pub fn with_signature_format(mut self, crypto_type: CryptoType) -> Self {
        self.signature_format = crypto_type;
        self
    }

    pub fn with_address(mut self, account: AccountId) -> Self {
        self.address = Some(account);
        self
    }

    pub fn adding_extension(mut self, extension: SharedSignedExtension) -> Self {
        self.custom_extensions.push(extension);
        self
    }

    pub fn adding_call(mut self, call: RuntimeCall) -> Self {
        self.calls.push(call);
        self
    }

    pub fn with_calls(mut self, calls: Vec<RuntimeCall>) -> Self {
        self.calls = calls;
        self
    }

    pub fn calls(&self) -> &[RuntimeCall] {
        &self.calls
    }

    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    pub fn tip(&self) -> u128 {
        self.tip
    }

    pub fn era(&self) -> Era {
        self.era
    }

    pub fn custom_extensions(&self) -> &[SharedSignedExtension] {
        &self.custom_extensions
    }

    /// The call to dispatch: the single call, or all calls in `Utility.batch_all`.
    pub fn call(&self) -> Result<RuntimeCall, WalletError> {
        match self.calls.as_slice() {
            [] => Err(WalletError::NoCalls),
            [call] => Ok(call.clone()),
            calls => Ok(RuntimeCall::batch_all(calls.to_vec())),
        }
    }

    fn extension_params(&self) -> ExtensionParams {
        ExtensionParams {
            spec_version: self.spec_version,
            tx_version: self.tx_version,
            genesis_hash: self.genesis_hash,
            era: self.era,
            era_block_hash: self.era_block_hash,
            nonce: self.nonce,
            tip: self.tip,
        }
    }

    /// Bytes the signer signs.
    pub fn signing_payload(&self, coder: &CoderFactory) -> Result<Vec<u8>, WalletError> {
        let call = self.call()?.encode_with(coder)?;
        let extensions = encode_extensions(
            &coder.signed_extensions(),
            &self.extension_params(),
            &self.custom_extensions,
        );

        let mut payload = call;
        payload.extend(extensions.extra);
        payload.extend(extensions.additional_signed);
        if payload.len() > MAX_UNHASHED_PAYLOAD {
            Ok(sp_crypto_hashing::blake2_256(&payload).to_vec())
        } else {
            Ok(payload)
        }
    }

    /// Sign and encode, length prefix included.
    pub fn build(
        &self,
        coder: &CoderFactory,
        signer: &dyn Signer,
        context: &SigningContext,
    ) -> Result<Vec<u8>, WalletError> {
        let address = self
            .address
            .as_ref()
            .ok_or(WalletError::InvalidState("extrinsic sender is not set"))?;

        let payload = self.signing_payload(coder)?;
        let signature = signer.sign(&payload, context)?;
        let signature = encode_signature(self.signature_format, &signature)?;

        let extensions = encode_extensions(
            &coder.signed_extensions(),
            &self.extension_params(),
            &self.custom_extensions,
        );

        let mut body = vec![SIGNED_FLAG | EXTRINSIC_VERSION];
        body.extend(encode_lookup(address));
        body.extend(signature);
        body.extend(extensions.extra);
        body.extend(self.call()?.encode_with(coder)?);

        let mut extrinsic = Compact(body.len() as u32).encode();
        extrinsic.extend(body);
        Ok(extrinsic)
    }
}

/// Parts of an encoded extrinsic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedExtrinsic {
    /// Sender of a signed extrinsic
    pub signer: Option<AccountId>,
    pub extra: DecodedExtra,
    /// Encoded call, pallet and call index first
    pub call: Vec<u8>,
}

/// Decode an extrinsic built against `coder`'s signed extensions.
pub fn decode_extrinsic(
    bytes: &[u8],
    coder: &CoderFactory,
    ethereum: bool,
    custom: &[SharedSignedExtension],
) -> Result<DecodedExtrinsic, WalletError> {
    let mut input = bytes;
    let Compact(len) = Compact::<u32>::decode(&mut input)?;
    if len as usize != input.len() {
        return Err(WalletError::Codec(format!(
            "extrinsic length prefix {len} does not match {} bytes",
            input.len()
        )));
    }

    let version = input.read_byte()?;
    if version & !SIGNED_FLAG != EXTRINSIC_VERSION {
        return Err(WalletError::Codec(format!("unsupported extrinsic version {version}")));
    }
    if version & SIGNED_FLAG == 0 {
        return Ok(DecodedExtrinsic {
            signer: None,
            extra: DecodedExtra::default(),
            call: input.to_vec(),
        });
    }

    let signer = decode_lookup(&mut input, ethereum)?;
    skip_signature(&mut input, ethereum)?;
    let extra = decode_extra(&mut input, &coder.signed_extensions(), custom)?;

    Ok(DecodedExtrinsic {
        signer: Some(signer),
        extra,
        call: input.to_vec(),
    })
}

fn skip_signature(input: &mut &[u8], ethereum: bool) -> Result<(), WalletError> {
    let len = if ethereum {
        65
    } else {
        match input.read_byte()? {
            0 | 1 => 64,
            2 => 65,
            other => {
                return Err(WalletError::UnexpectedTypeExtras(format!(
                    "unsupported signature variant {other}"
                )))
            }
        }
    };
    let mut signature = vec![0u8; len];
    input.read(&mut signature)?;
    Ok(())
}

/// Hash the node reports for a submitted extrinsic.
pub fn extrinsic_hash(extrinsic: &[u8]) -> [u8; 32] {
    sp_crypto_hashing::blake2_256(extrinsic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extrinsic::signer::DummySigner;
    use crate::testing::{account, polkadot_coder};

    fn context(crypto_type: CryptoType) -> SigningContext {
        SigningContext {
            chain_id: "test".into(),
            meta_id: "w1".into(),
            crypto_type,
        }
    }

    fn builder() -> ExtrinsicBuilder {
        ExtrinsicBuilder::new(1_002_000, 26, [1u8; 32])
            .with_era(Era::mortal(64, 1_000), [2u8; 32])
            .with_nonce(5)
            .with_tip(250)
            .with_address(account(9))
    }

    #[test]
    fn test_no_calls() {
        let coder = polkadot_coder();
        let err = builder()
            .build(&coder, &DummySigner, &context(CryptoType::Sr25519))
            .unwrap_err();
        assert_eq!(err, WalletError::NoCalls);
    }

    #[test]
    fn test_build_and_decode() {
        let coder = polkadot_coder();
        let call = RuntimeCall::transfer_keep_alive(&account(7), 10);
        let extrinsic = builder()
            .adding_call(call.clone())
            .build(&coder, &DummySigner, &context(CryptoType::Sr25519))
            .unwrap();

        let decoded = decode_extrinsic(&extrinsic, &coder, false, &[]).unwrap();
        assert_eq!(decoded.signer, Some(account(9)));
        assert_eq!(decoded.extra.tip, 250);
        assert_eq!(decoded.extra.nonce, Some(5));
        assert_eq!(decoded.extra.era, Some(Era::mortal(64, 1_000)));
        assert_eq!(decoded.call, call.encode_with(&coder).unwrap());
    }

    #[test]
    fn test_multiple_calls_are_batched() {
        let coder = polkadot_coder();
        let call = RuntimeCall::transfer_keep_alive(&account(7), 10);
        let builder = builder().adding_call(call.clone()).adding_call(call);
        let batch = builder.call().unwrap();
        assert_eq!(batch.path.to_string(), "Utility.batch_all");

        let extrinsic = builder
            .build(&coder, &DummySigner, &context(CryptoType::Sr25519))
            .unwrap();
        let decoded = decode_extrinsic(&extrinsic, &coder, false, &[]).unwrap();
        assert_eq!(&decoded.call[..2], &[26, 2]);
    }

    #[test]
    fn test_long_payload_is_hashed() {
        let coder = polkadot_coder();
        let call = RuntimeCall::transfer_keep_alive(&account(7), 10);
        let short = builder().adding_call(call.clone());
        assert!(short.signing_payload(&coder).unwrap().len() > 32);

        let long = (0..8).fold(builder(), |builder, _| builder.adding_call(call.clone()));
        assert_eq!(long.signing_payload(&coder).unwrap().len(), 32);
    }

    #[test]
    fn test_ethereum_layout() {
        let coder = polkadot_coder();
        let sender = AccountId::from([3u8; 20]);
        let extrinsic = builder()
            .with_address(sender.clone())
            .with_signature_format(CryptoType::Ethereum)
            .adding_call(RuntimeCall::transfer_keep_alive(&AccountId::from([4u8; 20]), 1))
            .build(&coder, &DummySigner, &context(CryptoType::Ethereum))
            .unwrap();
        let decoded = decode_extrinsic(&extrinsic, &coder, true, &[]).unwrap();
        assert_eq!(decoded.signer, Some(sender));
        assert_eq!(decoded.extra.tip, 250);
    }
}
