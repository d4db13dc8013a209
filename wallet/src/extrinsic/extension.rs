//! Signed extension encoding in runtime metadata order.

use std::sync::Arc;

use codec::{Compact, Decode, Encode, Input};

use crate::error::WalletError;
use crate::extrinsic::era::Era;

/// Extension contributed by the caller, e.g. a chain specific fee payment.
///
/// A custom extension replaces the built-in encoding of the extension with the
/// same identifier; identifiers the runtime does not list are ignored.
pub trait SignedExtension: Send + Sync {
    fn identifier(&self) -> &str;

    fn extra(&self) -> Vec<u8> {
        Vec::new()
    }

    fn additional_signed(&self) -> Vec<u8> {
        Vec::new()
    }
}

pub type SharedSignedExtension = Arc<dyn SignedExtension>;

/// Values the built-in extensions are encoded from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtensionParams {
    pub spec_version: u32,
    pub tx_version: u32,
    pub genesis_hash: [u8; 32],
    pub era: Era,
    pub era_block_hash: [u8; 32],
    pub nonce: u32,
    pub tip: u128,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EncodedExtensions {
    pub extra: Vec<u8>,
    pub additional_signed: Vec<u8>,
}

pub fn encode_extensions(
    identifiers: &[&str],
    params: &ExtensionParams,
    custom: &[SharedSignedExtension],
) -> EncodedExtensions {
    let mut encoded = EncodedExtensions::default();
    for identifier in identifiers {
        if let Some(extension) = find_custom(custom, identifier) {
            encoded.extra.extend(extension.extra());
            encoded.additional_signed.extend(extension.additional_signed());
            continue;
        }

        match *identifier {
            "CheckSpecVersion" => params.spec_version.encode_to(&mut encoded.additional_signed),
            "CheckTxVersion" => params.tx_version.encode_to(&mut encoded.additional_signed),
            "CheckGenesis" => params.genesis_hash.encode_to(&mut encoded.additional_signed),
            "CheckMortality" | "CheckEra" => {
                params.era.encode_to(&mut encoded.extra);
                params.era_block_hash.encode_to(&mut encoded.additional_signed);
            }
            "CheckNonce" => Compact(params.nonce).encode_to(&mut encoded.extra),
            "ChargeTransactionPayment" => Compact(params.tip).encode_to(&mut encoded.extra),
            "ChargeAssetTxPayment" => {
                Compact(params.tip).encode_to(&mut encoded.extra);
                // Fee paid in the native asset.
                encoded.extra.push(0);
            }
            "CheckMetadataHash" => {
                // Mode disabled, no metadata hash.
                encoded.extra.push(0);
                encoded.additional_signed.push(0);
            }
            "CheckNonZeroSender" | "CheckWeight" => {}
            other => {
                tracing::trace!(extension = other, "encoding unknown signed extension as empty");
            }
        }
    }
    encoded
}

/// Values recovered from the signed extra of an extrinsic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodedExtra {
    pub era: Option<Era>,
    pub nonce: Option<u32>,
    pub tip: u128,
}

pub fn decode_extra<I: Input>(
    input: &mut I,
    identifiers: &[&str],
    custom: &[SharedSignedExtension],
) -> Result<DecodedExtra, WalletError> {
    let mut decoded = DecodedExtra::default();
    for identifier in identifiers {
        if let Some(extension) = find_custom(custom, identifier) {
            let mut skipped = vec![0u8; extension.extra().len()];
            input.read(&mut skipped)?;
            continue;
        }

        match *identifier {
            "CheckMortality" | "CheckEra" => decoded.era = Some(Era::decode(input)?),
            "CheckNonce" => decoded.nonce = Some(Compact::<u32>::decode(input)?.0),
            "ChargeTransactionPayment" => decoded.tip = Compact::<u128>::decode(input)?.0,
            "ChargeAssetTxPayment" => {
                decoded.tip = Compact::<u128>::decode(input)?.0;
                if input.read_byte()? != 0 {
                    return Err(WalletError::UnexpectedTypeExtras(
                        "ChargeAssetTxPayment with asset id".into(),
                    ));
                }
            }
            "CheckMetadataHash" => {
                input.read_byte()?;
            }
            _ => {}
        }
    }
    Ok(decoded)
}

fn find_custom<'a>(
    custom: &'a [SharedSignedExtension],
    identifier: &str,
) -> Option<&'a SharedSignedExtension> {
    custom
        .iter()
        .find(|extension| extension.identifier() == identifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::coder::DEFAULT_SIGNED_EXTENSIONS;

    struct ChargeFeeInToken;

    impl SignedExtension for ChargeFeeInToken {
        fn identifier(&self) -> &str {
            "ChargeFeeInToken"
        }

        fn extra(&self) -> Vec<u8> {
            vec![1, 2, 3]
        }
    }

    fn params() -> ExtensionParams {
        ExtensionParams {
            spec_version: 1_002_000,
            tx_version: 26,
            genesis_hash: [1u8; 32],
            era: Era::mortal(64, 100),
            era_block_hash: [2u8; 32],
            nonce: 7,
            tip: 1_000,
        }
    }

    #[test]
    fn test_default_order() {
        let encoded = encode_extensions(DEFAULT_SIGNED_EXTENSIONS, &params(), &[]);
        let mut extra = Era::mortal(64, 100).encode();
        extra.extend(Compact(7u32).encode());
        extra.extend(Compact(1_000u128).encode());
        assert_eq!(encoded.extra, extra);

        let mut additional = 1_002_000u32.encode();
        additional.extend(26u32.encode());
        additional.extend([1u8; 32]);
        additional.extend([2u8; 32]);
        assert_eq!(encoded.additional_signed, additional);
    }

    #[test]
    fn test_decode_with_custom_extension() {
        let identifiers = ["CheckMortality", "ChargeFeeInToken", "CheckNonce", "ChargeTransactionPayment"];
        let custom: Vec<SharedSignedExtension> = vec![Arc::new(ChargeFeeInToken)];
        let encoded = encode_extensions(&identifiers, &params(), &custom);

        let decoded = decode_extra(&mut &encoded.extra[..], &identifiers, &custom).unwrap();
        assert_eq!(decoded.era, Some(Era::mortal(64, 100)));
        assert_eq!(decoded.nonce, Some(7));
        assert_eq!(decoded.tip, 1_000);
    }

    #[test]
    fn test_metadata_hash_disabled() {
        let encoded = encode_extensions(&["CheckMetadataHash"], &params(), &[]);
        assert_eq!(encoded.extra, vec![0]);
        assert_eq!(encoded.additional_signed, vec![0]);
    }
}
