//! Fee estimates and the `TransactionPaymentApi` dry run.

use std::ops::Add;

use codec::{Decode, DecodeAll, Encode};

use crate::address::AccountId;
use crate::error::WalletError;
use crate::extrinsic::weight::Weight;
use crate::rpc::{types::WeightJson, RuntimeDispatchInfoJson};

pub const QUERY_INFO_API: &str = "TransactionPaymentApi";
pub const QUERY_INFO_METHOD: &str = "TransactionPaymentApi_query_info";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeePayerReason {
    Proxy,
}

/// Account paying the fee when it is not the wallet the operation is for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeePayer {
    pub account_id: AccountId,
    pub reason: FeePayerReason,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtrinsicFee {
    /// Total fee, tip included
    pub amount: u128,
    /// Tip part of `amount`
    pub tip: u128,
    pub payer: Option<FeePayer>,
    pub weight: Weight,
}

impl ExtrinsicFee {
    pub fn new(amount: u128, weight: Weight) -> Self {
        Self {
            amount,
            tip: 0,
            payer: None,
            weight,
        }
    }

    pub fn with_payer(mut self, payer: Option<FeePayer>) -> Self {
        self.payer = payer;
        self
    }

    /// Fee with `tip` included instead of whatever tip was included before,
    /// so applying the same tip twice does not add it twice.
    pub fn with_tip(mut self, tip: u128) -> Self {
        self.amount = self.amount.saturating_sub(self.tip).saturating_add(tip);
        self.tip = tip;
        self
    }

    pub fn base_amount(&self) -> u128 {
        self.amount.saturating_sub(self.tip)
    }
}

impl Add for ExtrinsicFee {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            amount: self.amount.saturating_add(other.amount),
            tip: self.tip.saturating_add(other.tip),
            payer: self.payer.or(other.payer),
            weight: self.weight + other.weight,
        }
    }
}

/// `RuntimeDispatchInfo` returned by the runtime API, weight v2.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub struct RuntimeDispatchInfo {
    pub weight: Weight,
    pub class: u8,
    pub partial_fee: u128,
}

#[derive(Decode)]
struct RuntimeDispatchInfoV1 {
    weight: u64,
    class: u8,
    partial_fee: u128,
}

impl RuntimeDispatchInfo {
    /// Decode a weight v2 result, falling back to the v1 layout.
    pub fn decode_any(bytes: &[u8]) -> Result<Self, WalletError> {
        if let Ok(info) = Self::decode_all(&mut &bytes[..]) {
            return Ok(info);
        }
        let legacy = RuntimeDispatchInfoV1::decode_all(&mut &bytes[..])?;
        Ok(Self {
            weight: Weight::from_ref_time(legacy.weight),
            class: legacy.class,
            partial_fee: legacy.partial_fee,
        })
    }

    pub fn fee(&self) -> ExtrinsicFee {
        ExtrinsicFee::new(self.partial_fee, self.weight)
    }
}

impl From<&RuntimeDispatchInfoJson> for ExtrinsicFee {
    fn from(info: &RuntimeDispatchInfoJson) -> Self {
        let weight = match info.weight {
            WeightJson::V1(ref_time) => Weight::from_ref_time(ref_time),
            WeightJson::V2 {
                ref_time,
                proof_size,
            } => Weight {
                ref_time,
                proof_size,
            },
        };
        ExtrinsicFee::new(info.partial_fee, weight)
    }
}

/// Argument of `TransactionPaymentApi_query_info`: the extrinsic followed by
/// its length as a little-endian `u32`.
pub fn query_info_params(extrinsic: &[u8]) -> Vec<u8> {
    let mut params = extrinsic.to_vec();
    (extrinsic.len() as u32).encode_to(&mut params);
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tip_correction_is_idempotent() {
        let base = ExtrinsicFee::new(1_000, Weight::from_ref_time(10));
        let once = base.clone().with_tip(50);
        assert_eq!(once.amount, 1_050);
        let twice = once.clone().with_tip(50);
        assert_eq!(twice, once);
        assert_eq!(twice.base_amount(), 1_000);
        assert_eq!(once.with_tip(0), base);
    }

    #[test]
    fn test_fees_sum() {
        let a = ExtrinsicFee::new(100, Weight::from_ref_time(1)).with_tip(5);
        let b = ExtrinsicFee::new(200, Weight::from_ref_time(2));
        let sum = a + b;
        assert_eq!(sum.amount, 305);
        assert_eq!(sum.tip, 5);
        assert_eq!(sum.weight, Weight::from_ref_time(3));
    }

    #[test]
    fn test_dispatch_info_versions() {
        let v2 = RuntimeDispatchInfo {
            weight: Weight {
                ref_time: 150_000_000,
                proof_size: 3_593,
            },
            class: 0,
            partial_fee: 15_937_408,
        };
        assert_eq!(RuntimeDispatchInfo::decode_any(&v2.encode()).unwrap(), v2);

        let mut v1 = 150_000_000u64.encode();
        v1.push(0);
        v1.extend(15_937_408u128.encode());
        let decoded = RuntimeDispatchInfo::decode_any(&v1).unwrap();
        assert_eq!(decoded.weight, Weight::from_ref_time(150_000_000));
        assert_eq!(decoded.partial_fee, 15_937_408);
    }

    #[test]
    fn test_query_info_params() {
        assert_eq!(query_info_params(&[0xaa, 0xbb]), vec![0xaa, 0xbb, 2, 0, 0, 0]);
    }
}
