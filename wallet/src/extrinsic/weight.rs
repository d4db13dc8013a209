//! Dispatch weights and the `System.BlockWeights` constant.

use std::ops::Add;

use codec::{Decode, DecodeAll, Encode};
use serde::{Deserialize, Serialize};

use crate::error::WalletError;
use crate::runtime::CoderFactory;
use crate::storage::ConstantPath;

/// Two-dimensional weight; only `ref_time` limits batching.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode, Serialize, Deserialize,
)]
pub struct Weight {
    #[codec(compact)]
    pub ref_time: u64,
    #[codec(compact)]
    pub proof_size: u64,
}

impl Weight {
    pub const fn from_ref_time(ref_time: u64) -> Self {
        Self {
            ref_time,
            proof_size: 0,
        }
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self {
            ref_time: self.ref_time.saturating_add(other.ref_time),
            proof_size: self.proof_size.saturating_add(other.proof_size),
        }
    }
}

impl Add for Weight {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        self.saturating_add(other)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct WeightsPerClass {
    pub base_extrinsic: Weight,
    pub max_extrinsic: Option<Weight>,
    pub max_total: Option<Weight>,
    pub reserved: Option<Weight>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct PerDispatchClass<T> {
    pub normal: T,
    pub operational: T,
    pub mandatory: T,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct BlockWeights {
    pub base_block: Weight,
    pub max_block: Weight,
    pub per_class: PerDispatchClass<WeightsPerClass>,
}

/// Pre weight-v2 runtimes encode every weight as a bare `u64`.
#[derive(Clone, Copy, Debug, Decode)]
struct LegacyWeightsPerClass {
    _base_extrinsic: u64,
    max_extrinsic: Option<u64>,
    _max_total: Option<u64>,
    _reserved: Option<u64>,
}

#[derive(Clone, Copy, Debug, Decode)]
struct LegacyBlockWeights {
    _base_block: u64,
    max_block: u64,
    per_class: PerDispatchClass<LegacyWeightsPerClass>,
}

impl BlockWeights {
    pub fn from_runtime(coder: &CoderFactory) -> Result<Self, WalletError> {
        let path = ConstantPath::BLOCK_WEIGHTS;
        let bytes = coder.constant_bytes(path.pallet, path.name)?;
        if let Ok(weights) = Self::decode_all(&mut &bytes[..]) {
            return Ok(weights);
        }

        let legacy = LegacyBlockWeights::decode_all(&mut &bytes[..])?;
        let class = |max_extrinsic: Option<u64>| WeightsPerClass {
            max_extrinsic: max_extrinsic.map(Weight::from_ref_time),
            ..Default::default()
        };
        Ok(Self {
            base_block: Weight::default(),
            max_block: Weight::from_ref_time(legacy.max_block),
            per_class: PerDispatchClass {
                normal: class(legacy.per_class.normal.max_extrinsic),
                operational: class(legacy.per_class.operational.max_extrinsic),
                mandatory: class(legacy.per_class.mandatory.max_extrinsic),
            },
        })
    }

    /// Largest weight a normal extrinsic may have, falling back to the block limit.
    pub fn max_extrinsic(&self) -> Weight {
        self.per_class.normal.max_extrinsic.unwrap_or(self.max_block)
    }
}
