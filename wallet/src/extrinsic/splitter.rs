//! Splits a list of calls into as few extrinsics as fit the block weight limit.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::WalletError;
use crate::extrinsic::call::{CallPath, RuntimeCall};
use crate::extrinsic::factory::ExtrinsicBuilderClosure;
use crate::extrinsic::weight::{BlockWeights, Weight};

/// Weight source for the splitter.
#[async_trait]
pub trait CallWeightEstimator: Send + Sync {
    async fn block_weights(&self) -> Result<BlockWeights, WalletError>;

    /// Weight of each call dispatched on its own, in input order.
    async fn estimate_call_weights(&self, calls: Vec<RuntimeCall>) -> Vec<Result<Weight, WalletError>>;
}

/// `min(80% of the normal-class extrinsic limit, 64% of the block limit)`
pub fn weight_limit(weights: &BlockWeights) -> u64 {
    let max_extrinsic = weights.max_extrinsic().ref_time as u128 * 8 / 10;
    let max_block = weights.max_block.ref_time as u128 * 64 / 100;
    max_extrinsic.min(max_block) as u64
}

/// Greedy in-order packing: a call joins the current extrinsic while the
/// total stays within `limit`.
pub fn pack(
    calls: Vec<RuntimeCall>,
    weights: &BTreeMap<CallPath, u64>,
    limit: u64,
) -> Result<Vec<Vec<RuntimeCall>>, WalletError> {
    let mut chunks: Vec<Vec<RuntimeCall>> = Vec::new();
    let mut current: Vec<RuntimeCall> = Vec::new();
    let mut current_weight = 0u64;

    for call in calls {
        let weight = *weights
            .get(&call.path)
            .ok_or_else(|| WalletError::WeightNotFound(call.path.to_string()))?;
        if weight > limit {
            return Err(WalletError::ExtrinsicTooLarge {
                call: call.path.to_string(),
                weight,
                limit,
            });
        }

        if !current.is_empty() && current_weight.saturating_add(weight) > limit {
            chunks.push(std::mem::take(&mut current));
            current_weight = 0;
        }
        current_weight = current_weight.saturating_add(weight);
        current.push(call);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    Ok(chunks)
}

/// Extrinsics produced by a split.
pub struct SplitExtrinsics {
    /// Adds the calls of extrinsic `index` to a builder
    pub closure: ExtrinsicBuilderClosure,
    pub count: usize,
    pub chunks: Arc<Vec<Vec<RuntimeCall>>>,
}

#[derive(Clone, Debug, Default)]
pub struct ExtrinsicSplitter {
    calls: Vec<RuntimeCall>,
}

impl ExtrinsicSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn adding_call(mut self, call: RuntimeCall) -> Self {
        self.calls.push(call);
        self
    }

    pub fn calls(&self) -> &[RuntimeCall] {
        &self.calls
    }

    pub async fn build(self, estimator: &dyn CallWeightEstimator) -> Result<SplitExtrinsics, WalletError> {
        let chunks = match self.calls.len() {
            0 => return Err(WalletError::NoCalls),
            1 => vec![self.calls],
            _ => {
                let limit = weight_limit(&estimator.block_weights().await?);

                let mut representatives: BTreeMap<CallPath, RuntimeCall> = BTreeMap::new();
                for call in &self.calls {
                    representatives
                        .entry(call.path.clone())
                        .or_insert_with(|| call.clone());
                }
                let (paths, calls): (Vec<CallPath>, Vec<RuntimeCall>) = representatives.into_iter().unzip();
                let estimates = estimator.estimate_call_weights(calls).await;

                let mut weights = BTreeMap::new();
                for (path, estimate) in paths.into_iter().zip(estimates) {
                    match estimate {
                        Ok(weight) => {
                            weights.insert(path, weight.ref_time);
                        }
                        Err(e) => tracing::warn!(call = %path, error = %e, "call weight estimation failed"),
                    }
                }

                let chunks = pack(self.calls, &weights, limit)?;
                tracing::debug!(limit, extrinsics = chunks.len(), "split calls");
                chunks
            }
        };

        let count = chunks.len();
        let chunks = Arc::new(chunks);
        let closure_chunks = chunks.clone();
        let closure: ExtrinsicBuilderClosure = Arc::new(move |builder, index| {
            let calls = closure_chunks.get(index).ok_or(WalletError::InvalidExtrinsicIndex {
                index,
                count: closure_chunks.len(),
            })?;
            Ok(calls
                .iter()
                .cloned()
                .fold(builder, |builder, call| builder.adding_call(call)))
        });

        Ok(SplitExtrinsics { closure, count, chunks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extrinsic::builder::ExtrinsicBuilder;
    use crate::testing::{account, block_weights};
    use parking_lot::Mutex;

    struct FixedEstimator {
        weights: BlockWeights,
        per_call: BTreeMap<CallPath, u64>,
        requested: Mutex<Vec<CallPath>>,
    }

    impl FixedEstimator {
        fn new(per_call: &[(CallPath, u64)]) -> Self {
            Self {
                weights: block_weights(1_000, 1_000),
                per_call: per_call.iter().cloned().collect(),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CallWeightEstimator for FixedEstimator {
        async fn block_weights(&self) -> Result<BlockWeights, WalletError> {
            Ok(self.weights)
        }

        async fn estimate_call_weights(&self, calls: Vec<RuntimeCall>) -> Vec<Result<Weight, WalletError>> {
            calls
                .into_iter()
                .map(|call| {
                    self.requested.lock().push(call.path.clone());
                    self.per_call
                        .get(&call.path)
                        .map(|weight| Weight::from_ref_time(*weight))
                        .ok_or_else(|| WalletError::Rpc("estimation failed".into()))
                })
                .collect()
        }
    }

    fn transfer() -> RuntimeCall {
        RuntimeCall::transfer_keep_alive(&account(2), 1)
    }

    fn bond() -> RuntimeCall {
        RuntimeCall::new(CallPath::new("Staking", "bond_extra")).arg(codec::Compact(5u128))
    }

    #[test]
    fn test_weight_limit() {
        assert_eq!(weight_limit(&block_weights(1_000, 1_000)), 640);
        assert_eq!(weight_limit(&block_weights(1_000, 500)), 400);
    }

    #[tokio::test]
    async fn test_no_calls() {
        let estimator = FixedEstimator::new(&[]);
        let err = ExtrinsicSplitter::new().build(&estimator).await.err().unwrap();
        assert_eq!(err, WalletError::NoCalls);
    }

    #[tokio::test]
    async fn test_single_call_fast_path() {
        let estimator = FixedEstimator::new(&[]);
        let split = ExtrinsicSplitter::new().adding_call(transfer()).build(&estimator).await.unwrap();
        assert_eq!(split.count, 1);
        assert!(estimator.requested.lock().is_empty());
    }

    #[tokio::test]
    async fn test_dedupes_estimation_and_packs() {
        let estimator = FixedEstimator::new(&[(transfer().path, 300), (bond().path, 100)]);
        let split = (0..4)
            .fold(ExtrinsicSplitter::new(), |splitter, _| splitter.adding_call(transfer()))
            .adding_call(bond())
            .build(&estimator)
            .await
            .unwrap();

        assert_eq!(estimator.requested.lock().len(), 2);
        // 300 + 300 fits 640, a third transfer does not
        assert_eq!(split.count, 2);
        assert_eq!(split.chunks[0].len(), 2);
        assert_eq!(split.chunks[1].len(), 3);

        let builder = (split.closure)(ExtrinsicBuilder::new(1, 1, [0u8; 32]), 1).unwrap();
        assert_eq!(builder.calls().len(), 3);

        let err = (split.closure)(ExtrinsicBuilder::new(1, 1, [0u8; 32]), 2).err().unwrap();
        assert_eq!(err, WalletError::InvalidExtrinsicIndex { index: 2, count: 2 });
    }

    #[tokio::test]
    async fn test_call_over_limit() {
        let estimator = FixedEstimator::new(&[(transfer().path, 700), (bond().path, 1)]);
        let err = ExtrinsicSplitter::new()
            .adding_call(bond())
            .adding_call(transfer())
            .build(&estimator)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, WalletError::ExtrinsicTooLarge { weight: 700, limit: 640, .. }));
    }

    #[tokio::test]
    async fn test_missing_weight() {
        let estimator = FixedEstimator::new(&[(transfer().path, 10)]);
        let err = ExtrinsicSplitter::new()
            .adding_call(transfer())
            .adding_call(bond())
            .build(&estimator)
            .await
            .err()
            .unwrap();
        assert_eq!(err, WalletError::WeightNotFound("Staking.bond_extra".into()));
    }
}
