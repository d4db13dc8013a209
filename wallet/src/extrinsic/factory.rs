//! Builds, signs, estimates and submits batches of extrinsics.
//!
//! Every operation takes a closure `(builder, index) -> builder` that adds
//! the calls of extrinsic `index`, and a count. Chain data shared by the whole
//! batch (coder factory, genesis hash, era, sender, nonce) is fetched once;
//! when any of it fails, every index reports the same error. Failures of a
//! single index never affect its siblings.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use futures::stream::BoxStream;
use futures::{StreamExt, TryFutureExt};
use serde_json::json;

use crate::config::ExtrinsicConfig;
use crate::error::WalletError;
use crate::extrinsic::builder::{decode_extrinsic, extrinsic_hash, ExtrinsicBuilder};
use crate::extrinsic::call::RuntimeCall;
use crate::extrinsic::era::{EraInputs, EraParameters, MortalEraCalculator};
use crate::extrinsic::extension::SharedSignedExtension;
use crate::extrinsic::fee::{query_info_params, ExtrinsicFee, RuntimeDispatchInfo, QUERY_INFO_API, QUERY_INFO_METHOD};
use crate::extrinsic::sender::{ExtrinsicSenderResolution, SharedSenderResolver};
use crate::extrinsic::signer::{DummySigner, Signer, SigningContext};
use crate::extrinsic::splitter::CallWeightEstimator;
use crate::extrinsic::weight::{BlockWeights, Weight};
use crate::hex_util::encode_hex;
use crate::model::ChainModel;
use crate::rpc::{methods, ExtrinsicStatus, JsonRpcEngineExt, SharedRpcEngine};
use crate::runtime::{CoderFactory, SharedRuntimeProvider};
use crate::storage::ConstantPath;

/// Adds the calls of extrinsic `index` to the builder.
pub type ExtrinsicBuilderClosure =
    Arc<dyn Fn(ExtrinsicBuilder, usize) -> Result<ExtrinsicBuilder, WalletError> + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexedResult<T> {
    pub index: usize,
    pub result: Result<T, WalletError>,
}

/// Per-index outcome of a batch operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexedResults<T> {
    /// `None` when the sender could not be resolved
    pub sender: Option<ExtrinsicSenderResolution>,
    pub results: Vec<IndexedResult<T>>,
}

impl<T> IndexedResults<T> {
    pub fn failed(count: usize, error: WalletError) -> Self {
        Self {
            sender: None,
            results: (0..count)
                .map(|index| IndexedResult {
                    index,
                    result: Err(error.clone()),
                })
                .collect(),
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|result| result.result.is_ok())
    }

    /// First error in index order.
    pub fn first_error(&self) -> Option<&WalletError> {
        self.results.iter().find_map(|result| result.result.as_ref().err())
    }
}

pub type FeeIndexedResults = IndexedResults<ExtrinsicFee>;
pub type SubmitIndexedResults = IndexedResults<[u8; 32]>;

pub type ExtrinsicStatusStream = BoxStream<'static, Result<ExtrinsicStatus, WalletError>>;

/// Result of a watched submission.
pub struct SubmittedExtrinsic {
    pub tx_hash: [u8; 32],
    pub sender: ExtrinsicSenderResolution,
    /// Status updates, `None` when the caller declined to watch
    pub status: Option<ExtrinsicStatusStream>,
}

/// Chain data every extrinsic of one batch shares.
struct SharedBuildData {
    coder: Arc<CoderFactory>,
    genesis_hash: [u8; 32],
    era: EraParameters,
    era_block_hash: [u8; 32],
}

/// Signed extrinsics of one batch, by index.
pub struct BuiltExtrinsics {
    pub coder: Arc<CoderFactory>,
    pub sender: ExtrinsicSenderResolution,
    pub extrinsics: Vec<Result<Vec<u8>, WalletError>>,
}

pub struct ExtrinsicOperationFactory {
    chain: ChainModel,
    engine: SharedRpcEngine,
    runtime_provider: SharedRuntimeProvider,
    sender_resolver: SharedSenderResolver,
    custom_extensions: Vec<SharedSignedExtension>,
    config: ExtrinsicConfig,
}

impl ExtrinsicOperationFactory {
    pub fn new(
        chain: ChainModel,
        engine: SharedRpcEngine,
        runtime_provider: SharedRuntimeProvider,
        sender_resolver: SharedSenderResolver,
        config: ExtrinsicConfig,
    ) -> Self {
        Self {
            chain,
            engine,
            runtime_provider,
            sender_resolver,
            custom_extensions: Vec::new(),
            config,
        }
    }

    pub fn with_custom_extensions(mut self, extensions: Vec<SharedSignedExtension>) -> Self {
        self.custom_extensions = extensions;
        self
    }

    pub fn chain(&self) -> &ChainModel {
        &self.chain
    }

    pub async fn coder_factory(&self) -> Result<Arc<CoderFactory>, WalletError> {
        self.runtime_provider.fetch_coder_factory().await
    }

    /// Fee of every extrinsic, estimated with zero signatures.
    pub async fn estimate_fee(&self, closure: ExtrinsicBuilderClosure, count: usize) -> FeeIndexedResults {
        let built = match self.build_extrinsics(&closure, count, None).await {
            Ok(built) => built,
            Err(e) => return IndexedResults::failed(count, e),
        };

        let fee_payer = built.sender.fee_payer();
        let coder = built.coder.clone();
        let queries = built.extrinsics.into_iter().enumerate().map(|(index, extrinsic)| {
            let coder = coder.clone();
            let fee_payer = fee_payer.clone();
            async move {
                let result = match extrinsic {
                    Ok(extrinsic) => self
                        .query_fee(&coder, &extrinsic)
                        .await
                        .map(|fee| fee.with_payer(fee_payer)),
                    Err(e) => Err(e),
                };
                IndexedResult { index, result }
            }
        });

        IndexedResults {
            sender: Some(built.sender),
            results: join_all(queries).await,
        }
    }

    /// Sign and submit every extrinsic, returning the transaction hashes.
    pub async fn submit(
        &self,
        closure: ExtrinsicBuilderClosure,
        signer: &dyn Signer,
        count: usize,
    ) -> SubmitIndexedResults {
        let built = match self.build_extrinsics(&closure, count, Some(signer)).await {
            Ok(built) => built,
            Err(e) => return IndexedResults::failed(count, e),
        };

        let submissions = built.extrinsics.into_iter().enumerate().map(|(index, extrinsic)| async move {
            let result = match extrinsic {
                Ok(extrinsic) => self.engine.submit_extrinsic(&extrinsic).await,
                Err(e) => Err(e),
            };
            IndexedResult { index, result }
        });

        let results = join_all(submissions).await;
        for result in &results {
            match &result.result {
                Ok(hash) => tracing::info!(index = result.index, hash = %encode_hex(hash), "extrinsic submitted"),
                Err(e) => tracing::warn!(index = result.index, error = %e, "extrinsic submission failed"),
            }
        }

        IndexedResults {
            sender: Some(built.sender),
            results,
        }
    }

    /// Submit one extrinsic through `author_submitAndWatchExtrinsic`.
    ///
    /// `watch` sees the transaction hash once the node accepted the
    /// subscription; returning `false` drops the status stream while the
    /// extrinsic stays submitted.
    pub async fn submit_and_watch(
        &self,
        closure: ExtrinsicBuilderClosure,
        signer: &dyn Signer,
        watch: impl FnOnce(&[u8; 32]) -> bool + Send,
    ) -> Result<SubmittedExtrinsic, WalletError> {
        let built = self.build_extrinsics(&closure, 1, Some(signer)).await?;
        let extrinsic = built
            .extrinsics
            .into_iter()
            .next()
            .ok_or(WalletError::InvalidExtrinsicIndex { index: 0, count: 0 })??;

        let subscription = self
            .engine
            .subscribe(
                methods::AUTHOR_SUBMIT_AND_WATCH_EXTRINSIC,
                vec![json!(encode_hex(&extrinsic))],
                methods::AUTHOR_UNWATCH_EXTRINSIC,
            )
            .await?;

        let tx_hash = extrinsic_hash(&extrinsic);
        tracing::info!(hash = %encode_hex(&tx_hash), "extrinsic submitted for watching");

        let status = if watch(&tx_hash) {
            Some(
                subscription
                    .map(|item| item.and_then(|value| Ok(serde_json::from_value(value)?)))
                    .boxed(),
            )
        } else {
            drop(subscription);
            None
        };

        Ok(SubmittedExtrinsic {
            tx_hash,
            sender: built.sender,
            status,
        })
    }

    /// Build and sign `count` extrinsics; `None` signs with zero signatures.
    pub async fn build_extrinsics(
        &self,
        closure: &ExtrinsicBuilderClosure,
        count: usize,
        signer: Option<&dyn Signer>,
    ) -> Result<BuiltExtrinsics, WalletError> {
        let shared = self.fetch_shared_data().await?;

        let base = ExtrinsicBuilder::new(shared.coder.spec_version, shared.coder.tx_version, shared.genesis_hash)
            .with_era(shared.era.era, shared.era_block_hash)
            .with_tip(self.config.default_tip);
        let base = self
            .custom_extensions
            .iter()
            .cloned()
            .fold(base, |builder, extension| builder.adding_extension(extension));

        let mut prepared: Vec<Result<ExtrinsicBuilder, WalletError>> =
            (0..count).map(|index| closure(base.clone(), index)).collect();

        let ready: Vec<ExtrinsicBuilder> = prepared
            .iter()
            .filter_map(|builder| builder.as_ref().ok().cloned())
            .collect();
        let (sender, resolved) = self.sender_resolver.resolve_sender(ready).await?;
        let mut resolved = resolved.into_iter();
        for builder in prepared.iter_mut().filter(|builder| builder.is_ok()) {
            if let Some(next) = resolved.next() {
                *builder = Ok(next);
            }
        }

        let account = sender.account().clone();
        let address = account.account_id.to_address(self.chain.address_format)?;
        let nonce = self.engine.account_next_index(&address).await?;
        tracing::debug!(chain = %self.chain.name, %address, nonce, count, "building extrinsics");

        let context = SigningContext {
            chain_id: self.chain.chain_id.clone(),
            meta_id: account.meta_id.clone(),
            crypto_type: account.crypto_type,
        };
        let dummy = DummySigner;
        let signer: &dyn Signer = signer.unwrap_or(&dummy);

        let mut offset = 0u32;
        let extrinsics = prepared
            .into_iter()
            .map(|builder| {
                let builder = builder?
                    .with_nonce(nonce.saturating_add(offset))
                    .with_address(account.account_id.clone())
                    .with_signature_format(account.crypto_type);
                offset += 1;
                builder.build(&shared.coder, signer, &context)
            })
            .collect();

        Ok(BuiltExtrinsics {
            coder: shared.coder,
            sender,
            extrinsics,
        })
    }

    async fn fetch_shared_data(&self) -> Result<SharedBuildData, WalletError> {
        let coder = self.runtime_provider.fetch_coder_factory().await?;

        let (genesis_hash, finalized_block, best_block) = futures::try_join!(
            self.engine.genesis_hash(),
            async {
                let hash = self.engine.finalized_head().await?;
                let header = self.engine.header(Some(hash)).await?;
                header.block_number()
            },
            self.engine
                .header(None)
                .and_then(|header| async move { header.block_number() }),
        )?;

        let block_hash_count = coder
            .optional_constant::<u32>(
                ConstantPath::BLOCK_HASH_COUNT.pallet,
                ConstantPath::BLOCK_HASH_COUNT.name,
            )?
            .unwrap_or(self.config.fallback_block_hash_count);

        let era = MortalEraCalculator::new(self.config.clone()).calculate(EraInputs {
            finalized_block,
            best_block,
            block_time_ms: self.block_time_ms(&coder)?,
            block_hash_count,
        });
        let era_block_hash = self.engine.block_hash(Some(era.block_number)).await?;

        Ok(SharedBuildData {
            coder,
            genesis_hash,
            era,
            era_block_hash,
        })
    }

    /// Expected block time: chain descriptor, then runtime constants.
    fn block_time_ms(&self, coder: &CoderFactory) -> Result<u64, WalletError> {
        if let Some(block_time) = self.chain.block_time_ms {
            return Ok(block_time);
        }
        for path in [ConstantPath::BABE_EXPECTED_BLOCK_TIME, ConstantPath::AURA_SLOT_DURATION] {
            if let Some(block_time) = coder.optional_constant::<u64>(path.pallet, path.name)? {
                return Ok(block_time);
            }
        }
        let minimum_period = ConstantPath::TIMESTAMP_MINIMUM_PERIOD;
        if let Some(period) = coder.optional_constant::<u64>(minimum_period.pallet, minimum_period.name)? {
            return Ok(period.saturating_mul(2));
        }
        Ok(self.config.fallback_block_time_ms)
    }

    /// Fee of one signed extrinsic, tip decoded from its signed extra included.
    pub async fn query_fee(&self, coder: &CoderFactory, extrinsic: &[u8]) -> Result<ExtrinsicFee, WalletError> {
        let use_runtime_api =
            self.chain.options.fee_via_runtime_call && coder.runtime_api_version(QUERY_INFO_API).is_some();

        let fee = if use_runtime_api {
            let bytes = self
                .engine
                .state_call(QUERY_INFO_METHOD, &query_info_params(extrinsic))
                .await?;
            RuntimeDispatchInfo::decode_any(&bytes)?.fee()
        } else {
            ExtrinsicFee::from(&self.engine.query_info(extrinsic).await?)
        };

        let decoded = decode_extrinsic(
            extrinsic,
            coder,
            self.chain.is_ethereum_based(),
            &self.custom_extensions,
        )?;
        Ok(fee.with_tip(decoded.extra.tip))
    }
}

#[async_trait]
impl CallWeightEstimator for ExtrinsicOperationFactory {
    async fn block_weights(&self) -> Result<BlockWeights, WalletError> {
        BlockWeights::from_runtime(&*self.coder_factory().await?)
    }

    async fn estimate_call_weights(&self, calls: Vec<RuntimeCall>) -> Vec<Result<Weight, WalletError>> {
        let count = calls.len();
        let calls = Arc::new(calls);
        let closure: ExtrinsicBuilderClosure = Arc::new(move |builder, index| {
            let call = calls
                .get(index)
                .ok_or(WalletError::InvalidExtrinsicIndex { index, count })?;
            Ok(builder.adding_call(call.clone()))
        });

        self.estimate_fee(closure, count)
            .await
            .results
            .into_iter()
            .map(|result| result.result.map(|fee| fee.weight))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extrinsic::sender::CurrentSenderResolver;
    use crate::model::{ChainAccountResponse, CryptoType, WalletType};
    use crate::testing::{account, mock_block_hash, polkadot_chain, polkadot_provider, MockRpcEngine};
    use serde_json::Value;

    fn sender() -> ChainAccountResponse {
        ChainAccountResponse {
            meta_id: "w1".into(),
            chain_id: polkadot_chain().chain_id,
            name: "Main".into(),
            account_id: account(1),
            public_key: vec![1u8; 32],
            crypto_type: CryptoType::Sr25519,
            is_chain_account: false,
            wallet_type: WalletType::Secrets,
        }
    }

    fn factory(engine: Arc<MockRpcEngine>) -> ExtrinsicOperationFactory {
        ExtrinsicOperationFactory::new(
            polkadot_chain(),
            engine,
            polkadot_provider(),
            Arc::new(CurrentSenderResolver::new(sender())),
            ExtrinsicConfig::default(),
        )
    }

    fn transfer_closure() -> ExtrinsicBuilderClosure {
        Arc::new(|builder, index| {
            if index == 1 {
                return Err(WalletError::InvalidArgument("no transfer for index 1"));
            }
            Ok(builder.adding_call(RuntimeCall::transfer_keep_alive(&account(2), 10 + index as u128)))
        })
    }

    fn engine_with_fee(fee: u64) -> Arc<MockRpcEngine> {
        let engine = MockRpcEngine::with_chain_defaults(1_002, 1_000, 7);
        engine.respond(
            methods::PAYMENT_QUERY_INFO,
            json!({"weight": {"ref_time": 150_000_000u64, "proof_size": 0}, "class": "normal", "partialFee": fee.to_string()}),
        );
        Arc::new(engine)
    }

    #[tokio::test]
    async fn test_estimate_fee_per_index() {
        let engine = engine_with_fee(1_000);
        let results = factory(engine.clone()).estimate_fee(transfer_closure(), 3).await;

        assert_eq!(results.results.len(), 3);
        assert_eq!(results.results[0].result.as_ref().unwrap().amount, 1_000);
        assert!(results.results[1].result.is_err());
        assert_eq!(results.results[2].result.as_ref().unwrap().amount, 1_000);
        assert_eq!(engine.request_count(methods::PAYMENT_QUERY_INFO), 2);
        assert!(matches!(results.sender, Some(ExtrinsicSenderResolution::Current(_))));
    }

    #[tokio::test]
    async fn test_tip_added_to_queried_fee() {
        let engine = engine_with_fee(1_000);
        let closure: ExtrinsicBuilderClosure = Arc::new(|builder, _| {
            Ok(builder
                .with_tip(300)
                .adding_call(RuntimeCall::transfer_keep_alive(&account(2), 1)))
        });
        let results = factory(engine).estimate_fee(closure, 1).await;
        let fee = results.results[0].result.clone().unwrap();
        assert_eq!(fee.amount, 1_300);
        assert_eq!(fee.clone().with_tip(300), fee);
    }

    #[tokio::test]
    async fn test_nonce_offset_and_era() {
        let engine = engine_with_fee(1);
        let factory = factory(engine.clone());
        let built = factory
            .build_extrinsics(&transfer_closure(), 3, None)
            .await
            .unwrap();

        let coder = built.coder.clone();
        let nonces: Vec<Option<u32>> = built
            .extrinsics
            .iter()
            .map(|extrinsic| {
                extrinsic
                    .as_ref()
                    .ok()
                    .map(|bytes| decode_extrinsic(bytes, &coder, false, &[]).unwrap().extra.nonce.unwrap())
            })
            .collect();
        assert_eq!(nonces, vec![Some(7), None, Some(8)]);

        // Era block hash is requested for the birth block of the finalized block.
        let requested: Vec<u64> = engine
            .requests(methods::CHAIN_GET_BLOCK_HASH)
            .iter()
            .filter_map(|params| params.first().and_then(Value::as_u64))
            .collect();
        assert!(requested.contains(&0));
        assert!(requested.contains(&1_000));
    }

    #[tokio::test]
    async fn test_shared_failure_is_uniform() {
        let engine = Arc::new(MockRpcEngine::new());
        let results = factory(engine).estimate_fee(transfer_closure(), 2).await;
        assert!(results.sender.is_none());
        assert_eq!(results.results.len(), 2);
        assert!(results
            .results
            .iter()
            .all(|result| matches!(result.result, Err(WalletError::Rpc(_)))));
    }

    #[tokio::test]
    async fn test_runtime_call_fee() {
        let engine = engine_with_fee(1);
        let info = RuntimeDispatchInfo {
            weight: crate::extrinsic::weight::Weight::from_ref_time(42),
            class: 0,
            partial_fee: 5_000,
        };
        engine.respond(methods::STATE_CALL, json!(encode_hex(&codec::Encode::encode(&info))));

        let mut chain = polkadot_chain();
        chain.options.fee_via_runtime_call = true;
        let factory = ExtrinsicOperationFactory::new(
            chain,
            engine.clone(),
            polkadot_provider(),
            Arc::new(CurrentSenderResolver::new(sender())),
            ExtrinsicConfig::default(),
        );
        let results = factory.estimate_fee(transfer_closure(), 1).await;
        let fee = results.results[0].result.clone().unwrap();
        assert_eq!(fee.amount, 5_000);
        assert_eq!(fee.weight.ref_time, 42);
        assert_eq!(engine.request_count(methods::PAYMENT_QUERY_INFO), 0);
    }

    #[tokio::test]
    async fn test_submit_and_watch_declined() {
        let engine = engine_with_fee(1);
        let factory = factory(engine.clone());
        let closure: ExtrinsicBuilderClosure =
            Arc::new(|builder, _| Ok(builder.adding_call(RuntimeCall::transfer_keep_alive(&account(2), 1))));

        let submitted = factory
            .submit_and_watch(closure, &DummySigner, |_| false)
            .await
            .unwrap();
        assert!(submitted.status.is_none());
        assert_eq!(engine.request_count(methods::AUTHOR_SUBMIT_AND_WATCH_EXTRINSIC), 1);
    }

    #[tokio::test]
    async fn test_submit_and_watch_status() {
        let engine = engine_with_fee(1);
        let factory = factory(engine.clone());
        let closure: ExtrinsicBuilderClosure =
            Arc::new(|builder, _| Ok(builder.adding_call(RuntimeCall::transfer_keep_alive(&account(2), 1))));

        let submitted = factory
            .submit_and_watch(closure, &DummySigner, |_| true)
            .await
            .unwrap();
        let mut status = submitted.status.unwrap();

        engine.notify(methods::AUTHOR_SUBMIT_AND_WATCH_EXTRINSIC, json!("ready"));
        engine.notify(
            methods::AUTHOR_SUBMIT_AND_WATCH_EXTRINSIC,
            json!({ "inBlock": encode_hex(&mock_block_hash(5)) }),
        );
        assert_eq!(status.next().await.unwrap().unwrap(), ExtrinsicStatus::Ready);
        let in_block = status.next().await.unwrap().unwrap();
        assert_eq!(in_block.block_hash(), Some(mock_block_hash(5)));
    }
}
