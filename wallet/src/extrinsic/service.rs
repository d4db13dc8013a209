//! Operation-level entry points over [`ExtrinsicOperationFactory`].

use std::sync::Arc;

use crate::error::WalletError;
use crate::extrinsic::factory::{
    ExtrinsicBuilderClosure, ExtrinsicOperationFactory, FeeIndexedResults, IndexedResults,
    SubmitIndexedResults, SubmittedExtrinsic,
};
use crate::extrinsic::fee::ExtrinsicFee;
use crate::extrinsic::signer::Signer;
use crate::extrinsic::splitter::ExtrinsicSplitter;

#[derive(Clone)]
pub struct ExtrinsicService {
    factory: Arc<ExtrinsicOperationFactory>,
}

impl ExtrinsicService {
    pub fn new(factory: ExtrinsicOperationFactory) -> Self {
        Self {
            factory: Arc::new(factory),
        }
    }

    pub fn factory(&self) -> &ExtrinsicOperationFactory {
        &self.factory
    }

    pub async fn estimate_fee(&self, closure: ExtrinsicBuilderClosure) -> Result<ExtrinsicFee, WalletError> {
        single(self.factory.estimate_fee(closure, 1).await)
    }

    /// Fee of every extrinsic the splitter produces.
    pub async fn estimate_fee_with_splitter(&self, splitter: ExtrinsicSplitter) -> FeeIndexedResults {
        match splitter.build(self.factory.as_ref()).await {
            Ok(split) => self.factory.estimate_fee(split.closure, split.count).await,
            Err(e) => IndexedResults::failed(1, e),
        }
    }

    pub async fn submit(
        &self,
        closure: ExtrinsicBuilderClosure,
        signer: &dyn Signer,
    ) -> Result<[u8; 32], WalletError> {
        single(self.factory.submit(closure, signer, 1).await)
    }

    pub async fn submit_with_splitter(
        &self,
        splitter: ExtrinsicSplitter,
        signer: &dyn Signer,
    ) -> SubmitIndexedResults {
        match splitter.build(self.factory.as_ref()).await {
            Ok(split) => self.factory.submit(split.closure, signer, split.count).await,
            Err(e) => IndexedResults::failed(1, e),
        }
    }

    /// Submit and follow the status of one extrinsic.
    pub async fn submit_and_watch(
        &self,
        closure: ExtrinsicBuilderClosure,
        signer: &dyn Signer,
    ) -> Result<SubmittedExtrinsic, WalletError> {
        self.factory.submit_and_watch(closure, signer, |_| true).await
    }
}

fn single<T>(results: IndexedResults<T>) -> Result<T, WalletError> {
    results
        .results
        .into_iter()
        .next()
        .ok_or(WalletError::InvalidExtrinsicIndex { index: 0, count: 0 })?
        .result
}
