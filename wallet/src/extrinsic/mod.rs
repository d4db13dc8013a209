//! Extrinsic construction, fee estimation and submission.

pub mod builder;
pub mod call;
pub mod era;
pub mod extension;
pub mod factory;
pub mod fee;
pub mod proxy;
pub mod sender;
pub mod service;
pub mod signer;
pub mod splitter;
pub mod weight;

pub use builder::{decode_extrinsic, extrinsic_hash, DecodedExtrinsic, ExtrinsicBuilder};
pub use call::{CallArg, CallPath, RuntimeCall};
pub use era::{Era, MortalEraCalculator};
pub use factory::{
    ExtrinsicBuilderClosure, ExtrinsicOperationFactory, FeeIndexedResults, IndexedResult, IndexedResults,
    SubmitIndexedResults, SubmittedExtrinsic,
};
pub use fee::{ExtrinsicFee, FeePayer, FeePayerReason};
pub use proxy::{ProxyGraph, ProxyPath};
pub use sender::{
    resolver_for, CurrentSenderResolver, ExtrinsicSenderResolution, ExtrinsicSenderResolver,
    ProxySenderResolver, SharedSenderResolver,
};
pub use service::ExtrinsicService;
pub use signer::{DummySigner, SharedSigner, Signer, SigningContext};
pub use splitter::{CallWeightEstimator, ExtrinsicSplitter};
pub use weight::{BlockWeights, Weight};
