//! Snapshot of the runtime metadata needed to encode calls, storage keys and
//! signed extensions for one spec version.

use std::collections::BTreeMap;

use blake2::digest::consts::U8;
use blake2::{Blake2b, Digest};
use codec::Decode;
use frame_metadata::{RuntimeMetadata, RuntimeMetadataPrefixed};
use scale_info::{PortableRegistry, TypeDef};

use crate::error::WalletError;
use crate::hashing::StorageHasher;
use crate::rpc::RuntimeVersion;

/// Signed extensions assumed when metadata does not list any.
pub const DEFAULT_SIGNED_EXTENSIONS: &[&str] = &[
    "CheckNonZeroSender",
    "CheckSpecVersion",
    "CheckTxVersion",
    "CheckGenesis",
    "CheckMortality",
    "CheckNonce",
    "CheckWeight",
    "ChargeTransactionPayment",
];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StorageEntryInfo {
    /// One hasher per key; empty for plain values
    pub hashers: Vec<StorageHasher>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PalletInfo {
    pub name: String,
    pub index: u8,
    pub calls: BTreeMap<String, u8>,
    pub storage: BTreeMap<String, StorageEntryInfo>,
    pub constants: BTreeMap<String, Vec<u8>>,
}

/// Metadata-driven coder for one runtime version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoderFactory {
    pub spec_version: u32,
    pub tx_version: u32,
    pallets: BTreeMap<String, PalletInfo>,
    signed_extensions: Vec<String>,
    /// `(blake2_64(api name), version)`
    runtime_apis: Vec<([u8; 8], u32)>,
}

impl CoderFactory {
    pub fn builder(spec_version: u32, tx_version: u32) -> CoderFactoryBuilder {
        CoderFactoryBuilder {
            factory: CoderFactory {
                spec_version,
                tx_version,
                pallets: BTreeMap::new(),
                signed_extensions: Vec::new(),
                runtime_apis: Vec::new(),
            },
        }
    }

    /// Build from `state_getMetadata` bytes and the matching runtime version.
    pub fn from_metadata(
        metadata_bytes: &[u8],
        version: &RuntimeVersion,
    ) -> Result<Self, WalletError> {
        let prefixed = RuntimeMetadataPrefixed::decode(&mut &metadata_bytes[..]).map_err(|e| {
            WalletError::Serialization(format!("failed to decode runtime metadata: {e}"))
        })?;

        let (pallets, signed_extensions) = match &prefixed.1 {
            RuntimeMetadata::V14(meta) => (
                collect_pallets!(meta, frame_metadata::v14)?,
                meta.extrinsic
                    .signed_extensions
                    .iter()
                    .map(|ext| ext.identifier.clone())
                    .collect(),
            ),
            RuntimeMetadata::V15(meta) => (
                collect_pallets!(meta, frame_metadata::v15)?,
                meta.extrinsic
                    .signed_extensions
                    .iter()
                    .map(|ext| ext.identifier.clone())
                    .collect(),
            ),
            RuntimeMetadata::V16(meta) => {
                tracing::debug!("v16 metadata: using default signed extension order");
                (collect_pallets!(meta, frame_metadata::v16)?, Vec::new())
            }
            other => {
                return Err(WalletError::Serialization(format!(
                    "unsupported runtime metadata version {}",
                    other.version()
                )))
            }
        };

        let runtime_apis = version
            .apis
            .iter()
            .filter_map(|(id, api_version)| {
                let bytes = hex::decode(id.trim_start_matches("0x")).ok()?;
                let id: [u8; 8] = bytes.try_into().ok()?;
                Some((id, *api_version))
            })
            .collect();

        Ok(Self {
            spec_version: version.spec_version,
            tx_version: version.transaction_version,
            pallets,
            signed_extensions,
            runtime_apis,
        })
    }

    pub fn pallet(&self, name: &str) -> Result<&PalletInfo, WalletError> {
        self.pallets
            .get(name)
            .ok_or_else(|| WalletError::MissingPallet(name.to_string()))
    }

    pub fn has_pallet(&self, name: &str) -> bool {
        self.pallets.contains_key(name)
    }

    pub fn pallet_by_index(&self, index: u8) -> Option<&PalletInfo> {
        self.pallets.values().find(|pallet| pallet.index == index)
    }

    /// `(pallet index, call index)` of `pallet::call`.
    pub fn call_index(&self, pallet: &str, call: &str) -> Result<(u8, u8), WalletError> {
        let info = self.pallet(pallet)?;
        let call_index = info
            .calls
            .get(call)
            .ok_or_else(|| WalletError::MissingCall(format!("{pallet}::{call}")))?;
        Ok((info.index, *call_index))
    }

    /// Reverse lookup of an encoded call prefix.
    pub fn call_name(&self, pallet_index: u8, call_index: u8) -> Option<(&str, &str)> {
        let pallet = self.pallet_by_index(pallet_index)?;
        let (name, _) = pallet
            .calls
            .iter()
            .find(|(_, index)| **index == call_index)?;
        Some((pallet.name.as_str(), name.as_str()))
    }

    pub fn storage_entry(&self, pallet: &str, item: &str) -> Result<&StorageEntryInfo, WalletError> {
        self.pallet(pallet)?
            .storage
            .get(item)
            .ok_or_else(|| WalletError::MissingStorage(format!("{pallet}.{item}")))
    }

    pub fn constant_bytes(&self, pallet: &str, name: &str) -> Result<&[u8], WalletError> {
        self.pallet(pallet)?
            .constants
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| WalletError::MissingConstant(format!("{pallet}.{name}")))
    }

    pub fn constant<T: Decode>(&self, pallet: &str, name: &str) -> Result<T, WalletError> {
        let mut bytes = self.constant_bytes(pallet, name)?;
        Ok(T::decode(&mut bytes)?)
    }

    /// Like [`Self::constant`] but `None` when the pallet or constant is absent.
    pub fn optional_constant<T: Decode>(&self, pallet: &str, name: &str) -> Result<Option<T>, WalletError> {
        match self.constant_bytes(pallet, name) {
            Ok(mut bytes) => Ok(Some(T::decode(&mut bytes)?)),
            Err(WalletError::MissingPallet(_) | WalletError::MissingConstant(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Signed extension identifiers in encoding order.
    pub fn signed_extensions(&self) -> Vec<&str> {
        if self.signed_extensions.is_empty() {
            DEFAULT_SIGNED_EXTENSIONS.to_vec()
        } else {
            self.signed_extensions.iter().map(String::as_str).collect()
        }
    }

    pub fn runtime_api_version(&self, api: &str) -> Option<u32> {
        let id = runtime_api_id(api);
        self.runtime_apis
            .iter()
            .find(|(candidate, _)| *candidate == id)
            .map(|(_, version)| *version)
    }
}

/// Runtime API identifier as listed in `RuntimeVersion::apis`.
pub fn runtime_api_id(api: &str) -> [u8; 8] {
    let hash = Blake2b::<U8>::digest(api.as_bytes());
    let mut id = [0u8; 8];
    id.copy_from_slice(&hash);
    id
}

/// Incremental construction, used for fixed runtimes and tests.
pub struct CoderFactoryBuilder {
    factory: CoderFactory,
}

impl CoderFactoryBuilder {
    pub fn pallet(mut self, name: &str, index: u8) -> Self {
        self.factory.pallets.insert(
            name.to_string(),
            PalletInfo {
                name: name.to_string(),
                index,
                ..Default::default()
            },
        );
        self
    }

    fn pallet_mut(&mut self, name: &str) -> &mut PalletInfo {
        let next_index = self.factory.pallets.len() as u8;
        self.factory
            .pallets
            .entry(name.to_string())
            .or_insert_with(|| PalletInfo {
                name: name.to_string(),
                index: next_index,
                ..Default::default()
            })
    }

    pub fn call(mut self, pallet: &str, call: &str, index: u8) -> Self {
        self.pallet_mut(pallet).calls.insert(call.to_string(), index);
        self
    }

    pub fn storage(mut self, pallet: &str, item: &str, hashers: &[StorageHasher]) -> Self {
        self.pallet_mut(pallet).storage.insert(
            item.to_string(),
            StorageEntryInfo {
                hashers: hashers.to_vec(),
            },
        );
        self
    }

    pub fn constant(mut self, pallet: &str, name: &str, value: Vec<u8>) -> Self {
        self.pallet_mut(pallet).constants.insert(name.to_string(), value);
        self
    }

    pub fn signed_extensions(mut self, identifiers: &[&str]) -> Self {
        self.factory.signed_extensions = identifiers.iter().map(|id| id.to_string()).collect();
        self
    }

    pub fn runtime_api(mut self, api: &str, version: u32) -> Self {
        self.factory.runtime_apis.push((runtime_api_id(api), version));
        self
    }

    pub fn build(self) -> CoderFactory {
        self.factory
    }
}

/// Collect pallet info from a metadata version that has a portable registry.
macro_rules! collect_pallets {
    ($meta:expr, $version:path) => {{
        use $version as version;
        let meta = $meta;
        let mut pallets = BTreeMap::new();
        for pallet in &meta.pallets {
            let calls = match &pallet.calls {
                Some(calls) => call_variants(&meta.types, calls.ty.id, &pallet.name)?,
                None => BTreeMap::new(),
            };
            let mut storage = BTreeMap::new();
            if let Some(pallet_storage) = &pallet.storage {
                for entry in &pallet_storage.entries {
                    let hashers = match &entry.ty {
                        version::StorageEntryType::Plain(_) => Vec::new(),
                        version::StorageEntryType::Map { hashers, .. } => hashers
                            .iter()
                            .map(|hasher| match hasher {
                                version::StorageHasher::Blake2_128 => StorageHasher::Blake2_128,
                                version::StorageHasher::Blake2_256 => StorageHasher::Blake2_256,
                                version::StorageHasher::Blake2_128Concat => {
                                    StorageHasher::Blake2_128Concat
                                }
                                version::StorageHasher::Twox128 => StorageHasher::Twox128,
                                version::StorageHasher::Twox256 => StorageHasher::Twox256,
                                version::StorageHasher::Twox64Concat => StorageHasher::Twox64Concat,
                                version::StorageHasher::Identity => StorageHasher::Identity,
                            })
                            .collect(),
                    };
                    storage.insert(entry.name.clone(), StorageEntryInfo { hashers });
                }
            }
            let constants = pallet
                .constants
                .iter()
                .map(|constant| (constant.name.clone(), constant.value.clone()))
                .collect();
            pallets.insert(
                pallet.name.clone(),
                PalletInfo {
                    name: pallet.name.clone(),
                    index: pallet.index,
                    calls,
                    storage,
                    constants,
                },
            );
        }
        Ok::<_, WalletError>(pallets)
    }};
}
use collect_pallets;

fn call_variants(
    registry: &PortableRegistry,
    call_type_id: u32,
    pallet_name: &str,
) -> Result<BTreeMap<String, u8>, WalletError> {
    let call_type = registry.resolve(call_type_id).ok_or_else(|| {
        WalletError::Serialization(format!(
            "runtime metadata missing call type {call_type_id} for {pallet_name}"
        ))
    })?;

    let TypeDef::Variant(variant) = &call_type.type_def else {
        return Err(WalletError::Serialization(format!(
            "runtime metadata call enum for {pallet_name} is not a variant"
        )));
    };

    Ok(variant
        .variants
        .iter()
        .map(|variant| (variant.name.clone(), variant.index))
        .collect())
}
