use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use substrate_wallet::{
    address::{ss58_decode, ss58_encode, AccountId, AddressFormat},
    config::WalletConfig,
    extrinsic::{
        sender::CurrentSenderResolver, ExtrinsicBuilderClosure, ExtrinsicOperationFactory,
        ExtrinsicService, RuntimeCall,
    },
    hex_util::encode_hex,
    model::{AssetModel, AssetType, ChainAccountResponse, ChainModel, ChainOptions, CryptoType, WalletType},
    rpc::{ChainProperties, JsonRpcEngineExt, SharedRpcEngine, WsRpcEngine},
    runtime::RpcRuntimeProvider,
};

#[derive(Parser)]
#[command(name = "wallet", version, about = "Substrate wallet client tooling")]
struct Cli {
    /// Node WebSocket endpoint, overrides the configured endpoints
    #[arg(long, global = true, env = "WALLET_ENDPOINT")]
    endpoint: Option<String>,
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chain name, properties and runtime version
    #[command(name = "chain-info")]
    ChainInfo,
    /// Next nonce of an account
    Nonce { address: String },
    /// Fee of a `Balances.transfer_keep_alive`
    #[command(name = "estimate-transfer")]
    EstimateTransfer {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u128,
        #[arg(long, default_value_t = 0)]
        tip: u128,
    },
    /// Convert between SS58 and hex account ids
    Address {
        value: String,
        /// SS58 prefix used when encoding a hex account id
        #[arg(long, default_value_t = 42)]
        prefix: u16,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.endpoint)?;

    match cli.command {
        Commands::ChainInfo => {
            let engine = connect(&config).await?;
            let name = engine.system_chain().await.context("system_chain failed")?;
            let properties = engine.system_properties().await.context("system_properties failed")?;
            let version = engine.runtime_version().await.context("runtime version failed")?;
            let genesis = engine.genesis_hash().await.context("genesis hash failed")?;
            let info = json!({
                "chain": name,
                "genesisHash": encode_hex(&genesis),
                "properties": properties,
                "specName": version.spec_name,
                "specVersion": version.spec_version,
                "transactionVersion": version.transaction_version,
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::Nonce { address } => {
            let engine = connect(&config).await?;
            let nonce = engine
                .account_next_index(&address)
                .await
                .with_context(|| format!("failed to fetch nonce of {address}"))?;
            println!("{nonce}");
        }
        Commands::EstimateTransfer { from, to, amount, tip } => {
            estimate_transfer(&config, &from, &to, amount, tip).await?;
        }
        Commands::Address { value, prefix } => println!("{}", convert_address(&value, prefix)?),
        Commands::Config => println!("{}", serde_json::to_string_pretty(&config)?),
    }
    Ok(())
}

fn load_config(path: Option<&Path>, endpoint: Option<String>) -> Result<WalletConfig> {
    let mut config = match path {
        Some(path) => {
            WalletConfig::load(path).with_context(|| format!("failed to load config {}", path.display()))?
        }
        None => WalletConfig::default(),
    };
    if let Some(endpoint) = endpoint {
        config.rpc.endpoints = vec![endpoint];
    }
    Ok(config)
}

async fn connect(config: &WalletConfig) -> Result<SharedRpcEngine> {
    let engine = WsRpcEngine::connect_with_config(config.rpc.clone())
        .await
        .context("failed to connect to node")?;
    tracing::info!(endpoint = engine.endpoint(), "connected");
    Ok(Arc::new(engine))
}

/// Hex account ids become SS58 with `prefix`; SS58 addresses become hex.
fn convert_address(value: &str, prefix: u16) -> Result<String> {
    if value.starts_with("0x") {
        let account = AccountId::from_hex(value).context("invalid hex account id")?;
        if account.is_ethereum() {
            bail!("20-byte account ids have no SS58 form");
        }
        return Ok(ss58_encode(account.as_bytes(), prefix)?);
    }
    let (prefix, bytes) = ss58_decode(value).context("invalid SS58 address")?;
    Ok(format!("{} (prefix {prefix})", encode_hex(&bytes)))
}

/// Single native asset chain descriptor assembled from the node itself.
async fn describe_chain(engine: &SharedRpcEngine) -> Result<ChainModel> {
    let genesis = engine.genesis_hash().await?;
    let name = engine.system_chain().await?;
    let properties = engine.system_properties().await?;
    let address_format = if properties.is_ethereum == Some(true) {
        AddressFormat::Ethereum
    } else {
        AddressFormat::Substrate {
            ss58_prefix: properties.ss58_format.unwrap_or(42),
        }
    };

    Ok(ChainModel {
        chain_id: hex::encode(genesis),
        name,
        address_format,
        assets: vec![AssetModel {
            asset_id: 0,
            symbol: token_symbol(&properties),
            precision: token_decimals(&properties),
            asset_type: AssetType::Native,
            staking: vec![],
        }],
        block_time_ms: None,
        options: ChainOptions::default(),
    })
}

/// `system_properties` reports either a scalar or one entry per token.
fn first_property(value: Option<&serde_json::Value>) -> Option<&serde_json::Value> {
    match value? {
        serde_json::Value::Array(values) => values.first(),
        value => Some(value),
    }
}

fn token_symbol(properties: &ChainProperties) -> String {
    first_property(properties.token_symbol.as_ref())
        .and_then(|value| value.as_str())
        .unwrap_or("UNIT")
        .to_string()
}

fn token_decimals(properties: &ChainProperties) -> u16 {
    first_property(properties.token_decimals.as_ref())
        .and_then(|value| value.as_u64())
        .and_then(|value| u16::try_from(value).ok())
        .unwrap_or(12)
}

async fn estimate_transfer(config: &WalletConfig, from: &str, to: &str, amount: u128, tip: u128) -> Result<()> {
    let engine = connect(config).await?;
    let chain = describe_chain(&engine).await.context("failed to describe chain")?;
    let sender = AccountId::from_address(from, chain.address_format).context("invalid sender address")?;
    let dest = AccountId::from_address(to, chain.address_format).context("invalid destination address")?;

    let crypto_type = if chain.is_ethereum_based() {
        CryptoType::Ethereum
    } else {
        CryptoType::Sr25519
    };
    let account = ChainAccountResponse {
        meta_id: "cli".into(),
        chain_id: chain.chain_id.clone(),
        name: "cli".into(),
        public_key: sender.as_bytes().to_vec(),
        account_id: sender,
        crypto_type,
        is_chain_account: false,
        wallet_type: WalletType::WatchOnly,
    };

    let factory = ExtrinsicOperationFactory::new(
        chain,
        engine.clone(),
        Arc::new(RpcRuntimeProvider::new(engine)),
        Arc::new(CurrentSenderResolver::new(account)),
        config.extrinsic.clone(),
    );
    let closure: ExtrinsicBuilderClosure = Arc::new(move |builder, _| {
        Ok(builder
            .with_tip(tip)
            .adding_call(RuntimeCall::transfer_keep_alive(&dest, amount)))
    });

    let fee = ExtrinsicService::new(factory)
        .estimate_fee(closure)
        .await
        .context("fee estimation failed")?;
    let output = json!({
        "fee": fee.amount.to_string(),
        "tip": fee.tip.to_string(),
        "refTime": fee.weight.ref_time,
        "proofSize": fee.weight.proof_size,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
