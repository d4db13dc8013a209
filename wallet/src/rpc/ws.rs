//! WebSocket JSON-RPC engine backed by `jsonrpsee`.
//!
//! Keeps one persistent connection, reconnects with exponential backoff
//! (cycling through the configured endpoints) and applies the configured
//! per-call timeout policy.
//!
//! # Example
//!
//! ```no_run
//! use substrate_wallet::rpc::{JsonRpcEngineExt, WsRpcEngine};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = WsRpcEngine::connect("ws://127.0.0.1:9944").await?;
//! let version = engine.runtime_version().await?;
//! println!("spec version {}", version.spec_version);
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use jsonrpsee::core::client::{ClientT, SubscriptionClientT};
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::RpcConfig;
use crate::error::WalletError;
use crate::rpc::{JsonRpcEngine, RpcSubscription};

pub struct WsRpcEngine {
    client: RwLock<WsClient>,
    config: RpcConfig,
    /// Index into `config.endpoints` of the live connection
    endpoint_index: AtomicUsize,
}

impl WsRpcEngine {
    pub async fn connect(endpoint: &str) -> Result<Self, WalletError> {
        Self::connect_with_config(RpcConfig::with_endpoint(endpoint)).await
    }

    pub async fn connect_with_config(config: RpcConfig) -> Result<Self, WalletError> {
        if config.endpoints.is_empty() {
            return Err(WalletError::InvalidArgument("no rpc endpoints configured"));
        }
        let client = Self::build_client(&config, &config.endpoints[0]).await?;
        tracing::debug!(endpoint = %config.endpoints[0], "rpc connected");
        Ok(Self {
            client: RwLock::new(client),
            config,
            endpoint_index: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &str {
        let index = self.endpoint_index.load(Ordering::Relaxed);
        &self.config.endpoints[index % self.config.endpoints.len()]
    }

    pub async fn is_connected(&self) -> bool {
        self.client.read().await.is_connected()
    }

    async fn build_client(config: &RpcConfig, endpoint: &str) -> Result<WsClient, WalletError> {
        WsClientBuilder::default()
            .connection_timeout(config.connection_timeout)
            .request_timeout(config.long_request_timeout)
            .build(endpoint)
            .await
            .map_err(|e| WalletError::Rpc(format!("Failed to connect to {}: {}", endpoint, e)))
    }

    /// Ensure connection is alive, reconnect if needed
    async fn ensure_connected(&self) -> Result<(), WalletError> {
        if self.client.read().await.is_connected() {
            return Ok(());
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            let index = self.endpoint_index.fetch_add(1, Ordering::Relaxed) + 1;
            let endpoint = &self.config.endpoints[index % self.config.endpoints.len()];
            match Self::build_client(&self.config, endpoint).await {
                Ok(new_client) => {
                    *self.client.write().await = new_client;
                    tracing::info!(endpoint = %endpoint, attempts, "rpc reconnected");
                    return Ok(());
                }
                Err(e) => {
                    if attempts >= self.config.max_reconnect_attempts {
                        return Err(e);
                    }
                    let delay = self.config.reconnect_delay(attempts);
                    tracing::warn!(
                        endpoint = %endpoint,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "rpc reconnect failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn array_params(params: Vec<Value>) -> Result<ArrayParams, WalletError> {
    let mut array = ArrayParams::new();
    for param in params {
        array.insert(param)?;
    }
    Ok(array)
}

#[async_trait]
impl JsonRpcEngine for WsRpcEngine {
    async fn request(
        &self,
        method: &str,
        params: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, WalletError> {
        self.ensure_connected().await?;
        let timeout = timeout.unwrap_or_else(|| self.config.request_timeout());
        let params = array_params(params)?;
        let client = self.client.read().await;
        match tokio::time::timeout(timeout, client.request::<Value, _>(method, params)).await {
            Ok(result) => result.map_err(|e| WalletError::Rpc(format!("{method} failed: {e}"))),
            Err(_) => Err(WalletError::Timeout(method.to_string())),
        }
    }

    async fn subscribe(
        &self,
        method: &str,
        params: Vec<Value>,
        unsubscribe_method: &str,
    ) -> Result<RpcSubscription, WalletError> {
        self.ensure_connected().await?;
        let params = array_params(params)?;
        let client = self.client.read().await;
        let subscription = client
            .subscribe::<Value, _>(method, params, unsubscribe_method)
            .await
            .map_err(|e| WalletError::Rpc(format!("Failed to subscribe to {method}: {e}")))?;
        Ok(subscription
            .map(|item| item.map_err(WalletError::from))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_without_endpoints_fails() {
        let config = RpcConfig {
            endpoints: vec![],
            ..Default::default()
        };
        let err = WsRpcEngine::connect_with_config(config).await.err().unwrap();
        assert!(matches!(err, WalletError::InvalidArgument(_)));
    }

    #[test]
    fn test_array_params_keeps_order() {
        let params = array_params(vec![Value::from(1), Value::from("two")]).unwrap();
        let raw = jsonrpsee::core::traits::ToRpcParams::to_rpc_params(params)
            .unwrap()
            .unwrap();
        assert_eq!(raw.get(), r#"[1,"two"]"#);
    }
}
