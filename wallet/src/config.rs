//! Runtime configuration for the wallet core.
//!
//! Every section has a `Default` matching production values, so a config file
//! only needs the fields it overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::WalletError;

/// Configuration for the WebSocket RPC engine
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// WebSocket endpoint URLs, tried in order on reconnect
    pub endpoints: Vec<String>,
    /// Connection timeout
    #[serde(with = "duration_ms")]
    pub connection_timeout: Duration,
    /// Request timeout used when several endpoints are available
    #[serde(with = "duration_ms")]
    pub short_request_timeout: Duration,
    /// Request timeout used when only one endpoint is reachable
    #[serde(with = "duration_ms")]
    pub long_request_timeout: Duration,
    /// Maximum number of reconnection attempts
    pub max_reconnect_attempts: u32,
    /// First reconnect delay, doubled after each failed attempt
    #[serde(with = "duration_ms")]
    pub reconnect_base_delay: Duration,
    /// Upper bound for the reconnect delay
    #[serde(with = "duration_ms")]
    pub reconnect_max_delay: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["ws://127.0.0.1:9944".to_string()],
            connection_timeout: Duration::from_secs(30),
            short_request_timeout: Duration::from_secs(20),
            long_request_timeout: Duration::from_secs(60),
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_millis(500),
            reconnect_max_delay: Duration::from_secs(30),
        }
    }
}

impl RpcConfig {
    /// Create config with a single custom endpoint
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoints: vec![endpoint.into()],
            ..Default::default()
        }
    }

    /// Timeout policy: fail over quickly when other nodes exist.
    pub fn request_timeout(&self) -> Duration {
        if self.endpoints.len() > 1 {
            self.short_request_timeout
        } else {
            self.long_request_timeout
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        backoff_delay(self.reconnect_base_delay, self.reconnect_max_delay, attempt)
    }
}

/// Configuration for background sync services
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Debounce window before the offchain indexer is queried
    #[serde(with = "duration_ms")]
    pub offchain_debounce: Duration,
    /// Attempts to (re)establish a storage subscription before giving up
    pub subscription_retry_attempts: u32,
    /// First retry delay for subscription establishment
    #[serde(with = "duration_ms")]
    pub subscription_retry_base_delay: Duration,
    /// Upper bound for the subscription retry delay
    #[serde(with = "duration_ms")]
    pub subscription_retry_max_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            offchain_debounce: Duration::from_secs(2),
            subscription_retry_attempts: 4,
            subscription_retry_base_delay: Duration::from_millis(250),
            subscription_retry_max_delay: Duration::from_secs(8),
        }
    }
}

impl SyncConfig {
    pub fn subscription_retry_delay(&self, attempt: u32) -> Duration {
        backoff_delay(
            self.subscription_retry_base_delay,
            self.subscription_retry_max_delay,
            attempt,
        )
    }
}

/// Configuration for extrinsic construction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtrinsicConfig {
    /// Target mortality window in milliseconds of chain time
    pub mortal_period_ms: u64,
    /// Extra blocks added to the window to cover finality lag
    pub max_finality_lag: u64,
    /// Block time used when the runtime exposes none
    pub fallback_block_time_ms: u64,
    /// Block hash retention used when `System.BlockHashCount` is missing
    pub fallback_block_hash_count: u32,
    /// Tip applied to every extrinsic unless the builder overrides it
    pub default_tip: u128,
}

impl Default for ExtrinsicConfig {
    fn default() -> Self {
        Self {
            mortal_period_ms: 5 * 60 * 1000,
            max_finality_lag: 5,
            fallback_block_time_ms: 6_000,
            fallback_block_hash_count: 2_400,
            default_tip: 0,
        }
    }
}

/// Top-level configuration file layout
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub rpc: RpcConfig,
    pub sync: SyncConfig,
    pub extrinsic: ExtrinsicConfig,
}

impl WalletConfig {
    /// Load a JSON config file; missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, WalletError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

pub(crate) fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << shift).min(max)
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RpcConfig::default();
        assert_eq!(config.endpoints, vec!["ws://127.0.0.1:9944".to_string()]);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(SyncConfig::default().offchain_debounce, Duration::from_secs(2));
    }

    #[test]
    fn test_request_timeout_policy() {
        let single = RpcConfig::with_endpoint("ws://localhost:9955");
        assert_eq!(single.request_timeout(), single.long_request_timeout);

        let mut multi = single.clone();
        multi.endpoints.push("ws://localhost:9956".into());
        assert_eq!(multi.request_timeout(), multi.short_request_timeout);
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let config = RpcConfig::default();
        assert_eq!(config.reconnect_delay(1), Duration::from_millis(500));
        assert_eq!(config.reconnect_delay(2), Duration::from_millis(1000));
        assert_eq!(config.reconnect_delay(3), Duration::from_millis(2000));
        assert_eq!(config.reconnect_delay(30), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: WalletConfig =
            serde_json::from_str(r#"{"rpc":{"endpoints":["ws://a"]},"sync":{"offchain_debounce":500}}"#)
                .unwrap();
        assert_eq!(config.rpc.endpoints, vec!["ws://a".to_string()]);
        assert_eq!(config.rpc.max_reconnect_attempts, 5);
        assert_eq!(config.sync.offchain_debounce, Duration::from_millis(500));
        assert_eq!(config.extrinsic, ExtrinsicConfig::default());
    }
}
