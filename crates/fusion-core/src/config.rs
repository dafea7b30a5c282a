// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fuser configuration and its storage port.

use fusion_topology::CongestionPolicy;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Config key under which [`FuserConfig`] is stored.
pub const FUSER_CONFIG_KEY: &str = "fuser";

/// What fusion does with structural anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyPolicy {
    /// Abort the operation; nothing partial is registered.
    #[default]
    Strict,
    /// Record, log, skip the step, and keep going.
    BestEffort,
}

/// Tunables for container construction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FuserConfig {
    /// Handling of structural anomalies.
    pub anomaly_policy: AnomalyPolicy,
    /// Capacity of injected queued ports; `None` keeps the runtime default.
    pub queue_capacity: Option<u64>,
    /// Congestion policy of injected queued ports.
    pub injected_congestion_policy: CongestionPolicy,
}

impl FuserConfig {
    /// Loads the stored config, falling back to defaults when absent.
    pub fn load_or_default<S: ConfigStore>(
        service: &ConfigService<S>,
    ) -> Result<Self, ConfigError> {
        Ok(service.load(FUSER_CONFIG_KEY)?.unwrap_or_default())
    }

    /// Persists this config under [`FUSER_CONFIG_KEY`].
    pub fn save<S: ConfigStore>(&self, service: &ConfigService<S>) -> Result<(), ConfigError> {
        service.save(FUSER_CONFIG_KEY, self)
    }

    /// Same config with a different anomaly policy.
    #[must_use]
    pub fn with_policy(mut self, anomaly_policy: AnomalyPolicy) -> Self {
        self.anomaly_policy = anomaly_policy;
        self
    }
}

/// Where serialized fuser configs are kept, keyed by name.
pub trait ConfigStore {
    /// Raw bytes stored under `key`, or `NotFound`.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Persist a raw config blob.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Error type for config operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Nothing stored under the key.
    #[error("config key not found")]
    NotFound,
    /// Stored bytes are not a valid config.
    #[error("config is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
    /// Failure reported by the backing store.
    #[error("config store failed: {0}")]
    Store(String),
}

/// Serializes config values as JSON and delegates storage to a [`ConfigStore`].
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Create a new service using the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S> ConfigService<S>
where
    S: ConfigStore,
{
    /// Load and deserialize a config value for `key`. Returns `Ok(None)` if missing.
    pub fn load<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: DeserializeOwned,
    {
        match self.store.load_raw(key) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(ConfigError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Serialize and persist a config value for `key`.
    pub fn save<T>(&self, key: &str, value: &T) -> Result<(), ConfigError>
    where
        T: Serialize,
    {
        let data = serde_json::to_vec_pretty(value)?;
        self.store.save_raw(key, &data)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn partial_json_fills_missing_fields_with_defaults() {
        let cfg: FuserConfig = serde_json::from_str(r#"{"queue_capacity": 64}"#).unwrap();
        assert_eq!(cfg.queue_capacity, Some(64));
        assert_eq!(cfg.anomaly_policy, AnomalyPolicy::Strict);
        assert_eq!(cfg.injected_congestion_policy, CongestionPolicy::Wait);
    }

    #[test]
    fn policy_names_are_snake_case() {
        let cfg = FuserConfig::default().with_policy(AnomalyPolicy::BestEffort);
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"best_effort\""));
    }
}
