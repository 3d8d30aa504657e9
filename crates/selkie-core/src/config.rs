//! Configuration for selkie adapters
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};
use crate::policy::Policies;
use serde::{Deserialize, Serialize};

/// Configuration for one object adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Adapter name (diagnostic only; identities carry the ordinal)
    #[serde(default = "default_name")]
    pub name: String,

    /// Numeric identifier baked into system-assigned object identities
    #[serde(default)]
    pub ordinal: u32,

    /// Policy combination for this adapter
    #[serde(default)]
    pub policies: Policies,
}

fn default_name() -> String {
    "root".to_string()
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            ordinal: 0,
            policies: Policies::default(),
        }
    }
}

impl AdapterConfig {
    /// Create a configuration with the given name and ordinal
    pub fn new(name: impl Into<String>, ordinal: u32) -> Self {
        Self {
            name: name.into(),
            ordinal,
            policies: Policies::default(),
        }
    }

    /// Replace the policy set
    pub fn with_policies(mut self, policies: Policies) -> Self {
        self.policies = policies;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidConfiguration {
                field: "name".into(),
                reason: "must not be empty".into(),
            });
        }

        if self.name.len() > ADAPTER_NAME_LENGTH_BYTES_MAX {
            return Err(Error::InvalidConfiguration {
                field: "name".into(),
                reason: format!(
                    "length {} exceeds limit {}",
                    self.name.len(),
                    ADAPTER_NAME_LENGTH_BYTES_MAX
                ),
            });
        }

        self.policies.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{RequestProcessing, ServantRetention};

    #[test]
    fn test_default_config_is_valid() {
        let config = AdapterConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut config = AdapterConfig::default();
        config.name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policy_errors_propagate() {
        let config = AdapterConfig::new("bad", 1).with_policies(Policies {
            retention: ServantRetention::NonRetain,
            request_processing: RequestProcessing::ActiveObjectMapOnly,
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = AdapterConfig::new("billing", 7);
        let json = serde_json::to_string(&config).unwrap();
        let back: AdapterConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "billing");
        assert_eq!(back.ordinal, 7);
        assert_eq!(back.policies, config.policies);
    }
}
