use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use provisioning::preparer::PreparerConfig;
use provisioning::{CloudAccount, ClusterSpec, NodeType, Version};

use crate::common::env::{
    FLEET_LOCK_TIMEOUT_MS, FLEET_SLOW_PROVISIONING_MS, FLEET_SPARE_COUNT, get_duration_from_env,
    get_u64_from_env,
};

/// Configuration of a zone's node repository and provisioning.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FleetConfig {
    pub zone: ZoneConfig,
    pub locks: LockConfig,
    pub images: ImageConfig,
    /// OS version targets, keyed by host type name.
    pub os: BTreeMap<String, Version>,
    pub preparer: PreparerSection,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ZoneConfig {
    /// Hosts are provisioned on demand instead of being a fixed pool.
    pub dynamic_provisioning: bool,
    /// Whether tenant hosts may run children of several applications.
    pub host_sharing: bool,
    /// Number of empty hosts kept free to replace failed nodes.
    pub spare_count: usize,
    pub exclave_accounts: Vec<CloudAccount>,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        ZoneConfig {
            dynamic_provisioning: false,
            host_sharing: true,
            spare_count: 0,
            exclave_accounts: Vec::new(),
        }
    }
}

impl ZoneConfig {
    pub fn exclusive_allocation(&self, cluster: &ClusterSpec) -> bool {
        cluster.exclusive || !self.host_sharing
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
    /// How long to wait for a lock. Must exceed the slowest expected provisioning call, as
    /// both locks are held while hosts are provisioned.
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageConfig {
    pub default_image: String,
    #[serde(deserialize_with = "deserialize_duration")]
    pub cache_ttl: Duration,
}

impl Default for ImageConfig {
    fn default() -> Self {
        ImageConfig {
            default_image: "docker.io/library/node:latest".to_string(),
            cache_ttl: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreparerSection {
    #[serde(deserialize_with = "deserialize_duration")]
    pub slow_provisioning_warning: Duration,
}

impl Default for PreparerSection {
    fn default() -> Self {
        PreparerSection {
            slow_provisioning_warning: PreparerConfig::default().slow_provisioning_warning,
        }
    }
}

fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let value = String::deserialize(deserializer)?;
    humantime::parse_duration(&value).map_err(serde::de::Error::custom)
}

impl FleetConfig {
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: FleetConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration file and applies environment overrides.
    pub fn load(path: &Path) -> crate::Result<Self> {
        log::debug!("Loading fleet configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(spare_count) = get_u64_from_env(FLEET_SPARE_COUNT) {
            self.zone.spare_count = spare_count as usize;
        }
        if let Some(timeout) = get_duration_from_env(FLEET_LOCK_TIMEOUT_MS) {
            self.locks.timeout = timeout;
        }
        if let Some(warning) = get_duration_from_env(FLEET_SLOW_PROVISIONING_MS) {
            self.preparer.slow_provisioning_warning = warning;
        }
        self
    }

    pub fn preparer_config(&self) -> PreparerConfig {
        PreparerConfig {
            slow_provisioning_warning: self.preparer.slow_provisioning_warning,
        }
    }

    pub fn os_targets(&self) -> crate::Result<BTreeMap<NodeType, Version>> {
        self.os
            .iter()
            .map(|(name, version)| {
                let node_type: NodeType = name.parse().map_err(crate::Error::ConfigError)?;
                if !node_type.is_host() {
                    return Err(crate::Error::ConfigError(format!(
                        "OS version targets can only be set for host types, not {node_type}"
                    )));
                }
                Ok((node_type, *version))
            })
            .collect()
    }

    fn validate(&self) -> crate::Result<()> {
        if self.locks.timeout.is_zero() {
            return Err(crate::Error::ConfigError(
                "Lock timeout must be positive".to_string(),
            ));
        }
        if self.locks.timeout <= self.preparer.slow_provisioning_warning {
            return Err(crate::Error::ConfigError(format!(
                "Lock timeout ({:?}) must exceed the slow provisioning warning ({:?})",
                self.locks.timeout, self.preparer.slow_provisioning_warning
            )));
        }
        self.os_targets()?;
        Ok(())
    }
}
