use crate::error::Result;
use crate::paths;
use crate::wait::{PollPolicy, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// TimeoutPolicy
// ---------------------------------------------------------------------------

/// The single source of every poll interval, wait timeout, and retry bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_wait_timeout")]
    pub readiness_timeout_secs: u64,
    #[serde(default = "default_wait_timeout")]
    pub health_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_poll_interval() -> u64 {
    1
}

fn default_wait_timeout() -> u64 {
    300
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            readiness_timeout_secs: default_wait_timeout(),
            health_timeout_secs: default_wait_timeout(),
            retry: RetryPolicy::default(),
        }
    }
}

impl TimeoutPolicy {
    pub fn readiness(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_secs(self.poll_interval_secs),
            Duration::from_secs(self.readiness_timeout_secs),
        )
    }

    pub fn health(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_secs(self.poll_interval_secs),
            Duration::from_secs(self.health_timeout_secs),
        )
    }
}

// ---------------------------------------------------------------------------
// NetworkConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_service_cidr")]
    pub service_cidr: String,
    #[serde(default = "default_dns_port")]
    pub dns_port: u16,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

fn default_service_cidr() -> String {
    "172.30.0.0/16".to_string()
}

fn default_dns_port() -> u16 {
    8053
}

fn default_api_port() -> u16 {
    8443
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            service_cidr: default_service_cidr(),
            dns_port: default_dns_port(),
            api_port: default_api_port(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Optional `clusterup.yaml` in the base directory. Every field has a
/// default, so a missing file and an empty file mean the same thing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub timeouts: TimeoutPolicy,
    #[serde(default)]
    pub network: NetworkConfig,
    /// Key-value store image; not derived from the image template.
    #[serde(default = "default_etcd_image")]
    pub etcd_image: String,
}

fn default_etcd_image() -> String {
    "quay.io/coreos/etcd:v3.3.10".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeouts: TimeoutPolicy::default(),
            network: NetworkConfig::default(),
            etcd_image: default_etcd_image(),
        }
    }
}

impl Config {
    pub fn load(base: &Path) -> Result<Self> {
        let path = paths::config_path(base);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, base: &Path) -> Result<()> {
        let path = paths::config_path(base);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }
}
