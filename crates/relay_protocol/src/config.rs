//! Typed, validated configuration snapshot (§4.A, §6 Configuration).
//!
//! Loaded once at startup (and re-parsed/re-validated on an explicit reload
//! operation — never on a file-watch). Invalid configuration is fatal,
//! naming the offending field.

use crate::job::JobKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config field `{field}`: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    Static,
    Dynamic,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    RoundRobin,
    LeastLoaded,
    Weighted,
    Random,
    PriorityBased,
}

impl Default for LoadBalancingStrategy {
    fn default() -> Self {
        LoadBalancingStrategy::LeastLoaded
    }
}

/// A single statically-declared node in fleet mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticNodeConfig {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
    #[serde(default)]
    pub capabilities: Vec<JobKind>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

fn default_max_concurrent() -> u32 {
    4
}

/// Single-node (`comfyui`) section: one local endpoint, no fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComfyUiConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Where the node writes outputs on the filesystem shared with this
    /// process, used to resolve `Local` artifact locators (§3, §4.J harvest).
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

/// `distributed` / `nodes` sections: fleet mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedConfig {
    pub enabled: bool,
    #[serde(default)]
    pub discovery_mode: DiscoveryMode,
    #[serde(default)]
    pub static_nodes: Vec<StaticNodeConfig>,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_health_check_timeout")]
    pub health_check_timeout_secs: u64,
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
    #[serde(default)]
    pub load_balancing_strategy: LoadBalancingStrategy,
    #[serde(default = "default_file_cache_ttl")]
    pub file_cache_ttl_secs: u64,
}

impl Default for DiscoveryMode {
    fn default() -> Self {
        DiscoveryMode::Static
    }
}

fn default_health_check_interval() -> u64 {
    30
}
fn default_health_check_timeout() -> u64 {
    5
}
fn default_heartbeat_timeout() -> u64 {
    60
}
fn default_file_cache_ttl() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_worker_count")]
    pub workers_per_kind: u32,
}

fn default_worker_count() -> u32 {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStoreConfig {
    pub database_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadsConfig {
    pub root: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

fn default_max_upload_bytes() -> u64 {
    25 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC signing key for scoped download tokens (§4.K, §10.3). Loaded
    /// from config or environment; never logged.
    pub download_token_key: String,
    #[serde(default = "default_token_ttl")]
    pub download_token_ttl_secs: u64,
}

fn default_token_ttl() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: None,
        }
    }
}

/// The complete, validated configuration snapshot (§4.A).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub comfyui: Option<ComfyUiConfig>,
    #[serde(default)]
    pub distributed: Option<DistributedConfig>,
    pub queue: QueueConfig,
    pub job_store: JobStoreConfig,
    pub uploads: UploadsConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// HTTP bind address for the client-facing API.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Directory the Template Registry loads `<name>.json` files from (§4.B).
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,
    /// This process's externally-reachable base URL, used to build the
    /// `download_url` a node fetches an uploaded input from (§4.K).
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}

const KNOWN_JOB_KINDS: &[JobKind] = &[JobKind::ImageFromText, JobKind::VideoFromImage];

impl SystemConfig {
    /// Fatal validation per §4.A. Returns every violation found, not just
    /// the first, so an operator fixing config sees the whole list at once.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        let fleet_mode = self
            .distributed
            .as_ref()
            .map(|d| d.enabled)
            .unwrap_or(false);

        if fleet_mode {
            let dist = self.distributed.as_ref().unwrap();
            let dynamic_ok = matches!(
                dist.discovery_mode,
                DiscoveryMode::Dynamic | DiscoveryMode::Hybrid
            );
            if dist.static_nodes.is_empty() && !dynamic_ok {
                errors.push(ConfigError::invalid(
                    "distributed.static_nodes",
                    "fleet mode requires a non-empty static node list or dynamic/hybrid discovery",
                ));
            }

            let mut seen_ids = std::collections::BTreeSet::new();
            for node in &dist.static_nodes {
                if !seen_ids.insert(node.node_id.clone()) {
                    errors.push(ConfigError::invalid(
                        "distributed.static_nodes[].node_id",
                        format!("duplicate node id `{}`", node.node_id),
                    ));
                }
                if node.host.trim().is_empty() {
                    errors.push(ConfigError::invalid(
                        "distributed.static_nodes[].host",
                        format!("node `{}` has an empty host", node.node_id),
                    ));
                }
                if node.port == 0 {
                    errors.push(ConfigError::invalid(
                        "distributed.static_nodes[].port",
                        format!("node `{}` has port 0", node.node_id),
                    ));
                }
                if node.max_concurrent < 1 {
                    errors.push(ConfigError::invalid(
                        "distributed.static_nodes[].max_concurrent",
                        format!("node `{}` must allow at least 1 concurrent job", node.node_id),
                    ));
                }
                for cap in &node.capabilities {
                    if !KNOWN_JOB_KINDS.contains(cap) {
                        errors.push(ConfigError::invalid(
                            "distributed.static_nodes[].capabilities",
                            format!("node `{}` declares unknown capability", node.node_id),
                        ));
                    }
                }
            }
        } else if let Some(single) = &self.comfyui {
            if single.host.trim().is_empty() {
                errors.push(ConfigError::invalid("comfyui.host", "must not be empty"));
            }
            if single.port == 0 {
                errors.push(ConfigError::invalid("comfyui.port", "must be in 1..=65535"));
            }
        } else {
            errors.push(ConfigError::invalid(
                "comfyui",
                "single-node mode requires a `comfyui` section when `distributed.enabled` is false",
            ));
        }

        if self.job_store.database_url.trim().is_empty() {
            errors.push(ConfigError::invalid(
                "job_store.database_url",
                "must not be empty",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn is_fleet_mode(&self) -> bool {
        self.distributed.as_ref().map(|d| d.enabled).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> SystemConfig {
        SystemConfig {
            comfyui: Some(ComfyUiConfig {
                host: "127.0.0.1".to_string(),
                port: 8188,
                timeout_secs: 30,
                output_dir: PathBuf::from("/tmp/output"),
            }),
            distributed: None,
            queue: QueueConfig { workers_per_kind: 4 },
            job_store: JobStoreConfig {
                database_url: "sqlite://relay.db".to_string(),
            },
            uploads: UploadsConfig {
                root: PathBuf::from("/tmp/uploads"),
                max_upload_bytes: 1024,
            },
            auth: AuthConfig {
                download_token_key: "test-key".to_string(),
                download_token_ttl_secs: 300,
            },
            logging: LoggingConfig::default(),
            bind_addr: "127.0.0.1:8080".to_string(),
            templates_dir: PathBuf::from("templates"),
            public_base_url: "http://127.0.0.1:8080".to_string(),
        }
    }

    #[test]
    fn valid_single_node_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn fleet_mode_without_nodes_or_dynamic_discovery_is_rejected() {
        let mut cfg = base_config();
        cfg.comfyui = None;
        cfg.distributed = Some(DistributedConfig {
            enabled: true,
            discovery_mode: DiscoveryMode::Static,
            static_nodes: vec![],
            health_check_interval_secs: 30,
            health_check_timeout_secs: 5,
            heartbeat_timeout_secs: 60,
            load_balancing_strategy: LoadBalancingStrategy::LeastLoaded,
            file_cache_ttl_secs: 30,
        });
        let errors = cfg.validate().unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::Invalid { field, .. } if field == "distributed.static_nodes")));
    }

    #[test]
    fn duplicate_node_ids_are_rejected() {
        let mut cfg = base_config();
        cfg.comfyui = None;
        let node = StaticNodeConfig {
            node_id: "gpu-01".to_string(),
            host: "10.0.0.1".to_string(),
            port: 8188,
            max_concurrent: 4,
            capabilities: vec![],
            metadata: BTreeMap::new(),
        };
        cfg.distributed = Some(DistributedConfig {
            enabled: true,
            discovery_mode: DiscoveryMode::Static,
            static_nodes: vec![node.clone(), node],
            health_check_interval_secs: 30,
            health_check_timeout_secs: 5,
            heartbeat_timeout_secs: 60,
            load_balancing_strategy: LoadBalancingStrategy::LeastLoaded,
            file_cache_ttl_secs: 30,
        });
        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| matches!(
            e,
            ConfigError::Invalid { field, .. } if field == "distributed.static_nodes[].node_id"
        )));
    }

    #[test]
    fn single_node_mode_requires_comfyui_section() {
        let mut cfg = base_config();
        cfg.comfyui = None;
        let errors = cfg.validate().unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::Invalid { field, .. } if field == "comfyui")));
    }
}
