//! Config Store (§4.A): loads `SystemConfig` from a TOML file, validates
//! it, and holds the current snapshot behind a lock so an explicit reload
//! can swap it atomically without restarting the process.

use relay_protocol::config::{ConfigError, SystemConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigStoreError {
    #[error("failed to read config file `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("config failed validation: {0:?}")]
    Invalid(Vec<ConfigError>),
}

fn load_from_path(path: &Path) -> Result<SystemConfig, ConfigStoreError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigStoreError::Io { path: path.to_path_buf(), source: e })?;
    let config: SystemConfig = toml::from_str(&text).map_err(|e| ConfigStoreError::Parse { path: path.to_path_buf(), source: e })?;
    config.validate().map_err(ConfigStoreError::Invalid)?;
    Ok(config)
}

/// Holds the live, validated configuration and the path it was loaded from
/// (§4.A "reload re-reads and re-validates the same path; a failed reload
/// leaves the previous config in effect").
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<Arc<SystemConfig>>,
}

impl ConfigStore {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigStoreError> {
        let path = path.into();
        let config = load_from_path(&path)?;
        info!(path = %path.display(), "configuration loaded");
        Ok(Self { path, current: RwLock::new(Arc::new(config)) })
    }

    pub async fn current(&self) -> Arc<SystemConfig> {
        Arc::clone(&*self.current.read().await)
    }

    /// Re-reads and re-validates the file at the original path, swapping in
    /// the new config only if it parses and validates cleanly.
    pub async fn reload(&self) -> Result<(), ConfigStoreError> {
        let fresh = load_from_path(&self.path)?;
        *self.current.write().await = Arc::new(fresh);
        info!(path = %self.path.display(), "configuration reloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("relay.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    const MINIMAL_SINGLE_NODE: &str = r#"
        bind_addr = "0.0.0.0:8080"

        [comfyui]
        host = "127.0.0.1"
        port = 8188

        [distributed]
        enabled = false

        [queue]
        workers_per_kind = 4

        [job_store]
        database_url = "sqlite::memory:"

        [uploads]
        root = "/tmp/uploads"

        [auth]
        download_token_key = "test-key-at-least-this-long"

        [logging]
        level = "info"
    "#;

    #[tokio::test]
    async fn loads_and_validates_a_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), MINIMAL_SINGLE_NODE);
        let store = ConfigStore::load(&path).unwrap();
        assert_eq!(store.current().await.bind_addr, "0.0.0.0:8080");
    }

    #[tokio::test]
    async fn reload_picks_up_changes_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), MINIMAL_SINGLE_NODE);
        let store = ConfigStore::load(&path).unwrap();

        let updated = MINIMAL_SINGLE_NODE.replace("0.0.0.0:8080", "0.0.0.0:9090");
        std::fs::write(&path, updated).unwrap();
        store.reload().await.unwrap();

        assert_eq!(store.current().await.bind_addr, "0.0.0.0:9090");
    }

    #[tokio::test]
    async fn reload_with_invalid_config_leaves_previous_in_effect() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), MINIMAL_SINGLE_NODE);
        let store = ConfigStore::load(&path).unwrap();

        std::fs::write(&path, "not valid toml {{{").unwrap();
        assert!(store.reload().await.is_err());
        assert_eq!(store.current().await.bind_addr, "0.0.0.0:8080");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = ConfigStore::load("/nonexistent/path/relay.toml");
        assert!(matches!(result, Err(ConfigStoreError::Io { .. })));
    }
}
