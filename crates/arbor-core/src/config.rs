//! Configuration for arbor clients.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`ARBOR_CLIENT__` prefix)
//! 2. Config file (`<prefix>.toml`, `[client]` section)
//! 3. Defaults

use serde::Deserialize;

use crate::error::CoreError;

/// Connection and transaction defaults for a graph client.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Root URL of the store's REST API (e.g. "http://localhost:7474/db/data").
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path of the batch endpoint, relative to `base_url`.
    #[serde(default = "default_batch_path")]
    pub batch_path: String,

    /// Commit automatically when a closure run through
    /// `GraphClient::in_transaction` returns successfully.
    #[serde(default = "default_true")]
    pub auto_commit: bool,

    /// Re-read every mutated entity after a successful commit.
    #[serde(default)]
    pub auto_update: bool,
}

/// Per-transaction behavior flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    pub auto_commit: bool,
    pub auto_update: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            auto_commit: true,
            auto_update: false,
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:7474/db/data".to_string()
}

fn default_batch_path() -> String {
    "/batch".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            batch_path: default_batch_path(),
            auto_commit: true,
            auto_update: false,
        }
    }
}

impl ClientConfig {
    /// Create a config for the given store root with all other defaults.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Load from `<file_prefix>.toml` and `ARBOR_CLIENT__*` variables.
    ///
    /// A missing file or a missing `[client]` section yields the defaults.
    pub fn load(file_prefix: &str) -> Result<Self, CoreError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("ARBOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match cfg.get::<ClientConfig>("client") {
            Ok(c) => Ok(c),
            Err(config::ConfigError::NotFound(_)) => Ok(ClientConfig::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Transaction flags derived from this config.
    pub fn transaction_options(&self) -> TransactionOptions {
        TransactionOptions {
            auto_commit: self.auto_commit,
            auto_update: self.auto_update,
        }
    }

    fn root(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Absolute URL for a store path. Absolute URLs pass through.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{}", self.root(), path)
        } else {
            format!("{}/{}", self.root(), path)
        }
    }

    /// Path relative to the store root, as the batch endpoint expects it.
    pub fn relative_path(&self, url: &str) -> String {
        match url.strip_prefix(self.root()) {
            Some(rest) if rest.is_empty() => "/".to_string(),
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            _ => url.to_string(),
        }
    }

    /// Absolute URL of the batch endpoint.
    pub fn batch_url(&self) -> String {
        self.url(&self.batch_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:7474/db/data");
        assert_eq!(config.batch_path, "/batch");
        assert!(config.auto_commit);
        assert!(!config.auto_update);
    }

    #[test]
    fn test_url_helpers() {
        let config = ClientConfig::with_base_url("http://db:7474/db/data/");
        assert_eq!(config.url("/node/3"), "http://db:7474/db/data/node/3");
        assert_eq!(config.url("node"), "http://db:7474/db/data/node");
        assert_eq!(
            config.url("http://other/node/1"),
            "http://other/node/1"
        );
        assert_eq!(
            config.relative_path("http://db:7474/db/data/node/3/properties"),
            "/node/3/properties"
        );
        assert_eq!(config.relative_path("/node/3"), "/node/3");
        assert_eq!(config.batch_url(), "http://db:7474/db/data/batch");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arbor.toml");
        std::fs::write(
            &path,
            "[client]\nbase_url = \"http://graph.internal:7474/db/data\"\nauto_update = true\n",
        )
        .unwrap();

        let prefix = dir.path().join("arbor");
        let config = ClientConfig::load(prefix.to_str().unwrap()).unwrap();
        assert_eq!(config.base_url, "http://graph.internal:7474/db/data");
        assert_eq!(config.batch_path, "/batch");
        assert!(config.auto_update);
        assert!(config.transaction_options().auto_update);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("absent");
        let config = ClientConfig::load(prefix.to_str().unwrap()).unwrap();
        assert_eq!(config.batch_path, "/batch");
    }
}
