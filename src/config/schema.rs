//! Configuration schema for cacheprog
//!
//! Configuration is stored at `~/.config/cacheprog/config.toml`

use crate::error::{ProxyError, ProxyResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Local cache settings
    pub cache: CacheConfig,

    /// Remote tier settings
    pub remote: RemoteConfig,

    /// HTTP front-end settings (`cacheprog serve`)
    pub server: ServerConfig,
}

impl Config {
    /// Reject values no command can work with
    pub fn validate(&self) -> ProxyResult<()> {
        match self.general.log_format.as_str() {
            "text" | "json" => {}
            other => {
                return Err(ProxyError::Setting(format!(
                    "general.log_format must be \"text\" or \"json\", got {:?}",
                    other
                )))
            }
        }
        if self.remote.backend == RemoteBackend::Gcs && self.remote.gcs.bucket.is_empty() {
            return Err(ProxyError::Setting(
                "remote.gcs.bucket is required for the gcs backend".to_string(),
            ));
        }
        Ok(())
    }
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// Local disk cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache directory (default: the user cache dir + `cacheprog`)
    pub dir: Option<PathBuf>,

    /// Payloads smaller than this are never uploaded
    pub min_upload_size: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            min_upload_size: 10_000,
        }
    }
}

/// Remote backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RemoteBackend {
    /// Disk only
    #[default]
    None,
    /// Google Cloud Storage bucket
    Gcs,
    /// Another cacheprog HTTP front-end
    Http,
}

/// Remote tier settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Active backend
    pub backend: RemoteBackend,

    /// Cloud Storage backend
    pub gcs: GcsConfig,

    /// HTTP backend
    pub http: HttpRemoteConfig,
}

/// Cloud Storage backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcsConfig {
    /// Bucket name
    pub bucket: String,

    /// Namespace segment in object names, e.g. a branch or toolchain version
    pub cache_key: String,

    /// API endpoint
    pub endpoint: String,

    /// Service account to impersonate when fetching tokens
    pub service_account: Option<String>,
}

impl Default for GcsConfig {
    fn default() -> Self {
        Self {
            bucket: "cacheprog-cache".to_string(),
            cache_key: "default".to_string(),
            endpoint: "https://storage.googleapis.com".to_string(),
            service_account: None,
        }
    }
}

/// HTTP backend settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpRemoteConfig {
    /// Base URL of the front-end, e.g. `http://cache.internal:31364`
    pub base_url: Option<String>,

    /// Value sent in the `secret` header
    pub secret: Option<String>,
}

/// HTTP front-end settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub listen: String,

    /// Required `secret` header value; unset disables the check
    pub secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:31364".to_string(),
            secret: None,
        }
    }
}
