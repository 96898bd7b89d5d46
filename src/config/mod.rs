//! Config file discovery and persistence
//!
//! The file can carry shared secrets (`remote.http.secret`, `server.secret`),
//! so it is replaced atomically through an owner-only temporary file.

pub mod schema;

pub use schema::Config;

use crate::error::{ProxyError, ProxyResult};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Location of the config file and the operations on it
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    /// Use `explicit` when given (`--config` / `CACHEPROG_CONFIG`), else the
    /// per-user default
    pub fn resolve(explicit: Option<PathBuf>) -> Self {
        Self {
            path: explicit.unwrap_or_else(Self::default_path),
        }
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// `<config_dir>/cacheprog/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cacheprog")
            .join("config.toml")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file; a missing file yields the defaults
    pub async fn load(&self) -> ProxyResult<Config> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", self.path.display());
                return Ok(Config::default());
            }
            Err(e) => {
                return Err(ProxyError::io(
                    format!("reading config from {}", self.path.display()),
                    e,
                ))
            }
        };

        parse(&self.path, &content)
    }

    pub async fn save(&self, config: &Config) -> ProxyResult<()> {
        let content = toml::to_string_pretty(config)?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| ProxyError::ConfigDirCreate {
                path: dir.clone(),
                source: e,
            })?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || replace_file(&dir, &path, content.as_bytes()))
            .await
            .map_err(|e| ProxyError::Internal(format!("config writer failed: {}", e)))??;

        info!("Configuration saved to {}", self.path.display());
        Ok(())
    }
}

fn parse(path: &Path, content: &str) -> ProxyResult<Config> {
    toml::from_str(content).map_err(|e| ProxyError::ConfigInvalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// `NamedTempFile` is created with mode 0600 on unix
fn replace_file(dir: &Path, path: &Path, contents: &[u8]) -> ProxyResult<()> {
    let context = || format!("writing config to {}", path.display());

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| ProxyError::io(context(), e))?;
    tmp.write_all(contents)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| ProxyError::io(context(), e))?;
    tmp.persist(path)
        .map_err(|e| ProxyError::io(context(), e.error))?;
    Ok(())
}
