//! Remote cache backends
//!
//! The coordinator only sees the [`RemoteCache`] trait. Two implementations
//! exist:
//! - `gcs`: one compressed object per action in a Cloud Storage bucket
//! - `http`: a cacheprog HTTP front-end (`cacheprog serve`) elsewhere
//!
//! The active backend is chosen from configuration by [`create_remote`].

mod gcs;
mod http;
#[cfg(test)]
pub(crate) mod memory;
mod token;

pub use gcs::GcsRemote;
pub use http::HttpRemote;
pub use token::AccessTokenProvider;

use crate::config::schema::{RemoteBackend, RemoteConfig};
use crate::error::{ProxyError, ProxyResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tracing::debug;

/// Owned, type-erased byte stream
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Timeout applied to every remote HTTP request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Largest body accepted from a remote
pub const MAX_BODY_SIZE: u64 = 4 << 30;

/// Entry returned by a remote lookup
pub struct RemoteEntry {
    /// Hex output ID as reported by the remote (not yet validated)
    pub output_id: String,
    /// Number of bytes `body` yields
    pub size: u64,
    /// Payload stream
    pub body: BoxReader,
}

impl RemoteEntry {
    /// Entry backed by an in-memory payload
    pub fn from_bytes(output_id: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            output_id: output_id.into(),
            size: bytes.len() as u64,
            body: Box::new(std::io::Cursor::new(bytes)),
        }
    }
}

/// JSON body of `GET /action/<id>` on the HTTP binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionValue {
    #[serde(rename = "outputID")]
    pub output_id: String,
    pub size: u64,
}

/// Remote tier of the cache
///
/// `get` returns `Ok(None)` when the remote has no entry for the action.
/// `put` must be idempotent for a given `(action_id, output_id)` pair.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    /// Look up an action
    async fn get(&self, action_id: &str) -> ProxyResult<Option<RemoteEntry>>;

    /// Store an action's output
    async fn put(&self, action_id: &str, output_id: &str, size: u64, body: Vec<u8>)
        -> ProxyResult<()>;

    /// Backend name for logs
    fn backend_name(&self) -> &'static str;
}

/// Build the configured remote backend, or `None` for a disk-only cache
pub fn create_remote(config: &RemoteConfig) -> ProxyResult<Option<Arc<dyn RemoteCache>>> {
    let remote: Option<Arc<dyn RemoteCache>> = match config.backend {
        RemoteBackend::None => None,
        RemoteBackend::Gcs => Some(Arc::new(GcsRemote::new(&config.gcs)?)),
        RemoteBackend::Http => Some(Arc::new(HttpRemote::new(&config.http)?)),
    };

    if let Some(remote) = &remote {
        debug!("Using {} remote", remote.backend_name());
    }
    Ok(remote)
}

/// Shared agent for the blocking HTTP client.
///
/// Non-2xx statuses are returned as responses so backends can map 404 to a
/// miss themselves.
pub(crate) fn http_agent() -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(Some(REQUEST_TIMEOUT))
        .build();
    ureq::Agent::new_with_config(config)
}

/// Run blocking HTTP work on the blocking pool
pub(crate) async fn blocking<T, F>(backend: &'static str, f: F) -> ProxyResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ProxyResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ProxyError::remote(backend, format!("worker failed: {}", e)))?
}
