//! Serve command - expose the local cache over HTTP

use crate::cli::args::ServeArgs;
use crate::config::Config;
use crate::error::{ProxyError, ProxyResult};
use crate::server;
use crate::store::DiskStore;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Execute the serve command
pub async fn execute(
    args: ServeArgs,
    config: &Config,
    shutdown: CancellationToken,
) -> ProxyResult<()> {
    let listen = args
        .listen
        .unwrap_or_else(|| config.server.listen.clone());
    let dir = args
        .cache_dir
        .or_else(|| config.cache.dir.clone())
        .unwrap_or_else(DiskStore::default_dir);
    let secret = args
        .secret
        .or_else(|| config.server.secret.clone())
        .filter(|s| !s.is_empty());

    if secret.is_none() {
        warn!("No secret set; anyone who can reach {} can read and write the cache", listen);
    }

    let store = DiskStore::open(dir).await?;
    let (_, handle) = server::start_server(&listen, store, secret, shutdown).await?;

    handle
        .await
        .map_err(|e| ProxyError::Internal(format!("server task failed: {}", e)))?
}
