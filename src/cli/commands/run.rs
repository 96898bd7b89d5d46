//! Run command - serve the cache protocol on stdin/stdout

use crate::cli::args::RunArgs;
use crate::config::Config;
use crate::coordinator::{Coordinator, Metrics};
use crate::error::ProxyResult;
use crate::protocol::Engine;
use crate::remote::create_remote;
use crate::store::DiskStore;
use crate::util::format_duration;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Execute the run command
pub async fn execute(args: RunArgs, config: &Config, shutdown: CancellationToken) -> ProxyResult<()> {
    let start = Instant::now();

    let config = apply_overrides(&args, config);
    config.validate()?;

    let dir = config
        .cache
        .dir
        .clone()
        .unwrap_or_else(DiskStore::default_dir);
    let store = DiskStore::open(dir).await?;
    let remote = create_remote(&config.remote)?;
    debug!(
        "Min upload size: {} bytes, remote: {:?}",
        config.cache.min_upload_size, config.remote.backend
    );

    let coordinator = Coordinator::new(
        store,
        remote,
        config.cache.min_upload_size,
        Arc::new(Metrics::default()),
    );
    let result = Engine::new(coordinator, shutdown).serve_stdio().await;

    info!("took {}", format_duration(start.elapsed()));
    result
}

/// Command-line flags win over the config file
fn apply_overrides(args: &RunArgs, config: &Config) -> Config {
    let mut config = config.clone();

    if let Some(dir) = &args.cache_dir {
        config.cache.dir = Some(dir.clone());
    }
    if let Some(size) = args.min_upload_size {
        config.cache.min_upload_size = size;
    }
    if let Some(backend) = args.remote {
        config.remote.backend = backend;
    }
    if let Some(bucket) = &args.bucket {
        config.remote.gcs.bucket = bucket.clone();
    }
    if let Some(key) = &args.cache_key {
        config.remote.gcs.cache_key = key.clone();
    }
    if let Some(url) = &args.remote_url {
        config.remote.http.base_url = Some(url.clone());
    }
    if let Some(secret) = &args.secret {
        config.remote.http.secret = Some(secret.clone());
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RemoteBackend;
    use std::path::PathBuf;

    #[test]
    fn flags_override_config() {
        let mut config = Config::default();
        config.cache.min_upload_size = 50;
        config.remote.gcs.bucket = "from-file".to_string();

        let args = RunArgs {
            cache_dir: Some(PathBuf::from("/tmp/cache")),
            min_upload_size: Some(0),
            remote: Some(RemoteBackend::Http),
            remote_url: Some("http://cache.internal:31364".to_string()),
            secret: Some("s3cret".to_string()),
            ..Default::default()
        };
        let merged = apply_overrides(&args, &config);

        assert_eq!(merged.cache.dir, Some(PathBuf::from("/tmp/cache")));
        assert_eq!(merged.cache.min_upload_size, 0);
        assert_eq!(merged.remote.backend, RemoteBackend::Http);
        assert_eq!(merged.remote.gcs.bucket, "from-file");
        assert_eq!(
            merged.remote.http.base_url.as_deref(),
            Some("http://cache.internal:31364")
        );
        assert_eq!(merged.remote.http.secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn no_flags_keeps_config() {
        let config = Config::default();
        let merged = apply_overrides(&RunArgs::default(), &config);
        assert_eq!(merged.cache.min_upload_size, config.cache.min_upload_size);
        assert_eq!(merged.remote.backend, RemoteBackend::None);
    }
}
