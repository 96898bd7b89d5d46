//! Tiered cache coordinator
//!
//! Decides for each `get` whether it is served from disk, fetched from the
//! remote and promoted to disk, or declined as a miss, and for each `put`
//! whether the new entry is also uploaded.
//!
//! # Policy
//!
//! | Situation | Result |
//! |-----------|--------|
//! | Local entry with a regular payload file | local hit |
//! | Local entry missing or untrustworthy | fall through to remote |
//! | Remote not found, empty output ID or I/O error | miss |
//! | Remote hit with non-hex output ID | error |
//! | Remote hit | promote to disk, remote hit |
//!
//! Puts always land on disk before the caller is answered. Entries of at
//! least `min_upload_size` bytes are uploaded in the background; uploads are
//! tracked separately from request tasks and drained at shutdown.

pub mod metrics;
mod tee;

pub use metrics::{Event, Metrics, MetricsSnapshot};
pub use tee::TeeReader;

use crate::error::{ProxyError, ProxyResult};
use crate::ids;
use crate::remote::RemoteCache;
use crate::store::{stat_object, DiskStore};
use crate::util::format_duration;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Which tier satisfied a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitSource {
    Local,
    Remote,
}

/// Successful lookup, described from the local file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHit {
    pub output_id: Vec<u8>,
    pub size: u64,
    pub mod_time_nanos: i64,
    pub path: PathBuf,
    pub source: HitSource,
}

/// Outcome of a lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetOutcome {
    Hit(CacheHit),
    Miss,
}

fn local_unusable(action_id: &str, err: &ProxyError) {
    if err.is_integrity() {
        warn!("Corrupt local entry for action {}: {}", action_id, err);
    } else {
        warn!("Reading local entry for action {}: {}", action_id, err);
    }
}

/// Two-tier cache over a disk store and an optional remote
pub struct Coordinator {
    store: DiskStore,
    remote: Option<Arc<dyn RemoteCache>>,
    min_upload_size: u64,
    metrics: Arc<Metrics>,
    uploads: TaskTracker,
}

impl Coordinator {
    /// Create a coordinator
    pub fn new(
        store: DiskStore,
        remote: Option<Arc<dyn RemoteCache>>,
        min_upload_size: u64,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            remote,
            min_upload_size,
            metrics,
            uploads: TaskTracker::new(),
        }
    }

    /// Local store
    pub fn store(&self) -> &DiskStore {
        &self.store
    }

    /// Shared counters
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Look up an action.
    ///
    /// A cancelled `cancel` token abandons a pending remote lookup and reports
    /// a miss; local work is not interrupted.
    pub async fn get(&self, action_id: &[u8], cancel: &CancellationToken) -> ProxyResult<GetOutcome> {
        self.metrics.record(Event::Get);
        let action_id = ids::encode(action_id);
        let start = Instant::now();

        let outcome = self.lookup(&action_id, cancel).await;
        match &outcome {
            Ok(GetOutcome::Hit(hit)) if hit.source == HitSource::Local => {
                self.metrics.record(Event::LocalHit)
            }
            Ok(GetOutcome::Hit(_)) => {
                self.metrics.record(Event::RemoteHit);
                info!(
                    "<- GET {} took: {}",
                    action_id,
                    format_duration(start.elapsed())
                );
            }
            Ok(GetOutcome::Miss) | Err(_) => self.metrics.record(Event::Miss),
        }
        outcome
    }

    async fn lookup(&self, action_id: &str, cancel: &CancellationToken) -> ProxyResult<GetOutcome> {
        if let Some(hit) = self.lookup_local(action_id).await {
            return Ok(GetOutcome::Hit(hit));
        }

        let Some(remote) = &self.remote else {
            return Ok(GetOutcome::Miss);
        };

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("GET {} cancelled before remote answered", action_id);
                return Ok(GetOutcome::Miss);
            }
            fetched = remote.get(action_id) => fetched,
        };

        // Remote failures count as a miss
        let entry = match fetched {
            Ok(Some(entry)) if !entry.output_id.is_empty() => entry,
            Ok(_) => return Ok(GetOutcome::Miss),
            Err(e) => {
                debug!("GET {} from {}: {}", action_id, remote.backend_name(), e);
                return Ok(GetOutcome::Miss);
            }
        };

        // Never build a path from an unchecked remote value
        if let Err(e) = ids::ensure_hex("output ID", &entry.output_id) {
            warn!("GET {} from {}: {}", action_id, remote.backend_name(), e);
            return Err(e);
        }
        let output_id = ids::decode("output ID", &entry.output_id)?;

        let mut body = entry.body;
        let path = self
            .store
            .put(action_id, &entry.output_id, entry.size, &mut body)
            .await?;

        Ok(match stat_object(&path).await? {
            Some(stat) => GetOutcome::Hit(CacheHit {
                output_id,
                size: stat.size,
                mod_time_nanos: stat.mod_time_nanos,
                path,
                source: HitSource::Remote,
            }),
            None => GetOutcome::Miss,
        })
    }

    async fn lookup_local(&self, action_id: &str) -> Option<CacheHit> {
        let entry = match self.store.get(action_id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                local_unusable(action_id, &e);
                return None;
            }
        };

        let stat = match stat_object(&entry.path).await {
            Ok(Some(stat)) => stat,
            Ok(None) => {
                debug!(
                    "Action {} points at missing {}",
                    action_id,
                    entry.path.display()
                );
                return None;
            }
            Err(e) => {
                local_unusable(action_id, &e);
                return None;
            }
        };

        let output_id = ids::decode("output ID", &entry.output_id).ok()?;
        Some(CacheHit {
            output_id,
            size: stat.size,
            mod_time_nanos: stat.mod_time_nanos,
            path: entry.path,
            source: HitSource::Local,
        })
    }

    /// Store an entry on disk and, when large enough, schedule an upload.
    ///
    /// Returns the local payload path as soon as the disk write finishes.
    pub async fn put<R>(
        &self,
        action_id: &[u8],
        object_id: &[u8],
        size: u64,
        body: R,
    ) -> ProxyResult<PathBuf>
    where
        R: AsyncRead + Unpin,
    {
        self.metrics.record(Event::Put);
        let action_id = ids::encode(action_id);
        let object_id = ids::encode(object_id);

        let remote = match &self.remote {
            Some(remote) if size >= self.min_upload_size => Arc::clone(remote),
            Some(_) => {
                self.metrics.record(Event::IgnoredUpload);
                let mut body = body;
                return self.store.put(&action_id, &object_id, size, &mut body).await;
            }
            None => {
                let mut body = body;
                return self.store.put(&action_id, &object_id, size, &mut body).await;
            }
        };

        let capacity = usize::try_from(size).unwrap_or(0);
        let mut tee = TeeReader::new(body, capacity);
        let path = self.store.put(&action_id, &object_id, size, &mut tee).await?;

        self.schedule_upload(remote, action_id, object_id, size, tee.into_copy());
        Ok(path)
    }

    fn schedule_upload(
        &self,
        remote: Arc<dyn RemoteCache>,
        action_id: String,
        object_id: String,
        size: u64,
        body: Vec<u8>,
    ) {
        let metrics = Arc::clone(&self.metrics);
        self.uploads.spawn(async move {
            let start = Instant::now();
            match remote.put(&action_id, &object_id, size, body).await {
                Ok(()) => {
                    metrics.record(Event::Upload);
                    info!(
                        "-> PUT {} took: {}",
                        action_id,
                        format_duration(start.elapsed())
                    );
                }
                Err(e) => {
                    metrics.record(Event::FailedUpload);
                    warn!(
                        "put(action {}, obj {}, {} bytes): {}",
                        action_id, object_id, size, e
                    );
                }
            }
        });
    }

    /// Number of uploads still running
    pub fn pending_uploads(&self) -> usize {
        self.uploads.len()
    }

    /// Wait for every scheduled upload to finish
    pub async fn drain_uploads(&self) {
        self.uploads.close();
        let pending = self.pending_uploads();
        if pending > 0 {
            info!("Waiting for {} uploads", pending);
        }
        self.uploads.wait().await;
    }
}
