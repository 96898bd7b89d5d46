//! Content-addressed disk store
//!
//! Two kinds of files live in the cache directory:
//!
//! | File | Contents |
//! |------|----------|
//! | `a-<actionID>` | JSON [`IndexEntry`] naming the output |
//! | `o-<objectID>` | raw payload bytes |
//!
//! Both are written with [`atomic::write_atomic`], payload first. Any index
//! entry a reader can observe therefore points at a complete payload.
//! Concurrent writers of the same key produce identical bytes, so no locking
//! is needed beyond the atomic rename.

mod atomic;
pub mod index;

pub use index::IndexEntry;

use crate::error::{ProxyError, ProxyResult};
use crate::ids;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncRead;
use tracing::debug;

/// Disk-backed store rooted at one cache directory
#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
}

/// Index lookup result.
///
/// The payload bytes are read through [`StoreEntry::open`]. `size` is the
/// value recorded in the index entry and is not re-checked against the file;
/// callers that hand the path out stat it themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    /// Hex output ID, validated
    pub output_id: String,
    /// Payload path derived from the output ID
    pub path: PathBuf,
    /// Size recorded in the index entry
    pub size: u64,
    /// Index entry timestamp
    pub time_nanos: i64,
}

impl StoreEntry {
    /// Open the payload for reading
    pub async fn open(&self) -> ProxyResult<fs::File> {
        fs::File::open(&self.path)
            .await
            .map_err(|e| ProxyError::io(format!("opening {}", self.path.display()), e))
    }
}

/// Filesystem view of a payload file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectStat {
    /// Actual size on disk
    pub size: u64,
    /// Modification time, nanoseconds since the Unix epoch
    pub mod_time_nanos: i64,
}

impl DiskStore {
    /// Open a store, creating the directory if needed.
    ///
    /// The directory is made absolute; payload paths are handed to the
    /// toolchain as-is.
    pub async fn open(dir: impl Into<PathBuf>) -> ProxyResult<Self> {
        let dir = dir.into();
        let dir = std::path::absolute(&dir)
            .map_err(|e| ProxyError::io(format!("resolving cache dir {}", dir.display()), e))?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| ProxyError::io(format!("creating cache dir {}", dir.display()), e))?;
        debug!("Cache dir: {}", dir.display());
        Ok(Self { dir })
    }

    /// Default cache directory under the user's cache dir
    pub fn default_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cacheprog")
    }

    /// Cache directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the index entry for an action
    pub fn action_path(&self, action_id: &str) -> PathBuf {
        self.dir.join(format!("a-{}", action_id))
    }

    /// Path of the payload for an object
    pub fn object_path(&self, object_id: &str) -> PathBuf {
        self.dir.join(format!("o-{}", object_id))
    }

    /// Look up the index entry for an action.
    ///
    /// Returns `Ok(None)` when no entry exists. A present but unreadable entry,
    /// or one whose output ID is not hex, is a `CorruptIndex` error; on-disk
    /// data is never trusted to build a path unchecked.
    pub async fn get(&self, action_id: &str) -> ProxyResult<Option<StoreEntry>> {
        ids::ensure_hex("action ID", action_id)?;
        let index_path = self.action_path(action_id);

        let raw = match fs::read(&index_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ProxyError::io(
                    format!("reading {}", index_path.display()),
                    e,
                ))
            }
        };

        let entry: IndexEntry =
            serde_json::from_slice(&raw).map_err(|e| ProxyError::CorruptIndex {
                action_id: action_id.to_string(),
                reason: e.to_string(),
            })?;

        if !ids::is_hex(&entry.output_id) {
            return Err(ProxyError::CorruptIndex {
                action_id: action_id.to_string(),
                reason: format!("output ID {:?} is not hex", entry.output_id),
            });
        }

        Ok(Some(StoreEntry {
            path: self.object_path(&entry.output_id),
            output_id: entry.output_id,
            size: entry.size,
            time_nanos: entry.time_nanos,
        }))
    }

    /// Store a payload and its index entry, returning the payload path.
    ///
    /// A zero `size` always produces an empty payload regardless of `body`.
    pub async fn put<R>(
        &self,
        action_id: &str,
        object_id: &str,
        size: u64,
        body: &mut R,
    ) -> ProxyResult<PathBuf>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        ids::ensure_hex("action ID", action_id)?;
        ids::ensure_hex("object ID", object_id)?;

        let object_path = self.object_path(object_id);
        if size == 0 {
            atomic::write_atomic(&object_path, &mut tokio::io::empty(), 0).await?;
        } else {
            atomic::write_atomic(&object_path, body, size).await?;
        }

        let entry = serde_json::to_vec(&IndexEntry::new(object_id, size))?;
        let mut reader = entry.as_slice();
        atomic::write_atomic(
            &self.action_path(action_id),
            &mut reader,
            entry.len() as u64,
        )
        .await?;

        debug!("Stored action {} -> {} ({} bytes)", action_id, object_id, size);
        Ok(object_path)
    }
}

/// Stat a payload without trusting any recorded size.
///
/// `Ok(None)` means the file is gone; a directory or other non-regular file is
/// a `NotRegularFile` error.
pub async fn stat_object(path: &Path) -> ProxyResult<Option<ObjectStat>> {
    let meta = match fs::metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ProxyError::io(format!("stat {}", path.display()), e)),
    };

    if !meta.is_file() {
        return Err(ProxyError::NotRegularFile(path.to_path_buf()));
    }

    let mod_time_nanos = meta
        .modified()
        .ok()
        .map(chrono::DateTime::<chrono::Utc>::from)
        .and_then(|t| t.timestamp_nanos_opt())
        .unwrap_or_default();

    Ok(Some(ObjectStat {
        size: meta.len(),
        mod_time_nanos,
    }))
}
