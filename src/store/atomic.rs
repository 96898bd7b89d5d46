//! Write-to-temp-then-rename persistence
//!
//! Readers of the cache directory only ever see a complete previous version or
//! a complete new version of a file. The temporary file lives next to its
//! destination so the final rename never crosses filesystems, and it is
//! removed automatically if anything fails before the rename.

use crate::error::{ProxyError, ProxyResult};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWriteExt};

/// Stream `body` into `dest` atomically, returning the number of bytes written.
///
/// Fails with `SizeMismatch` (and leaves `dest` untouched) when the stream does
/// not produce exactly `expected` bytes.
pub(crate) async fn write_atomic<R>(dest: &Path, body: &mut R, expected: u64) -> ProxyResult<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let dir = dest
        .parent()
        .ok_or_else(|| ProxyError::Internal(format!("{} has no parent", dest.display())))?;
    let prefix = match dest.file_name() {
        Some(name) => format!("{}.", name.to_string_lossy()),
        None => ".tmp.".to_string(),
    };

    let temp = tempfile::Builder::new()
        .prefix(&prefix)
        .tempfile_in(dir)
        .map_err(|e| ProxyError::io(format!("creating temp file for {}", dest.display()), e))?;
    let (file, temp_path) = temp.into_parts();

    let mut file = tokio::fs::File::from_std(file);
    let written = tokio::io::copy(body, &mut file)
        .await
        .map_err(|e| ProxyError::io(format!("writing {}", temp_path.display()), e))?;
    file.flush()
        .await
        .map_err(|e| ProxyError::io(format!("flushing {}", temp_path.display()), e))?;
    drop(file);

    if written != expected {
        return Err(ProxyError::SizeMismatch { expected, written });
    }

    temp_path
        .persist(dest)
        .map_err(|e| ProxyError::io(format!("renaming into {}", dest.display()), e.error))?;

    Ok(written)
}
