//! Reader that keeps a copy of everything read through it

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Wraps a reader and appends every byte it yields to an in-memory buffer
pub struct TeeReader<R> {
    inner: R,
    copy: Vec<u8>,
}

impl<R> TeeReader<R> {
    /// Wrap `inner`, preallocating `capacity` bytes for the copy
    pub fn new(inner: R, capacity: usize) -> Self {
        Self {
            inner,
            copy: Vec::with_capacity(capacity),
        }
    }

    /// Bytes read so far
    pub fn into_copy(self) -> Vec<u8> {
        self.copy
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for TeeReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        this.copy.extend_from_slice(&buf.filled()[before..]);
        Poll::Ready(Ok(()))
    }
}
