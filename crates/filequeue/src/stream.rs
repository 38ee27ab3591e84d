//! Streams whose open step is admitted through the gate.
//!
//! The slot taken by the open is held for the life of the stream and is
//! released when the stream is dropped (or closed), not when data starts to
//! flow. A failed open releases its slot before the error is returned.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::debug;

use crate::capability::{BoxedReader, BoxedWriter};
use crate::error::{FsError, Result};
use crate::gate::Completion;
use crate::queue::FileQueue;
use crate::request::{OpenRead, OpenWrite, Request};

type Opened<T> = Result<(T, Completion<()>)>;

/// Releases the stream's slot once.
fn close_slot(slot: &mut Option<Completion<()>>, path: &Path) {
    if let Some(slot) = slot.take() {
        debug!(path = %path.display(), "stream closed, releasing slot");
        slot.complete(());
    }
}

/// Read stream holding one gate slot until dropped.
pub struct QueuedReadStream {
    inner: BoxedReader,
    slot: Option<Completion<()>>,
    path: PathBuf,
}

impl std::fmt::Debug for QueuedReadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedReadStream")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl QueuedReadStream {
    /// Path the stream was opened on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes the stream and frees its gate slot.
    pub fn close(self) {}
}

impl AsyncRead for QueuedReadStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.get_mut().inner.as_mut().poll_read(cx, buf)
    }
}

impl Drop for QueuedReadStream {
    fn drop(&mut self) {
        close_slot(&mut self.slot, &self.path);
    }
}

/// Write stream holding one gate slot until closed or dropped.
pub struct QueuedWriteStream {
    inner: BoxedWriter,
    slot: Option<Completion<()>>,
    path: PathBuf,
}

impl QueuedWriteStream {
    /// Path the stream was opened on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shuts the writer down, then frees the gate slot.
    ///
    /// The slot is released even if the shutdown fails.
    pub async fn close(mut self) -> Result<()> {
        let result = self.inner.shutdown().await;
        close_slot(&mut self.slot, &self.path);
        result.map_err(FsError::Io)
    }
}

impl AsyncWrite for QueuedWriteStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().inner.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().inner.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().inner.as_mut().poll_shutdown(cx)
    }
}

impl Drop for QueuedWriteStream {
    fn drop(&mut self) {
        close_slot(&mut self.slot, &self.path);
    }
}

impl FileQueue {
    /// Waits for admission, opens `path` for reading, and returns a stream
    /// that holds its slot until dropped.
    pub async fn create_read_stream(&self, path: impl Into<PathBuf>) -> Result<QueuedReadStream> {
        let path = path.into();
        let (inner, slot) = self.open_gated(OpenRead::new(path.clone())).await?;
        debug!(path = %path.display(), "read stream opened");
        Ok(QueuedReadStream {
            inner,
            slot: Some(slot),
            path,
        })
    }

    /// Waits for admission, opens `path` for writing (truncating it), and
    /// returns a stream that holds its slot until closed or dropped.
    pub async fn create_write_stream(&self, path: impl Into<PathBuf>) -> Result<QueuedWriteStream> {
        let path = path.into();
        let (inner, slot) = self.open_gated(OpenWrite::new(path.clone())).await?;
        debug!(path = %path.display(), "write stream opened");
        Ok(QueuedWriteStream {
            inner,
            slot: Some(slot),
            path,
        })
    }

    /// Runs an open request once admitted and hands back the opened value
    /// together with the still-pending completion for its slot.
    async fn open_gated<R: Request>(&self, request: R) -> Opened<R::Output> {
        let handle = Handle::try_current().map_err(|_| FsError::NoRuntime { op: R::NAME })?;
        let fs = std::sync::Arc::clone(self.filesystem());
        let (tx, rx) = oneshot::channel::<Opened<R::Output>>();

        self.gate().submit(
            move |completion: Completion<()>| {
                handle.spawn(async move {
                    let opened = match request.perform(fs.as_ref()).await {
                        Ok(stream) => Ok((stream, completion)),
                        Err(e) => {
                            completion.complete(());
                            Err(e)
                        }
                    };
                    // the caller stopped waiting; close the stream right away
                    if let Err(Ok((_, completion))) = tx.send(opened) {
                        completion.complete(());
                    }
                });
            },
            |()| {},
        );

        rx.await.map_err(|_| FsError::Abandoned)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::AdmissionGate;
    use crate::mem_fs::MemFs;
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;

    fn queue_with(fs: &MemFs, limit: usize) -> FileQueue {
        FileQueue::new(Arc::new(fs.clone()), AdmissionGate::new(limit))
    }

    #[tokio::test]
    async fn test_read_stream_holds_slot_until_drop() {
        let fs = MemFs::new().with_file("my_path", "some_data");
        let queue = queue_with(&fs, 1);

        let mut stream = queue.create_read_stream("my_path").await.unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "some_data");
        assert_eq!(queue.gate().in_flight(), 1);

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.stat("my_path").await })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(queue.gate().queued(), 1);

        stream.close();
        let meta = waiter.await.unwrap().unwrap();
        assert_eq!(meta.len, 9);
        assert_eq!(queue.gate().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_write_stream_close() {
        let fs = MemFs::new();
        let queue = queue_with(&fs, 2);

        let mut stream = queue.create_write_stream("out").await.unwrap();
        assert_eq!(stream.path(), Path::new("out"));
        stream.write_all(b"streamed ").await.unwrap();
        stream.write_all(b"data").await.unwrap();
        stream.close().await.unwrap();

        assert_eq!(queue.gate().in_flight(), 0);
        assert_eq!(queue.read_to_string("out").await.unwrap(), "streamed data");
    }

    #[tokio::test]
    async fn test_failed_open_releases_slot() {
        let fs = MemFs::new();
        let queue = queue_with(&fs, 1);

        let err = queue.create_read_stream("missing").await.unwrap_err();
        assert!(matches!(err, FsError::NotFound { .. }));
        assert_eq!(queue.gate().in_flight(), 0);

        // the single slot is free again
        assert!(!queue.exists("missing").await.unwrap());
    }
}
