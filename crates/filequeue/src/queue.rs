//! [`FileQueue`]: filesystem operations admitted through an [`AdmissionGate`].
//!
//! Two entry points are offered for every operation:
//!
//! - [`FileQueue::submit`] takes a request and a callback that receives the
//!   operation's `Result` once it completes.
//! - The `async` methods (`read_file`, `stat`, ...) and
//!   [`FileQueue::execute`] await the same result.
//!
//! Both go through the same gate, so at most `gate().limit()` operations are
//! running against the filesystem at any time.

use bytes::Bytes;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, trace};

use crate::capability::{FileSystem, Metadata};
use crate::config::FileQueueConfig;
use crate::encoding::{Encoding, FileData};
use crate::error::{FsError, Result};
use crate::gate::{AdmissionGate, Completion};
use crate::registry::GateRegistry;
use crate::request::{Exists, MakeDir, ReadDir, ReadFile, Rename, Request, Stat, Symlink, WriteFile};

/// Filesystem handle whose operations pass through an admission gate.
///
/// Cloning shares both the filesystem and the gate.
#[derive(Clone)]
pub struct FileQueue {
    fs: Arc<dyn FileSystem>,
    gate: AdmissionGate,
}

impl FileQueue {
    /// Queue over `fs` admitting through `gate`.
    pub fn new(fs: Arc<dyn FileSystem>, gate: AdmissionGate) -> Self {
        Self { fs, gate }
    }

    /// Uses the process-wide shared gate, raising its limit to `limit` if
    /// that is higher.
    pub fn shared(fs: Arc<dyn FileSystem>, limit: Option<usize>) -> Self {
        Self::new(fs, AdmissionGate::shared(limit))
    }

    /// Queue whose gate comes from the global registry per `config`.
    pub fn from_config(fs: Arc<dyn FileSystem>, config: &FileQueueConfig) -> Self {
        let gate = GateRegistry::global().acquire(config.gate_options());
        Self::new(fs, gate)
    }

    /// The admission gate.
    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// The underlying filesystem.
    pub fn filesystem(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Queues `request` and hands its result to `callback` once the
    /// operation has run.
    ///
    /// The operation is spawned on the current Tokio runtime when admitted.
    /// Outside a runtime the callback immediately receives
    /// [`FsError::NoRuntime`].
    pub fn submit<R, F>(&self, request: R, callback: F)
    where
        R: Request,
        F: FnOnce(Result<R::Output>) + Send + 'static,
    {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                callback(Err(FsError::NoRuntime { op: R::NAME }));
                return;
            }
        };

        trace!(op = R::NAME, "submitting request");
        let fs = Arc::clone(&self.fs);
        self.gate.submit(
            move |completion: Completion<Result<R::Output>>| {
                handle.spawn(async move {
                    let result = request.perform(fs.as_ref()).await;
                    completion.complete(result);
                });
            },
            callback,
        );
    }

    /// Like [`submit`](Self::submit) with a callback that only logs failures.
    pub fn submit_detached<R: Request>(&self, request: R) {
        self.submit(request, |result: Result<R::Output>| {
            if let Err(e) = result {
                debug!(op = R::NAME, error = %e, "detached request failed");
            }
        });
    }

    /// Runs `request` once admitted and returns its result.
    pub async fn execute<R: Request>(&self, request: R) -> Result<R::Output> {
        let fs = Arc::clone(&self.fs);
        trace!(op = R::NAME, "executing request");
        self.gate
            .run(move || async move { request.perform(fs.as_ref()).await })
            .await?
    }

    /// Reads a whole file as raw bytes.
    pub async fn read_file(&self, path: impl Into<PathBuf>) -> Result<Bytes> {
        match self.execute(ReadFile::new(path)).await? {
            FileData::Bytes(bytes) => Ok(bytes),
            FileData::Text(text) => Ok(Bytes::from(text)),
        }
    }

    /// Reads a file and decodes it as UTF-8.
    pub async fn read_to_string(&self, path: impl Into<PathBuf>) -> Result<String> {
        let request = ReadFile::new(path).with_encoding(Encoding::Utf8);
        match self.execute(request).await? {
            FileData::Text(text) => Ok(text),
            FileData::Bytes(bytes) => Encoding::Utf8.decode(&bytes),
        }
    }

    /// Replaces a file's contents, encoding text as UTF-8.
    pub async fn write_file(&self, path: impl Into<PathBuf>, data: impl Into<FileData>) -> Result<()> {
        self.execute(WriteFile::new(path, data)).await
    }

    /// Metadata of `path`, following symlinks.
    pub async fn stat(&self, path: impl Into<PathBuf>) -> Result<Metadata> {
        self.execute(Stat::new(path)).await
    }

    /// Sorted entry names of a directory.
    pub async fn read_dir(&self, path: impl Into<PathBuf>) -> Result<Vec<String>> {
        self.execute(ReadDir::new(path)).await
    }

    /// Whether `path` exists.
    pub async fn exists(&self, path: impl Into<PathBuf>) -> Result<bool> {
        self.execute(Exists::new(path)).await
    }

    /// Moves `from` to `to`.
    pub async fn rename(&self, from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Result<()> {
        self.execute(Rename::new(from, to)).await
    }

    /// Creates a [`SymlinkKind::File`](crate::capability::SymlinkKind) link;
    /// use [`execute`](Self::execute) with [`Symlink::with_kind`] for others.
    pub async fn symlink(&self, src: impl Into<PathBuf>, dst: impl Into<PathBuf>) -> Result<()> {
        self.execute(Symlink::new(src, dst)).await
    }

    /// Creates a directory with mode `0o777`.
    pub async fn mkdir(&self, path: impl Into<PathBuf>) -> Result<()> {
        self.execute(MakeDir::new(path)).await
    }
}

impl fmt::Debug for FileQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileQueue").field("gate", &self.gate).finish()
    }
}
