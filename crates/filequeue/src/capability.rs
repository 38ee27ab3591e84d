//! The filesystem capability the queue admits operations against.
//!
//! [`FileSystem`] is the boundary between the admission gate and actual
//! storage. The gate never looks inside an operation; implementations only
//! need to report results through `Result`.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Reader returned by [`FileSystem::open_read`].
pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// Writer returned by [`FileSystem::open_write`].
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Type of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
}

/// Link type for [`FileSystem::symlink`]. Only meaningful on Windows hosts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymlinkKind {
    /// Link to a file
    #[default]
    File,
    /// Link to a directory
    Dir,
    /// NTFS junction
    Junction,
}

/// Result of a stat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Entry type
    pub kind: FileKind,
    /// Size in bytes; entry count for in-memory directories
    pub len: u64,
    /// Permission bits
    pub mode: u32,
}

impl Metadata {
    /// True for regular files.
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    /// True for directories.
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// True for symbolic links.
    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }
}

/// Asynchronous filesystem operations.
///
/// Each call performs exactly one underlying operation. Errors are returned
/// as-is to the caller that submitted the operation.
#[async_trait]
pub trait FileSystem: Send + Sync + 'static {
    /// Reads the entire contents of a file.
    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Replaces the contents of a file, creating it if needed.
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Metadata of `path`, following symlinks.
    async fn metadata(&self, path: &Path) -> Result<Metadata>;

    /// Names of the entries in a directory, excluding `.` and `..`.
    async fn read_dir(&self, path: &Path) -> Result<Vec<String>>;

    /// Never fails; any lookup error reads as `false`.
    async fn exists(&self, path: &Path) -> bool;

    /// Moves `from` to `to`, replacing any existing entry.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Creates `dst` as a symlink pointing at `src`.
    async fn symlink(&self, src: &Path, dst: &Path, kind: SymlinkKind) -> Result<()>;

    /// Creates one directory with permission bits `mode`.
    async fn create_dir(&self, path: &Path, mode: u32) -> Result<()>;

    /// Opens `path` for streaming reads.
    async fn open_read(&self, path: &Path) -> Result<BoxedReader>;

    /// Opens `path` for writing, truncating any existing contents.
    async fn open_write(&self, path: &Path) -> Result<BoxedWriter>;
}
