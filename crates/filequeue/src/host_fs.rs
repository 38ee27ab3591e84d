//! [`FileSystem`] backed by the host filesystem through `tokio::fs`.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::capability::{BoxedReader, BoxedWriter, FileKind, FileSystem, Metadata, SymlinkKind};
use crate::error::{FsError, Result};

/// Host filesystem rooted at a base directory.
///
/// Relative paths are joined onto the root; absolute paths replace it.
#[derive(Debug, Clone)]
pub struct HostFs {
    root: PathBuf,
}

impl HostFs {
    /// Filesystem rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Base directory for relative paths.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

impl Default for HostFs {
    fn default() -> Self {
        Self::new(".")
    }
}

fn to_metadata(meta: &std::fs::Metadata) -> Metadata {
    let kind = if meta.is_dir() {
        FileKind::Directory
    } else if meta.file_type().is_symlink() {
        FileKind::Symlink
    } else {
        FileKind::File
    };

    #[cfg(unix)]
    let mode = {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o7777
    };
    #[cfg(not(unix))]
    let mode = if meta.permissions().readonly() { 0o444 } else { 0o666 };

    Metadata {
        kind,
        len: meta.len(),
        mode,
    }
}

#[cfg(unix)]
async fn make_symlink(target: &Path, link: &Path, _kind: SymlinkKind) -> std::io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(windows)]
async fn make_symlink(target: &Path, link: &Path, kind: SymlinkKind) -> std::io::Result<()> {
    match kind {
        SymlinkKind::File => tokio::fs::symlink_file(target, link).await,
        SymlinkKind::Dir | SymlinkKind::Junction => tokio::fs::symlink_dir(target, link).await,
    }
}

#[cfg(not(any(unix, windows)))]
async fn make_symlink(_target: &Path, _link: &Path, _kind: SymlinkKind) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}

#[async_trait]
impl FileSystem for HostFs {
    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        let full = self.resolve(path);
        let data = tokio::fs::read(&full)
            .await
            .map_err(|e| FsError::from_io(e, path))?;
        Ok(Bytes::from(data))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()> {
        let full = self.resolve(path);
        tokio::fs::write(&full, &data)
            .await
            .map_err(|e| FsError::from_io(e, path))
    }

    async fn metadata(&self, path: &Path) -> Result<Metadata> {
        let full = self.resolve(path);
        let meta = tokio::fs::metadata(&full)
            .await
            .map_err(|e| FsError::from_io(e, path))?;
        Ok(to_metadata(&meta))
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<String>> {
        let full = self.resolve(path);
        let mut dir = tokio::fs::read_dir(&full)
            .await
            .map_err(|e| FsError::from_io(e, path))?;

        let mut names = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| FsError::from_io(e, path))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(self.resolve(path))
            .await
            .unwrap_or(false)
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        tokio::fs::rename(self.resolve(from), self.resolve(to))
            .await
            .map_err(|e| FsError::from_io(e, from))
    }

    async fn symlink(&self, src: &Path, dst: &Path, kind: SymlinkKind) -> Result<()> {
        let target = self.resolve(src);
        let link = self.resolve(dst);
        debug!(target = %target.display(), link = %link.display(), ?kind, "creating symlink");

        make_symlink(&target, &link, kind)
            .await
            .map_err(|e| FsError::from_io(e, dst))
    }

    async fn create_dir(&self, path: &Path, mode: u32) -> Result<()> {
        let full = self.resolve(path);
        let mut builder = tokio::fs::DirBuilder::new();

        #[cfg(unix)]
        builder.mode(mode);
        #[cfg(not(unix))]
        let _ = mode;

        builder
            .create(&full)
            .await
            .map_err(|e| FsError::from_io(e, path))
    }

    async fn open_read(&self, path: &Path) -> Result<BoxedReader> {
        let file = tokio::fs::File::open(self.resolve(path))
            .await
            .map_err(|e| FsError::from_io(e, path))?;
        Ok(Box::pin(file))
    }

    async fn open_write(&self, path: &Path) -> Result<BoxedWriter> {
        let file = tokio::fs::File::create(self.resolve(path))
            .await
            .map_err(|e| FsError::from_io(e, path))?;
        Ok(Box::pin(file))
    }
}
