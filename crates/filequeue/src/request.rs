//! Typed filesystem requests.
//!
//! Each operation kind is a struct whose optional fields are `None` until the
//! caller sets them. Defaults are applied by the `effective_*` accessors when
//! the request is performed, never by the gate.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::capability::{BoxedReader, BoxedWriter, FileSystem, Metadata, SymlinkKind};
use crate::encoding::{Encoding, FileData};
use crate::error::Result;

/// Mode applied by [`MakeDir`] when none is given.
pub const DEFAULT_DIR_MODE: u32 = 0o777;

/// One operation against a [`FileSystem`].
#[async_trait]
pub trait Request: Send + 'static {
    /// Value produced on success.
    type Output: Send + 'static;

    /// Operation name used in logs and errors.
    const NAME: &'static str;

    /// Runs the operation against `fs`.
    async fn perform(self, fs: &dyn FileSystem) -> Result<Self::Output>;
}

/// Read a whole file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadFile {
    /// File path
    pub path: PathBuf,
    /// Decode the contents as text; raw bytes when unset
    pub encoding: Option<Encoding>,
}

impl ReadFile {
    /// Creates a request returning raw bytes
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            encoding: None,
        }
    }

    /// Sets the text encoding
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }
}

#[async_trait]
impl Request for ReadFile {
    type Output = FileData;
    const NAME: &'static str = "read_file";

    async fn perform(self, fs: &dyn FileSystem) -> Result<FileData> {
        let bytes = fs.read_file(&self.path).await?;
        match self.encoding {
            None => Ok(FileData::Bytes(bytes)),
            Some(encoding) => Ok(FileData::Text(encoding.decode(&bytes)?)),
        }
    }
}

/// Replace a file's contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFile {
    /// File path
    pub path: PathBuf,
    /// New contents
    pub data: FileData,
    /// Encoding for text data; UTF-8 when unset
    pub encoding: Option<Encoding>,
}

impl WriteFile {
    /// Creates a write request
    pub fn new(path: impl Into<PathBuf>, data: impl Into<FileData>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
            encoding: None,
        }
    }

    /// Sets the text encoding
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Encoding used when performed
    pub fn effective_encoding(&self) -> Encoding {
        self.encoding.unwrap_or_default()
    }
}

#[async_trait]
impl Request for WriteFile {
    type Output = ();
    const NAME: &'static str = "write_file";

    async fn perform(self, fs: &dyn FileSystem) -> Result<()> {
        let encoding = self.effective_encoding();
        let bytes = self.data.into_bytes(encoding)?;
        fs.write_file(&self.path, bytes).await
    }
}

/// Metadata of a path, following symlinks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    /// Path to stat
    pub path: PathBuf,
}

impl Stat {
    /// Creates the request
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Request for Stat {
    type Output = Metadata;
    const NAME: &'static str = "stat";

    async fn perform(self, fs: &dyn FileSystem) -> Result<Metadata> {
        fs.metadata(&self.path).await
    }
}

/// Sorted entry names of a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadDir {
    /// Directory path
    pub path: PathBuf,
}

impl ReadDir {
    /// Creates the request
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Request for ReadDir {
    type Output = Vec<String>;
    const NAME: &'static str = "read_dir";

    async fn perform(self, fs: &dyn FileSystem) -> Result<Vec<String>> {
        fs.read_dir(&self.path).await
    }
}

/// Existence check. Never fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exists {
    /// Path to check
    pub path: PathBuf,
}

impl Exists {
    /// Creates the request
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Request for Exists {
    type Output = bool;
    const NAME: &'static str = "exists";

    async fn perform(self, fs: &dyn FileSystem) -> Result<bool> {
        Ok(fs.exists(&self.path).await)
    }
}

/// Move an entry, replacing any existing target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    /// Current path
    pub from: PathBuf,
    /// New path
    pub to: PathBuf,
}

impl Rename {
    /// Creates the request
    pub fn new(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

#[async_trait]
impl Request for Rename {
    type Output = ();
    const NAME: &'static str = "rename";

    async fn perform(self, fs: &dyn FileSystem) -> Result<()> {
        fs.rename(&self.from, &self.to).await
    }
}

/// Create a symbolic link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symlink {
    /// Link target
    pub src: PathBuf,
    /// Path of the new link
    pub dst: PathBuf,
    /// Link type; [`SymlinkKind::File`] when unset
    pub kind: Option<SymlinkKind>,
}

impl Symlink {
    /// Creates a symlink request
    pub fn new(src: impl Into<PathBuf>, dst: impl Into<PathBuf>) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            kind: None,
        }
    }

    /// Sets the link type
    pub fn with_kind(mut self, kind: SymlinkKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Link type used when performed
    pub fn effective_kind(&self) -> SymlinkKind {
        self.kind.unwrap_or_default()
    }
}

#[async_trait]
impl Request for Symlink {
    type Output = ();
    const NAME: &'static str = "symlink";

    async fn perform(self, fs: &dyn FileSystem) -> Result<()> {
        let kind = self.effective_kind();
        fs.symlink(&self.src, &self.dst, kind).await
    }
}

/// Create a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakeDir {
    /// Directory path
    pub path: PathBuf,
    /// Permission bits; [`DEFAULT_DIR_MODE`] when unset
    pub mode: Option<u32>,
}

impl MakeDir {
    /// Creates a mkdir request
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: None,
        }
    }

    /// Sets the permission bits
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Permission bits used when performed
    pub fn effective_mode(&self) -> u32 {
        self.mode.unwrap_or(DEFAULT_DIR_MODE)
    }
}

#[async_trait]
impl Request for MakeDir {
    type Output = ();
    const NAME: &'static str = "mkdir";

    async fn perform(self, fs: &dyn FileSystem) -> Result<()> {
        let mode = self.effective_mode();
        fs.create_dir(&self.path, mode).await
    }
}

/// Open a file for streaming reads. See [`crate::stream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRead {
    /// File to open
    pub path: PathBuf,
}

impl OpenRead {
    /// Creates the request
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Request for OpenRead {
    type Output = BoxedReader;
    const NAME: &'static str = "open_read";

    async fn perform(self, fs: &dyn FileSystem) -> Result<BoxedReader> {
        fs.open_read(&self.path).await
    }
}

/// Open a file for streaming writes. See [`crate::stream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenWrite {
    /// File to create or truncate
    pub path: PathBuf,
}

impl OpenWrite {
    /// Creates the request
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Request for OpenWrite {
    type Output = BoxedWriter;
    const NAME: &'static str = "open_write";

    async fn perform(self, fs: &dyn FileSystem) -> Result<BoxedWriter> {
        fs.open_write(&self.path).await
    }
}

/// Any non-streaming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsRequest {
    /// See [`ReadFile`]
    ReadFile(ReadFile),
    /// See [`WriteFile`]
    WriteFile(WriteFile),
    /// See [`Stat`]
    Stat(Stat),
    /// See [`ReadDir`]
    ReadDir(ReadDir),
    /// See [`Exists`]
    Exists(Exists),
    /// See [`Rename`]
    Rename(Rename),
    /// See [`Symlink`]
    Symlink(Symlink),
    /// See [`MakeDir`]
    MakeDir(MakeDir),
}

/// Result of an [`FsRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsResponse {
    /// File contents from a read
    Data(FileData),
    /// Stat result
    Metadata(Metadata),
    /// Directory listing
    Entries(Vec<String>),
    /// Existence check result
    Exists(bool),
    /// Operation with no value finished
    Done,
}

impl FsRequest {
    /// Operation name of the wrapped request.
    pub fn name(&self) -> &'static str {
        match self {
            FsRequest::ReadFile(_) => ReadFile::NAME,
            FsRequest::WriteFile(_) => WriteFile::NAME,
            FsRequest::Stat(_) => Stat::NAME,
            FsRequest::ReadDir(_) => ReadDir::NAME,
            FsRequest::Exists(_) => Exists::NAME,
            FsRequest::Rename(_) => Rename::NAME,
            FsRequest::Symlink(_) => Symlink::NAME,
            FsRequest::MakeDir(_) => MakeDir::NAME,
        }
    }

    /// The primary path the request touches.
    pub fn path(&self) -> &Path {
        match self {
            FsRequest::ReadFile(r) => &r.path,
            FsRequest::WriteFile(r) => &r.path,
            FsRequest::Stat(r) => &r.path,
            FsRequest::ReadDir(r) => &r.path,
            FsRequest::Exists(r) => &r.path,
            FsRequest::Rename(r) => &r.from,
            FsRequest::Symlink(r) => &r.dst,
            FsRequest::MakeDir(r) => &r.path,
        }
    }
}

#[async_trait]
impl Request for FsRequest {
    type Output = FsResponse;
    const NAME: &'static str = "request";

    async fn perform(self, fs: &dyn FileSystem) -> Result<FsResponse> {
        let response = match self {
            FsRequest::ReadFile(r) => FsResponse::Data(r.perform(fs).await?),
            FsRequest::WriteFile(r) => {
                r.perform(fs).await?;
                FsResponse::Done
            }
            FsRequest::Stat(r) => FsResponse::Metadata(r.perform(fs).await?),
            FsRequest::ReadDir(r) => FsResponse::Entries(r.perform(fs).await?),
            FsRequest::Exists(r) => FsResponse::Exists(r.perform(fs).await?),
            FsRequest::Rename(r) => {
                r.perform(fs).await?;
                FsResponse::Done
            }
            FsRequest::Symlink(r) => {
                r.perform(fs).await?;
                FsResponse::Done
            }
            FsRequest::MakeDir(r) => {
                r.perform(fs).await?;
                FsResponse::Done
            }
        };
        Ok(response)
    }
}

macro_rules! impl_from_request {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for FsRequest {
                fn from(request: $variant) -> Self {
                    FsRequest::$variant(request)
                }
            }
        )*
    };
}

impl_from_request!(ReadFile, WriteFile, Stat, ReadDir, Exists, Rename, Symlink, MakeDir);
