//! In-memory [`FileSystem`] used by tests, demos and the `fq` CLI's dry runs.
//!
//! Paths are resolved from the root of the tree; `.` and the root prefix are
//! ignored and `..` steps back one component. Symlink targets are resolved
//! the same way, from the root. Every operation yields to the scheduler once
//! before touching the tree, so completions never fire inside the call that
//! started them.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

use crate::capability::{BoxedReader, BoxedWriter, FileKind, FileSystem, Metadata, SymlinkKind};
use crate::error::{FsError, Result};

const MAX_SYMLINK_HOPS: usize = 40;
const DEFAULT_FILE_MODE: u32 = 0o666;
const DEFAULT_DIR_MODE: u32 = 0o777;

#[derive(Debug, Clone)]
enum Node {
    File { data: Bytes, mode: u32 },
    Dir { entries: BTreeMap<String, Node>, mode: u32 },
    Symlink { target: PathBuf, kind: SymlinkKind },
}

impl Node {
    fn empty_dir(mode: u32) -> Self {
        Node::Dir {
            entries: BTreeMap::new(),
            mode,
        }
    }
}

fn split(path: &Path) -> Vec<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(name) => parts.push(name.to_string_lossy().into_owned()),
            Component::ParentDir => {
                parts.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    parts
}

fn node_at<'a>(node: &'a Node, parts: &[String]) -> Option<&'a Node> {
    match parts.split_first() {
        None => Some(node),
        Some((first, rest)) => match node {
            Node::Dir { entries, .. } => node_at(entries.get(first)?, rest),
            _ => None,
        },
    }
}

fn dir_entries_mut<'a>(node: &'a mut Node, parts: &[String]) -> Option<&'a mut BTreeMap<String, Node>> {
    match node {
        Node::Dir { entries, .. } => match parts.split_first() {
            None => Some(entries),
            Some((first, rest)) => dir_entries_mut(entries.get_mut(first)?, rest),
        },
        _ => None,
    }
}

fn make_dirs<'a>(node: &'a mut Node, parts: &[String]) -> Option<&'a mut BTreeMap<String, Node>> {
    match node {
        Node::Dir { entries, .. } => match parts.split_first() {
            None => Some(entries),
            Some((first, rest)) => {
                let child = entries
                    .entry(first.clone())
                    .or_insert_with(|| Node::empty_dir(DEFAULT_DIR_MODE));
                make_dirs(child, rest)
            }
        },
        _ => None,
    }
}

struct Tree {
    root: Node,
}

impl Tree {
    /// Resolves symlinks along `path`. The last component is followed only
    /// when `follow_last` is set.
    fn canonical(&self, path: &Path, follow_last: bool) -> Result<Vec<String>> {
        let mut pending: VecDeque<String> = split(path).into();
        let mut resolved: Vec<String> = Vec::new();
        let mut hops = 0;

        while let Some(part) = pending.pop_front() {
            resolved.push(part);
            let follow = follow_last || !pending.is_empty();
            if let Some(Node::Symlink { target, .. }) = node_at(&self.root, &resolved) {
                if !follow {
                    continue;
                }
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(FsError::InvalidData {
                        reason: format!("too many levels of symbolic links: {}", path.display()),
                    });
                }
                let mut next: VecDeque<String> = split(target).into();
                next.extend(pending.drain(..));
                pending = next;
                resolved.clear();
            }
        }
        Ok(resolved)
    }

    fn lookup(&self, path: &Path) -> Result<&Node> {
        let parts = self.canonical(path, true)?;
        node_at(&self.root, &parts).ok_or_else(|| FsError::NotFound {
            path: path.to_path_buf(),
        })
    }

    /// Entries of the parent directory of `parts` plus the final name.
    fn parent_mut(
        &mut self,
        parts: &[String],
        path: &Path,
    ) -> Result<(&mut BTreeMap<String, Node>, String)> {
        let Some((name, parent)) = parts.split_last() else {
            return Err(FsError::AlreadyExists {
                path: path.to_path_buf(),
            });
        };
        match node_at(&self.root, parent) {
            None => {
                return Err(FsError::NotFound {
                    path: path.to_path_buf(),
                })
            }
            Some(Node::Dir { .. }) => {}
            Some(_) => {
                return Err(FsError::NotDirectory {
                    path: path.to_path_buf(),
                })
            }
        }
        let entries = dir_entries_mut(&mut self.root, parent).ok_or_else(|| FsError::NotFound {
            path: path.to_path_buf(),
        })?;
        Ok((entries, name.clone()))
    }

    fn write(&mut self, path: &Path, data: Bytes) -> Result<Vec<String>> {
        let parts = self.canonical(path, true)?;
        let (entries, name) = self.parent_mut(&parts, path)?;
        match entries.get_mut(&name) {
            Some(Node::File { data: existing, .. }) => *existing = data,
            Some(_) => {
                return Err(FsError::IsDirectory {
                    path: path.to_path_buf(),
                })
            }
            None => {
                entries.insert(
                    name,
                    Node::File {
                        data,
                        mode: DEFAULT_FILE_MODE,
                    },
                );
            }
        }
        Ok(parts)
    }
}

#[derive(Debug, Default)]
struct OpCounter {
    active: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicU64,
}

struct OpGuard<'a>(&'a OpCounter);

impl OpCounter {
    fn enter(&self) -> OpGuard<'_> {
        let now = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
        self.total.fetch_add(1, Ordering::Relaxed);
        OpGuard(self)
    }
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// In-memory filesystem. Clones share the same tree.
#[derive(Clone)]
pub struct MemFs {
    tree: Arc<Mutex<Tree>>,
    ops: Arc<OpCounter>,
}

impl MemFs {
    /// Empty filesystem containing only the root directory.
    pub fn new() -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree {
                root: Node::empty_dir(DEFAULT_DIR_MODE),
            })),
            ops: Arc::new(OpCounter::default()),
        }
    }

    /// Adds a file, creating missing parent directories.
    pub fn insert_file(&self, path: impl AsRef<Path>, data: impl Into<Bytes>) {
        let mut parts = split(path.as_ref());
        let Some(name) = parts.pop() else { return };
        let mut tree = self.tree.lock();
        if let Some(entries) = make_dirs(&mut tree.root, &parts) {
            entries.insert(
                name,
                Node::File {
                    data: data.into(),
                    mode: DEFAULT_FILE_MODE,
                },
            );
        }
    }

    /// Adds a directory and any missing parents.
    pub fn insert_dir(&self, path: impl AsRef<Path>) {
        let parts = split(path.as_ref());
        let mut tree = self.tree.lock();
        make_dirs(&mut tree.root, &parts);
    }

    /// Builder form of [`insert_file`](Self::insert_file).
    pub fn with_file(self, path: impl AsRef<Path>, data: impl Into<Bytes>) -> Self {
        self.insert_file(path, data);
        self
    }

    /// Target of the symlink at `path`, without following it.
    pub fn link_target(&self, path: impl AsRef<Path>) -> Option<(PathBuf, SymlinkKind)> {
        let tree = self.tree.lock();
        let parts = tree.canonical(path.as_ref(), false).ok()?;
        match node_at(&tree.root, &parts)? {
            Node::Symlink { target, kind } => Some((target.clone(), *kind)),
            _ => None,
        }
    }

    /// Highest number of operations observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.ops.peak.load(Ordering::Acquire)
    }

    /// Operations running right now.
    pub fn active_ops(&self) -> usize {
        self.ops.active.load(Ordering::Acquire)
    }

    /// Operations started since creation.
    pub fn op_count(&self) -> u64 {
        self.ops.total.load(Ordering::Relaxed)
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for MemFs {
    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        let _op = self.ops.enter();
        tokio::task::yield_now().await;

        let tree = self.tree.lock();
        match tree.lookup(path)? {
            Node::File { data, .. } => Ok(data.clone()),
            _ => Err(FsError::IsDirectory {
                path: path.to_path_buf(),
            }),
        }
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()> {
        let _op = self.ops.enter();
        tokio::task::yield_now().await;

        self.tree.lock().write(path, data).map(|_| ())
    }

    async fn metadata(&self, path: &Path) -> Result<Metadata> {
        let _op = self.ops.enter();
        tokio::task::yield_now().await;

        let tree = self.tree.lock();
        let meta = match tree.lookup(path)? {
            Node::File { data, mode } => Metadata {
                kind: FileKind::File,
                len: data.len() as u64,
                mode: *mode,
            },
            Node::Dir { entries, mode } => Metadata {
                kind: FileKind::Directory,
                len: entries.len() as u64,
                mode: *mode,
            },
            Node::Symlink { target, .. } => Metadata {
                kind: FileKind::Symlink,
                len: target.as_os_str().len() as u64,
                mode: DEFAULT_DIR_MODE,
            },
        };
        Ok(meta)
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<String>> {
        let _op = self.ops.enter();
        tokio::task::yield_now().await;

        let tree = self.tree.lock();
        match tree.lookup(path)? {
            Node::Dir { entries, .. } => Ok(entries.keys().cloned().collect()),
            _ => Err(FsError::NotDirectory {
                path: path.to_path_buf(),
            }),
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        let _op = self.ops.enter();
        tokio::task::yield_now().await;

        self.tree.lock().lookup(path).is_ok()
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let _op = self.ops.enter();
        tokio::task::yield_now().await;

        let mut tree = self.tree.lock();
        let from_parts = tree.canonical(from, false)?;
        let to_parts = tree.canonical(to, false)?;
        if node_at(&tree.root, &from_parts).is_none() || from_parts.is_empty() {
            return Err(FsError::NotFound {
                path: from.to_path_buf(),
            });
        }
        if from_parts == to_parts {
            return Ok(());
        }
        if to_parts.starts_with(&from_parts) {
            return Err(FsError::InvalidData {
                reason: format!("cannot move {} into itself", from.display()),
            });
        }

        // validate the destination before detaching the source
        tree.parent_mut(&to_parts, to)?;

        let (entries, name) = tree.parent_mut(&from_parts, from)?;
        let node = entries.remove(&name).ok_or_else(|| FsError::NotFound {
            path: from.to_path_buf(),
        })?;
        let (entries, name) = tree.parent_mut(&to_parts, to)?;
        entries.insert(name, node);
        Ok(())
    }

    async fn symlink(&self, src: &Path, dst: &Path, kind: SymlinkKind) -> Result<()> {
        let _op = self.ops.enter();
        tokio::task::yield_now().await;

        let mut tree = self.tree.lock();
        tree.lookup(src)?;
        let parts = tree.canonical(dst, false)?;
        let (entries, name) = tree.parent_mut(&parts, dst)?;
        if entries.contains_key(&name) {
            return Err(FsError::AlreadyExists {
                path: dst.to_path_buf(),
            });
        }
        entries.insert(
            name,
            Node::Symlink {
                target: src.to_path_buf(),
                kind,
            },
        );
        Ok(())
    }

    async fn create_dir(&self, path: &Path, mode: u32) -> Result<()> {
        let _op = self.ops.enter();
        tokio::task::yield_now().await;

        let mut tree = self.tree.lock();
        let parts = tree.canonical(path, false)?;
        let (entries, name) = tree.parent_mut(&parts, path)?;
        if entries.contains_key(&name) {
            return Err(FsError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        entries.insert(name, Node::empty_dir(mode));
        Ok(())
    }

    async fn open_read(&self, path: &Path) -> Result<BoxedReader> {
        let data = self.read_file(path).await?;
        Ok(Box::pin(Cursor::new(data)))
    }

    async fn open_write(&self, path: &Path) -> Result<BoxedWriter> {
        let _op = self.ops.enter();
        tokio::task::yield_now().await;

        let parts = self.tree.lock().write(path, Bytes::new())?;
        Ok(Box::pin(MemWriter {
            tree: Arc::clone(&self.tree),
            parts,
            buf: Vec::new(),
        }))
    }
}

/// Buffers writes and publishes them to the tree on flush, shutdown and drop.
struct MemWriter {
    tree: Arc<Mutex<Tree>>,
    parts: Vec<String>,
    buf: Vec<u8>,
}

impl MemWriter {
    fn commit(&self) {
        let mut tree = self.tree.lock();
        let Some((name, parent)) = self.parts.split_last() else {
            return;
        };
        if let Some(entries) = dir_entries_mut(&mut tree.root, parent) {
            if let Some(Node::File { data, .. }) = entries.get_mut(name) {
                *data = Bytes::copy_from_slice(&self.buf);
            }
        }
    }
}

impl AsyncWrite for MemWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.get_mut().buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.commit();
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.commit();
        Poll::Ready(Ok(()))
    }
}

impl Drop for MemWriter {
    fn drop(&mut self) {
        self.commit();
    }
}
