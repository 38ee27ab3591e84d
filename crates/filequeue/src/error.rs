//! Error type shared by the gate, the filesystems and the queue.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure of a filesystem operation or of the queue around it.
#[derive(Debug, Error)]
pub enum FsError {
    /// Host I/O error with no dedicated variant
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Path does not exist
    #[error("No such file or directory: {}", path.display())]
    NotFound {
        /// Path as given by the caller
        path: PathBuf,
    },

    /// File operation on a directory
    #[error("Is a directory: {}", path.display())]
    IsDirectory {
        /// Path as given by the caller
        path: PathBuf,
    },

    /// Directory operation on a file
    #[error("Not a directory: {}", path.display())]
    NotDirectory {
        /// Path as given by the caller
        path: PathBuf,
    },

    /// Target of mkdir or symlink exists
    #[error("Path already exists: {}", path.display())]
    AlreadyExists {
        /// Path as given by the caller
        path: PathBuf,
    },

    /// Contents or arguments that cannot be used
    #[error("Invalid data: {reason}")]
    InvalidData {
        /// What was wrong
        reason: String,
    },

    /// Operation the backend cannot perform
    #[error("Operation not supported: {op}")]
    Unsupported {
        /// Operation name
        op: String,
    },

    /// Completion handle dropped without a result
    #[error("Operation was dropped before it completed")]
    Abandoned,

    /// Queue used outside a Tokio runtime
    #[error("No Tokio runtime available to run {op}")]
    NoRuntime {
        /// Operation name
        op: &'static str,
    },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FsError>;

impl FsError {
    /// Classifies a host I/O error, attaching `path` where the kind has a
    /// dedicated variant.
    pub fn from_io(err: std::io::Error, path: &Path) -> Self {
        match err.kind() {
            ErrorKind::NotFound => FsError::NotFound {
                path: path.to_path_buf(),
            },
            ErrorKind::AlreadyExists => FsError::AlreadyExists {
                path: path.to_path_buf(),
            },
            _ => match err.raw_os_error() {
                Some(libc::EISDIR) => FsError::IsDirectory {
                    path: path.to_path_buf(),
                },
                Some(libc::ENOTDIR) => FsError::NotDirectory {
                    path: path.to_path_buf(),
                },
                _ => FsError::Io(err),
            },
        }
    }

    /// Errno value for this error.
    pub fn to_errno(&self) -> i32 {
        use libc::*;
        match self {
            FsError::Io(e) => e.raw_os_error().unwrap_or(EIO),
            FsError::NotFound { .. } => ENOENT,
            FsError::IsDirectory { .. } => EISDIR,
            FsError::NotDirectory { .. } => ENOTDIR,
            FsError::AlreadyExists { .. } => EEXIST,
            FsError::InvalidData { .. } => EINVAL,
            FsError::Unsupported { .. } => ENOSYS,
            FsError::Abandoned => ECANCELED,
            FsError::NoRuntime { .. } => EAGAIN,
        }
    }

    /// Symbolic errno name, e.g. `"ENOENT"`.
    pub fn code(&self) -> &'static str {
        match self.to_errno() {
            libc::ENOENT => "ENOENT",
            libc::EISDIR => "EISDIR",
            libc::ENOTDIR => "ENOTDIR",
            libc::EEXIST => "EEXIST",
            libc::EINVAL => "EINVAL",
            libc::ENOSYS => "ENOSYS",
            libc::ECANCELED => "ECANCELED",
            libc::EAGAIN => "EAGAIN",
            libc::EACCES => "EACCES",
            libc::EPERM => "EPERM",
            _ => "EIO",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_errno() {
        let err = FsError::NotFound {
            path: PathBuf::from("missing"),
        };
        assert_eq!(err.to_errno(), libc::ENOENT);
        assert_eq!(err.code(), "ENOENT");
    }

    #[test]
    fn test_is_directory_errno() {
        let err = FsError::IsDirectory {
            path: PathBuf::from("my_dir"),
        };
        assert_eq!(err.to_errno(), libc::EISDIR);
        assert_eq!(err.code(), "EISDIR");
    }

    #[test]
    fn test_already_exists_errno() {
        let err = FsError::AlreadyExists {
            path: PathBuf::from("symlink1"),
        };
        assert_eq!(err.to_errno(), libc::EEXIST);
    }

    #[test]
    fn test_abandoned_errno() {
        assert_eq!(FsError::Abandoned.to_errno(), libc::ECANCELED);
        assert_eq!(FsError::Abandoned.code(), "ECANCELED");
    }

    #[test]
    fn test_from_io_not_found() {
        let io_err = std::io::Error::from(ErrorKind::NotFound);
        let err = FsError::from_io(io_err, Path::new("a/b"));
        assert!(matches!(err, FsError::NotFound { ref path } if path == Path::new("a/b")));
    }

    #[test]
    fn test_from_io_raw_enotdir() {
        let io_err = std::io::Error::from_raw_os_error(libc::ENOTDIR);
        let err = FsError::from_io(io_err, Path::new("file/child"));
        assert!(matches!(err, FsError::NotDirectory { .. }));
    }

    #[test]
    fn test_from_io_passthrough() {
        let io_err = std::io::Error::from_raw_os_error(libc::EACCES);
        let err = FsError::from_io(io_err, Path::new("locked"));
        assert!(matches!(err, FsError::Io(_)));
        assert_eq!(err.to_errno(), libc::EACCES);
        assert_eq!(err.code(), "EACCES");
    }

    #[test]
    fn test_display_messages_non_empty() {
        let errors = [
            FsError::NotFound {
                path: PathBuf::from("x"),
            },
            FsError::IsDirectory {
                path: PathBuf::from("x"),
            },
            FsError::NotDirectory {
                path: PathBuf::from("x"),
            },
            FsError::AlreadyExists {
                path: PathBuf::from("x"),
            },
            FsError::InvalidData {
                reason: "bad utf-8".to_string(),
            },
            FsError::Unsupported {
                op: "symlink".to_string(),
            },
            FsError::Abandoned,
            FsError::NoRuntime { op: "readFile" },
        ];
        for err in errors {
            let msg = err.to_string();
            assert!(!msg.is_empty(), "Error display should be non-empty");
        }
    }
}
