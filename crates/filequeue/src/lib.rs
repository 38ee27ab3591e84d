#![warn(missing_docs)]

//! filequeue: bounds the number of concurrently open files by admitting
//! filesystem operations through a FIFO gate

pub mod capability;
pub mod cli;
pub mod config;
pub mod encoding;
pub mod error;
pub mod gate;
pub mod host_fs;
pub mod mem_fs;
pub mod queue;
pub mod registry;
pub mod request;
pub mod stream;

pub use capability::{FileKind, FileSystem, Metadata, SymlinkKind};
pub use config::FileQueueConfig;
pub use encoding::{Encoding, FileData};
pub use error::{FsError, Result};
pub use gate::{AdmissionGate, Completion, GateStats, DEFAULT_LIMIT};
pub use host_fs::HostFs;
pub use mem_fs::MemFs;
pub use queue::FileQueue;
pub use registry::{GateOptions, GateRegistry};
pub use request::{FsRequest, FsResponse, Request};
pub use stream::{QueuedReadStream, QueuedWriteStream};
