//! Shared fixtures for the integration tests.

use filequeue::{AdmissionGate, FileQueue, MemFs};
use std::sync::Arc;

/// In-memory tree with a few known files.
pub fn fixture_fs() -> MemFs {
    let fs = MemFs::new()
        .with_file("my_path", "some_data")
        .with_file("my_other_path", "some_other_data")
        .with_file("my_dir/my_third_path", "even_more_data")
        .with_file("file-to-rename", "I will be renamed.");
    fs.insert_dir("my_empty_dir");
    fs
}

/// Queue over `fs` with its own gate.
pub fn private_queue(fs: &MemFs, limit: usize) -> FileQueue {
    FileQueue::new(Arc::new(fs.clone()), AdmissionGate::new(limit))
}
