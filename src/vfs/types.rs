/*!
 * VFS Types
 * Shared types for file storage operations
 */

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use super::traits::OpenFile;

/// VFS operation result
pub type VfsResult<T> = Result<T, VfsError>;

/// VFS errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "error", content = "details")]
pub enum VfsError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Write denied: {0}")]
    WriteDenied(String),

    #[error("Short read at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        offset: u64,
        expected: usize,
        actual: usize,
    },

    #[error("Short write at offset {offset}: expected {expected} bytes, wrote {actual}")]
    ShortWrite {
        offset: u64,
        expected: usize,
        actual: usize,
    },

    #[error("I/O error: {0}")]
    IoError(String),
}

/// Open file shared between the owners of one handle position.
///
/// Loader-pending pages of one image, and the process that runs it, all
/// read through the executable's single handle.
pub type SharedFile = Arc<Mutex<Box<dyn OpenFile>>>;

/// Wrap a freshly opened file for sharing
#[inline]
pub fn share(file: Box<dyn OpenFile>) -> SharedFile {
    Arc::new(Mutex::new(file))
}
