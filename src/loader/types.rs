/*!
 * Loader Types
 * Errors raised while building a process image
 */

use crate::vfs::VfsError;
use crate::vm::VmError;
use thiserror::Error;

/// Loader operation result
pub type LoadResult<T> = Result<T, LoadError>;

/// Image loading errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("load: {name}: open failed: {source}")]
    Open { name: String, source: VfsError },

    #[error("Not a static x86-64 ELF executable: {0}")]
    BadHeader(&'static str),

    #[error("Program header {0} lies outside the file")]
    HeaderOutOfRange(usize),

    #[error("Unsupported segment type {0:#x} (dynamic linking is not supported)")]
    UnsupportedSegment(u32),

    #[error("Invalid segment {index}: {reason}")]
    InvalidSegment { index: usize, reason: &'static str },

    #[error("Empty command line")]
    EmptyCommandLine,

    #[error("Command line is {length} bytes, limit is {max}")]
    CommandLineTooLong { length: usize, max: usize },

    #[error("Too many arguments: {count}, limit is {max}")]
    TooManyArguments { count: usize, max: usize },

    #[error("Arguments need {0} bytes of stack, more than one page")]
    ArgumentsTooLong(usize),

    #[error("Executable I/O failed: {0}")]
    Io(#[from] VfsError),

    #[error("Address space setup failed: {0}")]
    Memory(#[from] VmError),
}
