/*!
 * Virtual File System Module
 * File storage abstraction consumed by the loader, the pager and the
 * descriptor tables
 */

pub mod memory;
pub mod traits;
pub mod types;

// Re-exports
pub use memory::MemFS;
pub use traits::{FileSystem, OpenFile};
pub use types::{share, SharedFile, VfsError, VfsResult};
