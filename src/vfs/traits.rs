/*!
 * VFS Traits
 * File storage abstraction consumed by the loader and the pager
 */

use super::types::*;

/// File storage trait
///
/// Resolves names to open handles. Implementations must be shareable
/// across process contexts.
pub trait FileSystem: Send + Sync {
    /// Open a file by name
    fn open(&self, name: &str) -> VfsResult<Box<dyn OpenFile>>;

    /// Get filesystem name/type
    fn name(&self) -> &str;
}

/// Open file handle trait
///
/// Represents an open file with its own position. Closing is dropping the
/// handle; a handle that denied writes re-allows them when dropped.
pub trait OpenFile: Send + Sync {
    /// Read up to `buf.len()` bytes at the current position, advancing it
    fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize>;

    /// Write `buf` at the current position, advancing it
    fn write(&mut self, buf: &[u8]) -> VfsResult<usize>;

    /// Move the position to an absolute offset
    fn seek(&mut self, pos: u64);

    /// Current position
    fn tell(&self) -> u64;

    /// File length in bytes
    fn length(&self) -> u64;

    /// Deny writes to the underlying file while this handle is open
    fn deny_write(&mut self);

    /// Undo a previous `deny_write` through this handle
    fn allow_write(&mut self);

    /// Open an independent handle to the same file, at the same position
    fn duplicate(&self) -> VfsResult<Box<dyn OpenFile>>;

    /// Read exactly `buf.len()` bytes starting at `offset`
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> VfsResult<()> {
        self.seek(offset);
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled != buf.len() {
            return Err(VfsError::ShortRead {
                offset,
                expected: buf.len(),
                actual: filled,
            });
        }
        Ok(())
    }

    /// Write all of `buf` starting at `offset`
    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> VfsResult<()> {
        self.seek(offset);
        let written = self.write(buf)?;
        if written != buf.len() {
            return Err(VfsError::ShortWrite {
                offset,
                expected: buf.len(),
                actual: written,
            });
        }
        Ok(())
    }
}
