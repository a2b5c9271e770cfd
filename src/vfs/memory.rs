/*!
 * In-Memory Filesystem Backend
 * Fast, volatile file storage for the demo kernel and tests
 */

use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::traits::{FileSystem, OpenFile};
use super::types::*;

#[derive(Debug, Default)]
struct Inode {
    data: Vec<u8>,
    deny_write_count: usize,
}

/// In-memory filesystem implementation
#[derive(Debug, Clone)]
pub struct MemFS {
    nodes: Arc<DashMap<PathBuf, Arc<RwLock<Inode>>, RandomState>>,
}

impl MemFS {
    /// Create new in-memory filesystem
    pub fn new() -> Self {
        Self {
            nodes: Arc::new(DashMap::with_hasher(RandomState::new())),
        }
    }

    /// Normalize a name (make absolute and clean)
    fn normalize(&self, name: &str) -> VfsResult<PathBuf> {
        if name.is_empty() {
            return Err(VfsError::InvalidPath("empty file name".to_string()));
        }
        let path = Path::new("/").join(name);
        Ok(PathBuf::from(path_clean::clean(&path)))
    }

    /// Create or replace a file with `data`
    pub fn create(&self, name: &str, data: impl Into<Vec<u8>>) -> VfsResult<()> {
        let path = self.normalize(name)?;
        let data = data.into();
        match self.nodes.get(&path) {
            Some(node) => {
                let mut inode = node.write();
                if inode.deny_write_count > 0 {
                    return Err(VfsError::WriteDenied(path.display().to_string()));
                }
                inode.data = data;
            }
            None => {
                self.nodes.insert(
                    path,
                    Arc::new(RwLock::new(Inode {
                        data,
                        deny_write_count: 0,
                    })),
                );
            }
        }
        Ok(())
    }

    /// Snapshot the full contents of a file
    pub fn contents(&self, name: &str) -> VfsResult<Vec<u8>> {
        let path = self.normalize(name)?;
        self.nodes
            .get(&path)
            .map(|node| node.read().data.clone())
            .ok_or_else(|| VfsError::NotFound(path.display().to_string()))
    }

    /// Whether writes to the file are currently denied
    pub fn is_write_denied(&self, name: &str) -> bool {
        self.normalize(name)
            .ok()
            .and_then(|path| self.nodes.get(&path).map(|n| n.read().deny_write_count > 0))
            .unwrap_or(false)
    }

    /// Remove a file; open handles keep their inode alive
    pub fn remove(&self, name: &str) -> bool {
        self.normalize(name)
            .map(|path| self.nodes.remove(&path).is_some())
            .unwrap_or(false)
    }
}

impl Default for MemFS {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MemFS {
    fn open(&self, name: &str) -> VfsResult<Box<dyn OpenFile>> {
        let path = self.normalize(name)?;
        let inode = self
            .nodes
            .get(&path)
            .map(|node| Arc::clone(node.value()))
            .ok_or_else(|| VfsError::NotFound(path.display().to_string()))?;
        Ok(Box::new(MemFile {
            path,
            inode,
            pos: 0,
            denied: false,
        }))
    }

    fn name(&self) -> &str {
        "memfs"
    }
}

/// In-memory file handle
struct MemFile {
    path: PathBuf,
    inode: Arc<RwLock<Inode>>,
    pos: u64,
    denied: bool,
}

impl OpenFile for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        let inode = self.inode.read();
        let start = (self.pos as usize).min(inode.data.len());
        let n = buf.len().min(inode.data.len() - start);
        buf[..n].copy_from_slice(&inode.data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> VfsResult<usize> {
        let mut inode = self.inode.write();
        if inode.deny_write_count > 0 {
            return Err(VfsError::WriteDenied(self.path.display().to_string()));
        }
        let start = self.pos as usize;
        let end = start + buf.len();
        if inode.data.len() < end {
            inode.data.resize(end, 0);
        }
        inode.data[start..end].copy_from_slice(buf);
        self.pos = end as u64;
        Ok(buf.len())
    }

    fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn length(&self) -> u64 {
        self.inode.read().data.len() as u64
    }

    fn deny_write(&mut self) {
        if !self.denied {
            self.denied = true;
            self.inode.write().deny_write_count += 1;
        }
    }

    fn allow_write(&mut self) {
        if self.denied {
            self.denied = false;
            let mut inode = self.inode.write();
            inode.deny_write_count = inode.deny_write_count.saturating_sub(1);
        }
    }

    fn duplicate(&self) -> VfsResult<Box<dyn OpenFile>> {
        let mut copy = MemFile {
            path: self.path.clone(),
            inode: Arc::clone(&self.inode),
            pos: self.pos,
            denied: false,
        };
        if self.denied {
            copy.deny_write();
        }
        Ok(Box::new(copy))
    }
}

impl Drop for MemFile {
    fn drop(&mut self) {
        self.allow_write();
    }
}
