/*!
 * Open-File Table
 * Fixed-capacity descriptor table with standard streams at 0 and 1
 */

use super::types::{ProcessError, ProcessResult};
use crate::core::limits::{FIRST_FILE_DESCRIPTOR, MAX_FILE_DESCRIPTORS};
use crate::core::types::Fd;
use crate::vfs::{share, SharedFile};
use std::fmt;

/// One descriptor slot
#[derive(Clone)]
pub enum FdEntry {
    Stdin,
    Stdout,
    File(SharedFile),
}

impl fmt::Debug for FdEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FdEntry::Stdin => write!(f, "Stdin"),
            FdEntry::Stdout => write!(f, "Stdout"),
            FdEntry::File(_) => write!(f, "File"),
        }
    }
}

/// Per-process descriptor table
#[derive(Debug)]
pub struct FileTable {
    slots: Vec<Option<FdEntry>>,
    /// Every slot in [FIRST_FILE_DESCRIPTOR, next_fd) is occupied
    next_fd: usize,
}

impl FileTable {
    pub fn new() -> Self {
        Self::with_capacity(MAX_FILE_DESCRIPTORS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(FIRST_FILE_DESCRIPTOR);
        let mut slots = vec![None; capacity];
        slots[0] = Some(FdEntry::Stdin);
        slots[1] = Some(FdEntry::Stdout);
        Self {
            slots,
            next_fd: FIRST_FILE_DESCRIPTOR,
        }
    }

    /// Install `file` at the lowest free descriptor
    pub fn open(&mut self, file: SharedFile) -> ProcessResult<Fd> {
        let fd = (self.next_fd..self.slots.len())
            .find(|fd| self.slots[*fd].is_none())
            .ok_or(ProcessError::TooManyOpenFiles(self.slots.len()))?;
        self.slots[fd] = Some(FdEntry::File(file));
        self.next_fd = fd + 1;
        Ok(fd as Fd)
    }

    pub fn get(&self, fd: Fd) -> Option<&FdEntry> {
        self.slots.get(fd as usize).and_then(Option::as_ref)
    }

    /// The open file behind `fd`, if it is one
    pub fn file(&self, fd: Fd) -> Option<SharedFile> {
        match self.get(fd) {
            Some(FdEntry::File(file)) => Some(file.clone()),
            _ => None,
        }
    }

    /// Close `fd`. The standard streams and unknown descriptors are ignored.
    pub fn close(&mut self, fd: Fd) -> Option<FdEntry> {
        let index = fd as usize;
        if index < FIRST_FILE_DESCRIPTOR {
            return None;
        }
        let entry = self.slots.get_mut(index)?.take()?;
        self.next_fd = self.next_fd.min(index);
        Some(entry)
    }

    /// Copy for a forked child: files get independent handles, standard streams are copied
    pub fn duplicate(&self) -> ProcessResult<Self> {
        let slots = self
            .slots
            .iter()
            .map(|slot| match slot {
                Some(FdEntry::File(file)) => {
                    let handle = file.lock().duplicate()?;
                    Ok(Some(FdEntry::File(share(handle))))
                }
                other => Ok(other.clone()),
            })
            .collect::<ProcessResult<Vec<_>>>()?;
        Ok(Self {
            slots,
            next_fd: self.next_fd,
        })
    }

    /// Close every entry
    pub fn close_all(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.next_fd = FIRST_FILE_DESCRIPTOR;
    }

    /// Number of open files (standard streams excluded)
    pub fn open_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Some(FdEntry::File(_))))
            .count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}
