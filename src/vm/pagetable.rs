/*!
 * Hardware Page Table
 * Per-process vpn -> frame mappings with accessed and dirty bits
 */

use super::types::{FrameId, VmError, VmResult};
use crate::core::types::{vpn_to_addr, Vpn};
use ahash::RandomState;
use std::collections::HashMap;

/// Page table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pte {
    pub frame: FrameId,
    pub writable: bool,
    pub accessed: bool,
    pub dirty: bool,
}

/// Stand-in for the MMU's translation tables
#[derive(Debug, Default)]
pub struct PageTable {
    entries: HashMap<Vpn, Pte, RandomState>,
}

impl PageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a translation; an existing one is never replaced
    pub fn map(&mut self, vpn: Vpn, frame: FrameId, writable: bool) -> VmResult<()> {
        if self.entries.contains_key(&vpn) {
            return Err(VmError::AlreadyMapped(vpn_to_addr(vpn)));
        }
        self.entries.insert(
            vpn,
            Pte {
                frame,
                writable,
                accessed: false,
                dirty: false,
            },
        );
        Ok(())
    }

    pub fn unmap(&mut self, vpn: Vpn) -> Option<Pte> {
        self.entries.remove(&vpn)
    }

    pub fn get(&self, vpn: Vpn) -> Option<&Pte> {
        self.entries.get(&vpn)
    }

    /// Record an access the way the MMU would
    pub fn touch(&mut self, vpn: Vpn, write: bool) {
        if let Some(pte) = self.entries.get_mut(&vpn) {
            pte.accessed = true;
            if write {
                pte.dirty = true;
            }
        }
    }

    pub fn set_dirty(&mut self, vpn: Vpn, dirty: bool) {
        if let Some(pte) = self.entries.get_mut(&vpn) {
            pte.dirty = dirty;
        }
    }

    pub fn is_dirty(&self, vpn: Vpn) -> bool {
        self.entries.get(&vpn).map_or(false, |pte| pte.dirty)
    }

    /// Read and clear the accessed bit
    pub fn take_accessed(&mut self, vpn: Vpn) -> bool {
        self.entries
            .get_mut(&vpn)
            .map_or(false, |pte| std::mem::replace(&mut pte.accessed, false))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
