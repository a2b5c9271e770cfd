/*!
 * Swap Table
 * Slot allocation over a page-granular swap device
 */

use super::types::{SwapSlot, VmError, VmResult};
use crate::core::limits::PAGE_SIZE;
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Block device holding evicted anonymous pages, one page per slot
pub trait SwapDevice: Send + Sync {
    /// Number of page-sized slots on the device
    fn slot_count(&self) -> usize;

    /// Read slot `slot` into `buf` (exactly one page)
    fn read_slot(&self, slot: SwapSlot, buf: &mut [u8]) -> VmResult<()>;

    /// Write one page from `data` into slot `slot`
    fn write_slot(&self, slot: SwapSlot, data: &[u8]) -> VmResult<()>;
}

/// Volatile swap device backed by heap pages
pub struct MemSwap {
    slots: RwLock<Vec<Option<Box<[u8]>>>>,
}

impl MemSwap {
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: RwLock::new(vec![None; slot_count]),
        }
    }
}

impl SwapDevice for MemSwap {
    fn slot_count(&self) -> usize {
        self.slots.read().len()
    }

    fn read_slot(&self, slot: SwapSlot, buf: &mut [u8]) -> VmResult<()> {
        let slots = self.slots.read();
        match slots.get(slot.index()) {
            Some(Some(page)) => {
                buf.copy_from_slice(page);
                Ok(())
            }
            Some(None) => {
                buf.fill(0);
                Ok(())
            }
            None => Err(VmError::SwapIo(format!("slot {} out of range", slot.index()))),
        }
    }

    fn write_slot(&self, slot: SwapSlot, data: &[u8]) -> VmResult<()> {
        let mut slots = self.slots.write();
        let entry = slots
            .get_mut(slot.index())
            .ok_or_else(|| VmError::SwapIo(format!("slot {} out of range", slot.index())))?;
        match entry {
            Some(page) => page.copy_from_slice(data),
            None => *entry = Some(data.to_vec().into_boxed_slice()),
        }
        Ok(())
    }
}

/// Slot bitmap and traffic counters over a [`SwapDevice`]
pub struct SwapTable {
    device: Arc<dyn SwapDevice>,
    used: Mutex<Vec<bool>>,
    swap_outs: AtomicU64,
    swap_ins: AtomicU64,
}

impl SwapTable {
    pub fn new(device: Arc<dyn SwapDevice>) -> Self {
        let slots = device.slot_count();
        Self {
            device,
            used: Mutex::new(vec![false; slots]),
            swap_outs: AtomicU64::new(0),
            swap_ins: AtomicU64::new(0),
        }
    }

    fn allocate(&self) -> VmResult<SwapSlot> {
        let mut used = self.used.lock();
        let index = used
            .iter()
            .position(|taken| !taken)
            .ok_or(VmError::SwapExhausted { slots: used.len() })?;
        used[index] = true;
        Ok(SwapSlot::new(index))
    }

    /// Write a page out to a fresh slot
    pub fn swap_out(&self, data: &[u8]) -> VmResult<SwapSlot> {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        let slot = self.allocate()?;
        if let Err(e) = self.device.write_slot(slot, data) {
            self.free(slot);
            return Err(e);
        }
        self.swap_outs.fetch_add(1, Ordering::Relaxed);
        debug!("swap out -> slot {}", slot.index());
        Ok(slot)
    }

    /// Read a slot back into `buf` and free it
    pub fn swap_in(&self, slot: SwapSlot, buf: &mut [u8]) -> VmResult<()> {
        self.device.read_slot(slot, buf)?;
        self.free(slot);
        self.swap_ins.fetch_add(1, Ordering::Relaxed);
        debug!("swap in <- slot {}", slot.index());
        Ok(())
    }

    /// Copy a slot's contents into a newly allocated slot
    pub fn duplicate(&self, slot: SwapSlot) -> VmResult<SwapSlot> {
        let mut buf = vec![0u8; PAGE_SIZE];
        self.device.read_slot(slot, &mut buf)?;
        let copy = self.allocate()?;
        if let Err(e) = self.device.write_slot(copy, &buf) {
            self.free(copy);
            return Err(e);
        }
        Ok(copy)
    }

    /// Return a slot to the free pool
    pub fn free(&self, slot: SwapSlot) {
        if let Some(taken) = self.used.lock().get_mut(slot.index()) {
            *taken = false;
        }
    }

    pub fn used_slots(&self) -> usize {
        self.used.lock().iter().filter(|taken| **taken).count()
    }

    pub fn total_slots(&self) -> usize {
        self.used.lock().len()
    }

    pub fn swap_outs(&self) -> u64 {
        self.swap_outs.load(Ordering::Relaxed)
    }

    pub fn swap_ins(&self) -> u64 {
        self.swap_ins.load(Ordering::Relaxed)
    }
}
