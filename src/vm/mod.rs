/*!
 * Virtual Memory Module
 * Demand paging: frame pool, swap, per-process page tables and fault handling
 */

pub mod fault;
pub mod frame;
pub mod page;
pub mod pagetable;
pub mod space;
pub mod spt;
pub mod swap;
pub mod types;

pub use fault::FaultInfo;
pub use frame::{FrameOwner, FrameTable};
pub use page::{AnonPage, FilePage, Page, PageKind, PageType, PendingLoad};
pub use pagetable::{PageTable, Pte};
pub use space::{AddressSpace, SharedSpace, WeakSpace};
pub use spt::SupplementalPageTable;
pub use swap::{MemSwap, SwapDevice, SwapTable};
pub use types::{
    EvictionPolicy, FrameId, FrameStats, SwapSlot, VmConfig, VmError, VmResult,
};

use crate::core::types::Pid;
use ahash::RandomState;
use log::info;
use std::collections::HashSet;
use std::sync::Arc;

/// Machine-wide memory state shared by every address space
pub struct Vm {
    config: VmConfig,
    frames: FrameTable,
    swap: Arc<SwapTable>,
}

impl Vm {
    pub fn new(config: VmConfig, device: Arc<dyn SwapDevice>) -> Arc<Self> {
        let swap = Arc::new(SwapTable::new(device));
        let frames = FrameTable::new(config.frame_count, config.eviction, Arc::clone(&swap));
        info!(
            "VM initialized: {} frames, {} swap slots, {:?} eviction, {:?} loading",
            config.frame_count,
            swap.total_slots(),
            config.eviction,
            config.load_strategy
        );
        Arc::new(Self {
            config,
            frames,
            swap,
        })
    }

    /// VM over an in-memory swap device sized from `config`
    pub fn with_config(config: VmConfig) -> Arc<Self> {
        let device = Arc::new(MemSwap::new(config.swap_slots));
        Self::new(config, device)
    }

    /// Empty address space for `pid`
    pub fn new_space(self: &Arc<Self>, pid: Pid) -> SharedSpace {
        AddressSpace::create(self, pid)
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    pub fn swap(&self) -> &SwapTable {
        &self.swap
    }

    pub fn stats(&self) -> FrameStats {
        self.frames.stats()
    }

    /// Check that every owned frame is referenced by exactly the page it names.
    ///
    /// Locks each owning address space in turn; call it with none held.
    pub fn check_consistency(&self) -> VmResult<()> {
        let mut seen: HashSet<(Pid, usize), RandomState> = HashSet::default();
        for (frame, owner) in self.frames.owners() {
            if !seen.insert((owner.pid, owner.vpn)) {
                return Err(VmError::Inconsistent(format!(
                    "pid {} page {:#x} owns more than one frame",
                    owner.pid, owner.vpn
                )));
            }
            let Some(space) = owner.space.upgrade() else {
                return Err(VmError::Inconsistent(format!(
                    "{} owned by dead address space of pid {}",
                    frame, owner.pid
                )));
            };
            let space = space.lock();
            let page_frame = space.spt().find(owner.vpn).and_then(|page| page.frame);
            let pte_frame = space.page_table().get(owner.vpn).map(|pte| pte.frame);
            if page_frame != Some(frame) || pte_frame != Some(frame) {
                return Err(VmError::Inconsistent(format!(
                    "{} claims pid {} page {:#x}, which maps {:?}",
                    frame, owner.pid, owner.vpn, page_frame
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
