/*!
 * Frame Table
 * Process-agnostic pool of physical frames with FIFO/clock eviction
 */

use super::space::{AddressSpace, SharedSpace, WeakSpace};
use super::swap::SwapTable;
use super::types::{EvictionPolicy, FrameId, FrameStats, VmError, VmResult};
use crate::core::limits::{FRAME_WAIT, PAGE_SIZE};
use crate::core::types::{Pid, Vpn};
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

/// Back-reference from a frame to the page it holds
#[derive(Clone)]
pub struct FrameOwner {
    pub pid: Pid,
    pub vpn: Vpn,
    pub space: WeakSpace,
}

impl std::fmt::Debug for FrameOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameOwner")
            .field("pid", &self.pid)
            .field("vpn", &self.vpn)
            .finish()
    }
}

struct FrameSlot {
    data: Box<[u8]>,
    owner: Option<FrameOwner>,
    pinned: bool,
}

impl FrameSlot {
    fn is_free(&self) -> bool {
        self.owner.is_none() && !self.pinned
    }
}

struct FramePool {
    slots: Vec<FrameSlot>,
    free: Vec<FrameId>,
    /// Installed frames in installation order; the eviction candidates
    queue: VecDeque<FrameId>,
    evictions: u64,
    write_backs: u64,
}

enum Victim {
    Evicted,
    SecondChance,
    /// Owner locked by another context
    Busy,
    /// Owner locked by the requesting context itself
    Held,
}

enum Search {
    Found(FrameId),
    /// Nothing evictable right now, but something will be
    Contended,
    /// Nothing evictable for this request, ever
    Exhausted,
}

/// Physical frame pool shared by every address space.
///
/// A single mutex serialises all frame operations. Eviction never blocks on
/// another address space: owners that are locked elsewhere are skipped and
/// the request waits for the next install or release.
pub struct FrameTable {
    pool: Mutex<FramePool>,
    /// Signalled when a frame is installed or released
    available: Condvar,
    policy: EvictionPolicy,
    swap: Arc<SwapTable>,
}

impl FrameTable {
    pub fn new(frame_count: usize, policy: EvictionPolicy, swap: Arc<SwapTable>) -> Self {
        let slots = (0..frame_count)
            .map(|_| FrameSlot {
                data: vec![0u8; PAGE_SIZE].into_boxed_slice(),
                owner: None,
                pinned: false,
            })
            .collect();
        Self {
            pool: Mutex::new(FramePool {
                slots,
                free: (0..frame_count).rev().map(FrameId::new).collect(),
                queue: VecDeque::with_capacity(frame_count),
                evictions: 0,
                write_backs: 0,
            }),
            available: Condvar::new(),
            policy,
            swap,
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Obtain a pinned, unowned frame, evicting a resident page if the pool is empty.
    ///
    /// `requester` is the address space the frame is for; its own pages are
    /// evicted through the borrow since its lock is already held. While every
    /// candidate is pinned by an in-flight fault or owned by a space locked
    /// elsewhere, this blocks until one becomes evictable.
    pub fn acquire(&self, requester: &mut AddressSpace) -> VmResult<FrameId> {
        self.acquire_inner(requester, None)
    }

    /// Like [`acquire`](Self::acquire) while the caller also holds `held`
    /// locked. Frames of `held` can never be evicted for this request; if
    /// nothing else can be, the pool is exhausted for this caller.
    pub fn acquire_holding(
        &self,
        requester: &mut AddressSpace,
        held: &AddressSpace,
    ) -> VmResult<FrameId> {
        self.acquire_inner(requester, Some(held.weak()))
    }

    fn acquire_inner(
        &self,
        requester: &mut AddressSpace,
        held_space: Option<&WeakSpace>,
    ) -> VmResult<FrameId> {
        let mut waits = 0u64;
        loop {
            // Upgraded owners are dropped only after the pool lock is released
            let mut upgraded: Vec<SharedSpace> = Vec::new();
            let outcome = {
                let mut pool = self.pool.lock();
                match pool.free.pop() {
                    Some(id) => {
                        pool.slots[id.index()].pinned = true;
                        Ok(Search::Found(id))
                    }
                    None => self.evict_one(&mut pool, requester, held_space, &mut upgraded),
                }
            };
            drop(upgraded);

            match outcome? {
                Search::Found(id) => {
                    if waits > 0 {
                        debug!("pid {}: frame acquired after {} waits", requester.pid(), waits);
                    }
                    return Ok(id);
                }
                Search::Exhausted => {
                    warn!("pid {}: no frame can be freed", requester.pid());
                    return Err(VmError::OutOfFrames);
                }
                Search::Contended => {
                    waits += 1;
                    // Lock releases of other spaces are not signalled, so the wait is bounded
                    let mut pool = self.pool.lock();
                    if pool.free.is_empty() {
                        self.available.wait_for(&mut pool, FRAME_WAIT);
                    }
                }
            }
        }
    }

    fn evict_one(
        &self,
        pool: &mut FramePool,
        requester: &mut AddressSpace,
        held_space: Option<&WeakSpace>,
        upgraded: &mut Vec<SharedSpace>,
    ) -> VmResult<Search> {
        let sweeps = match self.policy {
            EvictionPolicy::Fifo => 1,
            EvictionPolicy::Clock => 2,
        };
        let candidates = pool.queue.len() * sweeps;
        // Frames pinned by another context's fault come back soon
        let mut contended = pool.slots.iter().any(|slot| slot.pinned);

        for _ in 0..candidates {
            let Some(id) = pool.queue.pop_front() else {
                break;
            };
            let owner = {
                let slot = &pool.slots[id.index()];
                match (&slot.owner, slot.pinned) {
                    (Some(owner), false) => owner.clone(),
                    _ => continue,
                }
            };

            let victim = if Weak::ptr_eq(&owner.space, requester.weak()) {
                self.try_evict(pool, id, &owner, requester)
            } else if held_space.map_or(false, |held| Weak::ptr_eq(&owner.space, held)) {
                Ok(Victim::Held)
            } else {
                match owner.space.upgrade() {
                    Some(space) => {
                        let victim = match space.try_lock() {
                            Some(mut guard) => self.try_evict(pool, id, &owner, &mut guard),
                            None => Ok(Victim::Busy),
                        };
                        upgraded.push(space);
                        victim
                    }
                    // Owner is mid-teardown and will release the frame itself
                    None => Ok(Victim::Busy),
                }
            };

            match victim {
                Ok(Victim::Evicted) => {
                    let slot = &mut pool.slots[id.index()];
                    slot.owner = None;
                    slot.pinned = true;
                    pool.evictions += 1;
                    debug!(
                        "evicted pid {} vpn {:#x} from {}",
                        owner.pid, owner.vpn, id
                    );
                    return Ok(Search::Found(id));
                }
                Ok(Victim::SecondChance) | Ok(Victim::Busy) => {
                    contended = true;
                    pool.queue.push_back(id);
                }
                Ok(Victim::Held) => pool.queue.push_back(id),
                Err(e) => {
                    pool.queue.push_back(id);
                    return Err(e);
                }
            }
        }
        Ok(if contended {
            Search::Contended
        } else {
            Search::Exhausted
        })
    }

    fn try_evict(
        &self,
        pool: &mut FramePool,
        id: FrameId,
        owner: &FrameOwner,
        space: &mut AddressSpace,
    ) -> VmResult<Victim> {
        if self.policy == EvictionPolicy::Clock && space.page_table_mut().take_accessed(owner.vpn)
        {
            return Ok(Victim::SecondChance);
        }
        let wrote_back =
            space.evict_resident(owner.vpn, id, &pool.slots[id.index()].data, &self.swap)?;
        if wrote_back {
            pool.write_backs += 1;
        }
        Ok(Victim::Evicted)
    }

    /// Fill a pinned frame, give it an owner and make it evictable
    pub fn install(&self, id: FrameId, owner: FrameOwner, contents: &[u8]) {
        let mut pool = self.pool.lock();
        let slot = &mut pool.slots[id.index()];
        slot.data.copy_from_slice(contents);
        slot.owner = Some(owner);
        slot.pinned = false;
        pool.queue.push_back(id);
        self.available.notify_all();
    }

    /// Like [`install`](Self::install), copying the contents of frame `src`
    pub fn install_copy(&self, id: FrameId, owner: FrameOwner, src: FrameId) {
        let mut pool = self.pool.lock();
        let contents = pool.slots[src.index()].data.clone();
        let slot = &mut pool.slots[id.index()];
        slot.data.copy_from_slice(&contents);
        slot.owner = Some(owner);
        slot.pinned = false;
        pool.queue.push_back(id);
        self.available.notify_all();
    }

    /// Return a frame to the free pool. Releasing a free frame is a no-op.
    pub fn release(&self, id: FrameId) {
        let mut pool = self.pool.lock();
        let Some(slot) = pool.slots.get_mut(id.index()) else {
            return;
        };
        if slot.is_free() {
            return;
        }
        slot.owner = None;
        slot.pinned = false;
        pool.queue.retain(|queued| *queued != id);
        pool.free.push(id);
        self.available.notify_all();
    }

    /// Copy bytes out of a frame
    pub fn read(&self, id: FrameId, offset: usize, buf: &mut [u8]) {
        let pool = self.pool.lock();
        buf.copy_from_slice(&pool.slots[id.index()].data[offset..offset + buf.len()]);
    }

    /// Copy bytes into a frame
    pub fn write(&self, id: FrameId, offset: usize, data: &[u8]) {
        let mut pool = self.pool.lock();
        pool.slots[id.index()].data[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Snapshot of every owned frame
    pub fn owners(&self) -> Vec<(FrameId, FrameOwner)> {
        let pool = self.pool.lock();
        pool.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.owner.clone().map(|owner| (FrameId::new(i), owner)))
            .collect()
    }

    pub fn owner_of(&self, id: FrameId) -> Option<(Pid, Vpn)> {
        let pool = self.pool.lock();
        pool.slots
            .get(id.index())
            .and_then(|slot| slot.owner.as_ref().map(|o| (o.pid, o.vpn)))
    }

    pub fn stats(&self) -> FrameStats {
        let pool = self.pool.lock();
        FrameStats {
            total_frames: pool.slots.len(),
            free_frames: pool.free.len(),
            resident_frames: pool.slots.iter().filter(|s| s.owner.is_some()).count(),
            pinned_frames: pool.slots.iter().filter(|s| s.pinned).count(),
            evictions: pool.evictions,
            write_backs: pool.write_backs,
            swap_outs: self.swap.swap_outs(),
            swap_ins: self.swap.swap_ins(),
            swap_slots_used: self.swap.used_slots(),
            swap_slots_total: self.swap.total_slots(),
        }
    }
}
