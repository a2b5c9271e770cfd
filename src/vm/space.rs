/*!
 * Address Space
 * One process's supplemental page table, page table and user-memory access
 */

use super::fault::FaultInfo;
use super::frame::FrameOwner;
use super::page::{Page, PageKind, PageType, PendingLoad};
use super::pagetable::PageTable;
use super::spt::SupplementalPageTable;
use super::swap::SwapTable;
use super::types::{FrameId, VmError, VmResult};
use super::Vm;
use crate::core::limits::{PAGE_SIZE, USER_STACK};
use crate::core::types::{is_user_vaddr, page_offset, vpn_of, vpn_to_addr, Address, Pid, Vpn};
use crate::vfs::SharedFile;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

pub type SharedSpace = Arc<Mutex<AddressSpace>>;
pub type WeakSpace = Weak<Mutex<AddressSpace>>;

/// Virtual address space of one process.
///
/// Always lives behind a [`SharedSpace`]; frames refer back to it weakly so
/// eviction can reach the owning page. Dropping it releases every frame and
/// swap slot it holds.
pub struct AddressSpace {
    pid: Pid,
    vm: Arc<Vm>,
    this: WeakSpace,
    spt: SupplementalPageTable,
    page_table: PageTable,
    /// File mappings: first address -> page count
    mappings: BTreeMap<Address, usize>,
    /// Lowest address covered by the stack region
    stack_bottom: Address,
    /// User stack pointer saved on entry to a process call
    user_rsp: Address,
}

impl AddressSpace {
    pub(crate) fn create(vm: &Arc<Vm>, pid: Pid) -> SharedSpace {
        Arc::new_cyclic(|this| {
            Mutex::new(Self {
                pid,
                vm: Arc::clone(vm),
                this: this.clone(),
                spt: SupplementalPageTable::new(),
                page_table: PageTable::new(),
                mappings: BTreeMap::new(),
                stack_bottom: USER_STACK,
                user_rsp: USER_STACK,
            })
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn vm(&self) -> &Arc<Vm> {
        &self.vm
    }

    pub fn spt(&self) -> &SupplementalPageTable {
        &self.spt
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn stack_bottom(&self) -> Address {
        self.stack_bottom
    }

    /// Stack pointer that kernel-mode faults judge stack growth against
    pub fn user_rsp(&self) -> Address {
        self.user_rsp
    }

    /// Record the user `rsp` when a process call enters the kernel
    pub fn save_user_rsp(&mut self, rsp: Address) {
        self.user_rsp = rsp;
    }

    pub(crate) fn lower_stack_bottom(&mut self, addr: Address) {
        self.stack_bottom = self.stack_bottom.min(addr);
    }

    pub(crate) fn weak(&self) -> &WeakSpace {
        &self.this
    }

    pub(crate) fn page_table_mut(&mut self) -> &mut PageTable {
        &mut self.page_table
    }

    fn owner(&self, vpn: Vpn) -> FrameOwner {
        FrameOwner {
            pid: self.pid,
            vpn,
            space: self.this.clone(),
        }
    }

    /// Register a page. Page 0 and kernel addresses are never mappable.
    pub fn insert_page(&mut self, page: Page) -> VmResult<()> {
        let addr = page.addr();
        if page.vpn == 0 || !is_user_vaddr(addr) {
            return Err(VmError::InvalidAddress(addr));
        }
        self.spt.insert(page)
    }

    /// Register a loader-pending page at `addr` that becomes anonymous memory
    pub fn register_pending(
        &mut self,
        addr: Address,
        writable: bool,
        file: SharedFile,
        offset: u64,
        read_bytes: usize,
    ) -> VmResult<()> {
        self.insert_page(Page::pending(
            vpn_of(addr),
            writable,
            PendingLoad {
                file,
                offset,
                read_bytes,
                zero_bytes: PAGE_SIZE - read_bytes,
                target: PageType::Anonymous,
            },
        ))
    }

    /// Allocate the initial stack page just below [`USER_STACK`] and make it resident
    pub fn setup_stack(&mut self) -> VmResult<()> {
        let vpn = vpn_of(USER_STACK - PAGE_SIZE);
        self.insert_page(Page::stack(vpn))?;
        self.claim_page(vpn)?;
        self.stack_bottom = vpn_to_addr(vpn);
        Ok(())
    }

    /// Make the page containing `addr` resident now
    pub fn claim(&mut self, addr: Address) -> VmResult<()> {
        let vpn = vpn_of(addr);
        if !self.spt.contains(vpn) {
            return Err(VmError::NotMapped(addr));
        }
        self.claim_page(vpn).map(|_| ())
    }

    /// Give a known page a frame, its contents and a translation.
    /// On failure the frame is released and no translation is left behind.
    pub(crate) fn claim_page(&mut self, vpn: Vpn) -> VmResult<FrameId> {
        match self.spt.find(vpn) {
            None => return Err(VmError::NotMapped(vpn_to_addr(vpn))),
            Some(page) => {
                if let Some(frame) = page.frame {
                    return Ok(frame);
                }
            }
        }
        if self.page_table.get(vpn).is_some() {
            return Err(VmError::Inconsistent(format!(
                "non-resident page 0x{:x} has a translation",
                vpn_to_addr(vpn)
            )));
        }

        let vm = Arc::clone(&self.vm);
        let frame = vm.frames().acquire(self)?;

        // The frame stays pinned until install, so the translation is never
        // visible to eviction before the page owns the frame
        let writable = match self.spt.find(vpn) {
            Some(page) => page.writable,
            None => {
                vm.frames().release(frame);
                return Err(VmError::NotMapped(vpn_to_addr(vpn)));
            }
        };
        if let Err(e) = self.page_table.map(vpn, frame, writable) {
            vm.frames().release(frame);
            return Err(e);
        }

        let mut buf = vec![0u8; PAGE_SIZE];
        let populated = match self.spt.find_mut(vpn) {
            Some(page) => page.populate(vm.swap(), &mut buf).map(|()| {
                page.frame = Some(frame);
                page.kind_name()
            }),
            None => Err(VmError::NotMapped(vpn_to_addr(vpn))),
        };
        let kind = match populated {
            Ok(kind) => kind,
            Err(e) => {
                self.page_table.unmap(vpn);
                vm.frames().release(frame);
                return Err(e);
            }
        };

        vm.frames().install(frame, self.owner(vpn), &buf);
        debug!(
            "pid {}: {} page 0x{:x} -> {}",
            self.pid,
            kind,
            vpn_to_addr(vpn),
            frame
        );
        Ok(frame)
    }

    /// Save and unmap a resident page whose frame is being taken.
    /// Returns whether a dirty file page was written back.
    pub(crate) fn evict_resident(
        &mut self,
        vpn: Vpn,
        frame: FrameId,
        data: &[u8],
        swap: &SwapTable,
    ) -> VmResult<bool> {
        let dirty = self.page_table.is_dirty(vpn);
        let page = self
            .spt
            .find_mut(vpn)
            .filter(|page| page.frame == Some(frame))
            .ok_or_else(|| {
                VmError::Inconsistent(format!(
                    "{} does not back page 0x{:x}",
                    frame,
                    vpn_to_addr(vpn)
                ))
            })?;
        let wrote_back = page.evict(data, dirty, swap)?;
        page.frame = None;
        self.page_table.unmap(vpn);
        Ok(wrote_back)
    }

    /// Remove the page at `addr`, releasing its frame and swap slot
    pub fn remove(&mut self, addr: Address) -> VmResult<()> {
        let page = self
            .spt
            .take(vpn_of(addr))
            .ok_or(VmError::NotMapped(addr))?;
        self.release_page(page);
        Ok(())
    }

    fn release_page(&mut self, page: Page) {
        if let Some(frame) = page.frame {
            let pte = self.page_table.unmap(page.vpn);
            if let PageKind::FileBacked(file) = &page.kind {
                if pte.map_or(false, |pte| pte.dirty) {
                    let mut buf = vec![0u8; PAGE_SIZE];
                    self.vm.frames().read(frame, 0, &mut buf);
                    if let Err(e) = file.write_back(&buf) {
                        warn!(
                            "pid {}: write-back of 0x{:x} failed: {}",
                            self.pid,
                            page.addr(),
                            e
                        );
                    }
                }
            }
            self.vm.frames().release(frame);
        }
        if let Some(slot) = page.swap_slot() {
            self.vm.swap().free(slot);
        }
    }

    /// Release every page. The space stays usable and empty.
    pub fn destroy(&mut self) {
        for page in self.spt.drain() {
            self.release_page(page);
        }
        self.page_table.clear();
        self.mappings.clear();
        self.stack_bottom = USER_STACK;
        self.user_rsp = USER_STACK;
    }

    /// Map `length` bytes of `file` from `offset` at `addr`, loaded on first touch
    pub fn map_file(
        &mut self,
        addr: Address,
        length: usize,
        file: SharedFile,
        offset: u64,
        writable: bool,
    ) -> VmResult<Address> {
        if addr == 0 || page_offset(addr) != 0 {
            return Err(VmError::InvalidMapping(format!(
                "address 0x{:x} is not a mappable page",
                addr
            )));
        }
        if length == 0 {
            return Err(VmError::InvalidMapping("zero-length mapping".into()));
        }
        if offset % PAGE_SIZE as u64 != 0 {
            return Err(VmError::InvalidMapping(format!(
                "offset {} is not page aligned",
                offset
            )));
        }
        let file_len = file.lock().length();
        if file_len == 0 {
            return Err(VmError::InvalidMapping("empty file".into()));
        }

        let pages = length.div_ceil(PAGE_SIZE);
        let end = pages
            .checked_mul(PAGE_SIZE)
            .and_then(|span| addr.checked_add(span))
            .filter(|end| is_user_vaddr(end - 1))
            .ok_or(VmError::InvalidAddress(addr))?;
        let first = vpn_of(addr);
        if let Some(vpn) = (first..vpn_of(end)).find(|vpn| self.spt.contains(*vpn)) {
            return Err(VmError::AlreadyMapped(vpn_to_addr(vpn)));
        }

        let mut remaining = (file_len.saturating_sub(offset) as usize).min(length);
        for i in 0..pages {
            let read_bytes = remaining.min(PAGE_SIZE);
            remaining -= read_bytes;
            self.spt.insert(Page::pending(
                first + i,
                writable,
                PendingLoad {
                    file: file.clone(),
                    offset: offset + (i * PAGE_SIZE) as u64,
                    read_bytes,
                    zero_bytes: PAGE_SIZE - read_bytes,
                    target: PageType::FileBacked,
                },
            ))?;
        }
        self.mappings.insert(addr, pages);
        debug!(
            "pid {}: mapped {} pages at 0x{:x} (offset {})",
            self.pid, pages, addr, offset
        );
        Ok(addr)
    }

    /// Tear down the mapping starting at `addr`, writing back dirty pages
    pub fn unmap_file(&mut self, addr: Address) -> VmResult<()> {
        let pages = self
            .mappings
            .remove(&addr)
            .ok_or(VmError::NotMapped(addr))?;
        let first = vpn_of(addr);
        for vpn in first..first + pages {
            if let Some(page) = self.spt.take(vpn) {
                self.release_page(page);
            }
        }
        Ok(())
    }

    pub fn mappings(&self) -> impl Iterator<Item = (Address, usize)> + '_ {
        self.mappings.iter().map(|(addr, pages)| (*addr, *pages))
    }

    /// Clone `parent` page for page into this (empty) space.
    ///
    /// Resident pages are copied into fresh frames. On failure everything
    /// copied so far is released.
    pub fn copy_from(&mut self, parent: &AddressSpace) -> VmResult<()> {
        if let Err(e) = self.copy_pages(parent) {
            self.destroy();
            return Err(e);
        }
        self.mappings = parent.mappings.clone();
        self.stack_bottom = parent.stack_bottom;
        self.user_rsp = parent.user_rsp;
        Ok(())
    }

    fn copy_pages(&mut self, parent: &AddressSpace) -> VmResult<()> {
        let vm = Arc::clone(&self.vm);
        for vpn in parent.spt.vpns() {
            let Some(source) = parent.spt.find(vpn) else {
                continue;
            };
            self.spt.insert(source.duplicate(vm.swap())?)?;

            if let Some(src) = source.frame {
                let frame = vm.frames().acquire_holding(self, parent)?;
                vm.frames().install_copy(frame, self.owner(vpn), src);
                if let Some(page) = self.spt.find_mut(vpn) {
                    page.frame = Some(frame);
                }
                self.page_table.map(vpn, frame, source.writable)?;
                if parent.page_table.is_dirty(vpn) {
                    self.page_table.set_dirty(vpn, true);
                }
            }
        }
        Ok(())
    }

    /// Translate `addr` for an access, faulting the page in if needed.
    /// `rsp` is `None` for kernel-mode accesses.
    fn resolve(&mut self, addr: Address, write: bool, rsp: Option<Address>) -> VmResult<FrameId> {
        let vpn = vpn_of(addr);
        if self.page_table.get(vpn).is_none() {
            let fault = match rsp {
                Some(rsp) => FaultInfo::not_present(addr, write, rsp),
                None => FaultInfo::kernel(addr, write),
            };
            self.handle_fault(&fault)?;
        }
        let pte = self
            .page_table
            .get(vpn)
            .copied()
            .ok_or(VmError::SegmentationFault(addr))?;
        if write && !pte.writable {
            return Err(VmError::ProtectionViolation(addr));
        }
        self.page_table.touch(vpn, write);
        Ok(pte.frame)
    }

    /// Copy user memory at `addr` into `buf`.
    /// `rsp` is the user stack pointer used to judge stack growth.
    pub fn read(&mut self, addr: Address, buf: &mut [u8], rsp: Address) -> VmResult<()> {
        self.read_as(addr, buf, Some(rsp))
    }

    /// Copy user memory into `buf` on behalf of a process call. Stack
    /// growth is judged against the saved [`user_rsp`](Self::user_rsp).
    pub fn copy_in(&mut self, addr: Address, buf: &mut [u8]) -> VmResult<()> {
        self.read_as(addr, buf, None)
    }

    /// Copy `data` into user memory on behalf of a process call
    pub fn copy_out(&mut self, addr: Address, data: &[u8]) -> VmResult<()> {
        self.write_as(addr, data, None)
    }

    /// Copy `data` into user memory at `addr`
    pub fn write(&mut self, addr: Address, data: &[u8], rsp: Address) -> VmResult<()> {
        self.write_as(addr, data, Some(rsp))
    }

    fn read_as(&mut self, addr: Address, buf: &mut [u8], rsp: Option<Address>) -> VmResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let cur = addr
                .checked_add(done)
                .ok_or(VmError::InvalidAddress(addr))?;
            let offset = page_offset(cur);
            let chunk = (PAGE_SIZE - offset).min(buf.len() - done);
            let frame = self.resolve(cur, false, rsp)?;
            self.vm.frames().read(frame, offset, &mut buf[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    fn write_as(&mut self, addr: Address, data: &[u8], rsp: Option<Address>) -> VmResult<()> {
        let mut done = 0;
        while done < data.len() {
            let cur = addr
                .checked_add(done)
                .ok_or(VmError::InvalidAddress(addr))?;
            let offset = page_offset(cur);
            let chunk = (PAGE_SIZE - offset).min(data.len() - done);
            let frame = self.resolve(cur, true, rsp)?;
            self.vm.frames().write(frame, offset, &data[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Check that every resident page and its frame point at each other
    pub fn verify_frames(&self) -> VmResult<()> {
        for page in self.spt.iter() {
            let Some(frame) = page.frame else {
                if self.page_table.get(page.vpn).is_some() {
                    return Err(VmError::Inconsistent(format!(
                        "non-resident page 0x{:x} is mapped",
                        page.addr()
                    )));
                }
                continue;
            };
            if self.vm.frames().owner_of(frame) != Some((self.pid, page.vpn)) {
                return Err(VmError::Inconsistent(format!(
                    "{} is not owned by pid {} page 0x{:x}",
                    frame,
                    self.pid,
                    page.addr()
                )));
            }
            if self.page_table.get(page.vpn).map(|pte| pte.frame) != Some(frame) {
                return Err(VmError::Inconsistent(format!(
                    "page 0x{:x} translation disagrees with {}",
                    page.addr(),
                    frame
                )));
            }
        }
        Ok(())
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("pid", &self.pid)
            .field("pages", &self.spt.len())
            .field("resident", &self.page_table.len())
            .field("stack_bottom", &format_args!("0x{:x}", self.stack_bottom))
            .finish()
    }
}
