/*!
 * Pages
 * Per-vpn page descriptors and their backing-store behaviour
 */

use super::swap::SwapTable;
use super::types::{FrameId, SwapSlot, VmError, VmResult};
use crate::core::limits::PAGE_SIZE;
use crate::core::types::{vpn_to_addr, Address, Vpn};
use crate::vfs::{share, SharedFile};
use std::fmt;

/// Concrete kind a pending page turns into on first touch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Anonymous,
    FileBacked,
}

/// Contents still to be read from a file
#[derive(Clone)]
pub struct PendingLoad {
    pub file: SharedFile,
    pub offset: u64,
    pub read_bytes: usize,
    pub zero_bytes: usize,
    pub target: PageType,
}

impl fmt::Debug for PendingLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingLoad")
            .field("offset", &self.offset)
            .field("read_bytes", &self.read_bytes)
            .field("zero_bytes", &self.zero_bytes)
            .field("target", &self.target)
            .finish()
    }
}

/// Anonymous memory state
#[derive(Debug, Clone, Default)]
pub struct AnonPage {
    /// Slot holding the contents while evicted
    pub swap_slot: Option<SwapSlot>,
    /// Contents are still the initial zero fill
    pub pristine: bool,
}

/// File mapping state
#[derive(Clone)]
pub struct FilePage {
    pub file: SharedFile,
    pub offset: u64,
    pub read_bytes: usize,
}

impl fmt::Debug for FilePage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilePage")
            .field("offset", &self.offset)
            .field("read_bytes", &self.read_bytes)
            .finish()
    }
}

impl FilePage {
    /// Write the file-backed prefix of a resident page back to the file
    pub fn write_back(&self, data: &[u8]) -> VmResult<()> {
        self.file
            .lock()
            .write_all_at(self.offset, &data[..self.read_bytes])?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum PageKind {
    Uninit(PendingLoad),
    Anonymous(AnonPage),
    FileBacked(FilePage),
}

/// One virtual page known to a supplemental page table
#[derive(Debug)]
pub struct Page {
    pub vpn: Vpn,
    pub writable: bool,
    pub frame: Option<FrameId>,
    pub stack: bool,
    pub kind: PageKind,
}

impl Page {
    /// Page whose contents come from a file on first touch
    pub fn pending(vpn: Vpn, writable: bool, load: PendingLoad) -> Self {
        Self {
            vpn,
            writable,
            frame: None,
            stack: false,
            kind: PageKind::Uninit(load),
        }
    }

    /// Zero-filled anonymous page
    pub fn anonymous(vpn: Vpn, writable: bool) -> Self {
        Self {
            vpn,
            writable,
            frame: None,
            stack: false,
            kind: PageKind::Anonymous(AnonPage {
                swap_slot: None,
                pristine: true,
            }),
        }
    }

    /// Zero-filled writable stack page
    pub fn stack(vpn: Vpn) -> Self {
        Self {
            stack: true,
            ..Self::anonymous(vpn, true)
        }
    }

    #[inline]
    pub fn addr(&self) -> Address {
        vpn_to_addr(self.vpn)
    }

    #[inline]
    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            PageKind::Uninit(_) => "uninit",
            PageKind::Anonymous(_) => "anonymous",
            PageKind::FileBacked(_) => "file",
        }
    }

    /// Produce the page's contents into `buf`.
    ///
    /// A pending page becomes its target kind only once the read succeeded;
    /// a swapped page gives up its slot.
    pub(crate) fn populate(&mut self, swap: &SwapTable, buf: &mut [u8]) -> VmResult<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        match &mut self.kind {
            PageKind::Uninit(load) => {
                buf.fill(0);
                if load.read_bytes > 0 {
                    load.file
                        .lock()
                        .read_exact_at(load.offset, &mut buf[..load.read_bytes])?;
                }
                let next = match load.target {
                    PageType::Anonymous => PageKind::Anonymous(AnonPage {
                        swap_slot: None,
                        pristine: false,
                    }),
                    PageType::FileBacked => PageKind::FileBacked(FilePage {
                        file: load.file.clone(),
                        offset: load.offset,
                        read_bytes: load.read_bytes,
                    }),
                };
                self.kind = next;
            }
            PageKind::Anonymous(anon) => match anon.swap_slot {
                Some(slot) => {
                    swap.swap_in(slot, buf)?;
                    anon.swap_slot = None;
                }
                None => buf.fill(0),
            },
            PageKind::FileBacked(file) => {
                buf.fill(0);
                if file.read_bytes > 0 {
                    file.file
                        .lock()
                        .read_exact_at(file.offset, &mut buf[..file.read_bytes])?;
                }
            }
        }
        Ok(())
    }

    /// Save a resident page's contents before its frame is taken away
    pub(crate) fn evict(&mut self, data: &[u8], dirty: bool, swap: &SwapTable) -> VmResult<bool> {
        let addr = self.addr();
        match &mut self.kind {
            PageKind::Anonymous(anon) => {
                if dirty || !anon.pristine {
                    anon.swap_slot = Some(swap.swap_out(data)?);
                    anon.pristine = false;
                }
                Ok(false)
            }
            PageKind::FileBacked(file) => {
                if dirty {
                    file.write_back(data)?;
                }
                Ok(dirty)
            }
            PageKind::Uninit(_) => Err(VmError::Inconsistent(format!(
                "resident page 0x{:x} is still pending",
                addr
            ))),
        }
    }

    /// Non-resident copy for a forked address space.
    ///
    /// Pending pages share the source file; mapped files get their own
    /// handle; swapped contents get their own slot.
    pub(crate) fn duplicate(&self, swap: &SwapTable) -> VmResult<Page> {
        let kind = match &self.kind {
            PageKind::Uninit(load) => PageKind::Uninit(load.clone()),
            PageKind::Anonymous(anon) => PageKind::Anonymous(AnonPage {
                swap_slot: anon.swap_slot.map(|slot| swap.duplicate(slot)).transpose()?,
                pristine: anon.pristine,
            }),
            PageKind::FileBacked(file) => {
                let handle = file.file.lock().duplicate()?;
                PageKind::FileBacked(FilePage {
                    file: share(handle),
                    offset: file.offset,
                    read_bytes: file.read_bytes,
                })
            }
        };
        Ok(Page {
            vpn: self.vpn,
            writable: self.writable,
            frame: None,
            stack: self.stack,
            kind,
        })
    }

    /// Swap slot held by an evicted anonymous page
    pub(crate) fn swap_slot(&self) -> Option<SwapSlot> {
        match &self.kind {
            PageKind::Anonymous(anon) => anon.swap_slot,
            _ => None,
        }
    }
}
