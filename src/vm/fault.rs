/*!
 * Page Fault Resolver
 * Turns a fault on a user address into a resident mapping or a fatal error
 */

use super::page::Page;
use super::space::AddressSpace;
use super::types::{VmError, VmResult};
use crate::core::limits::{PAGE_SIZE, STACK_PUSH_SLACK, USER_STACK};
use crate::core::types::{is_user_vaddr, page_round_down, vpn_of, vpn_to_addr, Address};
use log::debug;
use serde::{Deserialize, Serialize};

/// What the MMU reported about a faulting access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultInfo {
    pub addr: Address,
    pub write: bool,
    /// Raised by a user-mode access rather than by the kernel touching
    /// user memory during a process call
    pub user: bool,
    pub not_present: bool,
    /// User stack pointer at the time of the fault. Only meaningful for
    /// user-mode faults; kernel-mode faults use the space's saved `rsp`.
    pub rsp: Address,
}

impl FaultInfo {
    /// Access to a page with no translation
    pub fn not_present(addr: Address, write: bool, rsp: Address) -> Self {
        Self {
            addr,
            write,
            user: true,
            not_present: true,
            rsp,
        }
    }

    /// Kernel-mode access to an untranslated user page
    pub fn kernel(addr: Address, write: bool) -> Self {
        Self {
            addr,
            write,
            user: false,
            not_present: true,
            rsp: 0,
        }
    }

    /// Write to a present, read-only translation
    pub fn protection(addr: Address, rsp: Address) -> Self {
        Self {
            addr,
            write: true,
            user: true,
            not_present: false,
            rsp,
        }
    }
}

impl AddressSpace {
    /// Resolve a fault. `Ok` means the access can be retried.
    pub fn handle_fault(&mut self, fault: &FaultInfo) -> VmResult<()> {
        let addr = fault.addr;
        if addr < PAGE_SIZE || !is_user_vaddr(addr) {
            return Err(VmError::InvalidAddress(addr));
        }
        if !fault.not_present {
            return Err(VmError::ProtectionViolation(addr));
        }

        // The frame's rsp is the kernel's when the fault came from a process call
        let rsp = if fault.user { fault.rsp } else { self.user_rsp() };
        let vpn = vpn_of(addr);
        match self.spt().find(vpn) {
            Some(page) => {
                if fault.write && !page.writable {
                    return Err(VmError::ProtectionViolation(addr));
                }
                if page.is_resident() {
                    return Ok(());
                }
            }
            None => {
                if !self.is_stack_access(addr, rsp) {
                    debug!(
                        "pid {}: segfault at 0x{:x} (rsp 0x{:x})",
                        self.pid(),
                        addr,
                        rsp
                    );
                    return Err(VmError::SegmentationFault(addr));
                }
                self.grow_stack(addr)?;
            }
        }
        self.claim_page(vpn).map(|_| ())
    }

    /// Whether an unmapped `addr` is a legitimate stack access
    fn is_stack_access(&self, addr: Address, rsp: Address) -> bool {
        let limit = self.vm().config().stack_limit;
        addr < USER_STACK
            && addr >= USER_STACK.saturating_sub(limit)
            && addr >= rsp.saturating_sub(STACK_PUSH_SLACK)
    }

    /// Register zero-filled stack pages from the faulting page up to the current stack bottom
    fn grow_stack(&mut self, addr: Address) -> VmResult<()> {
        let target = vpn_of(page_round_down(addr));
        let top = vpn_of(self.stack_bottom()).max(target + 1);
        for vpn in target..top {
            if !self.spt().contains(vpn) {
                self.insert_page(Page::stack(vpn))?;
            }
        }
        self.lower_stack_bottom(vpn_to_addr(target));
        debug!(
            "pid {}: stack grown to 0x{:x}",
            self.pid(),
            self.stack_bottom()
        );
        Ok(())
    }
}
