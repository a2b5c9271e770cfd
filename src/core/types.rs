/*!
 * Core Types
 * Common types used across the kernel
 */

use serde::{Deserialize, Serialize};

/// Process ID type
pub type Pid = u32;

/// File descriptor type
pub type Fd = u32;

/// User virtual address
pub type Address = usize;

/// Virtual page number (address >> PAGE_SHIFT)
pub type Vpn = usize;

/// Exit status reported by `exit` and collected by `wait`
pub type ExitStatus = i32;

/// Common result type for kernel operations
pub type KernelResult<T> = Result<T, super::errors::KernelError>;

/// Round an address down to the start of its page
#[inline]
#[must_use]
pub const fn page_round_down(addr: Address) -> Address {
    addr & !super::limits::PAGE_MASK
}

/// Round an address up to the next page boundary
#[inline]
#[must_use]
pub const fn page_round_up(addr: Address) -> Address {
    (addr + super::limits::PAGE_MASK) & !super::limits::PAGE_MASK
}

/// Offset of an address within its page
#[inline]
#[must_use]
pub const fn page_offset(addr: Address) -> usize {
    addr & super::limits::PAGE_MASK
}

/// Virtual page number containing `addr`
#[inline]
#[must_use]
pub const fn vpn_of(addr: Address) -> Vpn {
    addr >> super::limits::PAGE_SHIFT
}

/// First address of virtual page `vpn`
#[inline]
#[must_use]
pub const fn vpn_to_addr(vpn: Vpn) -> Address {
    vpn << super::limits::PAGE_SHIFT
}

/// Whether `addr` lies in the user half of the address space
#[inline]
#[must_use]
pub const fn is_user_vaddr(addr: Address) -> bool {
    addr < super::limits::USER_TOP
}

/// Execution strategy for image segments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStrategy {
    /// Register pages and populate them on first touch
    Lazy,
    /// Register pages and populate them during load
    Eager,
}

impl Default for LoadStrategy {
    fn default() -> Self {
        LoadStrategy::Lazy
    }
}

impl std::str::FromStr for LoadStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lazy" => Ok(LoadStrategy::Lazy),
            "eager" => Ok(LoadStrategy::Eager),
            other => Err(format!("unknown load strategy '{}'", other)),
        }
    }
}

/// General-purpose registers saved on a transition into the kernel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

/// Saved user execution state: registers, instruction pointer and stack pointer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrFrame {
    pub regs: Registers,
    pub rip: Address,
    pub rsp: Address,
    pub rflags: u64,
}

impl IntrFrame {
    /// Fresh user frame entering at `rip` with interrupts enabled
    pub fn user(rip: Address, rsp: Address) -> Self {
        Self {
            rip,
            rsp,
            rflags: 0x202,
            ..Self::default()
        }
    }
}
