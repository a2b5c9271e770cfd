/*!
 * VM Types
 * Errors, identifiers, configuration and statistics for virtual memory
 */

use crate::core::errors::KernelError;
use crate::core::limits::{
    DEFAULT_FRAME_COUNT, DEFAULT_STACK_LIMIT, DEFAULT_SWAP_SLOTS, PAGE_SIZE,
};
use crate::core::types::{Address, KernelResult, LoadStrategy};
use crate::vfs::VfsError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// VM operation result
pub type VmResult<T> = Result<T, VmError>;

/// Virtual memory errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("Out of frames: every resident frame is pinned or busy")]
    OutOfFrames,

    #[error("Swap exhausted: all {slots} slots in use")]
    SwapExhausted { slots: usize },

    #[error("Swap device error: {0}")]
    SwapIo(String),

    #[error("Page already mapped at 0x{0:x}")]
    AlreadyMapped(Address),

    #[error("No page mapped at 0x{0:x}")]
    NotMapped(Address),

    #[error("Invalid user address: 0x{0:x}")]
    InvalidAddress(Address),

    #[error("Segmentation fault at 0x{0:x}")]
    SegmentationFault(Address),

    #[error("Protection violation: write to read-only page at 0x{0:x}")]
    ProtectionViolation(Address),

    #[error("Invalid mapping: {0}")]
    InvalidMapping(String),

    #[error("Backing file error: {0}")]
    Backing(#[from] VfsError),

    #[error("Frame table inconsistency: {0}")]
    Inconsistent(String),
}

/// Index of a physical frame in the frame pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameId(usize);

impl FrameId {
    #[inline]
    pub(crate) const fn new(index: usize) -> Self {
        Self(index)
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

/// Index of a page-sized slot on the swap device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SwapSlot(usize);

impl SwapSlot {
    #[inline]
    pub(crate) const fn new(index: usize) -> Self {
        Self(index)
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Victim selection policy for frame eviction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Oldest installed frame first
    Fifo,
    /// Second chance: frames whose page was accessed since the last sweep are skipped once
    Clock,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        EvictionPolicy::Fifo
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(EvictionPolicy::Fifo),
            "clock" => Ok(EvictionPolicy::Clock),
            other => Err(format!("unknown eviction policy '{}'", other)),
        }
    }
}

/// Runtime configuration for the memory subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmConfig {
    pub frame_count: usize,
    pub swap_slots: usize,
    pub stack_limit: usize,
    pub eviction: EvictionPolicy,
    pub load_strategy: LoadStrategy,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            frame_count: DEFAULT_FRAME_COUNT,
            swap_slots: DEFAULT_SWAP_SLOTS,
            stack_limit: DEFAULT_STACK_LIMIT,
            eviction: EvictionPolicy::default(),
            load_strategy: LoadStrategy::default(),
        }
    }
}

impl VmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `KERNEL_FRAMES`, `KERNEL_SWAP_SLOTS`,
    /// `KERNEL_STACK_LIMIT`, `KERNEL_EVICTION` and `KERNEL_LOAD`.
    /// A variable that is set but unparseable is a configuration error.
    pub fn from_env() -> KernelResult<Self> {
        let mut config = Self::default();
        if let Some(frames) = env_parse::<usize>("KERNEL_FRAMES", "a frame count")? {
            if frames == 0 {
                return Err(KernelError::Configuration(
                    "KERNEL_FRAMES=0: the frame pool needs at least one frame".into(),
                ));
            }
            config.frame_count = frames;
        }
        if let Some(slots) = env_parse::<usize>("KERNEL_SWAP_SLOTS", "a slot count")? {
            config.swap_slots = slots;
        }
        if let Some(limit) = env_parse::<usize>("KERNEL_STACK_LIMIT", "a size in bytes")? {
            config = config.with_stack_limit(limit);
        }
        if let Some(policy) = env_parse::<EvictionPolicy>("KERNEL_EVICTION", "fifo or clock")? {
            config.eviction = policy;
        }
        if let Some(strategy) = env_parse::<LoadStrategy>("KERNEL_LOAD", "lazy or eager")? {
            config.load_strategy = strategy;
        }
        Ok(config)
    }

    pub fn with_frames(mut self, frame_count: usize) -> Self {
        self.frame_count = frame_count;
        self
    }

    pub fn with_swap_slots(mut self, swap_slots: usize) -> Self {
        self.swap_slots = swap_slots;
        self
    }

    /// Stack limit, rounded up to whole pages (at least one)
    pub fn with_stack_limit(mut self, stack_limit: usize) -> Self {
        let pages = stack_limit.div_ceil(PAGE_SIZE).max(1);
        self.stack_limit = pages * PAGE_SIZE;
        self
    }

    pub fn with_eviction(mut self, eviction: EvictionPolicy) -> Self {
        self.eviction = eviction;
        self
    }

    pub fn with_load_strategy(mut self, load_strategy: LoadStrategy) -> Self {
        self.load_strategy = load_strategy;
        self
    }
}

/// Frame pool and swap statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameStats {
    pub total_frames: usize,
    pub free_frames: usize,
    pub resident_frames: usize,
    pub pinned_frames: usize,
    pub evictions: u64,
    pub write_backs: u64,
    pub swap_outs: u64,
    pub swap_ins: u64,
    pub swap_slots_used: usize,
    pub swap_slots_total: usize,
}

impl FrameStats {
    /// Fraction of frames in use
    pub fn utilization(&self) -> f64 {
        if self.total_frames == 0 {
            return 0.0;
        }
        (self.total_frames - self.free_frames) as f64 / self.total_frames as f64
    }
}

/// Parse environment variable `key` if it is set
pub(crate) fn env_parse<T: FromStr>(key: &str, expected: &str) -> KernelResult<Option<T>> {
    let Ok(raw) = std::env::var(key) else {
        return Ok(None);
    };
    raw.trim().parse::<T>().map(Some).map_err(|_| {
        KernelError::Configuration(format!("{}={:?}: expected {}", key, raw, expected))
    })
}
