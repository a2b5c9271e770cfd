/*!
 * System Limits and Constants
 *
 * Centralized location for address-space layout, table capacities and
 * default pool sizes. Grouped by domain.
 */

use std::time::Duration;

// =============================================================================
// PAGING
// =============================================================================

/// log2 of the page size
pub const PAGE_SHIFT: usize = 12;

/// Page size (4KB)
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Mask of the in-page offset bits
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

// =============================================================================
// ADDRESS SPACE LAYOUT
// =============================================================================

/// First kernel virtual address; every user address lies strictly below it
pub const USER_TOP: usize = 0x80_0400_0000;

/// Top of the initial user stack
pub const USER_STACK: usize = 0x4748_0000;

/// Default maximum stack size (1MB)
pub const DEFAULT_STACK_LIMIT: usize = 1024 * 1024;

/// Slack below rsp that still counts as a stack access (a `push` faults 8 bytes down)
pub const STACK_PUSH_SLACK: usize = 8;

// =============================================================================
// PHYSICAL MEMORY
// =============================================================================

/// Default number of user frames in the pool
pub const DEFAULT_FRAME_COUNT: usize = 256;

/// Default number of swap slots (one page each)
pub const DEFAULT_SWAP_SLOTS: usize = 1024;

/// Longest wait between victim searches while every candidate is busy.
/// Installs and releases wake waiters early.
pub const FRAME_WAIT: Duration = Duration::from_millis(2);

// =============================================================================
// PROCESSES
// =============================================================================

/// Default limit on live processes (execution context slots)
pub const DEFAULT_MAX_PROCESSES: usize = 64;

/// File descriptor table capacity per process
pub const MAX_FILE_DESCRIPTORS: usize = 128;

/// First descriptor handed out for opened files (0 and 1 are stdin/stdout)
pub const FIRST_FILE_DESCRIPTOR: usize = 2;

/// Maximum number of command-line arguments
pub const MAX_ARGS: usize = 64;

/// Maximum length of a command line, including separators
pub const MAX_COMMAND_LINE: usize = PAGE_SIZE;

// =============================================================================
// EXECUTABLE FORMAT
// =============================================================================

/// Upper bound on program header entries
pub const MAX_PROGRAM_HEADERS: usize = 1024;
