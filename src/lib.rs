/*!
 * vmproc Kernel Library
 * Process execution and demand-paged virtual memory, exposed as a library
 */

pub mod core;
pub mod loader;
pub mod monitoring;
pub mod process;
pub mod vfs;
pub mod vm;

// Re-exports
pub use crate::core::errors::KernelError;
pub use crate::core::types::{Address, ExitStatus, Fd, IntrFrame, KernelResult, LoadStrategy, Pid};
pub use loader::{CommandLine, ElfBuilder, LoadError};
pub use monitoring::init_tracing;
pub use process::{
    Control, KernelConfig, ProcessError, ProcessManager, ProcessManagerBuilder, ProgramTable,
    UserContext, UserFault, EXIT_FAILURE, ROOT_PID,
};
pub use vfs::{FileSystem, MemFS, OpenFile, VfsError};
pub use vm::{EvictionPolicy, FaultInfo, FrameStats, MemSwap, SwapDevice, Vm, VmConfig, VmError};
