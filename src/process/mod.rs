/*!
 * Process Module
 * Process lifecycle: spawn, fork, exec, wait and exit, plus the
 * per-process descriptor table
 */

pub mod context;
pub mod fd;
pub mod manager;
pub mod manager_builder;
pub mod pcb;
pub mod programs;
pub mod types;

// Re-export for convenience
pub use context::UserContext;
pub use fd::{FdEntry, FileTable};
pub use manager::ProcessManager;
pub use manager_builder::ProcessManagerBuilder;
pub use pcb::Process;
pub use programs::{ProgramTable, UserEntry};
pub use types::{
    Control, KernelConfig, KernelStats, ProcessError, ProcessInfo, ProcessResult, ProcessState,
    UserFault, UserResult, EXIT_FAILURE, ROOT_PID,
};
