/*!
 * Process Types
 * Common types for process management
 */

use crate::core::limits::DEFAULT_MAX_PROCESSES;
use crate::core::types::{Address, ExitStatus, Fd, KernelResult, Pid};
use crate::loader::LoadError;
use crate::vfs::VfsError;
use crate::vm::types::env_parse;
use crate::vm::{FrameStats, VmConfig, VmError};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Pid of the kernel's own context, parent of every spawned process
pub const ROOT_PID: Pid = 0;

/// Status reported for processes killed by the kernel or failed operations
pub const EXIT_FAILURE: ExitStatus = -1;

/// Process operation result
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Process errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum ProcessError {
    #[error("Process {0} not found")]
    #[diagnostic(
        code(process::not_found),
        help("The process may have exited and been reaped, or never existed.")
    )]
    NotFound(Pid),

    #[error("Process {child} is not an unreaped child of {parent}")]
    #[diagnostic(
        code(process::not_child),
        help("A process can only wait for its own children, and only once each.")
    )]
    NotChild { parent: Pid, child: Pid },

    #[error("Failed to create process: {0}")]
    #[diagnostic(
        code(process::creation_failed),
        help("No execution context could be started. Check host thread limits.")
    )]
    CreationFailed(String),

    #[error("Process limit reached: {limit} live processes")]
    #[diagnostic(
        code(process::limit_reached),
        help("Wait for finished children or raise KERNEL_MAX_PROCESSES.")
    )]
    LimitReached { limit: usize },

    #[error("Fork failed: {0}")]
    #[diagnostic(
        code(process::fork_failed),
        help("The child could not clone the parent's memory or files. Check frame and swap pool sizes.")
    )]
    ForkFailed(String),

    #[error("Load failed: {0}")]
    #[diagnostic(code(process::load_failed))]
    Load(#[from] LoadError),

    #[error("Memory error: {0}")]
    #[diagnostic(code(process::memory))]
    Memory(#[from] VmError),

    #[error("File error: {0}")]
    #[diagnostic(code(process::file))]
    File(#[from] VfsError),

    #[error("Too many open files (limit {0})")]
    #[diagnostic(
        code(process::too_many_open_files),
        help("Close unused descriptors.")
    )]
    TooManyOpenFiles(usize),

    #[error("Bad file descriptor {0}")]
    #[diagnostic(code(process::bad_descriptor))]
    BadDescriptor(Fd),

    #[error("Invalid state transition for process {pid}: {from} -> {to}")]
    #[diagnostic(code(process::invalid_state))]
    InvalidTransition {
        pid: Pid,
        from: ProcessState,
        to: ProcessState,
    },
}

/// Process lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Record exists, image not yet running
    Created,
    /// Executing user code
    Running,
    /// Exited, status not yet collected
    Zombie,
    /// Status collected (or parent gone); record is being dropped
    Reaped,
}

impl ProcessState {
    pub fn can_transition_to(self, next: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, next),
            (Created, Running) | (Created, Zombie) | (Running, Zombie) | (Zombie, Reaped)
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Created => write!(f, "CREATED"),
            ProcessState::Running => write!(f, "RUNNING"),
            ProcessState::Zombie => write!(f, "ZOMBIE"),
            ProcessState::Reaped => write!(f, "REAPED"),
        }
    }
}

/// What a program handler asks the kernel to do when it returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Terminate with this status
    Exit(ExitStatus),
    /// Replace the running image
    Exec(String),
}

/// Fatal condition raised while running user code; the process is killed with status -1
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UserFault {
    #[error("{0}")]
    Memory(#[from] VmError),

    #[error("no program at entry 0x{0:x}")]
    IllegalInstruction(Address),

    #[error("bad user string at 0x{0:x}")]
    BadString(Address),

    #[error("{0}")]
    Process(#[from] ProcessError),
}

/// Result of user-mode work
pub type UserResult<T> = Result<T, UserFault>;

/// Process metadata snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProcessInfo {
    pub pid: Pid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<Pid>,
    pub name: String,
    pub state: ProcessState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<ExitStatus>,
    pub children: Vec<Pid>,
    pub open_files: usize,
    pub pages: usize,
    pub resident_pages: usize,
}

/// Kernel-wide counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelStats {
    /// Live processes, the kernel context excluded
    pub processes: usize,
    pub running: usize,
    pub zombies: usize,
    /// Processes created since boot
    pub spawned: u64,
    pub frames: FrameStats,
}

/// Kernel-wide configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelConfig {
    pub vm: VmConfig,
    pub max_processes: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            vm: VmConfig::default(),
            max_processes: DEFAULT_MAX_PROCESSES,
        }
    }
}

impl KernelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// [`VmConfig::from_env`] plus `KERNEL_MAX_PROCESSES`
    pub fn from_env() -> KernelResult<Self> {
        let mut config = Self {
            vm: VmConfig::from_env()?,
            ..Self::default()
        };
        if let Some(max) = env_parse::<usize>("KERNEL_MAX_PROCESSES", "a process count")? {
            config.max_processes = max;
        }
        Ok(config)
    }

    pub fn with_vm(mut self, vm: VmConfig) -> Self {
        self.vm = vm;
        self
    }

    pub fn with_max_processes(mut self, max_processes: usize) -> Self {
        self.max_processes = max_processes;
        self
    }
}
