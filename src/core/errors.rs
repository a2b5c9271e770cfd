/*!
 * Error Types
 * Centralized error handling with thiserror and miette diagnostics
 */

use miette::Diagnostic;
use thiserror::Error;

pub use crate::loader::LoadError;
pub use crate::process::ProcessError;
pub use crate::vfs::VfsError;
pub use crate::vm::VmError;

/// Unified kernel error type with miette diagnostics
#[derive(Error, Debug, Diagnostic)]
pub enum KernelError {
    #[error("Process error: {0}")]
    #[diagnostic(transparent)]
    Process(#[from] ProcessError),

    #[error("Memory error: {0}")]
    #[diagnostic(
        code(kernel::vm_error),
        help("A page could not be made resident. Check frame and swap pool sizes.")
    )]
    Vm(#[from] VmError),

    #[error("Load error: {0}")]
    #[diagnostic(
        code(kernel::load_error),
        help("Only static x86-64 ELF executables with valid PT_LOAD segments can run.")
    )]
    Load(#[from] LoadError),

    #[error("File error: {0}")]
    #[diagnostic(
        code(kernel::vfs_error),
        help("The file store rejected the operation. Check the file name and write-deny state.")
    )]
    Vfs(#[from] VfsError),

    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(kernel::configuration_error),
        help("Invalid configuration. Review KERNEL_* environment variables.")
    )]
    Configuration(String),
}
