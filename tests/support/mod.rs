/*!
 * Shared test fixtures: images, kernels and program installation
 */

#![allow(dead_code)]

use std::sync::Arc;
use vmproc_kernel::core::limits::PAGE_SIZE;
use vmproc_kernel::process::UserContext;
use vmproc_kernel::{
    Address, Control, ElfBuilder, MemFS, ProcessManager, ProgramTable, UserFault, VmConfig,
};

/// Start of the writable data segment in every test image
pub const DATA: Address = 0x60_0000;

/// Initial contents of the data segment
pub const DATA_INIT: &[u8] = b"initial";

/// Static image with a small text segment at `entry` and `data_pages` of data at [`DATA`]
pub fn image(entry: Address, data_pages: usize) -> Vec<u8> {
    ElfBuilder::new(entry)
        .text(entry, vec![0xC3; 64])
        .segment(DATA, DATA_INIT.to_vec(), data_pages.max(1) * PAGE_SIZE, true)
        .build()
}

pub fn small_vm() -> VmConfig {
    VmConfig::new().with_frames(64).with_swap_slots(256)
}

pub struct Kernel {
    pub manager: ProcessManager,
    pub fs: Arc<MemFS>,
    pub programs: ProgramTable,
}

impl Kernel {
    pub fn boot(vm: VmConfig) -> Self {
        Self::boot_with(vm, 16)
    }

    pub fn boot_with(vm: VmConfig, max_processes: usize) -> Self {
        let fs = Arc::new(MemFS::new());
        let programs = ProgramTable::new();
        let manager = ProcessManager::builder()
            .with_vm_config(vm)
            .with_max_processes(max_processes)
            .with_filesystem(fs.clone())
            .with_programs(programs.clone())
            .build();
        Self {
            manager,
            fs,
            programs,
        }
    }

    /// Install executable `name` whose entry runs `handler`
    pub fn install<F>(&self, name: &str, entry: Address, data_pages: usize, handler: F)
    where
        F: Fn(&mut UserContext) -> Result<Control, UserFault> + Send + Sync + 'static,
    {
        self.fs.create(name, image(entry, data_pages)).unwrap();
        self.programs.register(entry, handler);
    }
}
