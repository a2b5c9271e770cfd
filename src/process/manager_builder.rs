/*!
 * Process Manager Builder
 * Builder pattern for ProcessManager construction
 */

use super::manager::ProcessManager;
use super::programs::ProgramTable;
use super::types::KernelConfig;
use crate::vfs::{FileSystem, MemFS};
use crate::vm::{MemSwap, SwapDevice, Vm, VmConfig};
use log::info;
use std::sync::Arc;

/// Builder for ProcessManager
pub struct ProcessManagerBuilder {
    config: KernelConfig,
    filesystem: Option<Arc<dyn FileSystem>>,
    swap_device: Option<Arc<dyn SwapDevice>>,
    programs: Option<ProgramTable>,
}

impl ProcessManagerBuilder {
    /// Create a new ProcessManager builder
    pub fn new() -> Self {
        Self {
            config: KernelConfig::default(),
            filesystem: None,
            swap_device: None,
            programs: None,
        }
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    /// Memory subsystem configuration
    pub fn with_vm_config(mut self, vm: VmConfig) -> Self {
        self.config.vm = vm;
        self
    }

    pub fn with_max_processes(mut self, max_processes: usize) -> Self {
        self.config.max_processes = max_processes;
        self
    }

    /// File storage executables and opened files come from
    pub fn with_filesystem(mut self, filesystem: Arc<dyn FileSystem>) -> Self {
        self.filesystem = Some(filesystem);
        self
    }

    /// Backing store for evicted anonymous pages
    pub fn with_swap_device(mut self, device: Arc<dyn SwapDevice>) -> Self {
        self.swap_device = Some(device);
        self
    }

    /// Handlers for program entry points
    pub fn with_programs(mut self, programs: ProgramTable) -> Self {
        self.programs = Some(programs);
        self
    }

    /// Build the ProcessManager
    pub fn build(self) -> ProcessManager {
        let mut features = Vec::new();

        let filesystem = match self.filesystem {
            Some(fs) => {
                features.push(format!("fs={}", fs.name()));
                fs
            }
            None => {
                features.push("fs=memfs (default)".to_string());
                Arc::new(MemFS::new()) as Arc<dyn FileSystem>
            }
        };
        let device = match self.swap_device {
            Some(device) => {
                features.push(format!("swap={} slots", device.slot_count()));
                device
            }
            None => {
                features.push(format!("swap={} slots (memory)", self.config.vm.swap_slots));
                Arc::new(MemSwap::new(self.config.vm.swap_slots)) as Arc<dyn SwapDevice>
            }
        };
        let programs = self.programs.unwrap_or_default();
        features.push(format!("{} programs", programs.len()));
        features.push(format!("max {} processes", self.config.max_processes));

        let vm = Vm::new(self.config.vm.clone(), device);
        info!("Process manager initialized with: {}", features.join(", "));

        ProcessManager::from_parts(vm, filesystem, programs, self.config)
    }
}

impl Default for ProcessManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
