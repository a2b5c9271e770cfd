/*!
 * Process Management
 * Handles process creation, fork/exec, the wait/exit handshake and the
 * per-process descriptor and memory calls
 */

use super::context::UserContext;
use super::fd::FdEntry;
use super::manager_builder::ProcessManagerBuilder;
use super::pcb::Process;
use super::programs::{ProgramTable, UserEntry};
use super::types::{
    Control, KernelConfig, KernelStats, ProcessError, ProcessInfo, ProcessResult, ProcessState,
    UserFault, EXIT_FAILURE, ROOT_PID,
};
use crate::core::types::{Address, ExitStatus, Fd, IntrFrame, Pid};
use crate::loader::{self, CommandLine};
use crate::vfs::{share, FileSystem, OpenFile};
use crate::vm::{FaultInfo, Vm};
use ahash::RandomState;
use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Process lifecycle manager.
///
/// Cheap to clone; every clone drives the same process set. Each process
/// runs on its own host thread.
#[derive(Clone)]
pub struct ProcessManager {
    processes: Arc<DashMap<Pid, Arc<Process>, RandomState>>,
    next_pid: Arc<AtomicU32>,
    live: Arc<AtomicUsize>,
    vm: Arc<Vm>,
    fs: Arc<dyn FileSystem>,
    programs: ProgramTable,
    config: Arc<KernelConfig>,
    root: Arc<Process>,
    console: Arc<Mutex<Vec<u8>>>,
}

impl ProcessManager {
    pub fn builder() -> ProcessManagerBuilder {
        ProcessManagerBuilder::new()
    }

    pub(crate) fn from_parts(
        vm: Arc<Vm>,
        fs: Arc<dyn FileSystem>,
        programs: ProgramTable,
        config: KernelConfig,
    ) -> Self {
        let root = Arc::new(Process::new(
            ROOT_PID,
            None,
            "kernel",
            vm.new_space(ROOT_PID),
        ));
        if let Err(e) = root.transition(ProcessState::Running) {
            warn!("{}", e);
        }
        let processes = Arc::new(DashMap::with_capacity_and_hasher_and_shard_amount(
            0,
            RandomState::new(),
            64,
        ));
        processes.insert(ROOT_PID, Arc::clone(&root));

        Self {
            processes,
            next_pid: Arc::new(AtomicU32::new(ROOT_PID + 1)),
            live: Arc::new(AtomicUsize::new(0)),
            vm,
            fs,
            programs,
            config: Arc::new(config),
            root,
            console: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Start a new process running `command_line` as a child of the kernel context
    pub fn spawn(&self, command_line: &str) -> ProcessResult<Pid> {
        let command = CommandLine::parse(command_line)?;
        let process = self.allocate(&self.root, command.program())?;
        let pid = process.pid();

        info!("Spawning process {} ('{}')", pid, command);
        let manager = self.clone();
        let thread_process = Arc::clone(&process);
        self.start(&process, move || {
            let status = match manager.load_into(&thread_process, &command) {
                Ok(frame) => {
                    manager.mark_running(&thread_process);
                    manager.run(&thread_process, frame, None)
                }
                Err(e) => {
                    warn!("pid {}: failed to load '{}': {}", thread_process.pid(), command, e);
                    EXIT_FAILURE
                }
            };
            manager.finish(&thread_process, status);
        })?;
        Ok(pid)
    }

    /// Clone `parent_pid`. The child resumes from `frame` with `rax` = 0 in
    /// `child_entry`; this call returns once the child has a full copy of
    /// the parent's memory and descriptors.
    pub fn fork(
        &self,
        parent_pid: Pid,
        frame: &IntrFrame,
        child_entry: UserEntry,
    ) -> ProcessResult<Pid> {
        let parent = self.lookup(parent_pid)?;
        let child = self.allocate(&parent, &parent.name())?;
        let pid = child.pid();

        let mut child_frame = *frame;
        child_frame.regs.rax = 0;

        let (ready_tx, ready_rx) = flume::bounded::<ProcessResult<()>>(1);
        let manager = self.clone();
        let thread_parent = Arc::clone(&parent);
        let thread_child = Arc::clone(&child);
        self.start(&child, move || {
            let result = manager.duplicate(&thread_parent, &thread_child);
            drop(thread_parent);
            let cloned = result.is_ok();
            if ready_tx.send(result).is_err() {
                debug!("pid {}: parent stopped waiting for fork", thread_child.pid());
            }
            let status = if cloned {
                manager.mark_running(&thread_child);
                manager.run(&thread_child, child_frame, Some(child_entry))
            } else {
                EXIT_FAILURE
            };
            manager.finish(&thread_child, status);
        })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                debug!("pid {}: forked child {}", parent_pid, pid);
                Ok(pid)
            }
            Ok(Err(e)) => {
                warn!("pid {}: fork failed: {}", parent_pid, e);
                // Collect the failed child so it does not linger as a zombie
                if let Err(wait_err) = self.wait(parent_pid, pid) {
                    warn!("pid {}: {}", parent_pid, wait_err);
                }
                Err(ProcessError::ForkFailed(e.to_string()))
            }
            Err(_) => Err(ProcessError::ForkFailed(format!(
                "child {} exited before reporting",
                pid
            ))),
        }
    }

    /// Block until `child` of `parent` exits, then collect its status.
    ///
    /// Fails at once with `NotChild` when `child` is not a current, unreaped
    /// child of `parent`.
    pub fn wait(&self, parent: Pid, child: Pid) -> ProcessResult<ExitStatus> {
        let parent_process = self.lookup(parent)?;
        let child_process = parent_process
            .remove_child(child)
            .ok_or(ProcessError::NotChild { parent, child })?;

        child_process.wait_exit();
        let status = child_process.exit_status().unwrap_or(EXIT_FAILURE);
        self.reap(&child_process);
        child_process.release();
        debug!("pid {}: collected child {} status {}", parent, child, status);
        Ok(status)
    }

    /// Run the exit protocol for `pid` on the calling context.
    ///
    /// Blocks until the parent collects the status or exits itself.
    pub fn exit(&self, pid: Pid, status: ExitStatus) -> ProcessResult<()> {
        let process = self.lookup(pid)?;
        self.finish(&process, status);
        Ok(())
    }

    /// Open `name` in `pid`'s descriptor table
    pub fn open(&self, pid: Pid, name: &str) -> ProcessResult<Fd> {
        let process = self.lookup(pid)?;
        let file = self.fs.open(name)?;
        let fd = process.files().lock().open(share(file))?;
        Ok(fd)
    }

    /// Install an already open file at the lowest free descriptor
    pub fn open_fd(&self, pid: Pid, file: Box<dyn OpenFile>) -> ProcessResult<Fd> {
        let process = self.lookup(pid)?;
        let fd = process.files().lock().open(share(file))?;
        Ok(fd)
    }

    /// Close `fd`. Standard streams and unknown descriptors are ignored.
    pub fn close_fd(&self, pid: Pid, fd: Fd) -> ProcessResult<()> {
        let process = self.lookup(pid)?;
        process.files().lock().close(fd);
        Ok(())
    }

    /// Read up to `len` bytes from `fd`
    pub fn read_fd(&self, pid: Pid, fd: Fd, len: usize) -> ProcessResult<Vec<u8>> {
        let process = self.lookup(pid)?;
        let entry = process
            .files()
            .lock()
            .get(fd)
            .cloned()
            .ok_or(ProcessError::BadDescriptor(fd))?;
        match entry {
            FdEntry::Stdin => Ok(Vec::new()),
            FdEntry::Stdout => Err(ProcessError::BadDescriptor(fd)),
            FdEntry::File(file) => {
                let mut buf = vec![0u8; len];
                let n = file.lock().read(&mut buf)?;
                buf.truncate(n);
                Ok(buf)
            }
        }
    }

    /// Write `data` to `fd`; standard output goes to the console buffer
    pub fn write_fd(&self, pid: Pid, fd: Fd, data: &[u8]) -> ProcessResult<usize> {
        let process = self.lookup(pid)?;
        let entry = process
            .files()
            .lock()
            .get(fd)
            .cloned()
            .ok_or(ProcessError::BadDescriptor(fd))?;
        match entry {
            FdEntry::Stdin => Err(ProcessError::BadDescriptor(fd)),
            FdEntry::Stdout => {
                debug!("pid {}: {}", pid, String::from_utf8_lossy(data).trim_end());
                self.console.lock().extend_from_slice(data);
                Ok(data.len())
            }
            FdEntry::File(file) => Ok(file.lock().write(data)?),
        }
    }

    /// Everything written to standard output so far
    pub fn console_output(&self) -> String {
        String::from_utf8_lossy(&self.console.lock()).into_owned()
    }

    /// Resolve a page fault in `pid`'s address space
    pub fn resolve_fault(&self, pid: Pid, fault: &FaultInfo) -> ProcessResult<()> {
        let process = self.lookup(pid)?;
        process.space().lock().handle_fault(fault)?;
        Ok(())
    }

    /// Map `length` bytes of the file open at `fd`, from `offset`, at `addr`
    pub fn mmap(
        &self,
        pid: Pid,
        addr: Address,
        length: usize,
        fd: Fd,
        offset: u64,
    ) -> ProcessResult<Address> {
        let process = self.lookup(pid)?;
        let file = process
            .files()
            .lock()
            .file(fd)
            .ok_or(ProcessError::BadDescriptor(fd))?;
        let handle = share(file.lock().duplicate()?);
        let mapped = process
            .space()
            .lock()
            .map_file(addr, length, handle, offset, true)?;
        Ok(mapped)
    }

    /// Remove the mapping at `addr`, writing dirty pages back to the file
    pub fn munmap(&self, pid: Pid, addr: Address) -> ProcessResult<()> {
        let process = self.lookup(pid)?;
        process.space().lock().unmap_file(addr)?;
        Ok(())
    }

    /// Get process information
    pub fn get(&self, pid: Pid) -> Option<ProcessInfo> {
        self.find(pid).map(|process| process.info())
    }

    pub fn process_state(&self, pid: Pid) -> Option<ProcessState> {
        self.find(pid).map(|process| process.state())
    }

    pub fn exit_status(&self, pid: Pid) -> Option<ExitStatus> {
        self.find(pid).and_then(|process| process.exit_status())
    }

    /// Unreaped children of `pid`
    pub fn children(&self, pid: Pid) -> Vec<Pid> {
        self.find(pid)
            .map(|process| process.child_pids())
            .unwrap_or_default()
    }

    /// List all live processes, the kernel context excluded
    pub fn list(&self) -> Vec<ProcessInfo> {
        let mut infos: Vec<ProcessInfo> = self
            .snapshot()
            .iter()
            .map(|process| process.info())
            .collect();
        infos.sort_by_key(|info| info.pid);
        infos
    }

    pub fn process_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> KernelStats {
        let processes = self.snapshot();
        let count = |state: ProcessState| {
            processes
                .iter()
                .filter(|process| process.state() == state)
                .count()
        };
        KernelStats {
            processes: processes.len(),
            running: count(ProcessState::Running),
            zombies: count(ProcessState::Zombie),
            spawned: u64::from(self.next_pid.load(Ordering::Acquire) - ROOT_PID - 1),
            frames: self.vm.stats(),
        }
    }

    pub fn vm(&self) -> &Arc<Vm> {
        &self.vm
    }

    pub fn programs(&self) -> &ProgramTable {
        &self.programs
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    fn find(&self, pid: Pid) -> Option<Arc<Process>> {
        self.processes
            .get(&pid)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn lookup(&self, pid: Pid) -> ProcessResult<Arc<Process>> {
        self.find(pid).ok_or(ProcessError::NotFound(pid))
    }

    fn snapshot(&self) -> Vec<Arc<Process>> {
        self.processes
            .iter()
            .filter(|entry| *entry.key() != ROOT_PID)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Create a process record under `parent`, counting it against the limit
    fn allocate(&self, parent: &Arc<Process>, name: &str) -> ProcessResult<Arc<Process>> {
        let limit = self.config.max_processes;
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < limit).then_some(live + 1)
            })
            .map_err(|_| ProcessError::LimitReached { limit })?;

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let process = Arc::new(Process::new(
            pid,
            Some(parent.pid()),
            name,
            self.vm.new_space(pid),
        ));
        self.processes.insert(pid, Arc::clone(&process));
        parent.add_child(Arc::clone(&process));
        debug!("Created process {} ('{}') under {}", pid, name, parent.pid());
        Ok(process)
    }

    /// Undo `allocate` for a process that never ran
    fn discard(&self, process: &Arc<Process>) {
        if let Some(parent) = process.parent().and_then(|ppid| self.find(ppid)) {
            parent.remove_child(process.pid());
        }
        self.processes.remove(&process.pid());
        self.live.fetch_sub(1, Ordering::AcqRel);
    }

    /// Give `process` its execution context
    fn start<F>(&self, process: &Arc<Process>, body: F) -> ProcessResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        thread::Builder::new()
            .name(format!("{}-{}", process.name(), process.pid()))
            .spawn(body)
            .map(|_| ())
            .map_err(|e| {
                self.discard(process);
                ProcessError::CreationFailed(e.to_string())
            })
    }

    fn mark_running(&self, process: &Process) {
        if let Err(e) = process.transition(ProcessState::Running) {
            warn!("{}", e);
        }
    }

    fn load_into(&self, process: &Process, command: &CommandLine) -> ProcessResult<IntrFrame> {
        let image = {
            let mut space = process.space().lock();
            loader::load(
                &mut space,
                self.fs.as_ref(),
                command,
                self.vm.config().load_strategy,
            )?
        };
        process.set_executable(Some(image.executable));
        process.set_name(command.program());
        Ok(image.frame)
    }

    /// Replace `process`'s image with `command_line`. The old image is gone
    /// once this starts, so the only caller ends the process on error.
    fn exec(&self, process: &Process, command_line: &str) -> ProcessResult<IntrFrame> {
        let command = CommandLine::parse(command_line)?;
        process.space().lock().destroy();
        process.set_executable(None);
        let frame = self.load_into(process, &command)?;
        info!("pid {}: exec '{}'", process.pid(), command);
        Ok(frame)
    }

    /// Clone the parent's memory, descriptors and executable into `child`
    fn duplicate(&self, parent: &Process, child: &Process) -> ProcessResult<()> {
        {
            let parent_space = parent.space().lock();
            let mut child_space = child.space().lock();
            child_space.copy_from(&parent_space)?;
        }
        let files = parent.files().lock().duplicate()?;
        *child.files().lock() = files;
        if let Some(executable) = parent.executable() {
            let handle = executable.lock().duplicate()?;
            child.set_executable(Some(share(handle)));
        }
        Ok(())
    }

    /// Enter user mode at `frame` and keep going until the program exits.
    /// `first` overrides the program table for the first entry (fork).
    fn run(&self, process: &Arc<Process>, frame: IntrFrame, first: Option<UserEntry>) -> ExitStatus {
        let mut frame = frame;
        let mut next = first;
        loop {
            let Some(entry) = next.take().or_else(|| self.programs.lookup(frame.rip)) else {
                warn!(
                    "{}: killed ({})",
                    process.name(),
                    UserFault::IllegalInstruction(frame.rip)
                );
                return EXIT_FAILURE;
            };

            let mut context = UserContext::new(self.clone(), Arc::clone(process), frame);
            match entry(&mut context) {
                Ok(Control::Exit(status)) => return status,
                Ok(Control::Exec(command_line)) => {
                    match self.exec(process, &command_line) {
                        Ok(new_frame) => frame = new_frame,
                        Err(e) => {
                            warn!("{}: exec '{}' failed: {}", process.name(), command_line, e);
                            return EXIT_FAILURE;
                        }
                    }
                }
                Err(fault) => {
                    warn!("{}: killed ({})", process.name(), fault);
                    return EXIT_FAILURE;
                }
            }
        }
    }

    /// Exit protocol: release resources, publish the status, wait to be reaped
    fn finish(&self, process: &Arc<Process>, status: ExitStatus) {
        if !process.begin_exit() {
            return;
        }

        process.files().lock().close_all();
        process.space().lock().destroy();
        process.set_executable(None);
        for child in process.take_children() {
            child.release();
        }

        let status = process.record_exit(status);
        info!("{}: exit({})", process.name(), status);
        if let Err(e) = process.transition(ProcessState::Zombie) {
            warn!("{}", e);
        }
        process.notify_exit();

        process.wait_release();
        self.reap(process);
    }

    /// Drop the record of an exited process. Runs once, from whichever of
    /// the collecting parent or the orphaned process gets there first.
    fn reap(&self, process: &Process) {
        if self.processes.remove(&process.pid()).is_none() {
            return;
        }
        if let Err(e) = process.transition(ProcessState::Reaped) {
            warn!("{}", e);
        }
        self.live.fetch_sub(1, Ordering::AcqRel);
        debug!("Process {} reaped", process.pid());
    }
}

impl std::fmt::Debug for ProcessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessManager")
            .field("processes", &self.process_count())
            .field("programs", &self.programs.len())
            .field("filesystem", &self.fs.name())
            .finish()
    }
}
