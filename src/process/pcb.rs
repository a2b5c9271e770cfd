/*!
 * Process Control Block
 * Per-process record: address space, descriptors, children and the
 * exit handshake
 */

use super::fd::FileTable;
use super::types::{ProcessError, ProcessInfo, ProcessResult, ProcessState};
use crate::core::sync::Semaphore;
use crate::core::types::{ExitStatus, Pid};
use crate::vfs::SharedFile;
use crate::vm::SharedSpace;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// One process.
///
/// The record lives until it has signalled `exit_notify` and either its
/// parent collected the status or the parent exited first.
pub struct Process {
    pid: Pid,
    parent: Option<Pid>,
    name: RwLock<String>,
    state: Mutex<ProcessState>,
    space: SharedSpace,
    files: Mutex<FileTable>,
    executable: Mutex<Option<SharedFile>>,
    children: Mutex<Vec<Arc<Process>>>,
    exit_status: OnceLock<ExitStatus>,
    exiting: AtomicBool,
    /// Raised once by the process when its status is recorded
    exit_notify: Semaphore,
    /// Raised once by the parent (wait, or its own exit) to let the record go
    reap_release: Semaphore,
}

impl Process {
    pub(crate) fn new(pid: Pid, parent: Option<Pid>, name: &str, space: SharedSpace) -> Self {
        Self {
            pid,
            parent,
            name: RwLock::new(name.to_string()),
            state: Mutex::new(ProcessState::Created),
            space,
            files: Mutex::new(FileTable::new()),
            executable: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            exit_status: OnceLock::new(),
            exiting: AtomicBool::new(false),
            exit_notify: Semaphore::new(0),
            reap_release: Semaphore::new(0),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn parent(&self) -> Option<Pid> {
        self.parent
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub(crate) fn set_name(&self, name: &str) {
        *self.name.write() = name.to_string();
    }

    pub fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    pub(crate) fn transition(&self, next: ProcessState) -> ProcessResult<()> {
        let mut state = self.state.lock();
        if !state.can_transition_to(next) {
            return Err(ProcessError::InvalidTransition {
                pid: self.pid,
                from: *state,
                to: next,
            });
        }
        *state = next;
        Ok(())
    }

    pub fn space(&self) -> &SharedSpace {
        &self.space
    }

    pub(crate) fn files(&self) -> &Mutex<FileTable> {
        &self.files
    }

    pub(crate) fn set_executable(&self, file: Option<SharedFile>) {
        let old = std::mem::replace(&mut *self.executable.lock(), file);
        if let Some(old) = old {
            old.lock().allow_write();
        }
    }

    pub(crate) fn executable(&self) -> Option<SharedFile> {
        self.executable.lock().clone()
    }

    pub(crate) fn add_child(&self, child: Arc<Process>) {
        self.children.lock().push(child);
    }

    pub(crate) fn remove_child(&self, pid: Pid) -> Option<Arc<Process>> {
        let mut children = self.children.lock();
        let index = children.iter().position(|child| child.pid == pid)?;
        Some(children.remove(index))
    }

    pub(crate) fn take_children(&self) -> Vec<Arc<Process>> {
        std::mem::take(&mut *self.children.lock())
    }

    pub fn child_pids(&self) -> Vec<Pid> {
        self.children.lock().iter().map(|child| child.pid).collect()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status.get().copied()
    }

    /// Record the exit status. Later calls keep the first value.
    pub(crate) fn record_exit(&self, status: ExitStatus) -> ExitStatus {
        *self.exit_status.get_or_init(|| status)
    }

    /// Claim the exit path. Only the first caller gets `true`.
    pub(crate) fn begin_exit(&self) -> bool {
        !self.exiting.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn notify_exit(&self) {
        self.exit_notify.up();
    }

    pub(crate) fn wait_exit(&self) {
        self.exit_notify.down();
    }

    pub(crate) fn release(&self) {
        self.reap_release.up();
    }

    pub(crate) fn wait_release(&self) {
        self.reap_release.down();
    }

    pub fn info(&self) -> ProcessInfo {
        let (pages, resident_pages) = {
            let space = self.space.lock();
            (space.spt().len(), space.spt().resident_count())
        };
        ProcessInfo {
            pid: self.pid,
            parent: self.parent,
            name: self.name(),
            state: self.state(),
            exit_status: self.exit_status(),
            children: self.child_pids(),
            open_files: self.files.lock().open_count(),
            pages,
            resident_pages,
        }
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("parent", &self.parent)
            .field("name", &*self.name.read())
            .field("state", &self.state())
            .field("exit_status", &self.exit_status())
            .finish()
    }
}
