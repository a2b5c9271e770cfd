/*!
 * User Context
 * What a running program sees: its registers and checked access to its
 * own memory, descriptors and the process calls
 */

use super::manager::ProcessManager;
use super::pcb::Process;
use super::types::{Control, ProcessResult, UserFault, UserResult, EXIT_FAILURE};
use crate::core::limits::PAGE_SIZE;
use crate::core::types::{Address, ExitStatus, Fd, IntrFrame, Pid};
use crate::vm::VmError;
use std::sync::Arc;

/// Execution state handed to a program handler.
///
/// Memory accessors go through the fault resolver with the frame's `rsp`.
/// Descriptor calls copy through kernel-mode faults after saving that
/// `rsp` in the address space. Touching an unmapped address or writing a
/// read-only page surfaces as a [`UserFault`] that kills the process.
pub struct UserContext {
    manager: ProcessManager,
    process: Arc<Process>,
    frame: IntrFrame,
}

impl UserContext {
    pub(crate) fn new(manager: ProcessManager, process: Arc<Process>, frame: IntrFrame) -> Self {
        Self {
            manager,
            process,
            frame,
        }
    }

    pub fn pid(&self) -> Pid {
        self.process.pid()
    }

    pub fn frame(&self) -> &IntrFrame {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut IntrFrame {
        &mut self.frame
    }

    pub fn manager(&self) -> &ProcessManager {
        &self.manager
    }

    /// `argc` as passed in `rdi`
    pub fn argc(&self) -> usize {
        self.frame.regs.rdi as usize
    }

    /// Read the argument vector back out of user memory
    pub fn args(&self) -> UserResult<Vec<String>> {
        let argv = self.frame.regs.rsi as Address;
        (0..self.argc())
            .map(|i| {
                let pointer = self.read_u64(argv + i * 8)? as Address;
                self.read_cstr(pointer)
            })
            .collect()
    }

    pub fn read(&self, addr: Address, buf: &mut [u8]) -> UserResult<()> {
        let rsp = self.frame.rsp;
        self.process.space().lock().read(addr, buf, rsp)?;
        Ok(())
    }

    pub fn write(&self, addr: Address, data: &[u8]) -> UserResult<()> {
        let rsp = self.frame.rsp;
        self.process.space().lock().write(addr, data, rsp)?;
        Ok(())
    }

    pub fn read_u64(&self, addr: Address) -> UserResult<u64> {
        let mut word = [0u8; 8];
        self.read(addr, &mut word)?;
        Ok(u64::from_le_bytes(word))
    }

    pub fn write_u64(&self, addr: Address, value: u64) -> UserResult<()> {
        self.write(addr, &value.to_le_bytes())
    }

    /// NUL-terminated UTF-8 string at `addr`, at most one page long
    pub fn read_cstr(&self, addr: Address) -> UserResult<String> {
        let mut bytes = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            if bytes.len() >= PAGE_SIZE {
                return Err(UserFault::BadString(addr));
            }
            self.read(addr + bytes.len(), &mut byte)?;
            if byte[0] == 0 {
                break;
            }
            bytes.push(byte[0]);
        }
        String::from_utf8(bytes).map_err(|_| UserFault::BadString(addr))
    }

    /// Push `data` onto the user stack, growing it on demand
    pub fn push(&mut self, data: &[u8]) -> UserResult<Address> {
        let rsp = self
            .frame
            .rsp
            .checked_sub(data.len())
            .ok_or(VmError::InvalidAddress(self.frame.rsp))?;
        self.frame.rsp = rsp;
        self.write(rsp, data)?;
        Ok(rsp)
    }

    /// Clone this process. The child starts in `child` with `rax` = 0; the
    /// parent gets the child's pid in `rax`, or -1 on failure.
    pub fn fork<F>(&mut self, child: F) -> ProcessResult<Pid>
    where
        F: Fn(&mut UserContext) -> UserResult<Control> + Send + Sync + 'static,
    {
        let result = self
            .manager
            .fork(self.pid(), &self.frame, Arc::new(child));
        self.frame.regs.rax = match &result {
            Ok(pid) => *pid as u64,
            Err(_) => EXIT_FAILURE as i64 as u64,
        };
        result
    }

    /// Wait for a child; -1 if `child` is not a waitable child
    pub fn wait(&mut self, child: Pid) -> ExitStatus {
        let status = self
            .manager
            .wait(self.pid(), child)
            .unwrap_or(EXIT_FAILURE);
        self.frame.regs.rax = status as i64 as u64;
        status
    }

    pub fn exec(&self, command_line: &str) -> Control {
        Control::Exec(command_line.to_string())
    }

    pub fn exit(&self, status: ExitStatus) -> Control {
        Control::Exit(status)
    }

    pub fn open(&self, name: &str) -> ProcessResult<Fd> {
        self.manager.open(self.pid(), name)
    }

    pub fn close(&self, fd: Fd) -> ProcessResult<()> {
        self.manager.close_fd(self.pid(), fd)
    }

    /// Read from `fd` into user memory at `addr`
    pub fn read_fd(&self, fd: Fd, addr: Address, len: usize) -> UserResult<usize> {
        let data = self.manager.read_fd(self.pid(), fd, len)?;
        let mut space = self.process.space().lock();
        space.save_user_rsp(self.frame.rsp);
        space.copy_out(addr, &data)?;
        Ok(data.len())
    }

    /// Write `len` bytes of user memory at `addr` to `fd`
    pub fn write_fd(&self, fd: Fd, addr: Address, len: usize) -> UserResult<usize> {
        let mut data = vec![0u8; len];
        {
            let mut space = self.process.space().lock();
            space.save_user_rsp(self.frame.rsp);
            space.copy_in(addr, &mut data)?;
        }
        Ok(self.manager.write_fd(self.pid(), fd, &data)?)
    }

    pub fn mmap(&self, addr: Address, length: usize, fd: Fd, offset: u64) -> ProcessResult<Address> {
        self.manager.mmap(self.pid(), addr, length, fd, offset)
    }

    pub fn munmap(&self, addr: Address) -> ProcessResult<()> {
        self.manager.munmap(self.pid(), addr)
    }
}

impl std::fmt::Debug for UserContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserContext")
            .field("pid", &self.pid())
            .field("frame", &self.frame)
            .finish()
    }
}
