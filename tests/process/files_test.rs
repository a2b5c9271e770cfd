/*!
 * Descriptor and Mapping Tests
 * open/close through the descriptor table, fork duplication of file
 * positions, and mmap write-back
 */

use crate::support::{Kernel, DATA};
use pretty_assertions::assert_eq;
use vmproc_kernel::core::limits::{PAGE_SIZE, USER_STACK};
use vmproc_kernel::process::ProcessError;
use vmproc_kernel::{Control, EXIT_FAILURE, ROOT_PID};

const MAP: usize = 0x1000_0000;

#[test]
fn test_descriptors_are_lowest_free_and_std_streams_survive_close() {
    let kernel = Kernel::boot(crate::support::small_vm());
    kernel.fs.create("notes", b"hello world".to_vec()).unwrap();
    kernel.install("files", 0x40_1000, 1, |ctx| {
        let a = ctx.open("notes")?;
        let b = ctx.open("notes")?;
        if (a, b) != (2, 3) {
            return Ok(Control::Exit(1));
        }
        ctx.close(a)?;
        ctx.close(0)?;
        ctx.close(1)?;
        if ctx.open("notes")? != 2 {
            return Ok(Control::Exit(2));
        }
        if !matches!(ctx.open("absent"), Err(ProcessError::File(_))) {
            return Ok(Control::Exit(3));
        }

        let n = ctx.read_fd(b, DATA + 64, 5)?;
        let text = ctx.read_cstr(DATA + 64)?;
        if n != 5 || text != "hello" {
            return Ok(Control::Exit(4));
        }
        // stdout still open after close(1)
        ctx.write_fd(1, DATA + 64, 5)?;
        Ok(Control::Exit(0))
    });

    let pid = kernel.manager.spawn("files").unwrap();
    assert_eq!(kernel.manager.wait(ROOT_PID, pid).unwrap(), 0);
    assert_eq!(kernel.manager.console_output(), "hello");
}

#[test]
fn test_forked_descriptors_have_independent_positions() {
    let kernel = Kernel::boot(crate::support::small_vm());
    kernel.fs.create("log", b"abcdefgh".to_vec()).unwrap();
    kernel.install("sharer", 0x40_1000, 1, |ctx| {
        let fd = ctx.open("log")?;
        ctx.read_fd(fd, DATA, 2)?;
        let child = ctx.fork(move |child| {
            child.read_fd(fd, DATA + 64, 2)?;
            let got = child.read_cstr(DATA + 64)?;
            Ok(Control::Exit(if got == "cd" { 0 } else { 1 }))
        })?;
        if ctx.wait(child) != 0 {
            return Ok(Control::Exit(2));
        }
        ctx.read_fd(fd, DATA + 128, 2)?;
        let got = ctx.read_cstr(DATA + 128)?;
        Ok(Control::Exit(if got == "cd" { 0 } else { 3 }))
    });

    let pid = kernel.manager.spawn("sharer").unwrap();
    assert_eq!(kernel.manager.wait(ROOT_PID, pid).unwrap(), 0);
}

#[test]
fn test_descriptor_reads_grow_the_stack_from_the_user_rsp() {
    let kernel = Kernel::boot(crate::support::small_vm());
    kernel.fs.create("notes", b"hello world".to_vec()).unwrap();
    kernel.install("stackbuf", 0x40_1000, 1, |ctx| {
        let fd = ctx.open("notes")?;
        // Reserve a buffer three pages down, then read straight into it
        let buf = USER_STACK - 3 * PAGE_SIZE;
        ctx.frame_mut().rsp = buf;
        if ctx.read_fd(fd, buf, 5)? != 5 || ctx.read_cstr(buf)? != "hello" {
            return Ok(Control::Exit(1));
        }
        ctx.write_fd(1, buf, 5)?;

        // Far below the stack pointer is still a bad buffer
        ctx.read_fd(fd, buf - 2 * PAGE_SIZE, 5)?;
        Ok(Control::Exit(2))
    });

    let pid = kernel.manager.spawn("stackbuf").unwrap();
    assert_eq!(kernel.manager.wait(ROOT_PID, pid).unwrap(), EXIT_FAILURE);
    assert_eq!(kernel.manager.console_output(), "hello");
}

#[test]
fn test_mmap_writes_back_on_munmap_and_exit() {
    let kernel = Kernel::boot(crate::support::small_vm());
    kernel.fs.create("shared", vec![b'-'; PAGE_SIZE + 100]).unwrap();
    kernel.install("mapper", 0x40_1000, 1, |ctx| {
        let fd = ctx.open("shared")?;
        let addr = ctx.mmap(MAP, PAGE_SIZE + 100, fd, 0)?;
        ctx.close(fd)?;

        ctx.write(addr, b"HEAD")?;
        ctx.munmap(addr)?;
        if ctx.read(addr, &mut [0u8; 1]).is_ok() {
            return Ok(Control::Exit(1));
        }

        let fd = ctx.open("shared")?;
        let addr = ctx.mmap(MAP, PAGE_SIZE + 100, fd, 0)?;
        ctx.write(addr + PAGE_SIZE, b"TAIL")?;
        // Exit with the mapping still in place
        Ok(Control::Exit(0))
    });

    let pid = kernel.manager.spawn("mapper").unwrap();
    assert_eq!(kernel.manager.wait(ROOT_PID, pid).unwrap(), 0);

    let contents = kernel.fs.contents("shared").unwrap();
    assert_eq!(&contents[..4], b"HEAD");
    assert_eq!(&contents[PAGE_SIZE..PAGE_SIZE + 4], b"TAIL");
    assert_eq!(contents.len(), PAGE_SIZE + 100);
}

#[test]
fn test_mmap_rejects_bad_requests() {
    let kernel = Kernel::boot(crate::support::small_vm());
    kernel.fs.create("shared", vec![1u8; 64]).unwrap();
    kernel.install("badmap", 0x40_1000, 1, |ctx| {
        let fd = ctx.open("shared")?;
        let rejected = [
            ctx.mmap(0, 64, fd, 0),
            ctx.mmap(MAP + 1, 64, fd, 0),
            ctx.mmap(MAP, 0, fd, 0),
            ctx.mmap(DATA, 64, fd, 0),
            ctx.mmap(MAP, 64, 0, 0),
            ctx.mmap(MAP, 64, 77, 0),
        ];
        if rejected.iter().any(Result::is_ok) {
            return Ok(Control::Exit(1));
        }
        ctx.mmap(MAP, 64, fd, 0)?;
        // Overlaps the mapping just made
        Ok(Control::Exit(if ctx.mmap(MAP, 64, fd, 0).is_err() { 0 } else { 2 }))
    });

    let pid = kernel.manager.spawn("badmap").unwrap();
    assert_eq!(kernel.manager.wait(ROOT_PID, pid).unwrap(), 0);
}
