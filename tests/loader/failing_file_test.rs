/*!
 * Failing Backing File Tests
 * A read error while populating a page leaves it pending and releases
 * its frame; during an eager load it rolls the whole image back
 */

use mockall::mock;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use vmproc_kernel::core::limits::{PAGE_SIZE, USER_STACK};
use vmproc_kernel::core::types::vpn_of;
use vmproc_kernel::loader::{self, CommandLine, LoadError};
use vmproc_kernel::vfs::VfsResult;
use vmproc_kernel::vm::PageKind;
use vmproc_kernel::{ElfBuilder, FileSystem, LoadStrategy, OpenFile, VfsError, Vm, VmConfig, VmError};

const ENTRY: usize = 0x40_1000;

mock! {
    pub Disk {}

    impl OpenFile for Disk {
        fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize>;
        fn write(&mut self, buf: &[u8]) -> VfsResult<usize>;
        fn seek(&mut self, pos: u64);
        fn tell(&self) -> u64;
        fn length(&self) -> u64;
        fn deny_write(&mut self);
        fn allow_write(&mut self);
        fn duplicate(&self) -> VfsResult<Box<dyn OpenFile>>;
    }
}

/// File serving `image` that fails every read at or past `fail_from`
fn disk(image: Vec<u8>, fail_from: u64) -> MockDisk {
    let pos = Arc::new(AtomicU64::new(0));
    let len = image.len() as u64;
    let mut file = MockDisk::new();

    let p = Arc::clone(&pos);
    file.expect_seek().returning(move |at| p.store(at, Ordering::SeqCst));
    let p = Arc::clone(&pos);
    file.expect_tell().returning(move || p.load(Ordering::SeqCst));
    file.expect_length().return_const(len);
    file.expect_deny_write().return_const(());
    file.expect_allow_write().return_const(());
    file.expect_read().returning(move |buf| {
        let at = pos.load(Ordering::SeqCst);
        if at >= fail_from {
            return Err(VfsError::IoError("bad sector".into()));
        }
        let start = (at as usize).min(image.len());
        let n = buf.len().min(image.len() - start);
        buf[..n].copy_from_slice(&image[start..start + n]);
        pos.store(at + n as u64, Ordering::SeqCst);
        Ok(n)
    });
    file
}

/// Filesystem handing out one prepared file
struct OneFile(Mutex<Option<MockDisk>>);

impl FileSystem for OneFile {
    fn open(&self, name: &str) -> VfsResult<Box<dyn OpenFile>> {
        self.0
            .lock()
            .take()
            .map(|file| Box::new(file) as Box<dyn OpenFile>)
            .ok_or_else(|| VfsError::NotFound(name.to_string()))
    }

    fn name(&self) -> &str {
        "one-file"
    }
}

fn image() -> Vec<u8> {
    ElfBuilder::new(ENTRY)
        .text(ENTRY, vec![0x90; 64])
        .segment(0x60_0000, b"payload".to_vec(), PAGE_SIZE, true)
        .build()
}

#[test]
fn test_eager_load_rolls_back_on_read_error() {
    let vm = Vm::with_config(VmConfig::new().with_frames(8).with_swap_slots(8));
    let fs = OneFile(Mutex::new(Some(disk(image(), PAGE_SIZE as u64))));
    let space = vm.new_space(1);
    let mut space = space.lock();

    let cmd = CommandLine::parse("prog").unwrap();
    let err = loader::load(&mut space, &fs, &cmd, LoadStrategy::Eager).unwrap_err();
    assert!(matches!(err, LoadError::Memory(VmError::Backing(_))), "{:?}", err);
    assert!(space.spt().is_empty());
    assert!(space.page_table().is_empty());
    assert_eq!(vm.stats().free_frames, 8);
}

#[test]
fn test_lazy_fault_failure_keeps_page_pending() {
    let vm = Vm::with_config(VmConfig::new().with_frames(8).with_swap_slots(8));
    let fs = OneFile(Mutex::new(Some(disk(image(), PAGE_SIZE as u64))));
    let space = vm.new_space(1);
    let mut space = space.lock();

    let cmd = CommandLine::parse("prog").unwrap();
    loader::load(&mut space, &fs, &cmd, LoadStrategy::Lazy).unwrap();
    let free_after_load = vm.stats().free_frames;

    let mut buf = [0u8; 4];
    assert!(matches!(
        space.read(ENTRY, &mut buf, USER_STACK),
        Err(VmError::Backing(_))
    ));
    let page = space.spt().find(vpn_of(ENTRY)).unwrap();
    assert!(matches!(page.kind, PageKind::Uninit(_)));
    assert!(page.frame.is_none());
    assert_eq!(vm.stats().free_frames, free_after_load);
    vm.check_consistency().unwrap();
}
