/*!
 * Eviction Tests
 * Dirty anonymous pages survive swap, file pages are written back, and
 * concurrent address spaces share one small pool
 */

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;
use vmproc_kernel::core::limits::{PAGE_SIZE, USER_STACK};
use vmproc_kernel::core::types::vpn_of;
use vmproc_kernel::vfs::share;
use vmproc_kernel::vm::{Page, SharedSpace};
use vmproc_kernel::{EvictionPolicy, FileSystem, MemFS, Vm, VmConfig, VmError};

const BASE: usize = 0x2000_0000;

fn pattern(page: usize) -> Vec<u8> {
    (0..PAGE_SIZE).map(|i| ((i * 7 + page * 13) % 251) as u8).collect()
}

fn fill(space: &SharedSpace, pages: usize) {
    let mut space = space.lock();
    for page in 0..pages {
        let addr = BASE + page * PAGE_SIZE;
        space.insert_page(Page::anonymous(vpn_of(addr), true)).unwrap();
        space.write(addr, &pattern(page), USER_STACK).unwrap();
    }
}

fn check(space: &SharedSpace, pages: usize) {
    let mut space = space.lock();
    let mut buf = vec![0u8; PAGE_SIZE];
    for page in 0..pages {
        space.read(BASE + page * PAGE_SIZE, &mut buf, USER_STACK).unwrap();
        assert_eq!(buf, pattern(page), "page {} corrupted", page);
    }
}

#[test]
fn test_dirty_anonymous_pages_survive_eviction_byte_for_byte() {
    for policy in [EvictionPolicy::Fifo, EvictionPolicy::Clock] {
        let vm = Vm::with_config(
            VmConfig::new()
                .with_frames(4)
                .with_swap_slots(32)
                .with_eviction(policy),
        );
        let space = vm.new_space(1);
        fill(&space, 12);
        check(&space, 12);

        let stats = vm.stats();
        assert!(stats.swap_outs >= 8, "{:?}: {:?}", policy, stats);
        assert!(stats.swap_ins > 0);
        vm.check_consistency().unwrap();
    }
}

#[test]
fn test_untouched_anonymous_pages_skip_swap() {
    let vm = Vm::with_config(VmConfig::new().with_frames(2).with_swap_slots(4));
    let space = vm.new_space(1);
    let mut space = space.lock();
    let mut buf = [1u8; 8];
    for page in 0..6 {
        let addr = BASE + page * PAGE_SIZE;
        space.insert_page(Page::anonymous(vpn_of(addr), false)).unwrap();
        space.read(addr, &mut buf, USER_STACK).unwrap();
        assert_eq!(buf, [0u8; 8]);
    }
    assert_eq!(vm.stats().swap_outs, 0);
    assert!(vm.stats().evictions >= 4);
}

#[test]
fn test_swap_exhaustion_is_reported() {
    let vm = Vm::with_config(VmConfig::new().with_frames(1).with_swap_slots(1));
    let space = vm.new_space(1);
    let mut space = space.lock();
    for page in 0..3 {
        let addr = BASE + page * PAGE_SIZE;
        space.insert_page(Page::anonymous(vpn_of(addr), true)).unwrap();
    }
    space.write(BASE, b"a", USER_STACK).unwrap();
    space.write(BASE + PAGE_SIZE, b"b", USER_STACK).unwrap();
    assert!(matches!(
        space.write(BASE + 2 * PAGE_SIZE, b"c", USER_STACK),
        Err(VmError::SwapExhausted { .. })
    ));
}

#[test]
fn test_evicted_file_page_written_back() {
    let fs = MemFS::new();
    fs.create("data", vec![b'.'; 2 * PAGE_SIZE]).unwrap();
    let file = share(fs.open("data").unwrap());

    let vm = Vm::with_config(VmConfig::new().with_frames(1).with_swap_slots(4));
    let space = vm.new_space(1);
    let mut space = space.lock();
    space.map_file(BASE, 2 * PAGE_SIZE, file, 0, true).unwrap();

    space.write(BASE + 10, b"first", USER_STACK).unwrap();
    // Touching the second page evicts the first
    space.write(BASE + PAGE_SIZE, b"second", USER_STACK).unwrap();

    let contents = fs.contents("data").unwrap();
    assert_eq!(&contents[10..15], b"first");
    assert!(vm.stats().write_backs >= 1);
    assert_eq!(vm.stats().swap_outs, 0);

    space.unmap_file(BASE).unwrap();
    let contents = fs.contents("data").unwrap();
    assert_eq!(&contents[PAGE_SIZE..PAGE_SIZE + 6], b"second");
    assert_eq!(contents.len(), 2 * PAGE_SIZE);
}

#[test]
fn test_concurrent_spaces_share_small_pool() {
    let vm = Vm::with_config(VmConfig::new().with_frames(8).with_swap_slots(128));
    let workers: Vec<_> = (1..=3)
        .map(|pid| {
            let vm = Arc::clone(&vm);
            thread::spawn(move || {
                let space = vm.new_space(pid);
                {
                    let mut guard = space.lock();
                    for page in 0..10 {
                        let addr = BASE + page * PAGE_SIZE;
                        guard.insert_page(Page::anonymous(vpn_of(addr), true)).unwrap();
                    }
                }
                for round in 0..3 {
                    for page in 0..10 {
                        let addr = BASE + page * PAGE_SIZE;
                        let value = (pid as usize * 31 + page + round) as u8;
                        space.lock().write(addr, &[value; 64], USER_STACK).unwrap();
                        let mut buf = [0u8; 64];
                        space.lock().read(addr, &mut buf, USER_STACK).unwrap();
                        assert_eq!(buf, [value; 64]);
                    }
                }
                space
            })
        })
        .collect();

    let spaces: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    vm.check_consistency().unwrap();
    drop(spaces);
    assert_eq!(vm.stats().free_frames, 8);
    assert_eq!(vm.stats().swap_slots_used, 0);
}
