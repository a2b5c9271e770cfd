/*!
 * Frame/Page Consistency Tests
 * Every owned frame is referenced by exactly the page it names, through
 * inserts, faults, eviction, fork copies and teardown
 */

use pretty_assertions::assert_eq;
use vmproc_kernel::core::limits::{PAGE_SIZE, USER_STACK};
use vmproc_kernel::core::types::vpn_of;
use vmproc_kernel::vm::Page;
use vmproc_kernel::{Vm, VmConfig, VmError};

const BASE: usize = 0x1000_0000;

#[test]
fn test_duplicate_insert_fails() {
    let vm = Vm::with_config(VmConfig::new().with_frames(4).with_swap_slots(4));
    let space = vm.new_space(1);
    let mut space = space.lock();

    space.insert_page(Page::anonymous(vpn_of(BASE), true)).unwrap();
    assert_eq!(
        space.insert_page(Page::anonymous(vpn_of(BASE), false)),
        Err(VmError::AlreadyMapped(BASE))
    );
    assert_eq!(space.spt().len(), 1);
    assert!(space.spt().find(vpn_of(BASE)).unwrap().writable);
}

#[test]
fn test_consistency_holds_across_spaces_under_pressure() {
    let vm = Vm::with_config(VmConfig::new().with_frames(6).with_swap_slots(64));
    let spaces: Vec<_> = (1..=3).map(|pid| vm.new_space(pid)).collect();

    for (i, space) in spaces.iter().enumerate() {
        let mut space = space.lock();
        for page in 0..5 {
            let addr = BASE + page * PAGE_SIZE;
            space.insert_page(Page::anonymous(vpn_of(addr), true)).unwrap();
            space.write(addr, &[(i * 16 + page) as u8; 32], USER_STACK).unwrap();
        }
    }
    vm.check_consistency().unwrap();

    for (i, space) in spaces.iter().enumerate() {
        let mut space = space.lock();
        for page in 0..5 {
            let mut buf = [0u8; 32];
            space.read(BASE + page * PAGE_SIZE, &mut buf, USER_STACK).unwrap();
            assert_eq!(buf, [(i * 16 + page) as u8; 32]);
        }
        space.verify_frames().unwrap();
    }
    vm.check_consistency().unwrap();

    let stats = vm.stats();
    assert_eq!(stats.resident_frames + stats.free_frames, stats.total_frames);
    assert!(stats.evictions > 0);
}

#[test]
fn test_fork_copy_is_independent_and_consistent() {
    let vm = Vm::with_config(VmConfig::new().with_frames(8).with_swap_slots(32));
    let parent = vm.new_space(1);
    let child = vm.new_space(2);

    {
        let mut parent = parent.lock();
        for page in 0..4 {
            let addr = BASE + page * PAGE_SIZE;
            parent.insert_page(Page::anonymous(vpn_of(addr), true)).unwrap();
            parent.write(addr, &[0xAA; 16], USER_STACK).unwrap();
        }
        let mut child = child.lock();
        child.copy_from(&parent).unwrap();
        assert_eq!(child.spt().len(), parent.spt().len());
    }
    vm.check_consistency().unwrap();

    child.lock().write(BASE, &[0xBB; 16], USER_STACK).unwrap();

    let mut buf = [0u8; 16];
    parent.lock().read(BASE, &mut buf, USER_STACK).unwrap();
    assert_eq!(buf, [0xAA; 16]);
    child.lock().read(BASE, &mut buf, USER_STACK).unwrap();
    assert_eq!(buf, [0xBB; 16]);
    child.lock().read(BASE + 3 * PAGE_SIZE, &mut buf, USER_STACK).unwrap();
    assert_eq!(buf, [0xAA; 16]);
    vm.check_consistency().unwrap();
}

#[test]
fn test_teardown_returns_every_frame_and_slot() {
    let vm = Vm::with_config(VmConfig::new().with_frames(3).with_swap_slots(16));
    {
        let space = vm.new_space(1);
        let mut space = space.lock();
        for page in 0..8 {
            let addr = BASE + page * PAGE_SIZE;
            space.insert_page(Page::anonymous(vpn_of(addr), true)).unwrap();
            space.write(addr, b"dirty", USER_STACK).unwrap();
        }
        assert!(vm.swap().used_slots() > 0);
    }

    let stats = vm.stats();
    assert_eq!(stats.free_frames, 3);
    assert_eq!(stats.swap_slots_used, 0);
    vm.check_consistency().unwrap();
}
