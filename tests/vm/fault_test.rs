/*!
 * Page Fault Tests
 * Stack growth bounds, invalid accesses and protection faults
 */

use vmproc_kernel::core::limits::{PAGE_SIZE, USER_STACK, USER_TOP};
use vmproc_kernel::core::types::vpn_of;
use vmproc_kernel::vm::Page;
use vmproc_kernel::{FaultInfo, Vm, VmConfig, VmError};

fn vm() -> std::sync::Arc<Vm> {
    Vm::with_config(
        VmConfig::new()
            .with_frames(16)
            .with_swap_slots(16)
            .with_stack_limit(8 * PAGE_SIZE),
    )
}

#[test]
fn test_stack_grows_for_pushes_only() {
    let vm = vm();
    let space = vm.new_space(1);
    let mut space = space.lock();
    space.setup_stack().unwrap();

    let rsp = USER_STACK - 3 * PAGE_SIZE;
    space
        .handle_fault(&FaultInfo::not_present(rsp - 8, true, rsp))
        .unwrap();
    assert_eq!(space.stack_bottom(), USER_STACK - 4 * PAGE_SIZE);

    let far = rsp - 2 * PAGE_SIZE;
    assert_eq!(
        space.handle_fault(&FaultInfo::not_present(far, true, rsp)),
        Err(VmError::SegmentationFault(far))
    );
}

#[test]
fn test_stack_limit_enforced() {
    let vm = vm();
    let space = vm.new_space(1);
    let mut space = space.lock();
    space.setup_stack().unwrap();

    let beyond = USER_STACK - 9 * PAGE_SIZE;
    assert_eq!(
        space.handle_fault(&FaultInfo::not_present(beyond, true, beyond)),
        Err(VmError::SegmentationFault(beyond))
    );
    let inside = USER_STACK - 8 * PAGE_SIZE;
    space
        .handle_fault(&FaultInfo::not_present(inside, true, inside))
        .unwrap();
}

#[test]
fn test_invalid_addresses() {
    let vm = vm();
    let space = vm.new_space(1);
    let mut space = space.lock();
    let mut buf = [0u8; 4];
    assert_eq!(
        space.read(0, &mut buf, USER_STACK),
        Err(VmError::InvalidAddress(0))
    );
    assert_eq!(
        space.read(USER_TOP, &mut buf, USER_STACK),
        Err(VmError::InvalidAddress(USER_TOP))
    );
    assert_eq!(
        space.read(0x5000_0000, &mut buf, USER_STACK),
        Err(VmError::SegmentationFault(0x5000_0000))
    );
}

#[test]
fn test_protection_faults() {
    let vm = vm();
    let space = vm.new_space(1);
    let mut space = space.lock();
    let addr = 0x3000_0000;
    space.insert_page(Page::anonymous(vpn_of(addr), false)).unwrap();

    let mut buf = [0u8; 4];
    space.read(addr, &mut buf, USER_STACK).unwrap();
    assert_eq!(
        space.write(addr, b"x", USER_STACK),
        Err(VmError::ProtectionViolation(addr))
    );
    assert_eq!(
        space.handle_fault(&FaultInfo::protection(addr, USER_STACK)),
        Err(VmError::ProtectionViolation(addr))
    );
}
