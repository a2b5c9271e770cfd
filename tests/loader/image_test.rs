/*!
 * Image Loading Tests
 * Lazy and eager segment registration, rejection before mapping, and the
 * write denial on running executables
 */

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use vmproc_kernel::core::limits::{PAGE_SIZE, USER_STACK};
use vmproc_kernel::core::types::vpn_of;
use vmproc_kernel::loader::elf::{ProgramHeader, PF_R, PF_W, PT_DYNAMIC, PT_LOAD};
use vmproc_kernel::loader::{self, CommandLine};
use vmproc_kernel::vm::PageKind;
use vmproc_kernel::{ElfBuilder, LoadError, LoadStrategy, MemFS, Vm, VmConfig};

const ENTRY: usize = 0x40_1000;

fn vm() -> std::sync::Arc<Vm> {
    Vm::with_config(VmConfig::new().with_frames(32).with_swap_slots(32))
}

fn fs_with(name: &str, image: Vec<u8>) -> MemFS {
    let fs = MemFS::new();
    fs.create(name, image).unwrap();
    fs
}

fn standard_image() -> Vec<u8> {
    ElfBuilder::new(ENTRY)
        .text(ENTRY, vec![0x90; 100])
        .segment(0x60_0000, b"hello data".to_vec(), 3 * PAGE_SIZE, true)
        .build()
}

#[test]
fn test_lazy_load_registers_without_reading() {
    let vm = vm();
    let fs = fs_with("prog", standard_image());
    let space = vm.new_space(1);
    let mut space = space.lock();

    let cmd = CommandLine::parse("prog x").unwrap();
    let image = loader::load(&mut space, &fs, &cmd, LoadStrategy::Lazy).unwrap();

    assert_eq!(image.entry, ENTRY);
    assert_eq!(image.pages, 4);
    // Only the stack page is resident
    assert_eq!(space.spt().resident_count(), 1);
    assert!(matches!(
        space.spt().find(vpn_of(ENTRY)).unwrap().kind,
        PageKind::Uninit(_)
    ));

    let mut buf = [0u8; 10];
    space.read(0x60_0000, &mut buf, USER_STACK).unwrap();
    assert_eq!(&buf, b"hello data");
    assert!(matches!(
        space.spt().find(vpn_of(0x60_0000)).unwrap().kind,
        PageKind::Anonymous(_)
    ));

    // bss beyond the file contents reads as zeros
    space.read(0x60_0000 + 2 * PAGE_SIZE, &mut buf, USER_STACK).unwrap();
    assert_eq!(buf, [0u8; 10]);

    // text is read-only
    assert!(space.write(ENTRY, b"x", USER_STACK).is_err());
    vm.check_consistency().unwrap();
}

#[test]
fn test_eager_load_makes_segments_resident() {
    let vm = vm();
    let fs = fs_with("prog", standard_image());
    let space = vm.new_space(1);
    let mut space = space.lock();

    let cmd = CommandLine::parse("prog").unwrap();
    let image = loader::load(&mut space, &fs, &cmd, LoadStrategy::Eager).unwrap();
    assert_eq!(space.spt().resident_count(), image.pages + 1);
}

#[test]
fn test_executable_write_denied_while_loaded() {
    let vm = vm();
    let fs = fs_with("prog", standard_image());
    let space = vm.new_space(1);

    let image = {
        let mut space = space.lock();
        let cmd = CommandLine::parse("prog").unwrap();
        loader::load(&mut space, &fs, &cmd, LoadStrategy::Lazy).unwrap()
    };
    assert!(fs.is_write_denied("prog"));
    assert!(fs.create("prog", vec![0u8; 8]).is_err());

    space.lock().destroy();
    drop(image);
    assert!(!fs.is_write_denied("prog"));
}

#[test]
fn test_page_zero_segment_rejected_before_mapping() {
    let vm = vm();
    let image = ElfBuilder::new(ENTRY)
        .text(ENTRY, vec![0x90; 16])
        .segment(0x0, b"null".to_vec(), PAGE_SIZE, true)
        .build();
    let fs = fs_with("bad", image);
    let space = vm.new_space(1);
    let mut space = space.lock();

    let cmd = CommandLine::parse("bad").unwrap();
    let err = loader::load(&mut space, &fs, &cmd, LoadStrategy::Lazy).unwrap_err();
    assert_eq!(
        err,
        LoadError::InvalidSegment {
            index: 1,
            reason: "segment maps page 0"
        }
    );
    assert!(space.spt().is_empty());
    assert_eq!(vm.stats().free_frames, 32);
    assert!(!fs.is_write_denied("bad"));
}

#[test]
fn test_dynamic_segment_rejected() {
    let vm = vm();
    let image = ElfBuilder::new(ENTRY)
        .text(ENTRY, vec![0x90; 16])
        .raw_header(ProgramHeader {
            p_type: PT_DYNAMIC,
            ..ProgramHeader::default()
        })
        .build();
    let fs = fs_with("dyn", image);
    let space = vm.new_space(1);
    let mut space = space.lock();

    let cmd = CommandLine::parse("dyn").unwrap();
    assert_eq!(
        loader::load(&mut space, &fs, &cmd, LoadStrategy::Eager).unwrap_err(),
        LoadError::UnsupportedSegment(PT_DYNAMIC)
    );
    assert!(space.spt().is_empty());
}

#[test]
fn test_missing_and_garbage_files() {
    let vm = vm();
    let fs = fs_with("garbage", vec![0xFFu8; 200]);
    let space = vm.new_space(1);
    let mut space = space.lock();

    let missing = CommandLine::parse("nothing here").unwrap();
    assert!(matches!(
        loader::load(&mut space, &fs, &missing, LoadStrategy::Lazy),
        Err(LoadError::Open { .. })
    ));

    let garbage = CommandLine::parse("garbage").unwrap();
    assert!(matches!(
        loader::load(&mut space, &fs, &garbage, LoadStrategy::Lazy),
        Err(LoadError::BadHeader(_))
    ));
    assert!(space.spt().is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_accepted_segments_never_touch_page_zero(
        vaddr in 0u64..0x20_0000,
        offset_page in 0u64..4,
        filesz in 0u64..0x3000,
        extra in 0u64..0x3000,
    ) {
        let offset = offset_page * PAGE_SIZE as u64 + (vaddr & (PAGE_SIZE as u64 - 1));
        let header = ProgramHeader {
            p_type: PT_LOAD,
            p_flags: PF_R | PF_W,
            p_offset: offset,
            p_vaddr: vaddr,
            p_filesz: filesz,
            p_memsz: filesz + extra,
            p_align: PAGE_SIZE as u64,
        };
        let file_len = 0x8000;
        match header.validate(file_len) {
            Ok(()) => {
                prop_assert!(vaddr >= PAGE_SIZE as u64);
                prop_assert!(offset <= file_len);
                prop_assert!(header.p_memsz > 0);
            }
            Err(reason) => {
                prop_assert!(
                    vaddr < PAGE_SIZE as u64 || header.p_memsz == 0,
                    "unexpected rejection: {}",
                    reason
                );
            }
        }
    }
}
