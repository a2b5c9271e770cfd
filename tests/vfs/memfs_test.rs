/*!
 * MemFS Tests
 * Handle semantics of the in-memory filesystem as seen through the traits
 */

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;
use vmproc_kernel::vfs::{share, FileSystem, MemFS, OpenFile, VfsError};

#[test]
fn test_memfs_basic() {
    let fs = MemFS::new();
    fs.create("test.txt", b"hello".to_vec()).unwrap();

    let mut file = fs.open("/test.txt").unwrap();
    let mut buf = [0u8; 16];
    let n = file.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello");
    assert_eq!(file.read(&mut buf).unwrap(), 0);

    assert!(matches!(fs.open("missing.txt"), Err(VfsError::NotFound(_))));
    assert!(matches!(fs.open(""), Err(VfsError::InvalidPath(_))));
}

#[test]
fn test_write_extends_and_is_visible_to_other_handles() {
    let fs = MemFS::new();
    fs.create("grow", b"ab".to_vec()).unwrap();

    let mut writer = fs.open("grow").unwrap();
    writer.write_all_at(4, b"ef").unwrap();
    assert_eq!(writer.length(), 6);

    let mut reader = fs.open("grow").unwrap();
    let mut buf = [0xFFu8; 6];
    reader.read_exact_at(0, &mut buf).unwrap();
    assert_eq!(&buf, b"ab\0\0ef");
}

#[test]
fn test_removed_file_stays_readable_through_open_handle() {
    let fs = MemFS::new();
    fs.create("ghost", b"boo".to_vec()).unwrap();
    let mut file = fs.open("ghost").unwrap();

    assert!(fs.remove("ghost"));
    assert!(!fs.remove("ghost"));
    assert!(fs.open("ghost").is_err());

    let mut buf = [0u8; 3];
    file.read_exact_at(0, &mut buf).unwrap();
    assert_eq!(&buf, b"boo");
}

#[test]
fn test_deny_write_counts_every_handle() {
    let fs = MemFS::new();
    fs.create("prog", b"code".to_vec()).unwrap();

    let mut first = fs.open("prog").unwrap();
    first.deny_write();
    let second = first.duplicate().unwrap();
    assert!(matches!(
        fs.create("prog", b"patched".to_vec()),
        Err(VfsError::WriteDenied(_))
    ));

    drop(first);
    assert!(fs.is_write_denied("prog"));
    drop(second);
    assert!(!fs.is_write_denied("prog"));
    fs.create("prog", b"patched".to_vec()).unwrap();
    assert_eq!(fs.contents("prog").unwrap(), b"patched");
}

#[test]
fn test_shared_handle_across_threads() {
    let fs = MemFS::new();
    fs.create("counter", vec![0u8; 8]).unwrap();
    let file = share(fs.open("counter").unwrap());

    let handles: Vec<_> = (0..4u8)
        .map(|i| {
            let file = Arc::clone(&file);
            thread::spawn(move || {
                file.lock().write_all_at(u64::from(i) * 2, &[i + 1; 2]).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(fs.contents("counter").unwrap(), vec![1, 1, 2, 2, 3, 3, 4, 4]);
}
