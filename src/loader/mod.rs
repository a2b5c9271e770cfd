/*!
 * Loader Module
 * Builds a fresh user image in an address space from an ELF executable
 */

pub mod builder;
pub mod elf;
pub mod stack;
pub mod types;

pub use builder::ElfBuilder;
pub use elf::{ElfHeader, ProgramHeader, SegmentLayout};
pub use stack::{build_stack, CommandLine};
pub use types::{LoadError, LoadResult};

use crate::core::types::{Address, IntrFrame, LoadStrategy};
use crate::vfs::{share, FileSystem, SharedFile};
use crate::vm::AddressSpace;
use elf::ELF_HEADER_SIZE;
use log::{debug, info};

/// A loaded program ready to enter user mode
pub struct LoadedImage {
    pub entry: Address,
    pub frame: IntrFrame,
    /// Open, write-denied handle the process keeps for its lifetime
    pub executable: SharedFile,
    pub pages: usize,
}

impl std::fmt::Debug for LoadedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedImage")
            .field("entry", &format_args!("0x{:x}", self.entry))
            .field("frame", &self.frame)
            .field("pages", &self.pages)
            .finish()
    }
}

/// Load `command`'s program into `space`, which must be empty.
///
/// Every program header is checked before any page is registered. On any
/// failure the space is emptied again.
pub fn load(
    space: &mut AddressSpace,
    fs: &dyn FileSystem,
    command: &CommandLine,
    strategy: LoadStrategy,
) -> LoadResult<LoadedImage> {
    let result = load_image(space, fs, command, strategy);
    if result.is_err() {
        space.destroy();
    }
    result
}

fn load_image(
    space: &mut AddressSpace,
    fs: &dyn FileSystem,
    command: &CommandLine,
    strategy: LoadStrategy,
) -> LoadResult<LoadedImage> {
    let name = command.program();
    let file = fs.open(name).map_err(|source| LoadError::Open {
        name: name.to_string(),
        source,
    })?;
    let file = share(file);

    let (header, segments) = {
        let mut handle = file.lock();
        let mut raw = [0u8; ELF_HEADER_SIZE];
        handle
            .read_exact_at(0, &mut raw)
            .map_err(|_| LoadError::BadHeader("truncated header"))?;
        let header = ElfHeader::parse(&raw)?;
        let segments = elf::read_segments(&mut **handle, &header)?;
        (header, segments)
    };

    let mut pages = 0;
    for segment in &segments {
        for page in segment.pages() {
            space.register_pending(
                page.addr,
                segment.writable,
                file.clone(),
                page.offset,
                page.read_bytes,
            )?;
            pages += 1;
        }
    }
    if strategy == LoadStrategy::Eager {
        for page in segments.iter().flat_map(|segment| segment.pages()) {
            space.claim(page.addr)?;
        }
    }
    debug!(
        "pid {}: {} segments, {} pages registered ({:?})",
        space.pid(),
        segments.len(),
        pages,
        strategy
    );

    file.lock().deny_write();

    space.setup_stack()?;
    let entry = header.e_entry as Address;
    let frame = build_stack(space, command, entry)?;

    info!(
        "pid {}: loaded '{}' entry 0x{:x} rsp 0x{:x}",
        space.pid(),
        name,
        entry,
        frame.rsp
    );
    Ok(LoadedImage {
        entry,
        frame,
        executable: file,
        pages,
    })
}
