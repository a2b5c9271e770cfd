/*!
 * ELF64 Parsing
 * Executable header and program header decoding and segment validation
 */

use super::types::{LoadError, LoadResult};
use crate::core::limits::{MAX_PROGRAM_HEADERS, PAGE_MASK, PAGE_SIZE};
use crate::core::types::{is_user_vaddr, page_round_up, Address};
use crate::vfs::OpenFile;

pub const ELF_HEADER_SIZE: usize = 64;
pub const PROGRAM_HEADER_SIZE: usize = 56;

/// Magic, 64-bit class, little endian, ident version 1
pub const ELF_IDENT: [u8; 7] = [0x7f, b'E', b'L', b'F', 2, 1, 1];
pub const ET_EXEC: u16 = 2;
pub const EM_X86_64: u16 = 0x3E;
pub const EV_CURRENT: u32 = 1;

// Segment types
pub const PT_NULL: u32 = 0;
pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;
pub const PT_INTERP: u32 = 3;
pub const PT_NOTE: u32 = 4;
pub const PT_SHLIB: u32 = 5;
pub const PT_PHDR: u32 = 6;
pub const PT_STACK: u32 = 0x6474_e551;

// Segment flags
pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

#[inline]
fn le_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

#[inline]
fn le_u32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

#[inline]
fn le_u64(b: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&b[at..at + 8]);
    u64::from_le_bytes(raw)
}

/// The fields of the executable header the loader uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfHeader {
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_phentsize: u16,
    pub e_phnum: u16,
}

impl ElfHeader {
    /// Decode and check a 64-byte executable header
    pub fn parse(raw: &[u8]) -> LoadResult<Self> {
        if raw.len() < ELF_HEADER_SIZE {
            return Err(LoadError::BadHeader("truncated header"));
        }
        if raw[..ELF_IDENT.len()] != ELF_IDENT {
            return Err(LoadError::BadHeader("bad ELF identification"));
        }
        let header = Self {
            e_type: le_u16(raw, 16),
            e_machine: le_u16(raw, 18),
            e_version: le_u32(raw, 20),
            e_entry: le_u64(raw, 24),
            e_phoff: le_u64(raw, 32),
            e_phentsize: le_u16(raw, 54),
            e_phnum: le_u16(raw, 56),
        };
        if header.e_type != ET_EXEC {
            return Err(LoadError::BadHeader("not an executable"));
        }
        if header.e_machine != EM_X86_64 {
            return Err(LoadError::BadHeader("not an x86-64 image"));
        }
        if header.e_version != EV_CURRENT {
            return Err(LoadError::BadHeader("unknown ELF version"));
        }
        if header.e_phentsize as usize != PROGRAM_HEADER_SIZE {
            return Err(LoadError::BadHeader("unexpected program header size"));
        }
        if header.e_phnum as usize > MAX_PROGRAM_HEADERS {
            return Err(LoadError::BadHeader("too many program headers"));
        }
        Ok(header)
    }

    pub fn encode(&self) -> [u8; ELF_HEADER_SIZE] {
        let mut raw = [0u8; ELF_HEADER_SIZE];
        raw[..ELF_IDENT.len()].copy_from_slice(&ELF_IDENT);
        raw[16..18].copy_from_slice(&self.e_type.to_le_bytes());
        raw[18..20].copy_from_slice(&self.e_machine.to_le_bytes());
        raw[20..24].copy_from_slice(&self.e_version.to_le_bytes());
        raw[24..32].copy_from_slice(&self.e_entry.to_le_bytes());
        raw[32..40].copy_from_slice(&self.e_phoff.to_le_bytes());
        raw[52..54].copy_from_slice(&(ELF_HEADER_SIZE as u16).to_le_bytes());
        raw[54..56].copy_from_slice(&self.e_phentsize.to_le_bytes());
        raw[56..58].copy_from_slice(&self.e_phnum.to_le_bytes());
        raw
    }
}

/// One program header entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

impl ProgramHeader {
    pub fn parse(raw: &[u8]) -> Self {
        Self {
            p_type: le_u32(raw, 0),
            p_flags: le_u32(raw, 4),
            p_offset: le_u64(raw, 8),
            p_vaddr: le_u64(raw, 16),
            p_filesz: le_u64(raw, 32),
            p_memsz: le_u64(raw, 40),
            p_align: le_u64(raw, 48),
        }
    }

    pub fn encode(&self) -> [u8; PROGRAM_HEADER_SIZE] {
        let mut raw = [0u8; PROGRAM_HEADER_SIZE];
        raw[0..4].copy_from_slice(&self.p_type.to_le_bytes());
        raw[4..8].copy_from_slice(&self.p_flags.to_le_bytes());
        raw[8..16].copy_from_slice(&self.p_offset.to_le_bytes());
        raw[16..24].copy_from_slice(&self.p_vaddr.to_le_bytes());
        raw[24..32].copy_from_slice(&self.p_vaddr.to_le_bytes());
        raw[32..40].copy_from_slice(&self.p_filesz.to_le_bytes());
        raw[40..48].copy_from_slice(&self.p_memsz.to_le_bytes());
        raw[48..56].copy_from_slice(&self.p_align.to_le_bytes());
        raw
    }

    pub fn is_writable(&self) -> bool {
        self.p_flags & PF_W != 0
    }

    /// Check a PT_LOAD entry against a file of `file_len` bytes
    pub fn validate(&self, file_len: u64) -> Result<(), &'static str> {
        let mask = PAGE_MASK as u64;
        if self.p_offset & mask != self.p_vaddr & mask {
            return Err("file offset and address differ in page offset");
        }
        if self.p_offset > file_len {
            return Err("file offset past end of file");
        }
        if self.p_memsz < self.p_filesz {
            return Err("memory size smaller than file size");
        }
        if self.p_memsz == 0 {
            return Err("empty segment");
        }
        let start = usize::try_from(self.p_vaddr).map_err(|_| "address out of range")?;
        let size = usize::try_from(self.p_memsz).map_err(|_| "size out of range")?;
        let end = start.checked_add(size).ok_or("segment wraps around")?;
        if !is_user_vaddr(start) || !is_user_vaddr(end) {
            return Err("segment reaches kernel space");
        }
        if start < PAGE_SIZE {
            return Err("segment maps page 0");
        }
        Ok(())
    }
}

/// Page-granular placement of a validated PT_LOAD segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLayout {
    pub file_page: u64,
    pub mem_page: Address,
    pub read_bytes: usize,
    pub zero_bytes: usize,
    pub writable: bool,
}

/// One page of a segment: where it goes and what part of the file fills it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPage {
    pub addr: Address,
    pub offset: u64,
    pub read_bytes: usize,
}

impl SegmentLayout {
    /// Layout of a header that passed [`ProgramHeader::validate`]
    pub fn of(ph: &ProgramHeader) -> Self {
        let in_page = ph.p_vaddr as usize & PAGE_MASK;
        let (read_bytes, zero_bytes) = if ph.p_filesz > 0 {
            let read = in_page + ph.p_filesz as usize;
            (read, page_round_up(in_page + ph.p_memsz as usize) - read)
        } else {
            (0, page_round_up(in_page + ph.p_memsz as usize))
        };
        Self {
            file_page: ph.p_offset & !(PAGE_MASK as u64),
            mem_page: ph.p_vaddr as usize & !PAGE_MASK,
            read_bytes,
            zero_bytes,
            writable: ph.is_writable(),
        }
    }

    pub fn page_count(&self) -> usize {
        (self.read_bytes + self.zero_bytes) / PAGE_SIZE
    }

    pub fn pages(&self) -> impl Iterator<Item = SegmentPage> + '_ {
        (0..self.page_count()).map(move |i| SegmentPage {
            addr: self.mem_page + i * PAGE_SIZE,
            offset: self.file_page + (i * PAGE_SIZE) as u64,
            read_bytes: self.read_bytes.saturating_sub(i * PAGE_SIZE).min(PAGE_SIZE),
        })
    }
}

/// Read and check every program header, returning the loadable segments.
/// Nothing is mapped here, so a bad image leaves no trace.
pub fn read_segments(
    file: &mut dyn OpenFile,
    header: &ElfHeader,
) -> LoadResult<Vec<SegmentLayout>> {
    let file_len = file.length();
    let mut segments = Vec::new();
    let mut raw = [0u8; PROGRAM_HEADER_SIZE];

    for index in 0..header.e_phnum as usize {
        let offset = (index as u64)
            .checked_mul(PROGRAM_HEADER_SIZE as u64)
            .and_then(|rel| header.e_phoff.checked_add(rel))
            .filter(|offset| *offset <= file_len)
            .ok_or(LoadError::HeaderOutOfRange(index))?;
        file.read_exact_at(offset, &mut raw)
            .map_err(|_| LoadError::HeaderOutOfRange(index))?;
        let ph = ProgramHeader::parse(&raw);

        match ph.p_type {
            PT_DYNAMIC | PT_INTERP | PT_SHLIB => {
                return Err(LoadError::UnsupportedSegment(ph.p_type));
            }
            PT_LOAD => {
                ph.validate(file_len)
                    .map_err(|reason| LoadError::InvalidSegment { index, reason })?;
                segments.push(SegmentLayout::of(&ph));
            }
            // PT_NULL, PT_NOTE, PT_PHDR, PT_STACK and anything unknown
            _ => {}
        }
    }
    Ok(segments)
}
