/*!
 * ELF Image Builder
 * Assembles minimal static executables for the demo kernel and tests
 */

use super::elf::{
    ElfHeader, ProgramHeader, EM_X86_64, ET_EXEC, EV_CURRENT, ELF_HEADER_SIZE, PF_R, PF_W, PF_X,
    PROGRAM_HEADER_SIZE, PT_LOAD,
};
use crate::core::limits::{PAGE_MASK, PAGE_SIZE};
use crate::core::types::{page_round_up, Address};

#[derive(Debug, Clone)]
struct SegmentSpec {
    vaddr: Address,
    data: Vec<u8>,
    mem_size: usize,
    flags: u32,
}

enum Entry {
    Segment(SegmentSpec),
    Raw(ProgramHeader),
}

/// Builder for static x86-64 executables.
///
/// Segment data is placed at file offsets congruent to the segment address
/// modulo the page size.
pub struct ElfBuilder {
    entry: Address,
    e_type: u16,
    machine: u16,
    entries: Vec<Entry>,
}

impl ElfBuilder {
    pub fn new(entry: Address) -> Self {
        Self {
            entry,
            e_type: ET_EXEC,
            machine: EM_X86_64,
            entries: Vec::new(),
        }
    }

    /// Loadable segment at `vaddr` holding `data`, padded with zeros to `mem_size`
    pub fn segment(
        mut self,
        vaddr: Address,
        data: impl Into<Vec<u8>>,
        mem_size: usize,
        writable: bool,
    ) -> Self {
        let data = data.into();
        let flags = if writable { PF_R | PF_W } else { PF_R | PF_X };
        self.entries.push(Entry::Segment(SegmentSpec {
            vaddr,
            mem_size: mem_size.max(data.len()),
            data,
            flags,
        }));
        self
    }

    /// Read-only, executable segment sized to its contents
    pub fn text(self, vaddr: Address, data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        let len = data.len();
        self.segment(vaddr, data, len, false)
    }

    /// Writable zero-filled segment
    pub fn bss(self, vaddr: Address, mem_size: usize) -> Self {
        self.segment(vaddr, Vec::new(), mem_size, true)
    }

    /// Program header emitted exactly as given, with no data
    pub fn raw_header(mut self, header: ProgramHeader) -> Self {
        self.entries.push(Entry::Raw(header));
        self
    }

    pub fn with_type(mut self, e_type: u16) -> Self {
        self.e_type = e_type;
        self
    }

    pub fn with_machine(mut self, machine: u16) -> Self {
        self.machine = machine;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let phnum = self.entries.len();
        let header = ElfHeader {
            e_type: self.e_type,
            e_machine: self.machine,
            e_version: EV_CURRENT,
            e_entry: self.entry as u64,
            e_phoff: ELF_HEADER_SIZE as u64,
            e_phentsize: PROGRAM_HEADER_SIZE as u16,
            e_phnum: phnum as u16,
        };

        let mut cursor = page_round_up(ELF_HEADER_SIZE + phnum * PROGRAM_HEADER_SIZE);
        let mut headers = Vec::with_capacity(phnum);
        let mut blobs: Vec<(usize, &[u8])> = Vec::new();

        for entry in &self.entries {
            match entry {
                Entry::Raw(ph) => headers.push(*ph),
                Entry::Segment(seg) => {
                    let offset = page_round_up(cursor) + (seg.vaddr & PAGE_MASK);
                    cursor = offset + seg.data.len();
                    blobs.push((offset, seg.data.as_slice()));
                    headers.push(ProgramHeader {
                        p_type: PT_LOAD,
                        p_flags: seg.flags,
                        p_offset: offset as u64,
                        p_vaddr: seg.vaddr as u64,
                        p_filesz: seg.data.len() as u64,
                        p_memsz: seg.mem_size as u64,
                        p_align: PAGE_SIZE as u64,
                    });
                }
            }
        }

        let mut image = vec![0u8; cursor];
        image[..ELF_HEADER_SIZE].copy_from_slice(&header.encode());
        for (i, ph) in headers.iter().enumerate() {
            let at = ELF_HEADER_SIZE + i * PROGRAM_HEADER_SIZE;
            image[at..at + PROGRAM_HEADER_SIZE].copy_from_slice(&ph.encode());
        }
        for (offset, data) in blobs {
            image[offset..offset + data.len()].copy_from_slice(data);
        }
        image
    }
}
