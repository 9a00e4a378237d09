//! The narrow interface the emitter consumes from the surrounding
//! object-file writer (spec §1 "Out of scope", §6 "Consumed").
//!
//! A concrete implementation (backed by a real ELF or Mach-O section-header
//! table) lives outside this crate, the same way `goblin::mach::writer` and
//! `goblin::elf::writer` own their own `data: Vec<u8>` and section tables
//! while exposing narrow mutation methods. This module only defines the
//! boundary; [`crate::emitter::Emitter`] is generic over it.

use alloc::vec::Vec;

use crate::container::ObjectFormat;
use crate::error::Result;

/// One of the four sections the emitter writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionId {
    DebugInfo,
    DebugLine,
    DebugAbbrev,
    DebugAranges,
    /// Backs the String Table component (spec §3 "String Table"). spec.md
    /// names no target section for it, but the `strp` forms the DIE
    /// Builder and header writers emit need one to point into; this is
    /// that section.
    DebugStr,
}

/// A single non-contiguous write, mirroring spec §6's `pwritev_all`.
#[derive(Debug, Clone, Copy)]
pub struct IoSlice<'a> {
    pub bytes: &'a [u8],
}

impl<'a> IoSlice<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        IoSlice { bytes }
    }
}

/// The collaborator the emitter drives for all file I/O and section-size
/// bookkeeping. Every method here corresponds 1:1 to an entry in spec §6.
pub trait ObjectFile {
    /// The target's pointer-width/endianness/format context.
    fn format(&self) -> ObjectFormat;

    /// `{file_offset, size}` of the given section, as currently recorded in
    /// the section-header table.
    fn section_info(&self, id: SectionId) -> (u64, u64);

    /// How much room exists at `offset` before the next unrelated
    /// allocation, without moving anything.
    fn allocated_size(&self, offset: u64) -> Result<u64>;

    /// Ask the collaborator for `needed` bytes of free space aligned to
    /// `alignment`; it may place this anywhere in the file, including past
    /// the current end.
    fn find_free_space(&mut self, needed: u64, alignment: u64) -> Result<u64>;

    /// Write `buf` at `offset`, short writes are `Error::Io` and fatal.
    fn pwrite_all(&mut self, buf: &[u8], offset: u64) -> Result<()>;

    /// Vectored write at `offset`; used by the NOP Padding Writer (spec
    /// §4.6) to combine padding and payload into one syscall.
    fn pwritev_all(&mut self, iovecs: &[IoSlice<'_>], offset: u64) -> Result<()>;

    /// Copy `len` bytes from `src_off` to `dst_off` (used when a section is
    /// relocated to a larger free region).
    fn copy_range_all(&mut self, src_off: u64, dst_off: u64, len: u64) -> Result<()>;

    /// Record a new `size` for `id`, and mark the section's own header (and
    /// the section-header table, if the offset moved) dirty for rewrite.
    fn resize_section(&mut self, id: SectionId, new_size: u64, new_offset: Option<u64>) -> Result<()>;
}

/// In-memory `ObjectFile` used by this crate's own tests, grounded on the
/// `data: Vec<u8>`-backed `MachOWriter`/`ElfWriter` in the teacher crate.
/// Not part of the public API surface real callers use; real callers supply
/// their own `ObjectFile` backed by an actual section-header table.
#[cfg(test)]
pub(crate) struct FakeObjectFile {
    pub data: Vec<u8>,
    pub sections: alloc::collections::BTreeMap<SectionId, (u64, u64)>,
    pub format: ObjectFormat,
    pub section_header_dirty: bool,
    pub dirty_sections: alloc::collections::BTreeSet<SectionId>,
    /// Bytes available at each section's current offset before the next
    /// unrelated allocation, independent of the section's reported `size`
    /// -- mirrors a real object file's slack between a section and its
    /// neighbour.
    capacity: alloc::collections::BTreeMap<SectionId, u64>,
}

#[cfg(test)]
impl FakeObjectFile {
    pub fn new(format: ObjectFormat) -> Self {
        FakeObjectFile {
            data: Vec::new(),
            sections: alloc::collections::BTreeMap::new(),
            format,
            section_header_dirty: false,
            dirty_sections: alloc::collections::BTreeSet::new(),
            capacity: alloc::collections::BTreeMap::new(),
        }
    }

    /// Places `id` at `offset` with reported `size`, reserving `capacity`
    /// bytes of slack before it must relocate.
    pub fn place_section(&mut self, id: SectionId, offset: u64, size: u64, capacity: u64) {
        let needed = (offset + capacity) as usize;
        if self.data.len() < needed {
            self.data.resize(needed, 0);
        }
        self.sections.insert(id, (offset, size));
        self.capacity.insert(id, capacity);
    }
}

#[cfg(test)]
impl ObjectFile for FakeObjectFile {
    fn format(&self) -> ObjectFormat {
        self.format
    }

    fn section_info(&self, id: SectionId) -> (u64, u64) {
        self.sections.get(&id).copied().unwrap_or((0, 0))
    }

    fn allocated_size(&self, offset: u64) -> Result<u64> {
        // Whichever section currently starts at `offset` reports its
        // reserved slack; an offset with no owning section (e.g. a fresh
        // relocation target) has nothing before a neighbour yet.
        for (id, (off, _)) in &self.sections {
            if *off == offset {
                return Ok(*self.capacity.get(id).unwrap_or(&0));
            }
        }
        Ok(0)
    }

    fn find_free_space(&mut self, needed: u64, alignment: u64) -> Result<u64> {
        let mut off = self.data.len() as u64;
        let rem = off % alignment;
        if rem != 0 {
            off += alignment - rem;
        }
        self.data.resize((off + needed) as usize, 0);
        Ok(off)
    }

    fn pwrite_all(&mut self, buf: &[u8], offset: u64) -> Result<()> {
        let end = offset as usize + buf.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[offset as usize..end].copy_from_slice(buf);
        Ok(())
    }

    fn pwritev_all(&mut self, iovecs: &[IoSlice<'_>], offset: u64) -> Result<()> {
        let mut cursor = offset;
        for iov in iovecs {
            self.pwrite_all(iov.bytes, cursor)?;
            cursor += iov.bytes.len() as u64;
        }
        Ok(())
    }

    fn copy_range_all(&mut self, src_off: u64, dst_off: u64, len: u64) -> Result<()> {
        let end = dst_off as usize + len as usize;
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        let chunk: Vec<u8> = self.data[src_off as usize..src_off as usize + len as usize].to_vec();
        self.data[dst_off as usize..end].copy_from_slice(&chunk);
        Ok(())
    }

    fn resize_section(&mut self, id: SectionId, new_size: u64, new_offset: Option<u64>) -> Result<()> {
        let (old_off, _) = self.section_info(id);
        let off = new_offset.unwrap_or(old_off);
        if new_offset.is_some() {
            self.section_header_dirty = true;
        }
        self.dirty_sections.insert(id);
        self.sections.insert(id, (off, new_size));
        if new_offset.is_some() {
            self.capacity.insert(id, new_size);
        }
        let needed = (off + new_size) as usize;
        if self.data.len() < needed {
            self.data.resize(needed, 0);
        }
        Ok(())
    }
}
