//! The Pending Type-Reloc Table and Deferred Reloc Queue (spec §3, §4.3,
//! §4.4, §9 "Pending table keyed by structural type... the key must
//! include target ABI").
//!
//! Both the table and the queue record offsets *local* to the
//! in-progress declaration's DIE buffer (or, for the queue, absolute
//! section offsets recorded once the owning atom is known -- see
//! [`DeferredRelocQueue::push_absolute`]). The table is scoped to one
//! `commit_decl` call; the queue persists across decls and is only
//! drained by `commit_error_set`.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::container::{Container, Ctx, ObjectFormat};
use crate::error::Result;
use crate::object::{ObjectFile, SectionId};
use crate::semantic::TypeId;

/// Structural key for the Pending Type-Reloc Table: a type's identity plus
/// enough of the target `Ctx` to distinguish two functions with different
/// targets coexisting in memory (spec §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TypeKey(u64, u8, u8, u8);

impl TypeKey {
    pub fn new(id: &TypeId, ctx: Ctx) -> Self {
        let container = match ctx.container {
            Container::Big => 1,
            Container::Little => 0,
        };
        let endian = match ctx.endian {
            scroll::Endian::Big => 1,
            scroll::Endian::Little => 0,
        };
        let format = match ctx.format {
            ObjectFormat::Elf => 0,
            ObjectFormat::MachO => 1,
        };
        TypeKey(id.0, container, endian, format)
    }
}

#[derive(Debug, Default)]
struct PendingEntry {
    /// Local (within the in-progress buffer) offset of the type's DIE.
    /// `None` until the type has actually been visited and written.
    off: Option<u32>,
    /// Local offsets of `ref4` placeholder sites referring to this type.
    relocs: Vec<u32>,
}

#[derive(Debug, Default)]
pub struct PendingTypeRelocTable {
    entries: BTreeMap<TypeKey, PendingEntry>,
}

impl PendingTypeRelocTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `site` (a local buffer offset) holds a `ref4`
    /// placeholder that must eventually point at `key`'s DIE.
    pub fn record_reloc(&mut self, key: TypeKey, site: u32) {
        self.entries.entry(key).or_default().relocs.push(site);
    }

    /// Marks `key`'s DIE as having been written at local offset `off`.
    /// Idempotent: re-visiting the same type in one walk (shouldn't
    /// happen in a single-pass walk, but is harmless) keeps the first
    /// offset.
    pub fn set_resolved(&mut self, key: TypeKey, off: u32) {
        let entry = self.entries.entry(key).or_default();
        if entry.off.is_none() {
            entry.off = Some(off);
        }
    }

    pub fn is_resolved(&self, key: &TypeKey) -> bool {
        self.entries.get(key).and_then(|e| e.off).is_some()
    }

    /// Testable property 3 (spec §8): every entry committed has a
    /// resolved `off`.
    pub fn all_resolved(&self) -> bool {
        self.entries.values().all(|e| e.off.is_some())
    }

    /// Patches every recorded reloc with `atom_off + type.off`, mirroring
    /// spec §4.3's second pass. `atom_off` is the local-to-section offset
    /// the committing atom ended up at; `section_base` is that section's
    /// current absolute file offset.
    pub fn resolve_all(
        &self,
        atom_off: u32,
        ctx: Ctx,
        section: SectionId,
        object: &mut impl ObjectFile,
    ) -> Result<()> {
        let section_base = object.section_info(section).0;
        for entry in self.entries.values() {
            let Some(type_off) = entry.off else {
                return Err(crate::error::Error::Malformed(
                    "pending type-reloc entry committed with no resolved offset",
                ));
            };
            let value = atom_off + type_off;
            for &site in &entry.relocs {
                write_ref4(object, ctx, section_base + atom_off as u64 + site as u64, value)?;
            }
        }
        Ok(())
    }
}

/// Secondary list for the tagged union's self-relative `ref4` (spec §4.3
/// "self-relative relocation", §9 "record the site... alongside the
/// per-site addend value already written into the placeholder").
#[derive(Debug, Default)]
pub struct SelfRelativeRelocs {
    /// `(local site offset, addend already stored at that site)`.
    sites: Vec<(u32, u64)>,
}

impl SelfRelativeRelocs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, site: u32, addend: u64) {
        self.sites.push((site, addend));
    }

    /// At resolution time the addend is added to `atom.off` (spec §9).
    pub fn resolve_all(
        &self,
        atom_off: u32,
        ctx: Ctx,
        section: SectionId,
        object: &mut impl ObjectFile,
    ) -> Result<()> {
        let section_base = object.section_info(section).0;
        for &(site, addend) in &self.sites {
            let value = atom_off as u64 + addend;
            write_ref4(object, ctx, section_base + atom_off as u64 + site as u64, value as u32)?;
        }
        Ok(())
    }

    /// Recorded `(site, addend)` pairs, for byte-exact assertions.
    #[cfg(test)]
    pub fn sites(&self) -> &[(u32, u64)] {
        &self.sites
    }
}

/// Offsets that must later be patched with the global-error-set DIE's
/// offset, once it exists (spec §3 "Deferred Reloc Queue", §4.4). Drained
/// in LIFO order (spec §4.4 "The queue is drained in LIFO order").
#[derive(Debug, Default)]
pub struct DeferredRelocQueue {
    sites: Vec<u64>,
}

impl DeferredRelocQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues an absolute section offset holding a `ref4` placeholder
    /// for the not-yet-resolved global error set.
    pub fn push_absolute(&mut self, absolute_site: u64) {
        self.sites.push(absolute_site);
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Drains every queued site (each a section-relative offset, per spec
    /// §3's data model), writing `error_set_off` (also section-relative)
    /// at each (spec §4.4 "position of writes must be absolute" --
    /// absolute within the file, computed here as `section_base + site`).
    pub fn drain_resolve(
        &mut self,
        error_set_off: u32,
        ctx: Ctx,
        section: SectionId,
        object: &mut impl ObjectFile,
    ) -> Result<()> {
        let section_base = object.section_info(section).0;
        while let Some(site) = self.sites.pop() {
            write_ref4(object, ctx, section_base + site, error_set_off)?;
        }
        Ok(())
    }
}

/// Writes a `ref4` in `ctx`'s target endianness (spec §6: target endianness
/// for ELF, little-endian for Mach-O).
fn write_ref4(object: &mut impl ObjectFile, ctx: Ctx, absolute_offset: u64, value: u32) -> Result<()> {
    let buf = ctx.encode_u32(value);
    object.pwrite_all(&buf, absolute_offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ObjectFormat;
    use crate::object::FakeObjectFile;

    #[test]
    fn pending_table_resolves_forward_reference() {
        let mut table = PendingTypeRelocTable::new();
        let ctx = Ctx::new(64, scroll::Endian::Little, ObjectFormat::Elf).unwrap();
        let key = TypeKey::new(&TypeId(7), ctx);

        table.record_reloc(key, 4);
        assert!(!table.is_resolved(&key));
        table.set_resolved(key, 40);
        assert!(table.is_resolved(&key));
        assert!(table.all_resolved());
    }

    #[test]
    fn deferred_queue_drains_lifo() {
        let mut object = FakeObjectFile::new(ObjectFormat::Elf);
        object.place_section(SectionId::DebugInfo, 0, 0, 64);
        let ctx = Ctx::new(64, scroll::Endian::Little, ObjectFormat::Elf).unwrap();
        let mut queue = DeferredRelocQueue::new();
        queue.push_absolute(0);
        queue.push_absolute(8);
        queue.push_absolute(16);
        assert_eq!(queue.len(), 3);
        queue.drain_resolve(99, ctx, SectionId::DebugInfo, &mut object).unwrap();
        assert!(queue.is_empty());
        for off in [0usize, 8, 16] {
            assert_eq!(&object.data[off..off + 4], &99u32.to_le_bytes());
        }
    }

    #[test]
    fn write_ref4_honors_big_endian_target() {
        let mut object = FakeObjectFile::new(ObjectFormat::Elf);
        object.place_section(SectionId::DebugInfo, 0, 0, 64);
        let ctx = Ctx::new(64, scroll::Endian::Big, ObjectFormat::Elf).unwrap();
        let mut queue = DeferredRelocQueue::new();
        queue.push_absolute(0);
        queue.drain_resolve(0x1234, ctx, SectionId::DebugInfo, &mut object).unwrap();
        assert_eq!(&object.data[0..4], &0x1234u32.to_be_bytes());
    }
}
