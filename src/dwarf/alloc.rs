//! The Allocator over Sections (spec §4.1): `allocate_or_grow_info` and
//! `allocate_or_grow_line` share one policy, parameterized here over the
//! registry's marker type so the two call sites differ only in which
//! [`PadStyle`] and header size they pass in.

use crate::dwarf::atom::{Registry, SlotId, MIN_NOP_SIZE};
use crate::dwarf::pad::{self, PadStyle};
use crate::error::Result;
use crate::object::{ObjectFile, SectionId};

/// `n + n/3`, saturating (spec §9 glossary "pad_to_ideal") -- reserves
/// slack so small growths don't immediately trigger a migration.
pub fn pad_to_ideal(n: u64) -> u64 {
    n.saturating_add(n / 3)
}

/// Implements spec §4.1 steps 1-5 for either registry. `header_bytes` is
/// the size of the section's fixed preamble (CU header for `.debug_info`,
/// line-program header for `.debug_line`); `reserve_terminator` reserves
/// the one extra byte `.debug_info` needs for its closing null DIE.
pub fn allocate_or_grow<K>(
    registry: &mut Registry<K>,
    id: SlotId<K>,
    new_len: u64,
    header_bytes: u64,
    reserve_terminator: bool,
    style: PadStyle,
    section: SectionId,
    object: &mut impl ObjectFile,
) -> Result<()> {
    let old_off = registry.get(id).off;
    let old_len = registry.get(id).len;
    let was_live = registry.is_live(id);

    registry.set_len(id, new_len);

    if registry.first().is_none() {
        // Step 2: empty list.
        let off = pad_to_ideal(header_bytes);
        registry.set_off(id, off);
        registry.link_as_only(id);
    } else if was_live && registry.is_last(id) {
        // Step 3: current last, grow in place.
    } else if was_live {
        // Steps 4/5: interior record.
        let next_id = registry
            .get(id)
            .next
            .expect("a live, non-last record always has a next");
        let next_off = registry.get(next_id).off;
        if old_off + new_len + MIN_NOP_SIZE > next_off {
            migrate(registry, id, old_off, old_len, section, style, object)?;
        }
        // else: still fits, off unchanged, len already updated above.
    } else {
        // First emission of this record into a non-empty list: it has no
        // prior slot to leave behind, so it simply joins at the tail.
        append_at_tail(registry, id);
    }

    grow_section_if_needed(registry, reserve_terminator, section, object)
}

fn migrate<K>(
    registry: &mut Registry<K>,
    id: SlotId<K>,
    old_off: u64,
    old_len: u64,
    section: SectionId,
    style: PadStyle,
    object: &mut impl ObjectFile,
) -> Result<()> {
    registry.unlink(id);
    // `old_off` is section-relative (spec §3); the collaborator's
    // `pwrite_all` wants an absolute file offset.
    let base = object.section_info(section).0;
    pad::clear_with_filler(object, section, base + old_off, old_len, style)?;
    append_at_tail(registry, id);
    Ok(())
}

fn append_at_tail<K>(registry: &mut Registry<K>, id: SlotId<K>) {
    let last_id = registry
        .last()
        .expect("append_at_tail requires a non-empty list");
    let last = registry.get(last_id);
    let new_off = last.off + pad_to_ideal(last.len);
    registry.set_off(id, new_off);
    registry.link_after_last(id);
}

/// Arranges file-level growth of the owning section via the object-file
/// collaborator (spec §4.1 "Section growth").
fn grow_section_if_needed<K>(
    registry: &Registry<K>,
    reserve_terminator: bool,
    section: SectionId,
    object: &mut impl ObjectFile,
) -> Result<()> {
    let needed = registry.used_size(reserve_terminator);
    let (cur_off, cur_size) = object.section_info(section);
    let allocated = object.allocated_size(cur_off)?;

    if needed > allocated {
        let new_off = object.find_free_space(needed, 1)?;
        if new_off != cur_off && cur_size > 0 {
            object.copy_range_all(cur_off, new_off, cur_size)?;
        }
        object.resize_section(section, needed, Some(new_off))?;
    } else if needed != cur_size {
        object.resize_section(section, needed, None)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ObjectFormat;
    use crate::dwarf::atom::AtomKind;
    use crate::object::FakeObjectFile;

    fn section_with_header(object: &mut FakeObjectFile, header_bytes: u64) {
        object.place_section(SectionId::DebugInfo, 0, header_bytes, 4096);
    }

    /// Scenario E1 from spec §8: three 100-byte decls land at the
    /// predicted offsets, and re-committing the same size is a no-op.
    #[test]
    fn e1_stable_offsets_and_idempotent_recommit() {
        let mut object = FakeObjectFile::new(ObjectFormat::Elf);
        section_with_header(&mut object, 120);
        let mut reg: Registry<AtomKind> = Registry::new();

        let a = reg.alloc_detached();
        allocate_or_grow(&mut reg, a, 100, 120, true, PadStyle::Info, SectionId::DebugInfo, &mut object).unwrap();
        assert_eq!(reg.get(a).off, 160);

        let b = reg.alloc_detached();
        allocate_or_grow(&mut reg, b, 100, 120, true, PadStyle::Info, SectionId::DebugInfo, &mut object).unwrap();
        assert_eq!(reg.get(b).off, 160 + pad_to_ideal(100));

        let c = reg.alloc_detached();
        allocate_or_grow(&mut reg, c, 100, 120, true, PadStyle::Info, SectionId::DebugInfo, &mut object).unwrap();

        let snapshot = object.data.clone();
        allocate_or_grow(&mut reg, b, 100, 120, true, PadStyle::Info, SectionId::DebugInfo, &mut object).unwrap();
        assert_eq!(reg.get(b).off, 160 + pad_to_ideal(100));
        assert_eq!(object.data, snapshot);
    }

    /// Growing B past its reserved slack relocates it after C; the vacated
    /// slot is left NOP-padded.
    #[test]
    fn e1_growth_past_capacity_migrates_to_tail() {
        let mut object = FakeObjectFile::new(ObjectFormat::Elf);
        section_with_header(&mut object, 120);
        let mut reg: Registry<AtomKind> = Registry::new();

        let a = reg.alloc_detached();
        allocate_or_grow(&mut reg, a, 100, 120, true, PadStyle::Info, SectionId::DebugInfo, &mut object).unwrap();
        let b = reg.alloc_detached();
        allocate_or_grow(&mut reg, b, 100, 120, true, PadStyle::Info, SectionId::DebugInfo, &mut object).unwrap();
        let c = reg.alloc_detached();
        allocate_or_grow(&mut reg, c, 100, 120, true, PadStyle::Info, SectionId::DebugInfo, &mut object).unwrap();

        let b_old_off = reg.get(b).off;
        allocate_or_grow(&mut reg, b, 300, 120, true, PadStyle::Info, SectionId::DebugInfo, &mut object).unwrap();

        assert!(reg.get(b).off > reg.get(c).off);
        let vacated = &object.data[b_old_off as usize..(b_old_off + 100) as usize];
        assert!(vacated.iter().all(|&byte| byte == 0));
        assert!(reg.check_adjacency_invariant());
    }

    /// Scenario E5: freeing an interior record and committing a larger
    /// replacement appends it at the tail; the freed slot stays padded.
    #[test]
    fn e5_free_and_refill_appends_at_tail() {
        let mut object = FakeObjectFile::new(ObjectFormat::Elf);
        section_with_header(&mut object, 120);
        let mut reg: Registry<AtomKind> = Registry::new();

        let a = reg.alloc_detached();
        allocate_or_grow(&mut reg, a, 100, 120, true, PadStyle::Info, SectionId::DebugInfo, &mut object).unwrap();
        let b = reg.alloc_detached();
        allocate_or_grow(&mut reg, b, 100, 120, true, PadStyle::Info, SectionId::DebugInfo, &mut object).unwrap();
        let c = reg.alloc_detached();
        allocate_or_grow(&mut reg, c, 100, 120, true, PadStyle::Info, SectionId::DebugInfo, &mut object).unwrap();

        reg.unlink(b);

        let d = reg.alloc_detached();
        allocate_or_grow(&mut reg, d, 150, 120, true, PadStyle::Info, SectionId::DebugInfo, &mut object).unwrap();

        assert!(reg.get(d).off > reg.get(c).off);
        assert!(reg.is_freed_and_unreachable(b));
    }
}
