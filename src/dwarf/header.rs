//! Header Writers (spec §4.5): the compilation-unit header, `.debug_aranges`,
//! and the `.debug_line` program header. The abbreviation table itself lives
//! in `crate::dwarf::abbrev` since its layout is entangled with the DIE
//! Builder's per-kind encodings.

use alloc::vec::Vec;

use crate::container::{Container, Ctx, ObjectFormat};
use crate::dwarf::abbrev::AbbrevCode;
use crate::dwarf::strtab::StringTable;
use crate::error::{Error, Result};
use crate::object::{ObjectFile, SectionId};

/// Compilation-unit header budget (spec §4.5 "≤120 bytes").
pub const CU_HEADER_BUDGET: u64 = 120;

/// `DW_LANG_C99`, used as a placeholder language code (spec §4.5).
const DW_LANG_C99: u8 = 0x0c;

fn uleb128(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Whether the 64-bit DWARF initial-length format (`0xffffffff` prefix
/// escape) applies. Only ELF with a 64-bit container uses it; Mach-O has no
/// 64-bit DWARF format of its own, even when the target pointer width is 64
/// (spec §4.5 groups Mach-O with ELF-32 here).
fn uses_64bit_initial_length(ctx: Ctx) -> bool {
    matches!(ctx.format, ObjectFormat::Elf) && matches!(ctx.container, Container::Big)
}

/// Writes the CU header's body (everything after the initial-length field)
/// and returns its length alongside the byte offset of the `high_pc` field,
/// so the caller can patch `high_pc` in place as more functions commit.
fn build_cu_body(ctx: Ctx, strtab: &mut StringTable, stmt_list_off: u32, low_pc: u64, name: &str, comp_dir: &str, producer: &str) -> (Vec<u8>, usize) {
    let mut body = Vec::new();
    ctx.push_u16(&mut body, 4); // version
    if uses_64bit_initial_length(ctx) {
        ctx.push_u64(&mut body, 0); // abbrev_offset, always 0
    } else {
        ctx.push_u32(&mut body, 0);
    }
    body.push(ctx.ptr_width()); // address_size

    uleb128(&mut body, AbbrevCode::CompileUnit as u64);
    ctx.push_u32(&mut body, stmt_list_off);
    let ptr_width = ctx.ptr_width() as usize;
    if ptr_width == 8 {
        ctx.push_u64(&mut body, low_pc);
    } else {
        ctx.push_u32(&mut body, low_pc as u32);
    }
    let high_pc_off = body.len();
    ctx.push_u32(&mut body, 0); // high_pc, patched later

    let name_ref = strtab.make_string(name);
    ctx.push_u32(&mut body, name_ref);
    let comp_dir_ref = strtab.make_string(comp_dir);
    ctx.push_u32(&mut body, comp_dir_ref);
    let producer_ref = strtab.make_string(producer);
    ctx.push_u32(&mut body, producer_ref);
    body.push(DW_LANG_C99);

    (body, high_pc_off)
}

/// Layout of the just-written CU header, for later `high_pc` patches.
#[derive(Debug, Clone, Copy)]
pub struct CuHeaderLayout {
    /// Absolute file offset of `.debug_info`'s `DW_AT_high_pc` field.
    pub high_pc_offset: u64,
}

/// Writes the CU header at the start of `.debug_info` (spec §4.5). Pads the
/// remainder of the reserved `CU_HEADER_BUDGET`-byte region with `pad1`
/// (abbreviation code 0). Errors with [`Error::HeaderOverflow`] if the
/// header's real content doesn't fit.
pub fn write_cu_header(
    object: &mut impl ObjectFile,
    ctx: Ctx,
    strtab: &mut StringTable,
    stmt_list_off: u32,
    low_pc: u64,
    name: &str,
    comp_dir: &str,
    producer: &str,
) -> Result<CuHeaderLayout> {
    let (body, high_pc_rel) = build_cu_body(ctx, strtab, stmt_list_off, low_pc, name, comp_dir, producer);

    let mut out = Vec::new();
    if uses_64bit_initial_length(ctx) {
        ctx.push_u32(&mut out, 0xffff_ffff);
        ctx.push_u64(&mut out, body.len() as u64);
    } else {
        ctx.push_u32(&mut out, body.len() as u32);
    }
    let body_off_in_out = out.len();
    out.extend_from_slice(&body);

    let wanted = out.len();
    if (wanted as u64) > CU_HEADER_BUDGET {
        return Err(Error::HeaderOverflow {
            wanted,
            budget: CU_HEADER_BUDGET as usize,
        });
    }
    out.resize(CU_HEADER_BUDGET as usize, crate::dwarf::pad::ABBREV_CODE_0);

    let base = object.section_info(SectionId::DebugInfo).0;
    object.pwrite_all(&out, base)?;

    Ok(CuHeaderLayout {
        high_pc_offset: base + (body_off_in_out + high_pc_rel) as u64,
    })
}

/// Patches `high_pc` as more functions are committed and the compile unit's
/// address range grows (spec §4.5's header is otherwise append-only once
/// written).
pub fn patch_high_pc(object: &mut impl ObjectFile, ctx: Ctx, layout: CuHeaderLayout, high_pc: u32) -> Result<()> {
    object.pwrite_all(&ctx.encode_u32(high_pc), layout.high_pc_offset)
}

/// Writes `.debug_aranges`: one range covering the whole text section plus
/// a `(0, 0)` sentinel, starting at an offset aligned to `2 * ptr_width`
/// from the end of a small fixed header (spec §4.5).
pub fn write_aranges(object: &mut impl ObjectFile, ctx: Ctx, low_pc: u64, high_pc: u32) -> Result<()> {
    let ptr_width = ctx.ptr_width() as u64;
    let align = 2 * ptr_width;

    // Fixed aranges-set header: unit_length(4) + version(2) +
    // debug_info_offset(4) + address_size(1) + segment_size(1).
    let header_len: u64 = 12;
    let padded_header = align_up(header_len, align);

    let mut buf = Vec::new();
    ctx.push_u32(&mut buf, 0); // unit_length, patched below
    ctx.push_u16(&mut buf, 2); // version
    ctx.push_u32(&mut buf, 0); // debug_info_offset
    buf.push(ctx.ptr_width());
    buf.push(0); // segment_size
    buf.resize(padded_header as usize, 0);

    if ptr_width == 8 {
        ctx.push_u64(&mut buf, low_pc);
        ctx.push_u64(&mut buf, high_pc as u64);
        ctx.push_u64(&mut buf, 0);
        ctx.push_u64(&mut buf, 0);
    } else {
        ctx.push_u32(&mut buf, low_pc as u32);
        ctx.push_u32(&mut buf, high_pc);
        ctx.push_u32(&mut buf, 0);
        ctx.push_u32(&mut buf, 0);
    }

    let unit_length = (buf.len() - 4) as u32;
    ctx.write_u32_at(&mut buf, 0, unit_length);

    object.resize_section(SectionId::DebugAranges, buf.len() as u64, None)?;
    let base = object.section_info(SectionId::DebugAranges).0;
    object.pwrite_all(&buf, base)
}

fn align_up(n: u64, align: u64) -> u64 {
    if align == 0 {
        return n;
    }
    (n + align - 1) / align * align
}

/// Standard opcode argument counts for `DW_LNS_copy` (1) through
/// `DW_LNS_set_isa` (12), the DWARF 4 standard table (spec §4.5 "standard
/// opcode lengths for opcodes 0..set_isa").
const STANDARD_OPCODE_LENGTHS: [u8; 12] = [0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1];

/// Writes the `.debug_line` program header (spec §4.5). Returns the
/// absolute file offset immediately after the header, where the first
/// function's prologue begins.
pub fn write_line_header(object: &mut impl ObjectFile, ctx: Ctx, source_path: &str) -> Result<u64> {
    let mut body = Vec::new();
    // header_length field itself is excluded from the self-referential
    // count; everything from here to the first opcode is included.
    body.push(1); // minimum_instruction_length
    body.push(1); // default_is_stmt
    body.push((-5i8) as u8); // line_base
    body.push(14); // line_range
    body.push(13); // opcode_base (12 standard opcodes + 1)
    body.extend_from_slice(&STANDARD_OPCODE_LENGTHS);
    body.push(0); // include_directories terminator (zero directories)
    body.extend_from_slice(source_path.as_bytes());
    body.push(0);
    uleb128(&mut body, 0); // directory index
    uleb128(&mut body, 0); // mtime
    uleb128(&mut body, 0); // size
    body.push(0); // file-name-table terminator

    let header_length = body.len() as u32;

    let mut out = Vec::new();
    ctx.push_u32(&mut out, 0); // unit_length, patched below
    ctx.push_u16(&mut out, 4); // version
    ctx.push_u32(&mut out, header_length);
    out.extend_from_slice(&body);

    let unit_length = (out.len() - 4) as u32;
    ctx.write_u32_at(&mut out, 0, unit_length);

    object.resize_section(SectionId::DebugLine, out.len() as u64, None)?;
    let base = object.section_info(SectionId::DebugLine).0;
    object.pwrite_all(&out, base)?;
    Ok(base + out.len() as u64)
}

/// Rewrites the entire `.debug_str` section from `strtab` (spec §3's
/// String Table has no dedicated section of its own in spec.md; this is
/// the section its bytes land in -- see DESIGN.md). Grounded on
/// `crate::dwarf::abbrev::write_abbrev`'s identical full-rewrite pattern.
pub fn sync_strtab(object: &mut impl ObjectFile, strtab: &StringTable) -> Result<()> {
    object.resize_section(SectionId::DebugStr, strtab.len() as u64, None)?;
    let base = object.section_info(SectionId::DebugStr).0;
    object.pwrite_all(strtab.as_bytes(), base)
}
