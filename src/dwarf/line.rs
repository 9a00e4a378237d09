//! Line Program Builder (spec §4.2): per-function prologue with three
//! fixed-width relocation slots, built so later line-number patches never
//! change the prologue's length.

use alloc::vec::Vec;

use crate::container::Ctx;
use crate::error::Result;

// Line Number Program opcodes this emitter touches.
const LNS_COPY: u8 = 0x01;
const LNS_ADVANCE_LINE: u8 = 0x03;
const LNS_SET_FILE: u8 = 0x04;
const LNS_EXTENDED_OP: u8 = 0x00;
const LNE_END_SEQUENCE: u8 = 0x01;
const LNE_SET_ADDRESS: u8 = 0x02;

/// `file index` is currently always 1 (spec §4.2 table).
pub const CONSTANT_FILE_INDEX: u32 = 1;

/// Offsets of the three relocation slots, as fixed byte positions from the
/// start of the prologue (spec §4.2 "Constants").
pub struct RelocSlots {
    pub vaddr: usize,
    pub line: usize,
    pub file: usize,
}

pub fn reloc_slots(ptr_width: u8) -> RelocSlots {
    let vaddr = 3;
    let line = vaddr + ptr_width as usize + 1;
    let file = line + 5;
    RelocSlots { vaddr, line, file }
}

/// Encodes a value in exactly 4 bytes of ULEB128, using continuation bits
/// on what would otherwise be the final byte so later patches never change
/// the encoding's length (spec §4.2 "ULEB128-fixed-4... mandatory").
fn uleb128_fixed4(value: u32) -> [u8; 4] {
    let mut out = [0x80u8; 4];
    out[0] = (value & 0x7f) as u8 | 0x80;
    out[1] = ((value >> 7) & 0x7f) as u8 | 0x80;
    out[2] = ((value >> 14) & 0x7f) as u8 | 0x80;
    out[3] = ((value >> 21) & 0x7f) as u8;
    out
}

/// Builds the fixed-layout prologue for one function (spec §4.2 table).
/// `line_delta` is the source line of the opening brace, relative to the
/// previous function's closing brace, per spec's wording for reloc slot 1.
pub fn build_prologue(ctx: Ctx, line_delta: u32) -> Vec<u8> {
    let ptr_width = ctx.ptr_width() as usize;
    let mut buf = Vec::with_capacity(3 + ptr_width + 1 + 5 + 5 + 1);

    buf.push(LNS_EXTENDED_OP);
    buf.push((ptr_width + 1) as u8);
    buf.push(LNE_SET_ADDRESS);
    buf.extend(core::iter::repeat(0u8).take(ptr_width)); // reloc slot 0: vaddr

    buf.push(LNS_ADVANCE_LINE);
    buf.extend_from_slice(&uleb128_fixed4(line_delta)); // reloc slot 1: line

    buf.push(LNS_SET_FILE);
    buf.extend_from_slice(&uleb128_fixed4(CONSTANT_FILE_INDEX)); // reloc slot 2: file

    buf.push(LNS_COPY);
    buf
}

/// Appends the sequence terminator after the code generator's own
/// row-emission opcodes (spec §4.2 "the emitter terminates with
/// `LNS.extended_op, 1, LNE.end_sequence`").
pub fn terminator() -> [u8; 3] {
    [LNS_EXTENDED_OP, 1, LNE_END_SEQUENCE]
}

/// Patches reloc slot 0 (vaddr) in an already-written prologue.
pub fn patch_vaddr(
    buf: &mut [u8],
    slots: &RelocSlots,
    ctx: Ctx,
    vaddr: u64,
) -> Result<()> {
    use scroll::Pwrite;
    let ptr_width = ctx.ptr_width() as usize;
    let region = &mut buf[slots.vaddr..slots.vaddr + ptr_width];
    if ptr_width == 8 {
        region.pwrite_with(vaddr, 0, ctx.endian)?;
    } else {
        region.pwrite_with(vaddr as u32, 0, ctx.endian)?;
    }
    Ok(())
}

/// Encodes reloc slot 0's value in isolation, for callers (the emitter
/// façade) that patch an already-committed fragment through `pwrite_all`
/// rather than an in-memory slice.
pub fn vaddr_bytes(ctx: Ctx, vaddr: u64) -> Vec<u8> {
    use scroll::Pwrite;
    let ptr_width = ctx.ptr_width() as usize;
    let mut buf = alloc::vec![0u8; ptr_width];
    if ptr_width == 8 {
        buf.pwrite_with(vaddr, 0, ctx.endian).expect("fixed-width write");
    } else {
        buf.pwrite_with(vaddr as u32, 0, ctx.endian).expect("fixed-width write");
    }
    buf
}

pub fn patch_line(buf: &mut [u8], slots: &RelocSlots, line: u32) {
    buf[slots.line..slots.line + 4].copy_from_slice(&uleb128_fixed4(line));
}

pub fn patch_file_index(buf: &mut [u8], slots: &RelocSlots, file_index: u32) {
    buf[slots.file..slots.file + 4].copy_from_slice(&uleb128_fixed4(file_index));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{Container, ObjectFormat};

    fn p64() -> Ctx {
        Ctx::new(64, scroll::Endian::Little, ObjectFormat::Elf).unwrap()
    }

    fn p32() -> Ctx {
        Ctx::new(32, scroll::Endian::Little, ObjectFormat::Elf).unwrap()
    }

    /// Scenario E2 from spec §8.
    #[test]
    fn e2_prologue_bytes_p64() {
        let buf = build_prologue(p64(), 12);
        let expected_prefix = [0x00, 0x09, 0x02];
        assert_eq!(&buf[0..3], &expected_prefix);
        assert_eq!(&buf[3..11], &[0u8; 8]);
        assert_eq!(buf[11], LNS_ADVANCE_LINE);
        assert_eq!(&buf[12..16], &uleb128_fixed4(12));
        assert_eq!(buf[16], LNS_SET_FILE);
        assert_eq!(&buf[17..21], &uleb128_fixed4(1));
        assert_eq!(buf[21], LNS_COPY);
        assert_eq!(buf.len(), 22);
    }

    #[test]
    fn reloc_slots_shift_with_pointer_width() {
        let s64 = reloc_slots(8);
        let s32 = reloc_slots(4);
        assert_eq!(s64.vaddr, 3);
        assert_eq!(s64.line, 3 + 8 + 1);
        assert_eq!(s32.line, 3 + 4 + 1);
        assert_eq!(s64.file, s64.line + 5);
        assert_eq!(s32.file, s32.line + 5);
    }

    #[test]
    fn patching_line_keeps_prologue_length() {
        let mut buf = build_prologue(p64(), 12);
        let before = buf.len();
        let slots = reloc_slots(8);
        patch_line(&mut buf, &slots, 999_999);
        assert_eq!(buf.len(), before);
    }

    #[test]
    fn p32_uses_four_byte_vaddr() {
        let buf = build_prologue(p32(), 1);
        assert_eq!(buf[1], (4 + 1) as u8);
        assert_eq!(&buf[3..7], &[0u8; 4]);
    }
}
