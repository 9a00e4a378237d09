//! The fixed abbreviation table (spec §4.3 "Abbreviation codes are fixed
//! integers 1-12") and its one-time writer (spec §4.5 "Abbreviation
//! table").
//!
//! Attribute/form pairs per code follow SPEC_FULL.md §4.5's supplemental
//! detail, the minimal set DWARF 4 producers use for these tags. Code 12
//! is reserved: spec.md fixes the code space at 1-12 but only eleven DIE
//! kinds are named across §4.3/§4.5, so the twelfth slot is left unused
//! rather than invented.

use alloc::vec::Vec;

use crate::error::Result;
use crate::object::{ObjectFile, SectionId};

// DW_TAG_*
const DW_TAG_COMPILE_UNIT: u64 = 0x11;
const DW_TAG_SUBPROGRAM: u64 = 0x2e;
const DW_TAG_BASE_TYPE: u64 = 0x24;
const DW_TAG_POINTER_TYPE: u64 = 0x0f;
const DW_TAG_STRUCTURE_TYPE: u64 = 0x13;
const DW_TAG_MEMBER: u64 = 0x0d;
const DW_TAG_ENUMERATION_TYPE: u64 = 0x04;
const DW_TAG_ENUMERATOR: u64 = 0x28;
const DW_TAG_UNION_TYPE: u64 = 0x17;
const DW_TAG_UNSPECIFIED_TYPE: u64 = 0x3b;

// DW_AT_*
const DW_AT_SIBLING: u64 = 0x01;
const DW_AT_LOCATION: u64 = 0x02;
const DW_AT_NAME: u64 = 0x03;
const DW_AT_BYTE_SIZE: u64 = 0x0b;
const DW_AT_STMT_LIST: u64 = 0x10;
const DW_AT_LOW_PC: u64 = 0x11;
const DW_AT_HIGH_PC: u64 = 0x12;
const DW_AT_LANGUAGE: u64 = 0x13;
const DW_AT_COMP_DIR: u64 = 0x1b;
const DW_AT_CONST_VALUE: u64 = 0x1c;
const DW_AT_PRODUCER: u64 = 0x25;
const DW_AT_ENCODING: u64 = 0x3e;
const DW_AT_TYPE: u64 = 0x49;
const DW_AT_DATA_MEMBER_LOCATION: u64 = 0x38;

// DW_FORM_*
const DW_FORM_ADDR: u64 = 0x01;
const DW_FORM_DATA1: u64 = 0x0b;
const DW_FORM_DATA4: u64 = 0x06;
const DW_FORM_DATA8: u64 = 0x07;
const DW_FORM_STRP: u64 = 0x0e;
const DW_FORM_REF4: u64 = 0x13;
const DW_FORM_SDATA: u64 = 0x0d;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum AbbrevCode {
    CompileUnit = 1,
    Subprogram = 2,
    SubprogramRetVoid = 3,
    BaseType = 4,
    PtrType = 5,
    StructureType = 6,
    StructMember = 7,
    EnumerationType = 8,
    EnumVariant = 9,
    UnionType = 10,
    UnspecifiedType = 11,
}

/// Null DIE / end-of-children marker (spec §6 "terminated by a zero byte").
pub const NULL_ABBREV_CODE: u8 = 0;

struct Entry {
    code: u64,
    tag: u64,
    has_children: bool,
    attrs: &'static [(u64, u64)],
}

const ENTRIES: &[Entry] = &[
    Entry {
        code: AbbrevCode::CompileUnit as u64,
        tag: DW_TAG_COMPILE_UNIT,
        has_children: true,
        attrs: &[
            (DW_AT_STMT_LIST, DW_FORM_DATA4),
            (DW_AT_LOW_PC, DW_FORM_ADDR),
            (DW_AT_HIGH_PC, DW_FORM_DATA4),
            (DW_AT_NAME, DW_FORM_STRP),
            (DW_AT_COMP_DIR, DW_FORM_STRP),
            (DW_AT_PRODUCER, DW_FORM_STRP),
            (DW_AT_LANGUAGE, DW_FORM_DATA1),
        ],
    },
    Entry {
        code: AbbrevCode::Subprogram as u64,
        tag: DW_TAG_SUBPROGRAM,
        has_children: false,
        attrs: &[
            (DW_AT_LOW_PC, DW_FORM_ADDR),
            (DW_AT_HIGH_PC, DW_FORM_DATA4),
            (DW_AT_TYPE, DW_FORM_REF4),
            (DW_AT_NAME, DW_FORM_STRP),
        ],
    },
    Entry {
        code: AbbrevCode::SubprogramRetVoid as u64,
        tag: DW_TAG_SUBPROGRAM,
        has_children: false,
        attrs: &[
            (DW_AT_LOW_PC, DW_FORM_ADDR),
            (DW_AT_HIGH_PC, DW_FORM_DATA4),
            (DW_AT_NAME, DW_FORM_STRP),
        ],
    },
    Entry {
        code: AbbrevCode::BaseType as u64,
        tag: DW_TAG_BASE_TYPE,
        has_children: false,
        attrs: &[
            (DW_AT_ENCODING, DW_FORM_DATA1),
            (DW_AT_BYTE_SIZE, DW_FORM_DATA1),
            (DW_AT_NAME, DW_FORM_STRP),
        ],
    },
    Entry {
        code: AbbrevCode::PtrType as u64,
        tag: DW_TAG_POINTER_TYPE,
        has_children: false,
        attrs: &[(DW_AT_TYPE, DW_FORM_REF4)],
    },
    Entry {
        code: AbbrevCode::StructureType as u64,
        tag: DW_TAG_STRUCTURE_TYPE,
        has_children: true,
        attrs: &[(DW_AT_BYTE_SIZE, DW_FORM_SDATA), (DW_AT_NAME, DW_FORM_STRP)],
    },
    Entry {
        code: AbbrevCode::StructMember as u64,
        tag: DW_TAG_MEMBER,
        has_children: false,
        attrs: &[
            (DW_AT_NAME, DW_FORM_STRP),
            (DW_AT_TYPE, DW_FORM_REF4),
            (DW_AT_DATA_MEMBER_LOCATION, DW_FORM_SDATA),
        ],
    },
    Entry {
        code: AbbrevCode::EnumerationType as u64,
        tag: DW_TAG_ENUMERATION_TYPE,
        has_children: true,
        attrs: &[(DW_AT_BYTE_SIZE, DW_FORM_SDATA), (DW_AT_NAME, DW_FORM_STRP)],
    },
    Entry {
        code: AbbrevCode::EnumVariant as u64,
        tag: DW_TAG_ENUMERATOR,
        has_children: false,
        attrs: &[(DW_AT_NAME, DW_FORM_STRP), (DW_AT_CONST_VALUE, DW_FORM_DATA8)],
    },
    Entry {
        code: AbbrevCode::UnionType as u64,
        tag: DW_TAG_UNION_TYPE,
        has_children: true,
        attrs: &[(DW_AT_BYTE_SIZE, DW_FORM_SDATA), (DW_AT_NAME, DW_FORM_STRP)],
    },
    Entry {
        code: AbbrevCode::UnspecifiedType as u64,
        tag: DW_TAG_UNSPECIFIED_TYPE,
        has_children: false,
        attrs: &[],
    },
];

// Kept around for clarity even though unused at runtime; documents why
// `DW_AT_SIBLING`/`DW_AT_LOCATION` are imported-but-idle: they're the
// attributes a fuller producer would add to `subprogram` (sibling chains,
// frame base) that this emitter's scope (spec §1 non-goals) doesn't need.
#[allow(dead_code)]
const _UNUSED_ATTRS: (u64, u64) = (DW_AT_SIBLING, DW_AT_LOCATION);

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

/// Serializes the fixed abbreviation table (spec §4.5). Always emitted at
/// offset 0 of `.debug_abbrev`.
pub fn encode_table() -> Vec<u8> {
    let mut buf = Vec::new();
    for entry in ENTRIES {
        uleb128(&mut buf, entry.code);
        uleb128(&mut buf, entry.tag);
        buf.push(entry.has_children as u8);
        for &(at, form) in entry.attrs {
            uleb128(&mut buf, at);
            uleb128(&mut buf, form);
        }
        uleb128(&mut buf, 0);
        uleb128(&mut buf, 0);
    }
    buf.push(NULL_ABBREV_CODE);
    buf
}

/// Writes the abbreviation table to `.debug_abbrev` at offset 0, as a
/// fixed one-time operation (spec §4.5 "Offset `abbrev_table_offset` is
/// 0").
pub fn write_abbrev(object: &mut impl ObjectFile) -> Result<()> {
    let table = encode_table();
    let base = object.section_info(SectionId::DebugAbbrev).0;
    object.resize_section(SectionId::DebugAbbrev, table.len() as u64, None)?;
    object.pwrite_all(&table, base)
}
