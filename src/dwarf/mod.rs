//! The DWARF-specific machinery (spec §3/§4): everything downstream of the
//! narrow `ObjectFile` boundary and the semantic-module types.

pub mod abbrev;
pub mod alloc;
pub mod atom;
pub mod die;
pub mod header;
pub mod line;
pub mod pad;
pub mod reloc;
pub mod strtab;
