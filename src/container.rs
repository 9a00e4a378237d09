//! Target container context: pointer width and byte order.
//!
//! Referenced the same way `goblin`'s `mach::writer`/`elf::writer` reference
//! `crate::container::Ctx`, except here `Ctx` also decides the DWARF address
//! size and endianness per spec §6 ("Address size: 4 for `p32` targets, 8 for
//! `p64`"; "Endianness: target endianness for ELF; little-endian for
//! Mach-O").

use alloc::vec::Vec;
use scroll::Pwrite;

use crate::error::{Error, Result};

/// Whether the target uses a 32-bit or 64-bit container. Named after
/// `goblin::container::Container::Big`/`Little`, which describe the size of
/// the container, not its byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// 64-bit target (`p64`).
    Big,
    /// 32-bit target (`p32`).
    Little,
}

impl Container {
    pub fn ptr_width(self) -> u8 {
        match self {
            Container::Big => 8,
            Container::Little => 4,
        }
    }
}

/// Which object container format the emitted sections are destined for.
/// Only the two formats spec §1 names are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectFormat {
    Elf,
    MachO,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ctx {
    pub container: Container,
    pub endian: scroll::Endian,
    pub format: ObjectFormat,
}

impl Ctx {
    /// Construct a `Ctx`, enforcing spec §6/§7: Mach-O is always little
    /// endian; ELF inherits the target's own endianness (`endian` as given).
    /// `ptr_width` must be in `0..=64` per spec §7 `UnsupportedTarget`.
    pub fn new(ptr_width_bits: u16, endian: scroll::Endian, format: ObjectFormat) -> Result<Self> {
        if ptr_width_bits > 64 {
            return Err(Error::UnsupportedTarget((ptr_width_bits / 8) as u8));
        }
        let container = if ptr_width_bits > 32 {
            Container::Big
        } else {
            Container::Little
        };
        let endian = match format {
            ObjectFormat::MachO => scroll::Endian::Little,
            ObjectFormat::Elf => endian,
        };
        Ok(Ctx {
            container,
            endian,
            format,
        })
    }

    pub fn ptr_width(self) -> u8 {
        self.container.ptr_width()
    }

    pub fn scroll_ctx(self) -> scroll::Endian {
        self.endian
    }

    /// Appends `value` to `buf` in this `Ctx`'s target endianness (spec §6:
    /// target endianness for ELF, little-endian for Mach-O).
    pub fn push_u16(self, buf: &mut Vec<u8>, value: u16) {
        let start = buf.len();
        buf.resize(start + 2, 0);
        buf[start..]
            .pwrite_with(value, 0, self.endian)
            .expect("fixed-width write");
    }

    pub fn push_u32(self, buf: &mut Vec<u8>, value: u32) {
        let start = buf.len();
        buf.resize(start + 4, 0);
        buf[start..]
            .pwrite_with(value, 0, self.endian)
            .expect("fixed-width write");
    }

    pub fn push_u64(self, buf: &mut Vec<u8>, value: u64) {
        let start = buf.len();
        buf.resize(start + 8, 0);
        buf[start..]
            .pwrite_with(value, 0, self.endian)
            .expect("fixed-width write");
    }

    /// Encodes `value` as a standalone 4-byte buffer in this `Ctx`'s target
    /// endianness, for callers writing straight through
    /// `ObjectFile::pwrite_all` instead of appending to an in-memory buffer.
    pub fn encode_u32(self, value: u32) -> [u8; 4] {
        let mut buf = [0u8; 4];
        buf.pwrite_with(value, 0, self.endian)
            .expect("fixed-width write");
        buf
    }

    /// Overwrites an already-written 4-byte field in place (e.g. patching a
    /// `ref4` placeholder) in this `Ctx`'s target endianness.
    pub fn write_u32_at(self, buf: &mut [u8], offset: usize, value: u32) {
        buf[offset..offset + 4]
            .pwrite_with(value, 0, self.endian)
            .expect("fixed-width write");
    }
}

impl From<Ctx> for scroll::Endian {
    fn from(ctx: Ctx) -> scroll::Endian {
        ctx.endian
    }
}
