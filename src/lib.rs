//! Incremental DWARF debug-information emitter for ELF and Mach-O linker
//! back-ends.
//!
//! This crate owns the `.debug_info` DIE stream and `.debug_line` Line
//! Number Program, both append-only and in-place mutable across repeated
//! compiler invocations. It does not parse or write object files itself --
//! that's the surrounding linker's job, reached through the narrow
//! [`object::ObjectFile`] trait this crate is generic over, the same way
//! `goblin`'s own `mach`/`elf` writers stay decoupled from whatever owns
//! the file handle.
//!
//! # Layout
//!
//! - [`emitter::Emitter`] is the façade: `open` -> (`init_decl` ->
//!   `commit_decl`)* -> `commit_error_set` -> `finalize`.
//! - [`dwarf`] holds the allocator, DIE builder, line program builder,
//!   header writers, and relocation resolvers `Emitter` drives.
//! - [`semantic`] is the minimal shape this crate expects of the front
//!   end's type graph and declaration list.
//! - [`container::Ctx`] carries the target's pointer width, endianness,
//!   and object format.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod container;
pub mod dwarf;
pub mod emitter;
pub mod error;
pub mod object;
pub mod semantic;

pub use container::{Container, Ctx, ObjectFormat};
pub use emitter::{CompileUnitInfo, DeclHandle, Emitter};
pub use error::{Error, Result};
pub use object::{IoSlice, ObjectFile, SectionId};
