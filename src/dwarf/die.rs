//! DIE Builder (spec §4.3): walks the semantic type graph reachable from a
//! declaration and appends DIEs to that declaration's in-progress buffer.
//!
//! Everything this module writes -- type `off`s, `ref4` placeholder sites --
//! is local to the buffer being built. The caller (`crate::emitter`) adds
//! the committing atom's final section offset after allocation, exactly as
//! spec §4.3's "second pass" describes.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::container::Ctx;
use crate::dwarf::abbrev::{AbbrevCode, NULL_ABBREV_CODE};
use crate::dwarf::reloc::{PendingTypeRelocTable, SelfRelativeRelocs, TypeKey};
use crate::dwarf::strtab::StringTable;
use crate::semantic::{Decl, DeclKind, Ty, TypeId, TypeTag};

// DW_ATE_*
const DW_ATE_ADDRESS: u8 = 0x01;
const DW_ATE_BOOLEAN: u8 = 0x02;
const DW_ATE_SIGNED: u8 = 0x05;
const DW_ATE_UNSIGNED: u8 = 0x07;

/// What the DIE Builder needs from the front end's type graph: looking a
/// type up by id (spec §6 "Consumed... type graph lookup").
pub trait TypeProvider {
    fn ty(&self, id: TypeId) -> Ty;
}

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

fn align_up(n: u64, align: u64) -> u64 {
    if align == 0 {
        return n;
    }
    (n + align - 1) / align * align
}

/// Best-effort size of a type, for the one place (error unions) that needs
/// a payload's size before that payload's own DIE has necessarily been
/// written. Falls back to 0 for kinds this crate's simplified semantic
/// model doesn't carry an explicit size for (full ABI layout computation
/// is the front end's job, not this emitter's -- spec §1 Non-goals).
fn abi_size_of(tag: &TypeTag, ctx: Ctx) -> u64 {
    match tag {
        TypeTag::Bool => 1,
        TypeTag::Integer { abi_size, .. } => *abi_size,
        TypeTag::PointerLikeOptional { abi_size } => *abi_size,
        TypeTag::NonPointerOptional { abi_size, .. } => *abi_size,
        TypeTag::Slice { usize_size, .. } => usize_size * 2,
        TypeTag::Pointer { .. } => ctx.ptr_width() as u64,
        TypeTag::Struct { abi_size, .. } => *abi_size,
        TypeTag::Enum { abi_size, .. } => *abi_size,
        TypeTag::TaggedUnion { layout, .. } => layout.tag_size + layout.payload_size,
        TypeTag::BareUnion { abi_size, .. } => *abi_size,
        TypeTag::ErrorSet { abi_size, .. } => *abi_size,
        TypeTag::ErrorUnion { .. } | TypeTag::Unsupported => 0,
    }
}

/// Allocates `TypeId`s for anonymous DIEs this builder synthesizes (a
/// slice's `*elem`, an optional's `bool` discriminant, `usize`) that have
/// no identity of their own in the front end's type graph. Counts down from
/// `u64::MAX` on the assumption real front-end ids never reach that range
/// (see DESIGN.md).
struct SyntheticIds(u64);

impl SyntheticIds {
    fn new() -> Self {
        SyntheticIds(u64::MAX)
    }

    fn next(&mut self) -> TypeId {
        let id = TypeId(self.0);
        self.0 -= 1;
        id
    }
}

/// Output of building one declaration's DIE(s): the buffer, plus every
/// bookkeeping structure the emitter must resolve once the atom is placed.
pub struct BuiltDecl {
    pub buf: Vec<u8>,
    pub pending: PendingTypeRelocTable,
    pub self_rel: SelfRelativeRelocs,
    /// Local buffer offsets of `ref4` placeholders referring to the global
    /// error set, not yet converted to absolute section offsets -- the
    /// emitter does that conversion once the atom's offset is known (spec
    /// §4.4).
    pub deferred_local_sites: Vec<u32>,
}

struct Walker<'a> {
    types: &'a dyn TypeProvider,
    strtab: &'a mut StringTable,
    ctx: Ctx,
    buf: Vec<u8>,
    pending: PendingTypeRelocTable,
    self_rel: SelfRelativeRelocs,
    deferred_local_sites: Vec<u32>,
    synthetic: SyntheticIds,
}

impl<'a> Walker<'a> {
    fn name_ref(&mut self, s: &str) -> u32 {
        self.strtab.make_string(s)
    }

    fn push_strp(&mut self, off: u32) {
        self.ctx.push_u32(&mut self.buf, off);
    }

    /// Writes a 4-byte placeholder and records it against `key` in the
    /// pending table, recursing into `emit_type` the first time `key` is
    /// referenced (spec §4.3 "single-pass... recursive").
    fn reference_type(&mut self, id: TypeId) {
        let key = TypeKey::new(&id, self.ctx);
        let site = self.buf.len() as u32;
        self.buf.extend_from_slice(&[0, 0, 0, 0]);
        let already_seen = self.pending.is_resolved(&key);
        self.pending.record_reloc(key, site);
        if !already_seen {
            let ty = self.types.ty(id);
            self.emit_type(key, &ty);
        }
    }

    /// References a type with no real `TypeId` -- an anonymous DIE this
    /// walker already emitted at `local_off` earlier in the same buffer.
    /// Resolved immediately since the offset is already known.
    fn reference_synthetic(&mut self, local_off: u32) {
        let key = TypeKey::new(&self.synthetic.next(), self.ctx);
        let site = self.buf.len() as u32;
        self.buf.extend_from_slice(&[0, 0, 0, 0]);
        self.pending.record_reloc(key, site);
        self.pending.set_resolved(key, local_off);
    }

    /// Routes a reference to an unresolved/inferred error set (or
    /// `anyerror`) through the Deferred Reloc Queue instead of the pending
    /// table (spec §4.4). The returned local site is converted to an
    /// absolute section offset by the emitter once the atom is placed.
    fn reference_deferred(&mut self) {
        let site = self.buf.len() as u32;
        self.buf.extend_from_slice(&[0, 0, 0, 0]);
        self.deferred_local_sites.push(site);
    }

    fn emit_member(&mut self, name: &str, ty: TypeId, offset: u64) {
        self.buf.push(AbbrevCode::StructMember as u8);
        let name_ref = self.name_ref(name);
        self.push_strp(name_ref);
        self.reference_type(ty);
        uleb128(&mut self.buf, offset);
    }

    fn emit_member_synthetic(&mut self, name: &str, local_off: u32, offset: u64) {
        self.buf.push(AbbrevCode::StructMember as u8);
        let name_ref = self.name_ref(name);
        self.push_strp(name_ref);
        self.reference_synthetic(local_off);
        uleb128(&mut self.buf, offset);
    }

    /// Emits a fresh, never-deduplicated `bool` base_type DIE at the
    /// current position and returns its local offset.
    fn emit_bool_inline(&mut self) -> u32 {
        let off = self.buf.len() as u32;
        self.buf.push(AbbrevCode::BaseType as u8);
        self.buf.push(DW_ATE_BOOLEAN);
        self.buf.push(1);
        let name = self.name_ref("bool");
        self.push_strp(name);
        off
    }

    fn emit_usize_inline(&mut self, usize_size: u64) -> u32 {
        let off = self.buf.len() as u32;
        self.buf.push(AbbrevCode::BaseType as u8);
        self.buf.push(DW_ATE_UNSIGNED);
        self.buf.push(usize_size as u8);
        let name = self.name_ref("usize");
        self.push_strp(name);
        off
    }

    fn err_abi_size(&self, err: TypeId) -> u64 {
        match self.types.ty(err).tag {
            TypeTag::ErrorSet { abi_size, .. } => abi_size,
            _ => 0,
        }
    }

    fn value_abi_size(&self, value: TypeId) -> u64 {
        abi_size_of(&self.types.ty(value).tag, self.ctx)
    }

    /// A function's return type is referenced the same way any other
    /// member/field reference is, except an unresolved error set routes to
    /// the Deferred Reloc Queue rather than the Pending Type-Reloc Table
    /// (spec §4.4 "a function returning an inferred error set").
    fn reference_return_type(&mut self, ty: TypeId) {
        if self.is_unresolved_error_ish(ty) {
            self.reference_deferred();
        } else {
            self.reference_type(ty);
        }
    }

    fn is_unresolved_error_ish(&self, ty: TypeId) -> bool {
        matches!(self.types.ty(ty).tag, TypeTag::ErrorSet { resolved: None, .. })
    }

    fn emit_type(&mut self, key: TypeKey, ty: &Ty) {
        match &ty.tag {
            TypeTag::Bool => {
                let off = self.emit_bool_inline();
                self.pending.set_resolved(key, off);
            }
            TypeTag::Integer { signed, abi_size } => {
                let off = self.buf.len() as u32;
                self.buf.push(AbbrevCode::BaseType as u8);
                self.buf
                    .push(if *signed { DW_ATE_SIGNED } else { DW_ATE_UNSIGNED });
                self.buf.push(*abi_size as u8);
                let mut name = String::new();
                name.push(if *signed { 'i' } else { 'u' });
                name.push_str(&format!("{}", abi_size * 8));
                let name = self.name_ref(&name);
                self.push_strp(name);
                self.pending.set_resolved(key, off);
            }
            TypeTag::PointerLikeOptional { abi_size } => {
                let off = self.buf.len() as u32;
                self.buf.push(AbbrevCode::BaseType as u8);
                self.buf.push(DW_ATE_ADDRESS);
                self.buf.push(*abi_size as u8);
                // spec names no attribute for this kind; a synthetic label
                // satisfies the shared base_type abbrev's mandatory strp
                // (see DESIGN.md).
                let name = self.name_ref("?optional_pointer");
                self.push_strp(name);
                self.pending.set_resolved(key, off);
            }
            TypeTag::NonPointerOptional {
                abi_size,
                payload,
                payload_abi_size,
            } => {
                let off = self.buf.len() as u32;
                self.buf.push(AbbrevCode::StructureType as u8);
                uleb128(&mut self.buf, *abi_size);
                let name = self.name_ref("?optional");
                self.push_strp(name);
                let bool_off = self.emit_bool_inline();
                self.emit_member_synthetic("maybe", bool_off, 0);
                self.emit_member("val", *payload, *abi_size - *payload_abi_size);
                self.buf.push(NULL_ABBREV_CODE);
                self.pending.set_resolved(key, off);
            }
            TypeTag::Slice { elem, usize_size } => {
                let off = self.buf.len() as u32;
                self.buf.push(AbbrevCode::StructureType as u8);
                uleb128(&mut self.buf, usize_size * 2);
                let name = self.name_ref("[]");
                self.push_strp(name);
                let ptr_off = self.buf.len() as u32;
                self.buf.push(AbbrevCode::PtrType as u8);
                self.reference_type(*elem);
                self.emit_member_synthetic("ptr", ptr_off, 0);
                let usize_off = self.emit_usize_inline(*usize_size);
                self.emit_member_synthetic("len", usize_off, *usize_size);
                self.buf.push(NULL_ABBREV_CODE);
                self.pending.set_resolved(key, off);
            }
            TypeTag::Pointer { pointee } => {
                let off = self.buf.len() as u32;
                self.buf.push(AbbrevCode::PtrType as u8);
                self.reference_type(*pointee);
                self.pending.set_resolved(key, off);
            }
            TypeTag::Struct {
                name,
                abi_size,
                fields,
                is_tuple: _,
                is_packed,
            } => {
                let off = self.buf.len() as u32;
                self.pending.set_resolved(key, off);
                self.buf.push(AbbrevCode::StructureType as u8);
                if *is_packed {
                    // Packed-struct DIEs are elided: consumers see a
                    // zero-size struct with no members (spec's own
                    // documented gap).
                    uleb128(&mut self.buf, 0);
                    let name_ref = self.name_ref(name);
                    self.push_strp(name_ref);
                    self.buf.push(NULL_ABBREV_CODE);
                    return;
                }
                uleb128(&mut self.buf, *abi_size);
                let name_ref = self.name_ref(name);
                self.push_strp(name_ref);
                for field in fields {
                    self.emit_member(&field.name, field.ty, field.offset);
                }
                self.buf.push(NULL_ABBREV_CODE);
            }
            TypeTag::Enum {
                name,
                abi_size,
                variants,
            } => {
                let off = self.buf.len() as u32;
                self.pending.set_resolved(key, off);
                self.buf.push(AbbrevCode::EnumerationType as u8);
                uleb128(&mut self.buf, *abi_size);
                let name_ref = self.name_ref(name);
                self.push_strp(name_ref);
                for variant in variants {
                    self.buf.push(AbbrevCode::EnumVariant as u8);
                    let vname = self.name_ref(&variant.name);
                    self.push_strp(vname);
                    self.ctx.push_u64(&mut self.buf, variant.value);
                }
                self.buf.push(NULL_ABBREV_CODE);
            }
            TypeTag::TaggedUnion {
                name,
                layout,
                payload,
                tag,
            } => {
                let outer_off = self.buf.len() as u32;
                self.pending.set_resolved(key, outer_off);
                self.buf.push(AbbrevCode::StructureType as u8);
                uleb128(&mut self.buf, layout.tag_size + layout.payload_size);
                let name_ref = self.name_ref(name);
                self.push_strp(name_ref);

                let (payload_off, tag_off) = layout.member_offsets();

                // "payload" member's type is a nested anonymous union_type,
                // physically emitted right after this member's own
                // attributes. Its ref4 value is a *self-relative* addend --
                // the nested union's own offset within this buffer, written
                // into the placeholder now and patched to `atom_off +
                // addend` once the atom is placed (spec §4.3, §9), rather
                // than going through the pending table.
                self.buf.push(AbbrevCode::StructMember as u8);
                let payload_name = self.name_ref("payload");
                self.push_strp(payload_name);
                let reloc_site = self.buf.len() as u32;
                self.buf.extend_from_slice(&[0, 0, 0, 0]);
                uleb128(&mut self.buf, payload_off);
                let nested_union_off = self.buf.len() as u32;
                let addend = nested_union_off as u64;
                self.ctx
                    .write_u32_at(&mut self.buf, reloc_site as usize, addend as u32);
                self.self_rel.push(reloc_site, addend);

                self.buf.push(AbbrevCode::UnionType as u8);
                uleb128(&mut self.buf, layout.payload_size);
                let union_name = self.name_ref("(payload)");
                self.push_strp(union_name);
                self.emit_member("value", *payload, 0);
                self.buf.push(NULL_ABBREV_CODE);

                self.emit_member("tag", *tag, tag_off);
                self.buf.push(NULL_ABBREV_CODE);
            }
            TypeTag::BareUnion {
                name,
                abi_size,
                fields,
            } => {
                let off = self.buf.len() as u32;
                self.pending.set_resolved(key, off);
                self.buf.push(AbbrevCode::UnionType as u8);
                uleb128(&mut self.buf, *abi_size);
                let name_ref = self.name_ref(name);
                self.push_strp(name_ref);
                for field in fields {
                    self.emit_member(&field.name, field.ty, field.offset);
                }
                self.buf.push(NULL_ABBREV_CODE);
            }
            TypeTag::ErrorSet { abi_size, resolved } => match resolved {
                Some(entries) => {
                    let off = self.buf.len() as u32;
                    self.pending.set_resolved(key, off);
                    self.buf.push(AbbrevCode::EnumerationType as u8);
                    uleb128(&mut self.buf, *abi_size);
                    let name_ref = self.name_ref("error_set");
                    self.push_strp(name_ref);
                    self.buf.push(AbbrevCode::EnumVariant as u8);
                    let no_error_name = self.name_ref("(no error)");
                    self.push_strp(no_error_name);
                    self.ctx.push_u64(&mut self.buf, 0);
                    for (name, value) in entries {
                        self.buf.push(AbbrevCode::EnumVariant as u8);
                        let ename = self.name_ref(name);
                        self.push_strp(ename);
                        self.ctx.push_u64(&mut self.buf, *value);
                    }
                    self.buf.push(NULL_ABBREV_CODE);
                }
                None => {
                    // Resolved lazily by `commit_error_set`. A reference
                    // that reaches here should have gone through
                    // `reference_deferred` instead of `reference_type`;
                    // leaving this arm a no-op keeps `emit_type` total over
                    // `TypeTag` without emitting a bogus DIE.
                }
            },
            TypeTag::ErrorUnion { value, err, abi_align } => {
                let err_size = self.err_abi_size(*err);
                let value_off = align_up(err_size, *abi_align);
                let abi_size = value_off + self.value_abi_size(*value);
                let off = self.buf.len() as u32;
                self.pending.set_resolved(key, off);
                self.buf.push(AbbrevCode::StructureType as u8);
                uleb128(&mut self.buf, abi_size);
                let name_ref = self.name_ref("!");
                self.push_strp(name_ref);
                self.emit_member("err", *err, 0);
                self.emit_member("value", *value, value_off);
                self.buf.push(NULL_ABBREV_CODE);
            }
            TypeTag::Unsupported => {
                let off = self.buf.len() as u32;
                self.pending.set_resolved(key, off);
                #[cfg(feature = "log")]
                log::warn!("emitting DW_TAG_unspecified_type for an unresolved type");
                self.buf.push(AbbrevCode::UnspecifiedType as u8);
            }
        }
    }
}

/// Builds the DIE(s) for one declaration (spec §4.3 "Function", "Global
/// variable"). `GlobalVariable` emits nothing -- spec's own documented gap.
pub fn build_decl(decl: &Decl, types: &dyn TypeProvider, strtab: &mut StringTable, ctx: Ctx) -> BuiltDecl {
    let mut walker = Walker {
        types,
        strtab,
        ctx,
        buf: Vec::new(),
        pending: PendingTypeRelocTable::new(),
        self_rel: SelfRelativeRelocs::new(),
        deferred_local_sites: Vec::new(),
        synthetic: SyntheticIds::new(),
    };

    match &decl.kind {
        DeclKind::GlobalVariable => {}
        DeclKind::Function {
            return_type,
            has_runtime_bits,
            lbrace_line: _,
        } => {
            let name = walker.name_ref(&decl.fully_qualified_name);
            let ptr_width = ctx.ptr_width() as usize;
            match (return_type, has_runtime_bits) {
                (Some(ty), true) => {
                    walker.buf.push(AbbrevCode::Subprogram as u8);
                    walker.buf.extend(core::iter::repeat(0u8).take(ptr_width)); // low_pc
                    walker.buf.extend_from_slice(&[0u8; 4]); // high_pc
                    walker.reference_return_type(*ty);
                    walker.push_strp(name);
                }
                _ => {
                    walker.buf.push(AbbrevCode::SubprogramRetVoid as u8);
                    walker.buf.extend(core::iter::repeat(0u8).take(ptr_width));
                    walker.buf.extend_from_slice(&[0u8; 4]);
                    walker.push_strp(name);
                }
            }
        }
    }

    BuiltDecl {
        buf: walker.buf,
        pending: walker.pending,
        self_rel: walker.self_rel,
        deferred_local_sites: walker.deferred_local_sites,
    }
}
