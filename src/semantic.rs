//! Minimal shapes for what the emitter consumes from the front-end semantic
//! module (spec §6, "Consumed (from the semantic module)"). A real front end
//! has far richer types; this crate only needs the handful of fields named
//! in spec §4.3's per-kind encodings, so that's all that's modeled here.

use alloc::string::String;
use alloc::vec::Vec;

/// A stable identity for a type, used as half of the Pending Type-Reloc
/// Table's key (spec §3 "Pending Type-Reloc Table", §9 "keyed by structural
/// type"). Two `Ty` values with the same `TypeKey` are the same type for the
/// purposes of DIE deduplication; the `Ctx` the type is emitted under forms
/// the other half of the key (see [`crate::die::TypeKey`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: TypeId,
    /// Byte offset of this field within its owning aggregate.
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumVariant {
    pub name: String,
    pub value: u64,
}

/// Layout facts about a tagged union needed to place `payload`/`tag`
/// members and compute the self-relative `ref4` from spec §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnionLayout {
    pub tag_size: u64,
    pub tag_align: u64,
    pub payload_size: u64,
    pub payload_align: u64,
}

impl UnionLayout {
    /// Returns `(payload_offset, tag_offset)`. When the payload's alignment
    /// is stricter, it sorts first (offset 0) and the tag follows at
    /// `payload_size`; otherwise the tag leads.
    pub fn member_offsets(self) -> (u64, u64) {
        if self.payload_align >= self.tag_align {
            (0, self.payload_size)
        } else {
            (self.tag_size, 0)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTag {
    Bool,
    Integer {
        signed: bool,
        abi_size: u64,
    },
    /// An optional whose payload is itself pointer-like, so `null` can be
    /// represented without an extra discriminant byte.
    PointerLikeOptional {
        abi_size: u64,
    },
    NonPointerOptional {
        abi_size: u64,
        payload: TypeId,
        payload_abi_size: u64,
    },
    Slice {
        elem: TypeId,
        usize_size: u64,
    },
    Pointer {
        pointee: TypeId,
    },
    Struct {
        name: String,
        abi_size: u64,
        fields: Vec<Field>,
        is_tuple: bool,
        is_packed: bool,
    },
    Enum {
        name: String,
        abi_size: u64,
        variants: Vec<EnumVariant>,
    },
    TaggedUnion {
        name: String,
        layout: UnionLayout,
        payload: TypeId,
        tag: TypeId,
    },
    BareUnion {
        name: String,
        abi_size: u64,
        fields: Vec<Field>,
    },
    /// `resolved: None` marks an inferred error set not yet finalized, or
    /// `anyerror`; references to it go through the Deferred Reloc Queue
    /// (spec §4.4) instead of the Pending Type-Reloc Table.
    ErrorSet {
        abi_size: u64,
        resolved: Option<Vec<(String, u64)>>,
    },
    ErrorUnion {
        value: TypeId,
        err: TypeId,
        abi_align: u64,
    },
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ty {
    pub id: TypeId,
    pub tag: TypeTag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclKind {
    Function {
        return_type: Option<TypeId>,
        has_runtime_bits: bool,
        /// Source line of the function's opening brace.
        lbrace_line: u32,
    },
    GlobalVariable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decl {
    pub fully_qualified_name: String,
    pub kind: DeclKind,
}

/// The compile's global error set: name to assigned value, in declaration
/// order (spec §4.3 "error set").
#[derive(Debug, Clone, Default)]
pub struct GlobalErrorSet {
    pub entries: Vec<(String, u64)>,
}
