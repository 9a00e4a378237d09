//! End-to-end scenarios against an in-memory `ObjectFile`, covering spec
//! §8's E1-E5 through the public `Emitter` façade rather than the internal
//! allocator unit tests `src/dwarf/alloc.rs` already covers in isolation.

use std::collections::{BTreeMap, BTreeSet};

use dwarfgen::dwarf::die::TypeProvider;
use dwarfgen::object::{IoSlice, ObjectFile, SectionId};
use dwarfgen::semantic::{Decl, DeclKind, Field, Ty, TypeId, TypeTag, UnionLayout};
use dwarfgen::{CompileUnitInfo, Container, Ctx, Emitter, ObjectFormat};

/// A minimal in-memory object file, grounded the same way
/// `src/object.rs`'s own `FakeObjectFile` is, but usable from an
/// integration test (which can't see that `pub(crate)` type).
struct MemoryObjectFile {
    data: Vec<u8>,
    sections: BTreeMap<SectionId, (u64, u64)>,
    capacity: BTreeMap<SectionId, u64>,
    format: ObjectFormat,
    dirty_sections: BTreeSet<SectionId>,
}

impl MemoryObjectFile {
    fn new(format: ObjectFormat) -> Self {
        MemoryObjectFile {
            data: Vec::new(),
            sections: BTreeMap::new(),
            capacity: BTreeMap::new(),
            format,
            dirty_sections: BTreeSet::new(),
        }
    }

    fn place_section(&mut self, id: SectionId, offset: u64, size: u64, capacity: u64) {
        let needed = (offset + capacity) as usize;
        if self.data.len() < needed {
            self.data.resize(needed, 0);
        }
        self.sections.insert(id, (offset, size));
        self.capacity.insert(id, capacity);
    }
}

impl ObjectFile for MemoryObjectFile {
    fn format(&self) -> ObjectFormat {
        self.format
    }

    fn section_info(&self, id: SectionId) -> (u64, u64) {
        self.sections.get(&id).copied().unwrap_or((0, 0))
    }

    fn allocated_size(&self, offset: u64) -> dwarfgen::Result<u64> {
        for (id, (off, _)) in &self.sections {
            if *off == offset {
                return Ok(*self.capacity.get(id).unwrap_or(&0));
            }
        }
        Ok(0)
    }

    fn find_free_space(&mut self, needed: u64, alignment: u64) -> dwarfgen::Result<u64> {
        let mut off = self.data.len() as u64;
        let rem = off % alignment.max(1);
        if rem != 0 {
            off += alignment - rem;
        }
        self.data.resize((off + needed) as usize, 0);
        Ok(off)
    }

    fn pwrite_all(&mut self, buf: &[u8], offset: u64) -> dwarfgen::Result<()> {
        let end = offset as usize + buf.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[offset as usize..end].copy_from_slice(buf);
        Ok(())
    }

    fn pwritev_all(&mut self, iovecs: &[IoSlice<'_>], offset: u64) -> dwarfgen::Result<()> {
        let mut cursor = offset;
        for iov in iovecs {
            self.pwrite_all(iov.bytes, cursor)?;
            cursor += iov.bytes.len() as u64;
        }
        Ok(())
    }

    fn copy_range_all(&mut self, src_off: u64, dst_off: u64, len: u64) -> dwarfgen::Result<()> {
        let end = dst_off as usize + len as usize;
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        let chunk = self.data[src_off as usize..src_off as usize + len as usize].to_vec();
        self.data[dst_off as usize..end].copy_from_slice(&chunk);
        Ok(())
    }

    fn resize_section(&mut self, id: SectionId, new_size: u64, new_offset: Option<u64>) -> dwarfgen::Result<()> {
        let (old_off, _) = self.section_info(id);
        let off = new_offset.unwrap_or(old_off);
        self.dirty_sections.insert(id);
        self.sections.insert(id, (off, new_size));
        if new_offset.is_some() {
            self.capacity.insert(id, new_size);
        }
        let needed = (off + new_size) as usize;
        if self.data.len() < needed {
            self.data.resize(needed, 0);
        }
        Ok(())
    }
}

struct MapProvider(BTreeMap<u64, Ty>);

impl TypeProvider for MapProvider {
    fn ty(&self, id: TypeId) -> Ty {
        self.0.get(&id.0).cloned().expect("type missing from test fixture")
    }
}

fn fresh_object(format: ObjectFormat) -> MemoryObjectFile {
    let mut object = MemoryObjectFile::new(format);
    object.place_section(SectionId::DebugInfo, 0, 0, 8192);
    object.place_section(SectionId::DebugLine, 8192, 0, 8192);
    object.place_section(SectionId::DebugAbbrev, 16384, 0, 4096);
    object.place_section(SectionId::DebugAranges, 20480, 0, 256);
    object.place_section(SectionId::DebugStr, 20736, 0, 8192);
    object
}

fn ctx_p64_elf() -> Ctx {
    Ctx::new(64, scroll::Endian::Little, ObjectFormat::Elf).unwrap()
}

fn cu_info() -> CompileUnitInfo<'static> {
    CompileUnitInfo {
        name: "main.zig",
        comp_dir: "/home/user/project",
        producer: "dwarfgen",
        source_path: "/home/user/project/main.zig",
        low_pc: 0x1000,
    }
}

#[test]
fn e1_committing_three_functions_keeps_the_section_well_formed() {
    let mut object = fresh_object(ObjectFormat::Elf);
    let mut emitter = Emitter::new(ctx_p64_elf());
    emitter.open(&cu_info(), &mut object).unwrap();

    let provider = MapProvider(BTreeMap::new());
    for name in ["root.a", "root.b", "root.c"] {
        let decl = Decl {
            fully_qualified_name: name.to_string(),
            kind: DeclKind::Function {
                return_type: None,
                has_runtime_bits: false,
                lbrace_line: 1,
            },
        };
        let handle = emitter.init_decl(&decl.kind);
        emitter.commit_decl(handle, &decl, &provider, &[], &mut object).unwrap();
        assert!(emitter.check_adjacency_invariant());
    }

    emitter.finalize(0x3000, &mut object).unwrap();
    let (off, size) = object.section_info(SectionId::DebugAranges);
    assert!(size >= 16);
    assert!(object.data[off as usize..(off + size) as usize]
        .iter()
        .rev()
        .take(16)
        .all(|&b| b == 0));
}

#[test]
fn e2_function_with_integer_return_references_a_base_type_die() {
    let mut object = fresh_object(ObjectFormat::Elf);
    let mut emitter = Emitter::new(ctx_p64_elf());
    emitter.open(&cu_info(), &mut object).unwrap();

    let mut types = BTreeMap::new();
    types.insert(
        1,
        Ty {
            id: TypeId(1),
            tag: TypeTag::Integer {
                signed: true,
                abi_size: 4,
            },
        },
    );
    let provider = MapProvider(types);
    let decl = Decl {
        fully_qualified_name: "root.add".to_string(),
        kind: DeclKind::Function {
            return_type: Some(TypeId(1)),
            has_runtime_bits: true,
            lbrace_line: 7,
        },
    };
    let handle = emitter.init_decl(&decl.kind);
    emitter.commit_decl(handle, &decl, &provider, &[], &mut object).unwrap();
    assert!(emitter.check_adjacency_invariant());
}

#[test]
fn e3_struct_with_nested_pointer_field_resolves_all_pending_relocs() {
    let mut object = fresh_object(ObjectFormat::Elf);
    let mut emitter = Emitter::new(ctx_p64_elf());
    emitter.open(&cu_info(), &mut object).unwrap();

    let mut types = BTreeMap::new();
    types.insert(
        2,
        Ty {
            id: TypeId(2),
            tag: TypeTag::Integer {
                signed: false,
                abi_size: 8,
            },
        },
    );
    types.insert(
        3,
        Ty {
            id: TypeId(3),
            tag: TypeTag::Pointer { pointee: TypeId(2) },
        },
    );
    types.insert(
        1,
        Ty {
            id: TypeId(1),
            tag: TypeTag::Struct {
                name: "Node".to_string(),
                abi_size: 16,
                fields: vec![
                    Field {
                        name: "value".to_string(),
                        ty: TypeId(2),
                        offset: 0,
                    },
                    Field {
                        name: "next".to_string(),
                        ty: TypeId(3),
                        offset: 8,
                    },
                ],
                is_tuple: false,
                is_packed: false,
            },
        },
    );
    let provider = MapProvider(types);
    let decl = Decl {
        fully_qualified_name: "root.make_node".to_string(),
        kind: DeclKind::Function {
            return_type: Some(TypeId(1)),
            has_runtime_bits: true,
            lbrace_line: 3,
        },
    };
    let handle = emitter.init_decl(&decl.kind);
    emitter.commit_decl(handle, &decl, &provider, &[], &mut object).unwrap();
    assert!(emitter.check_adjacency_invariant());
}

#[test]
fn e4_tagged_union_return_type_round_trips_through_commit() {
    let mut object = fresh_object(ObjectFormat::Elf);
    let mut emitter = Emitter::new(ctx_p64_elf());
    emitter.open(&cu_info(), &mut object).unwrap();

    let mut types = BTreeMap::new();
    types.insert(
        10,
        Ty {
            id: TypeId(10),
            tag: TypeTag::Bool,
        },
    );
    types.insert(
        11,
        Ty {
            id: TypeId(11),
            tag: TypeTag::Integer {
                signed: true,
                abi_size: 8,
            },
        },
    );
    types.insert(
        1,
        Ty {
            id: TypeId(1),
            tag: TypeTag::TaggedUnion {
                name: "Optional(i64)".to_string(),
                layout: UnionLayout {
                    tag_size: 1,
                    tag_align: 1,
                    payload_size: 8,
                    payload_align: 8,
                },
                payload: TypeId(11),
                tag: TypeId(10),
            },
        },
    );
    let provider = MapProvider(types);
    let decl = Decl {
        fully_qualified_name: "root.maybe_value".to_string(),
        kind: DeclKind::Function {
            return_type: Some(TypeId(1)),
            has_runtime_bits: true,
            lbrace_line: 4,
        },
    };
    let handle = emitter.init_decl(&decl.kind);
    emitter.commit_decl(handle, &decl, &provider, &[], &mut object).unwrap();
    assert!(emitter.check_adjacency_invariant());

    // Byte-exact per spec §8 scenario E3: once the atom is placed, the
    // "payload" member's self-relative `ref4` must read `atom_off +
    // nested_union_off` and point straight at the nested union_type DIE --
    // not `atom_off + (nested_union_off - outer_off)`.
    //
    // Buffer layout of this decl (p64, every ULEB128 field below is a
    // single byte): subprogram tag(1) + low_pc(8) + high_pc(4) + return-type
    // ref4(4) -> outer struct at local offset 17; outer tag(1) + byte_size
    // uleb(1) + name strp(4) -> payload member at 23; member tag(1) + name
    // strp(4) -> ref4 placeholder (the reloc site) at local offset 28;
    // placeholder(4) + data_member_location uleb(1) -> nested union_type at
    // local offset 33.
    let atom_off = dwarfgen::dwarf::alloc::pad_to_ideal(dwarfgen::dwarf::header::CU_HEADER_BUDGET);
    let reloc_site: u64 = 28;
    let nested_union_off: u64 = 33;
    let (section_base, _) = object.section_info(SectionId::DebugInfo);
    let abs_site = (section_base + atom_off + reloc_site) as usize;
    let patched = u32::from_le_bytes(object.data[abs_site..abs_site + 4].try_into().unwrap());
    assert_eq!(patched, (atom_off + nested_union_off) as u32);
    let union_tag_off = (section_base + atom_off + nested_union_off) as usize;
    assert_eq!(
        object.data[union_tag_off],
        dwarfgen::dwarf::abbrev::AbbrevCode::UnionType as u8
    );
}

#[test]
fn e5_freeing_a_declaration_and_committing_a_bigger_one_keeps_invariants() {
    let mut object = fresh_object(ObjectFormat::Elf);
    let mut emitter = Emitter::new(ctx_p64_elf());
    emitter.open(&cu_info(), &mut object).unwrap();

    let provider = MapProvider(BTreeMap::new());
    let void_fn = |name: &str| Decl {
        fully_qualified_name: name.to_string(),
        kind: DeclKind::Function {
            return_type: None,
            has_runtime_bits: false,
            lbrace_line: 1,
        },
    };

    let a = emitter.init_decl(&void_fn("root.a").kind);
    emitter.commit_decl(a, &void_fn("root.a"), &provider, &[], &mut object).unwrap();
    let b = emitter.init_decl(&void_fn("root.b").kind);
    emitter.commit_decl(b, &void_fn("root.b"), &provider, &[], &mut object).unwrap();
    let c = emitter.init_decl(&void_fn("root.c").kind);
    emitter.commit_decl(c, &void_fn("root.c"), &provider, &[], &mut object).unwrap();

    emitter.free_decl(b, &mut object).unwrap();

    let mut big_types = BTreeMap::new();
    big_types.insert(
        1,
        Ty {
            id: TypeId(1),
            tag: TypeTag::Struct {
                name: "Big".to_string(),
                abi_size: 64,
                fields: (0..8)
                    .map(|i| Field {
                        name: format!("f{i}"),
                        ty: TypeId(2),
                        offset: i * 8,
                    })
                    .collect(),
                is_tuple: false,
                is_packed: false,
            },
        },
    );
    big_types.insert(
        2,
        Ty {
            id: TypeId(2),
            tag: TypeTag::Integer {
                signed: false,
                abi_size: 8,
            },
        },
    );
    let big_provider = MapProvider(big_types);
    let big_decl = Decl {
        fully_qualified_name: "root.refill".to_string(),
        kind: DeclKind::Function {
            return_type: Some(TypeId(1)),
            has_runtime_bits: true,
            lbrace_line: 9,
        },
    };
    let d = emitter.init_decl(&big_decl.kind);
    emitter.commit_decl(d, &big_decl, &big_provider, &[], &mut object).unwrap();

    assert!(emitter.check_adjacency_invariant());
}

#[test]
fn global_error_set_resolves_deferred_references_from_multiple_decls() {
    let mut object = fresh_object(ObjectFormat::Elf);
    let mut emitter = Emitter::new(ctx_p64_elf());
    emitter.open(&cu_info(), &mut object).unwrap();

    let mut types = BTreeMap::new();
    types.insert(
        1,
        Ty {
            id: TypeId(1),
            tag: TypeTag::ErrorSet {
                abi_size: 2,
                resolved: None,
            },
        },
    );
    let provider = MapProvider(types);

    let fail_fn = |name: &str| Decl {
        fully_qualified_name: name.to_string(),
        kind: DeclKind::Function {
            return_type: Some(TypeId(1)),
            has_runtime_bits: true,
            lbrace_line: 2,
        },
    };

    let a = emitter.init_decl(&fail_fn("root.read").kind);
    emitter.commit_decl(a, &fail_fn("root.read"), &provider, &[], &mut object).unwrap();
    let b = emitter.init_decl(&fail_fn("root.write").kind);
    emitter.commit_decl(b, &fail_fn("root.write"), &provider, &[], &mut object).unwrap();

    let global = dwarfgen::semantic::GlobalErrorSet {
        entries: vec![("OutOfMemory".to_string(), 1), ("AccessDenied".to_string(), 2)],
    };
    emitter.commit_error_set(&global, &mut object).unwrap();

    assert!(emitter.check_adjacency_invariant());
}

#[test]
fn macho_target_forces_little_endian_even_when_requested_big() {
    let ctx = Ctx::new(64, scroll::Endian::Big, ObjectFormat::MachO).unwrap();
    assert_eq!(ctx.endian, scroll::Endian::Little);
    assert_eq!(ctx.container, Container::Big);

    let mut object = fresh_object(ObjectFormat::MachO);
    let mut emitter = Emitter::new(ctx);
    emitter.open(&cu_info(), &mut object).unwrap();

    let provider = MapProvider(BTreeMap::new());
    let decl = Decl {
        fully_qualified_name: "root.noop".to_string(),
        kind: DeclKind::Function {
            return_type: None,
            has_runtime_bits: false,
            lbrace_line: 1,
        },
    };
    let handle = emitter.init_decl(&decl.kind);
    emitter.commit_decl(handle, &decl, &provider, &[], &mut object).unwrap();
    assert!(emitter.check_adjacency_invariant());
}
