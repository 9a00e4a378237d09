//! The top-level façade (spec §5 "one logical owner invokes it per
//! compile"): ties the Allocator, DIE Builder, Line Program Builder, Header
//! Writers, and Deferred-Relocation Resolver together behind the ordered
//! operations spec §5 names.

use alloc::vec::Vec;

use crate::container::Ctx;
use crate::dwarf::abbrev::{self, AbbrevCode, NULL_ABBREV_CODE};
use crate::dwarf::alloc::allocate_or_grow;
use crate::dwarf::atom::{AtomId, AtomKind, Registry, SrcFnId, SrcFnKind};
use crate::dwarf::die::{self, TypeProvider};
use crate::dwarf::header::{self, CuHeaderLayout};
use crate::dwarf::line;
use crate::dwarf::pad::{self, PadStyle};
use crate::dwarf::reloc::DeferredRelocQueue;
use crate::dwarf::strtab::StringTable;
use crate::error::{Error, Result};
use crate::object::{ObjectFile, SectionId};
use crate::semantic::{Decl, DeclKind, GlobalErrorSet};

/// Handle returned by [`Emitter::init_decl`], threaded through the
/// `init_decl` -> codegen -> `commit_decl` sequence spec §5 requires.
/// `srcfn` is populated only for function declarations (spec §3 "SrcFn: ...
/// owned by one function"); global variables have no line program fragment.
#[derive(Debug, Clone, Copy)]
pub struct DeclHandle {
    atom: AtomId,
    srcfn: Option<SrcFnId>,
}

/// Fixed metadata about the compile unit, supplied once at
/// [`Emitter::open`] (spec §4.5's CU header fields that don't change per
/// declaration).
pub struct CompileUnitInfo<'a> {
    pub name: &'a str,
    pub comp_dir: &'a str,
    pub producer: &'a str,
    pub source_path: &'a str,
    pub low_pc: u64,
}

pub struct Emitter {
    ctx: Ctx,
    atoms: Registry<AtomKind>,
    srcfns: Registry<SrcFnKind>,
    strtab: StringTable,
    deferred: DeferredRelocQueue,
    cu_header: Option<CuHeaderLayout>,
    low_pc: u64,
    error_set_committed: bool,
    /// Section-relative length of the `.debug_line` program header, used the
    /// same way `header::CU_HEADER_BUDGET` is used for `.debug_info` (spec
    /// §4.1 step 2's `pad_to_ideal(header_bytes)`).
    line_header_len: u64,
    /// Source line of the most recently committed function's opening brace,
    /// standing in for "the previous function's closing brace" (spec §4.2)
    /// since this crate's simplified semantic model tracks only the
    /// opening-brace line -- see DESIGN.md.
    prev_line_anchor: u32,
}

impl Emitter {
    pub fn new(ctx: Ctx) -> Self {
        Emitter {
            ctx,
            atoms: Registry::new(),
            srcfns: Registry::new(),
            strtab: StringTable::new(),
            deferred: DeferredRelocQueue::new(),
            cu_header: None,
            low_pc: 0,
            error_set_committed: false,
            line_header_len: 0,
            prev_line_anchor: 0,
        }
    }

    /// Writes every fixed, one-time header: the abbreviation table, the CU
    /// header, and the `.debug_line` program header (spec §4.5). Must run
    /// before any `init_decl`/`commit_decl` pair.
    pub fn open(&mut self, info: &CompileUnitInfo<'_>, object: &mut impl ObjectFile) -> Result<()> {
        abbrev::write_abbrev(object)?;
        // `DW_AT_stmt_list` is the offset of this CU's line program from
        // the start of `.debug_line`, not a file offset; this emitter only
        // ever writes one line program, always at the section's own start.
        let layout = header::write_cu_header(
            object,
            self.ctx,
            &mut self.strtab,
            0,
            info.low_pc,
            info.name,
            info.comp_dir,
            info.producer,
        )?;
        self.cu_header = Some(layout);
        self.low_pc = info.low_pc;
        let line_base = object.section_info(SectionId::DebugLine).0;
        let prologue_start = header::write_line_header(object, self.ctx, info.source_path)?;
        self.line_header_len = prologue_start - line_base;
        header::sync_strtab(object, &self.strtab)?;
        Ok(())
    }

    /// Allocates detached slots for a new declaration: always a
    /// `.debug_info` atom, plus a `.debug_line` srcfn when `kind` is a
    /// function (spec §5 `init_decl`).
    pub fn init_decl(&mut self, kind: &DeclKind) -> DeclHandle {
        let atom = self.atoms.alloc_detached();
        let srcfn = match kind {
            DeclKind::Function { .. } => Some(self.srcfns.alloc_detached()),
            DeclKind::GlobalVariable => None,
        };
        DeclHandle { atom, srcfn }
    }

    /// Builds and commits one declaration's DIE(s), and -- for functions --
    /// its `.debug_line` fragment (spec §5 `init_decl` -> codegen ->
    /// `commit_decl`). `commit_decl` observes the atom/srcfn only in their
    /// post-allocation state, per spec's ordering guarantee. `row_opcodes`
    /// is whatever row-emission opcodes the code generator produced for
    /// this function (empty for a function with no line-table-visible
    /// statements, ignored for `GlobalVariable`).
    pub fn commit_decl(
        &mut self,
        handle: DeclHandle,
        decl: &Decl,
        types: &dyn TypeProvider,
        row_opcodes: &[u8],
        object: &mut impl ObjectFile,
    ) -> Result<()> {
        let built = die::build_decl(decl, types, &mut self.strtab, self.ctx);

        if self.error_set_committed && !built.deferred_local_sites.is_empty() {
            return Err(Error::Malformed(
                "commit_decl referencing an unresolved error set after commit_error_set",
            ));
        }

        let reserve_terminator = true;
        allocate_or_grow(
            &mut self.atoms,
            handle.atom,
            built.buf.len() as u64,
            header::CU_HEADER_BUDGET,
            reserve_terminator,
            PadStyle::Info,
            SectionId::DebugInfo,
            object,
        )?;

        let atom_off = self.atoms.get(handle.atom).off;
        let section_base = object.section_info(SectionId::DebugInfo).0;
        object.pwrite_all(&built.buf, section_base + atom_off)?;
        self.write_terminator(object)?;

        let atom_off32 = atom_off as u32;
        built.pending.resolve_all(atom_off32, self.ctx, SectionId::DebugInfo, object)?;
        built.self_rel.resolve_all(atom_off32, self.ctx, SectionId::DebugInfo, object)?;
        for local_site in &built.deferred_local_sites {
            self.deferred.push_absolute(section_base + atom_off + *local_site as u64);
        }

        header::sync_strtab(object, &self.strtab)?;

        if let (Some(srcfn_id), DeclKind::Function { lbrace_line, .. }) = (handle.srcfn, &decl.kind) {
            self.commit_line_fragment(srcfn_id, *lbrace_line, row_opcodes, object)?;
        }

        Ok(())
    }

    /// Builds and allocates one function's `.debug_line` fragment (spec
    /// §4.2): prologue with its three fixed-width reloc slots, the code
    /// generator's row opcodes, then the sequence terminator.
    fn commit_line_fragment(
        &mut self,
        srcfn_id: SrcFnId,
        lbrace_line: u32,
        row_opcodes: &[u8],
        object: &mut impl ObjectFile,
    ) -> Result<()> {
        let line_delta = lbrace_line.saturating_sub(self.prev_line_anchor);
        self.prev_line_anchor = lbrace_line;

        let mut buf = line::build_prologue(self.ctx, line_delta);
        buf.extend_from_slice(row_opcodes);
        buf.extend_from_slice(&line::terminator());

        allocate_or_grow(
            &mut self.srcfns,
            srcfn_id,
            buf.len() as u64,
            self.line_header_len,
            false,
            PadStyle::Line,
            SectionId::DebugLine,
            object,
        )?;

        let off = self.srcfns.get(srcfn_id).off;
        let base = object.section_info(SectionId::DebugLine).0;
        object.pwrite_all(&buf, base + off)
    }

    /// Patches reloc slot 0 (the function's base virtual address) in an
    /// already-committed line fragment. The code generator supplies real
    /// addresses only after the surrounding linker has laid out the text
    /// section, which is why this is a separate call from `commit_decl`
    /// (spec §4.2 "reloc slot 0").
    pub fn patch_function_vaddr(&self, handle: DeclHandle, vaddr: u64, object: &mut impl ObjectFile) -> Result<()> {
        let srcfn_id = handle
            .srcfn
            .ok_or(Error::Malformed("patch_function_vaddr called on a non-function declaration"))?;
        let slots = line::reloc_slots(self.ctx.ptr_width());
        let off = self.srcfns.get(srcfn_id).off;
        let base = object.section_info(SectionId::DebugLine).0;
        let bytes = line::vaddr_bytes(self.ctx, vaddr);
        object.pwrite_all(&bytes, base + off + slots.vaddr as u64)
    }

    /// Unlinks a declaration's atom (and srcfn, if any) and immediately
    /// clears their bytes with NOP filler, since the raw byte stream must
    /// stay well-formed for a consumer that doesn't know about atom
    /// boundaries (spec §5 `free_decl`, §4.6).
    pub fn free_decl(&mut self, handle: DeclHandle, object: &mut impl ObjectFile) -> Result<()> {
        if let Some(srcfn_id) = handle.srcfn {
            let off = self.srcfns.get(srcfn_id).off;
            let len = self.srcfns.get(srcfn_id).len;
            self.srcfns.unlink(srcfn_id);
            let base = object.section_info(SectionId::DebugLine).0;
            pad::clear_with_filler(object, SectionId::DebugLine, base + off, len, PadStyle::Line)?;
        }

        let off = self.atoms.get(handle.atom).off;
        let len = self.atoms.get(handle.atom).len;
        self.atoms.unlink(handle.atom);
        let base = object.section_info(SectionId::DebugInfo).0;
        pad::clear_with_filler(object, SectionId::DebugInfo, base + off, len, PadStyle::Info)
    }

    /// Materializes the global error set's DIE and drains the Deferred
    /// Reloc Queue (spec §4.4, §5 "All declarations of a compile must be
    /// committed before `commit_error_set`"). Further `commit_decl` calls
    /// referencing an unresolved error set are rejected afterward.
    pub fn commit_error_set(&mut self, global: &GlobalErrorSet, object: &mut impl ObjectFile) -> Result<()> {
        if self.error_set_committed {
            return Err(Error::Malformed("commit_error_set called more than once"));
        }

        let mut buf = Vec::new();
        let max_value = global.entries.iter().map(|(_, v)| *v).max().unwrap_or(0);
        let abi_size: u64 = if max_value <= 0xff {
            1
        } else if max_value <= 0xffff {
            2
        } else if max_value <= 0xffff_ffff {
            4
        } else {
            8
        };

        buf.push(AbbrevCode::EnumerationType as u8);
        uleb128(&mut buf, abi_size);
        let name = self.strtab.make_string("anyerror");
        self.ctx.push_u32(&mut buf, name);
        buf.push(AbbrevCode::EnumVariant as u8);
        let no_error_name = self.strtab.make_string("(no error)");
        self.ctx.push_u32(&mut buf, no_error_name);
        self.ctx.push_u64(&mut buf, 0);
        for (name, value) in &global.entries {
            buf.push(AbbrevCode::EnumVariant as u8);
            let name_ref = self.strtab.make_string(name);
            self.ctx.push_u32(&mut buf, name_ref);
            self.ctx.push_u64(&mut buf, *value);
        }
        buf.push(NULL_ABBREV_CODE);

        let handle = self.init_decl(&DeclKind::GlobalVariable);
        allocate_or_grow(
            &mut self.atoms,
            handle.atom,
            buf.len() as u64,
            header::CU_HEADER_BUDGET,
            true,
            PadStyle::Info,
            SectionId::DebugInfo,
            object,
        )?;

        let atom_off = self.atoms.get(handle.atom).off;
        let section_base = object.section_info(SectionId::DebugInfo).0;
        object.pwrite_all(&buf, section_base + atom_off)?;
        self.write_terminator(object)?;
        header::sync_strtab(object, &self.strtab)?;

        self.deferred
            .drain_resolve(atom_off as u32, self.ctx, SectionId::DebugInfo, object)?;
        self.error_set_committed = true;
        Ok(())
    }

    /// Patches the CU header's `high_pc` and writes `.debug_aranges`, once
    /// the caller knows the compile's final address range (spec §4.5;
    /// neither field is knowable until every function has been placed by
    /// the surrounding linker, which owns real addresses -- see
    /// DESIGN.md).
    pub fn finalize(&mut self, high_pc: u32, object: &mut impl ObjectFile) -> Result<()> {
        let layout = self
            .cu_header
            .ok_or(Error::Malformed("finalize called before open"))?;
        header::patch_high_pc(object, self.ctx, layout, high_pc)?;
        header::write_aranges(object, self.ctx, self.low_pc, high_pc)
    }

    /// Testable property 1 (spec §8): adjacency invariant over `.debug_info`
    /// atoms and `.debug_line` srcfns alike.
    pub fn check_adjacency_invariant(&self) -> bool {
        self.atoms.check_adjacency_invariant() && self.srcfns.check_adjacency_invariant()
    }

    fn write_terminator(&self, object: &mut impl ObjectFile) -> Result<()> {
        let section_base = object.section_info(SectionId::DebugInfo).0;
        let terminator_off = section_base + self.atoms.used_size(true) - 1;
        object.pwrite_all(&[NULL_ABBREV_CODE], terminator_off)
    }
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
