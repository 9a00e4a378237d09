//! Arena-allocated doubly-linked registries for `.debug_info` atoms and
//! `.debug_line` srcfns (spec §3 "Atom", "SrcFn", §9 "rewrite as
//! arena-allocated nodes identified by stable 32-bit indices").
//!
//! Both lists share identical shape and identical allocation policy (spec
//! §4.1 "share one policy"), so they're both instances of the same generic
//! [`Registry`] here, distinguished only by a zero-sized marker type so
//! `AtomId` and `SrcFnId` can't be mixed up at the call site.

use alloc::collections::BTreeSet;
use alloc::vec::Vec;
use core::marker::PhantomData;

/// Minimum padding, in bytes, that must separate two adjacent records
/// (spec §3 invariant, §9 glossary "min_nop_size").
pub const MIN_NOP_SIZE: u64 = 2;

/// Marker distinguishing `.debug_info` atom ids from `.debug_line` srcfn ids.
#[derive(Debug)]
pub struct AtomKind;
/// Marker distinguishing `.debug_line` srcfn ids from `.debug_info` atom ids.
#[derive(Debug)]
pub struct SrcFnKind;

pub type AtomId = SlotId<AtomKind>;
pub type SrcFnId = SlotId<SrcFnKind>;

#[derive(Debug)]
pub struct SlotId<K>(u32, PhantomData<K>);

// Hand-rolled instead of `#[derive]` so `K` does not need to implement the
// derived traits itself -- it's a zero-sized marker, never a real value.
impl<K> Clone for SlotId<K> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<K> Copy for SlotId<K> {}
impl<K> PartialEq for SlotId<K> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<K> Eq for SlotId<K> {}
impl<K> PartialOrd for SlotId<K> {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<K> Ord for SlotId<K> {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl<K> SlotId<K> {
    fn new(idx: u32) -> Self {
        SlotId(idx, PhantomData)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// One `.debug_info` atom or `.debug_line` srcfn slot (spec §3).
#[derive(Debug, Clone, Copy)]
pub struct Slot<K> {
    pub off: u64,
    pub len: u64,
    pub prev: Option<SlotId<K>>,
    pub next: Option<SlotId<K>>,
    /// `false` once `free_decl` unlinks this slot (spec §5 "free_decl may
    /// be called at any time... it unlinks but does not move siblings").
    live: bool,
}

/// Doubly-linked list of [`Slot`]s over a stable arena, plus the advisory
/// free set from spec §3. Never destroys a node while the emitter is alive.
#[derive(Debug)]
pub struct Registry<K> {
    arena: Vec<Slot<K>>,
    first: Option<SlotId<K>>,
    last: Option<SlotId<K>>,
    free: BTreeSet<SlotId<K>>,
}

impl<K> Default for Registry<K> {
    fn default() -> Self {
        Registry {
            arena: Vec::new(),
            first: None,
            last: None,
            free: BTreeSet::new(),
        }
    }
}

impl<K> Registry<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn first(&self) -> Option<SlotId<K>> {
        self.first
    }

    pub fn last(&self) -> Option<SlotId<K>> {
        self.last
    }

    pub fn get(&self, id: SlotId<K>) -> &Slot<K> {
        &self.arena[id.index()]
    }

    fn get_mut(&mut self, id: SlotId<K>) -> &mut Slot<K> {
        &mut self.arena[id.index()]
    }

    /// Allocates a brand-new slot not yet linked into the list. Used only
    /// by the allocator (spec §4.1 step 2) the first time a declaration is
    /// emitted.
    pub fn alloc_detached(&mut self) -> SlotId<K> {
        let id = SlotId::new(self.arena.len() as u32);
        self.arena.push(Slot {
            off: 0,
            len: 0,
            prev: None,
            next: None,
            live: false,
        });
        id
    }

    pub fn is_live(&self, id: SlotId<K>) -> bool {
        self.get(id).live
    }

    /// Links `id` in as the sole member of an empty list.
    pub fn link_as_only(&mut self, id: SlotId<K>) {
        debug_assert!(self.first.is_none() && self.last.is_none());
        {
            let slot = self.get_mut(id);
            slot.prev = None;
            slot.next = None;
            slot.live = true;
        }
        self.first = Some(id);
        self.last = Some(id);
    }

    /// Appends `id` after the current last record.
    pub fn link_after_last(&mut self, id: SlotId<K>) {
        let old_last = self.last.expect("link_after_last called on empty list");
        self.get_mut(old_last).next = Some(id);
        {
            let slot = self.get_mut(id);
            slot.prev = Some(old_last);
            slot.next = None;
            slot.live = true;
        }
        self.last = Some(id);
        self.free.remove(&id);
    }

    /// Removes `id` from the active list, relinking its neighbours, and
    /// marks it as free (spec §3 "Free list"). Does not move siblings.
    pub fn unlink(&mut self, id: SlotId<K>) {
        let (prev, next) = {
            let slot = self.get(id);
            (slot.prev, slot.next)
        };
        match prev {
            Some(p) => self.get_mut(p).next = next,
            None => self.first = next,
        }
        match next {
            Some(n) => self.get_mut(n).prev = prev,
            None => self.last = prev,
        }
        {
            let slot = self.get_mut(id);
            slot.prev = None;
            slot.next = None;
            slot.live = false;
        }
        self.free.insert(id);
    }

    pub fn set_len(&mut self, id: SlotId<K>, len: u64) {
        self.get_mut(id).len = len;
    }

    pub fn set_off(&mut self, id: SlotId<K>, off: u64) {
        self.get_mut(id).off = off;
    }

    pub fn is_last(&self, id: SlotId<K>) -> bool {
        self.last == Some(id)
    }

    /// Section bytes in use: the tail record's end, plus one reserved
    /// terminator byte when `reserve_terminator` is set (`.debug_info`'s
    /// closing zero abbreviation code, spec §3).
    pub fn used_size(&self, reserve_terminator: bool) -> u64 {
        match self.last {
            None => 0,
            Some(id) => {
                let slot = self.get(id);
                slot.off + slot.len + if reserve_terminator { 1 } else { 0 }
            }
        }
    }

    /// Iterates live records in ascending-offset (list) order.
    pub fn iter(&self) -> impl Iterator<Item = SlotId<K>> + '_ {
        let mut cur = self.first;
        core::iter::from_fn(move || {
            let id = cur?;
            cur = self.get(id).next;
            Some(id)
        })
    }

    /// Testable property 1 (spec §8): every adjacent pair respects the
    /// minimum gap.
    pub fn check_adjacency_invariant(&self) -> bool {
        self.iter().zip(self.iter().skip(1)).all(|(a, b)| {
            let a = self.get(a);
            let b = self.get(b);
            a.off + a.len + MIN_NOP_SIZE <= b.off
        })
    }

    /// Testable property 4 (spec §8): a freed record isn't reachable by
    /// traversal but is a free-set member.
    pub fn is_freed_and_unreachable(&self, id: SlotId<K>) -> bool {
        !self.is_live(id) && self.free.contains(&id) && self.iter().all(|x| x != id)
    }
}
