//! `RefTable` keeps track of where each reference's block currently is,
//! so callers can hold on to a `Ref` across collections instead of a
//! `Handle`.

use cbuf::CBuf;

use super::arena::{Arena, Handle};
use super::gc::GcStats;
use super::types::*;

/// one entry per reference: the current handle, if in use
pub type Slot = Option<Handle>;

/**
`RefTable` hands out references and maps them to the current `Handle`
of their block.

The slots and the cache of released references are provided by the
caller, so the table never allocates. References are the slot indexes,
so there can be at most `slots.len()` live blocks stored through the
table.

Collect with `RefTable::gc` (or pass `RefTable::relocate` to `Arena::gc`)
so that slots are updated whenever a block moves.
*/
pub struct RefTable<'a> {
    slots: &'a mut [Slot],
    cache: CBuf<'a, Ref>,   // recently released refs
    last_used: Ref,         // for speeding up finding refs
    used: usize,
}

impl<'a> RefTable<'a> {
    /// create a table over `slots`, all of which are cleared
    pub fn new(slots: &'a mut [Slot], cache: CBuf<'a, Ref>) -> RefTable<'a> {
        assert!(!slots.is_empty() && slots.len() <= MAX_REF as usize,
                "invalid number of slots: {}", slots.len());
        for s in slots.iter_mut() {
            *s = None;
        }
        let last = (slots.len() - 1) as Ref;
        RefTable {
            slots: slots,
            cache: cache,
            last_used: last,
            used: 0,
        }
    }

    /// store a copy of `data` in `arena` under a new reference
    ///
    /// Errors are the same as `Arena::alloc`, plus `Error::OutOfRefs`
    /// when every slot is in use and `Error::InvalidSize` when `data` is
    /// empty or not smaller than the arena.
    pub fn store(&mut self, arena: &mut Arena, data: &[u8]) -> Result<Ref> {
        if data.is_empty() || data.len() >= arena.size() {
            return Err(Error::InvalidSize);
        }
        let prev_used = self.last_used;
        let r = self.get_unused()?;
        match arena.alloc_copy(data, r) {
            Ok(h) => {
                self.slots[r as usize] = Some(h);
                self.used += 1;
                Ok(r)
            }
            Err(e) => {
                self.last_used = prev_used;
                let _ = self.cache.put(r);
                Err(e)
            }
        }
    }

    /// the current handle of `r`
    pub fn handle(&self, r: Ref) -> Option<Handle> {
        self.slots.get(r as usize).and_then(|s| *s)
    }

    /// the data stored under `r`
    pub fn get<'b>(&self, arena: &'b Arena, r: Ref) -> Option<&'b [u8]> {
        self.handle(r).map(|h| arena.payload(h))
    }

    /// free the block stored under `r` and make `r` available again
    pub fn release(&mut self, arena: &mut Arena, r: Ref) {
        let h = match self.slots[r as usize].take() {
            Some(h) => h,
            None => panic!("released unused ref {}", r),
        };
        arena.free(h);
        let _ = self.cache.put(r);
        self.used -= 1;
    }

    /// update the slot of a block that was moved by `Arena::gc`
    pub fn relocate(&mut self, r: Ref, to: Handle) {
        let slot = &mut self.slots[r as usize];
        debug_assert!(slot.is_some(), "moved unknown ref {}", r);
        *slot = Some(to);
    }

    /// run a single `Arena::gc` step, keeping the slots up to date
    pub fn gc(&mut self, arena: &mut Arena) -> GcStats {
        arena.gc(|r, to| self.relocate(r, to))
    }

    /// number of references in use
    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// maximum number of references
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    // private API

    /// get an unused ref
    fn get_unused(&mut self) -> Result<Ref> {
        if self.used == self.slots.len() {
            return Err(Error::OutOfRefs);
        }

        // the cache can hold refs that were taken by the scan since
        while let Some(r) = self.cache.get() {
            if self.slots[r as usize].is_none() {
                return Ok(r);
            }
        }

        let len = self.slots.len();
        let mut r = (self.last_used as usize + 1) % len;
        while r != self.last_used as usize {
            if self.slots[r].is_none() {
                self.last_used = r as Ref;
                return Ok(r as Ref);
            }
            r = (r + 1) % len;
        }
        // used < len, so the only free slot left is last_used itself
        assert!(self.slots[r].is_none());
        Ok(r as Ref)
    }
}

// ##################################################
// # Internal Tests

#[cfg(test)]
fn cache(buf: &mut [Ref]) -> CBuf<Ref> {
    CBuf::new(buf)
}

#[test]
fn test_store() {
    let mut buf = [0u8; 256];
    let mut arena = Arena::new(&mut buf);
    let mut slots = [None; 8];
    let mut cbuf = [0; 4];
    let mut table = RefTable::new(&mut slots, cache(&mut cbuf));

    let a = table.store(&mut arena, b"/a/b").unwrap();
    let b = table.store(&mut arena, b"/c").unwrap();
    assert_eq!(a, 0);
    assert_eq!(b, 1);
    assert_eq!(table.len(), 2);
    assert_eq!(table.get(&arena, a), Some(&b"/a/b"[..]));
    assert_eq!(table.get(&arena, b), Some(&b"/c"[..]));
    assert_eq!(table.get(&arena, 5), None);
    assert_eq!(arena.reference(table.handle(b).unwrap()), b);
}

#[test]
fn test_release_and_reuse() {
    let mut buf = [0u8; 256];
    let mut arena = Arena::new(&mut buf);
    let mut slots = [None; 8];
    let mut cbuf = [0; 4];
    let mut table = RefTable::new(&mut slots, cache(&mut cbuf));

    let a = table.store(&mut arena, b"first").unwrap();
    let _b = table.store(&mut arena, b"second").unwrap();
    table.release(&mut arena, a);
    assert_eq!(table.get(&arena, a), None);
    assert_eq!(table.len(), 1);
    // released refs come back first
    let c = table.store(&mut arena, b"third").unwrap();
    assert_eq!(c, a);
    assert_eq!(table.get(&arena, c), Some(&b"third"[..]));
}

#[test]
fn test_out_of_refs() {
    let mut buf = [0u8; 256];
    let mut arena = Arena::new(&mut buf);
    let mut slots = [None; 3];
    let mut cbuf = [0; 2];
    let mut table = RefTable::new(&mut slots, cache(&mut cbuf));
    for _ in 0..3 {
        table.store(&mut arena, b"x").unwrap();
    }
    assert_eq!(table.store(&mut arena, b"x"), Err(Error::OutOfRefs));
    table.release(&mut arena, 1);
    assert_eq!(table.store(&mut arena, b"y"), Ok(1));
}

#[test]
fn test_gc_updates_slots() {
    let mut buf = [0u8; 128];
    let mut arena = Arena::new(&mut buf);
    let mut slots = [None; 16];
    let mut cbuf = [0; 4];
    let mut table = RefTable::new(&mut slots, cache(&mut cbuf));

    let a = table.store(&mut arena, &[0xaa; 30]).unwrap();
    let b = table.store(&mut arena, &[0xbb; 30]).unwrap();
    let c = table.store(&mut arena, &[0xcc; 30]).unwrap();
    table.release(&mut arena, a);
    assert_eq!(table.store(&mut arena, &[0xdd; 30]), Err(Error::Fragmented));
    // the failed store did not take a slot
    assert_eq!(table.len(), 2);

    while table.gc(&mut arena).pending {}
    assert_eq!(table.get(&arena, b), Some(&[0xbb; 30][..]));
    assert_eq!(table.get(&arena, c), Some(&[0xcc; 30][..]));
    let d = table.store(&mut arena, &[0xdd; 30]).unwrap();
    assert_eq!(table.get(&arena, d), Some(&[0xdd; 30][..]));
}

#[test]
fn test_store_invalid_size() {
    let mut buf = [0u8; 64];
    let mut arena = Arena::new(&mut buf);
    let mut slots = [None; 4];
    let mut cbuf = [0; 2];
    let mut table = RefTable::new(&mut slots, cache(&mut cbuf));

    assert_eq!(table.store(&mut arena, b""), Err(Error::InvalidSize));
    assert_eq!(table.store(&mut arena, &[0; 100]), Err(Error::InvalidSize));
    assert_eq!(table.store(&mut arena, &[0; 64]), Err(Error::InvalidSize));
    assert_eq!(table.len(), 0);
    assert_eq!(arena.used_space(), 0);
    // no ref was taken by the failed stores
    assert_eq!(table.store(&mut arena, b"ok"), Ok(0));
}
