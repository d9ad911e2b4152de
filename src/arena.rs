/*
Contains all the logic related to the Arena. The Arena owns the memory
and the bookkeeping, and handles allocation and deallocation. Collection
lives in `gc.rs`.

Memory layout, in units of `UNIT` bytes:

    [0, firstfree)          Full blocks only, already compacted
    [firstfree, openspace)  mix of Full and Free blocks, not yet compacted
    [openspace, sentinel)   a single Free block ("open space"), or nothing
    sentinel                Free block of size 0, never allocated

Allocations are always carved off the low end of open space. Deallocation
only marks a block Free and moves `firstfree` back, the collector does
the rest.
*/

use core::fmt;

use super::block::{Header, Blocks};
use super::config::GcConfig;
use super::types::*;

// ##################################################
// # Handle

/// Handle to an allocated block, i.e. the position of its payload inside
/// the arena.
///
/// A handle is only valid until the next call to `Arena::gc`, which may
/// move the block and reports the new handle through its callback.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Handle(Loc);

impl Handle {
    pub(crate) fn from_header(index: Loc) -> Handle {
        Handle(index + 1)
    }

    /// unit index of the block header
    pub(crate) fn header(&self) -> Loc {
        self.0 - 1
    }

    /// byte offset of the payload inside the arena memory
    pub fn offset(&self) -> usize {
        self.0 as usize * UNIT
    }
}

// ##################################################
// # Arena

/// `Arena` manages a single region of caller-provided memory.
///
/// It hands out variable sized blocks tagged with a caller `Ref` and
/// compacts them incrementally through `gc`, never doing more than a
/// bounded amount of work per call.
pub struct Arena<'a> {
    pub(crate) buf: &'a mut [u8],
    pub(crate) config: GcConfig,
    pub(crate) size: Loc,         // bytes in use by blocks, sentinel included
    pub(crate) freespace: Loc,    // total free bytes (fragmented or not)
    pub(crate) firstfree: Loc,    // first block that is not compacted yet
    pub(crate) openspace: Loc,    // the free block allocations are taken from
    pub(crate) sentinel: Loc,     // the terminating 0-sized free block
}

pub struct DisplayArena<'b, 'a: 'b> {
    arena: &'b Arena<'a>,
}

impl<'b, 'a: 'b> fmt::Display for DisplayArena<'b, 'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let a = self.arena;
        writeln!(f, "Arena {{")?;
        writeln!(f, "  * size: {}, free: {}, used: {}, open: {}",
                 a.size, a.freespace, a.used_space(), a.open_space())?;
        writeln!(f, "  * firstfree: {}, openspace: {}, sentinel: {}",
                 a.firstfree, a.openspace, a.sentinel)?;
        writeln!(f, "  * Blocks:")?;
        for b in a.blocks() {
            let h = Header::read(&a.buf, b.index);
            let mark = if b.index == a.openspace {
                " <- open"
            } else if b.index == a.firstfree {
                " <- first free"
            } else {
                ""
            };
            writeln!(f, "      {:<5}: {}{}", b.index, h, mark)?;
        }
        writeln!(f, "      {:<5}: SENTINEL", a.sentinel)?;
        write!(f, "}}")
    }
}

impl<'a> Arena<'a> {
    /// create an arena over `buf` using the default collector limits
    ///
    /// `buf` must hold at least two units and be smaller than
    /// `MAX_CAPACITY`. Trailing bytes that do not make up a whole unit
    /// are never used.
    pub fn new(buf: &'a mut [u8]) -> Arena<'a> {
        Arena::with_config(buf, GcConfig::default())
    }

    /// create an arena over `buf` with custom collector limits
    pub fn with_config(buf: &'a mut [u8], config: GcConfig) -> Arena<'a> {
        assert!(config.max_blocks > 0, "max_blocks must be non-zero");
        assert!(config.max_bytes > 0, "max_bytes must be non-zero");
        let mut arena = Arena {
            buf: buf,
            config: config,
            size: 0,
            freespace: 0,
            firstfree: 0,
            openspace: 0,
            sentinel: 0,
        };
        arena.init();
        arena
    }

    /// throw away every block and start over with an empty arena
    ///
    /// Any outstanding `Handle` is invalid afterwards.
    pub fn reset(&mut self) {
        self.init();
    }

    fn init(&mut self) {
        let capacity = self.buf.len();
        assert!(2 * UNIT <= capacity && capacity < MAX_CAPACITY,
                "invalid arena capacity: {}", capacity);
        // one unit is reserved for the sentinel
        self.freespace = align_down(capacity - UNIT) as Loc;
        self.size = self.freespace + UNIT as Loc;
        self.firstfree = 0;
        self.openspace = 0;
        self.sentinel = self.freespace / UNIT as Loc;
        Header::free(self.freespace).write(self.buf, 0);
        Header::free(0).write(self.buf, self.sentinel);
        debug!("init arena: {} bytes, {} free", self.size, self.freespace);
        self.checked();
    }

    /// allocate `size` bytes tagged with `reference`
    ///
    /// Returns `Error::Fragmented` when there is enough free space but it
    /// is not yet contiguous: call `gc` (possibly several times) and
    /// retry. Returns `Error::OutOfMemory` when even a full collection
    /// could not make room.
    ///
    /// Panics if `size` is 0 or not smaller than `size()`, or if
    /// `reference` is `INVALID`.
    pub fn alloc(&mut self, size: usize, reference: Ref) -> Result<Handle> {
        assert!(0 < size && size < self.size as usize, "invalid alloc size: {}", size);
        assert!(reference != INVALID, "INVALID is not a valid reference");
        let needed = UNIT + align_up(size);
        let result = if (self.freespace as usize) < needed {
            Err(Error::OutOfMemory)
        } else if (Header::read(&self.buf, self.openspace).size as usize) < needed {
            Err(Error::Fragmented)
        } else {
            let block = self.openspace;
            let open = Header::read(&self.buf, block);
            assert!(open.is_free() && open.size as usize > UNIT && open.size as usize % UNIT == 0);
            let firstfree_is_openspace = self.firstfree == self.openspace;
            let remaining = open.size as usize - needed;
            if remaining < UNIT {
                // nothing left that could hold a header
                self.openspace = self.sentinel;
            } else {
                let next = block + (needed / UNIT) as Loc;
                Header::free(remaining as Loc).write(self.buf, next);
                self.openspace = next;
            }
            if firstfree_is_openspace {
                self.firstfree = self.openspace;
            }
            self.freespace -= needed as Loc;
            Header {
                size: (UNIT + size) as Loc,
                reference: reference,
            }.write(self.buf, block);
            trace!("alloc {} bytes for ref {} at {}", size, reference, block);
            Ok(Handle::from_header(block))
        };
        self.checked();
        result
    }

    /// allocate `data.len()` bytes tagged with `reference` and copy `data`
    /// into them. See `alloc`.
    pub fn alloc_copy(&mut self, data: &[u8], reference: Ref) -> Result<Handle> {
        let h = self.alloc(data.len(), reference)?;
        self.payload_mut(h).copy_from_slice(data);
        Ok(h)
    }

    /// free the block at `handle`. The memory is only reclaimed by later
    /// calls to `gc`.
    ///
    /// Panics if `handle` does not point at an allocated block.
    pub fn free(&mut self, handle: Handle) {
        let block = self.full_header(handle);
        let mut h = Header::read(&self.buf, block);
        h.reference = INVALID;
        h.size = align_up(h.size as usize) as Loc;
        h.write(self.buf, block);
        self.freespace += h.size;
        if block < self.firstfree {
            self.firstfree = block;
        }
        trace!("free {} bytes at {}", h.size, block);
        self.checked();
    }

    /// size of the payload at `handle`, as passed to `alloc`
    pub fn get_size(&self, handle: Handle) -> usize {
        let h = Header::read(&self.buf, self.full_header(handle));
        assert!(h.size as usize > UNIT);
        h.size as usize - UNIT
    }

    /// the reference `handle` was allocated with
    pub fn reference(&self, handle: Handle) -> Ref {
        Header::read(&self.buf, self.full_header(handle)).reference
    }

    /// the payload at `handle`
    pub fn payload(&self, handle: Handle) -> &[u8] {
        let len = self.get_size(handle);
        let start = handle.offset();
        &self.buf[start..start + len]
    }

    /// the payload at `handle`, mutably
    pub fn payload_mut(&mut self, handle: Handle) -> &mut [u8] {
        let len = self.get_size(handle);
        let start = handle.offset();
        &mut self.buf[start..start + len]
    }

    // public statistics

    /// bytes managed by the arena, the sentinel's header included
    pub fn size(&self) -> usize {
        self.size as usize
    }

    /// total free bytes, fragmented or not
    pub fn free_space(&self) -> usize {
        self.freespace as usize
    }

    /// bytes taken by allocated blocks, headers and rounding included
    pub fn used_space(&self) -> usize {
        self.size as usize - UNIT - self.freespace as usize
    }

    /// bytes available contiguously for the next allocation, header
    /// included
    pub fn open_space(&self) -> usize {
        Header::read(&self.buf, self.openspace).size as usize
    }

    /// true when there is nothing left for `gc` to do
    pub fn is_compacted(&self) -> bool {
        self.firstfree == self.openspace
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// iterate over every block in the arena, sentinel excluded
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks::new(&self.buf, self.sentinel)
    }

    /// call this to be able to print out the state of the `Arena`
    pub fn display(&self) -> DisplayArena<'_, 'a> {
        DisplayArena { arena: self }
    }

    /// Walk the whole arena and panic if any structural invariant does
    /// not hold. This is O(blocks).
    ///
    /// It runs after every mutating call in debug builds (or with the
    /// `check` feature).
    pub fn check(&self) {
        let buf = &*self.buf;
        assert!(self.firstfree <= self.openspace,
                "firstfree {} > openspace {}", self.firstfree, self.openspace);
        assert!(self.openspace <= self.sentinel,
                "openspace {} > sentinel {}", self.openspace, self.sentinel);
        assert!(self.freespace <= self.size - UNIT as Loc, "freespace {} too large", self.freespace);
        assert!(self.freespace as usize % UNIT == 0, "freespace {} not aligned", self.freespace);

        let s = Header::read(buf, self.sentinel);
        assert!(s == Header::free(0), "bad sentinel at {}: {}", self.sentinel, s);
        for &(name, index) in &[("firstfree", self.firstfree), ("openspace", self.openspace)] {
            let h = Header::read(buf, index);
            assert!(h.is_free() && h.size as usize % UNIT == 0,
                    "{} block at {} is not a valid free block: {}", name, index, h);
        }
        assert!(self.openspace == self.sentinel || Header::read(buf, self.openspace).size > 0,
                "empty open space at {}", self.openspace);

        let mut index: Loc = 0;
        while index < self.firstfree {
            let h = Header::read(buf, index);
            assert!(!h.is_free() && h.size as usize > UNIT,
                    "block {} before firstfree is not allocated: {}", index, h);
            index += h.units();
        }
        assert!(index == self.firstfree, "walk overran firstfree: {} != {}", index, self.firstfree);

        let mut freespace: usize = 0;
        while index < self.openspace {
            let h = Header::read(buf, index);
            assert!(h.size as usize > UNIT && (!h.is_free() || h.size as usize % UNIT == 0),
                    "bad block at {}: {}", index, h);
            if h.is_free() {
                freespace += h.size as usize;
            }
            index += h.units();
        }
        assert!(index == self.openspace, "walk overran openspace: {} != {}", index, self.openspace);
        let open = Header::read(buf, index);
        freespace += open.size as usize;
        index += open.units();
        assert!(index == self.sentinel, "walk overran sentinel: {} != {}", index, self.sentinel);
        assert!(freespace == self.freespace as usize,
                "freespace is {} but blocks add up to {}", self.freespace, freespace);
    }

    // private API

    /// run the check if enabled
    #[inline]
    pub(crate) fn checked(&self) {
        if cfg!(any(debug_assertions, feature = "check")) {
            self.check();
        }
    }

    /// header index of `handle`, asserting it is allocated
    fn full_header(&self, handle: Handle) -> Loc {
        assert!(handle.0 > 0 && handle.0 <= self.sentinel, "handle out of range: {:?}", handle);
        let block = handle.header();
        let h = Header::read(&self.buf, block);
        assert!(!h.is_free(), "handle {:?} is not allocated", handle);
        block
    }
}

// ##################################################
// # Internal Tests

#[cfg(test)]
fn empty(buf: &mut [u8]) -> Arena {
    Arena::new(buf)
}

#[test]
fn test_init() {
    let mut buf = [0u8; 1027];
    let arena = empty(&mut buf);
    // 1027 - UNIT rounded down, one unit for the sentinel
    assert_eq!(arena.free_space(), 1020);
    assert_eq!(arena.size(), 1024);
    assert_eq!(arena.used_space(), 0);
    assert_eq!(arena.open_space(), 1020);
    assert_eq!(arena.sentinel, 255);
    assert!(arena.is_compacted());
    let blocks: std::vec::Vec<_> = arena.blocks().collect();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].size, 1020);
    assert!(blocks[0].is_free());
}

#[test]
#[should_panic]
fn test_init_too_small() {
    let mut buf = [0u8; UNIT];
    Arena::new(&mut buf);
}

#[test]
#[should_panic]
fn test_init_too_large() {
    let mut buf = std::vec![0u8; MAX_CAPACITY];
    Arena::new(&mut buf);
}

#[test]
fn test_alloc() {
    let mut buf = [0u8; 256];
    let mut arena = empty(&mut buf);
    let a = arena.alloc(5, 1).unwrap();
    assert_eq!(a.offset(), UNIT);
    assert_eq!(arena.get_size(a), 5);
    assert_eq!(arena.reference(a), 1);
    // header + 5 rounded up to 8
    assert_eq!(arena.used_space(), 12);
    assert_eq!(arena.free_space(), 252 - 12);
    // firstfree followed the frontier
    assert_eq!(arena.firstfree, 3);
    assert_eq!(arena.openspace, 3);

    let b = arena.alloc_copy(b"hello world", 2).unwrap();
    assert_eq!(b.offset(), 4 * UNIT);
    assert_eq!(arena.payload(b), b"hello world");
    assert_eq!(arena.payload(a).len(), 5);
}

#[test]
fn test_alloc_fills_arena() {
    let mut buf = [0u8; 64];
    let mut arena = empty(&mut buf);
    // 60 free bytes: 3 blocks of 20 take all of it
    for r in 0..3 {
        arena.alloc(16, r).unwrap();
    }
    assert_eq!(arena.free_space(), 0);
    assert_eq!(arena.openspace, arena.sentinel);
    assert_eq!(arena.firstfree, arena.sentinel);
    assert_eq!(arena.alloc(1, 3), Err(Error::OutOfMemory));
}

#[test]
fn test_alloc_leaves_single_unit() {
    let mut buf = [0u8; 64];
    let mut arena = empty(&mut buf);
    // 60 - 56 leaves a single unit of open space, which can hold a header
    let a = arena.alloc(52, 0).unwrap();
    assert_eq!(arena.open_space(), UNIT);
    assert_eq!(arena.free_space(), UNIT);
    // but nothing can be allocated from it
    assert_eq!(arena.alloc(1, 1), Err(Error::OutOfMemory));
    arena.free(a);
    assert_eq!(arena.free_space(), 60);
}

#[test]
fn test_alloc_out_of_memory() {
    let mut buf = [0u8; 128];
    let mut arena = empty(&mut buf);
    assert_eq!(arena.alloc(124, 0), Err(Error::OutOfMemory));
    arena.alloc(100, 0).unwrap();
    assert_eq!(arena.alloc(20, 1), Err(Error::OutOfMemory));
}

#[test]
fn test_free() {
    let mut buf = [0u8; 256];
    let mut arena = empty(&mut buf);
    let a = arena.alloc(5, 1).unwrap();
    let b = arena.alloc(9, 2).unwrap();
    let _c = arena.alloc(3, 3).unwrap();
    let free = arena.free_space();

    arena.free(b);
    assert_eq!(arena.free_space(), free + 16);
    assert_eq!(arena.firstfree, b.header());
    assert!(!arena.is_compacted());

    // freeing an earlier block only moves firstfree backwards
    arena.free(a);
    assert_eq!(arena.firstfree, a.header());
    assert_eq!(arena.free_space(), free + 16 + 12);
    let blocks: std::vec::Vec<_> = arena.blocks().collect();
    assert!(blocks[0].is_free());
    assert_eq!(blocks[0].size, 12);
    assert!(blocks[1].is_free());
    assert_eq!(blocks[1].size, 16);
    assert_eq!(blocks[2].reference, Some(3));
}

#[test]
fn test_fragmented() {
    let mut buf = [0u8; 64];
    let mut arena = empty(&mut buf);
    let _a = arena.alloc(16, 0).unwrap();
    let b = arena.alloc(16, 1).unwrap();
    let _c = arena.alloc(16, 2).unwrap();
    arena.free(b);
    assert_eq!(arena.alloc(16, 3), Err(Error::Fragmented));
    assert_eq!(arena.alloc(40, 3), Err(Error::OutOfMemory));
}

#[test]
#[should_panic]
fn test_double_free() {
    let mut buf = [0u8; 64];
    let mut arena = empty(&mut buf);
    let a = arena.alloc(4, 0).unwrap();
    arena.alloc(4, 1).unwrap();
    arena.free(a);
    arena.free(a);
}

#[test]
#[should_panic]
fn test_alloc_invalid_ref() {
    let mut buf = [0u8; 64];
    empty(&mut buf).alloc(4, INVALID).unwrap();
}

#[test]
#[should_panic]
fn test_alloc_zero() {
    let mut buf = [0u8; 64];
    empty(&mut buf).alloc(0, 0).unwrap();
}

#[test]
fn test_reset() {
    let mut buf = [0u8; 128];
    let mut arena = empty(&mut buf);
    arena.alloc(30, 0).unwrap();
    let b = arena.alloc(30, 1).unwrap();
    arena.free(b);
    arena.reset();
    assert_eq!(arena.free_space(), 124);
    assert!(arena.is_compacted());
    assert_eq!(arena.blocks().count(), 1);
}

#[test]
fn test_display() {
    let mut buf = [0u8; 64];
    let mut arena = empty(&mut buf);
    arena.alloc(6, 7).unwrap();
    let s = std::format!("{}", arena.display());
    assert!(s.contains("Full{size: 10, ref: 7}"), "{}", s);
    assert!(s.contains("SENTINEL"), "{}", s);
}

#[test]
#[should_panic(expected = "before firstfree is not allocated")]
fn test_check_catches_corruption() {
    let mut buf = [0u8; 64];
    let mut arena = empty(&mut buf);
    arena.alloc(8, 0).unwrap();
    // mark the block free behind the arena's back
    Header::free(12).write(arena.buf, 0);
    arena.check();
}

#[test]
#[should_panic(expected = "max_bytes must be non-zero")]
fn test_init_no_byte_budget() {
    let mut buf = [0u8; 64];
    let config = GcConfig {
        max_blocks: 10,
        max_bytes: 0,
    };
    Arena::with_config(&mut buf, config);
}

#[test]
#[should_panic(expected = "bad sentinel")]
fn test_check_catches_bad_sentinel() {
    let mut buf = [0u8; 64];
    let mut arena = empty(&mut buf);
    arena.alloc(8, 0).unwrap();
    let sentinel = arena.sentinel;
    Header::free(UNIT as Loc).write(arena.buf, sentinel);
    arena.check();
}

#[test]
#[should_panic(expected = "but blocks add up to")]
fn test_check_catches_freespace_mismatch() {
    let mut buf = [0u8; 64];
    let mut arena = empty(&mut buf);
    let a = arena.alloc(8, 0).unwrap();
    arena.alloc(8, 1).unwrap();
    arena.free(a);
    arena.freespace -= UNIT as Loc;
    arena.check();
}
