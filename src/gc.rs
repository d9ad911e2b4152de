//! incremental collection: moves Full blocks down over the Free ones
//! and joins neighbouring Free blocks, a bounded amount at a time

use super::arena::{Arena, Handle};
use super::block::Header;
use super::types::*;

/// what a single `Arena::gc` call did
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct GcStats {
    /// blocks inspected (moved or coalesced)
    pub blocks: usize,
    /// bytes copied while moving blocks, headers included
    pub bytes: usize,
    /// number of blocks moved
    pub moved: usize,
    /// whether there is still work left for another call
    pub pending: bool,
}

impl<'a> Arena<'a> {
    /// Do a bounded amount of compaction.
    ///
    /// Starting at the first Free block, every Full block that follows it
    /// is moved down and every Free block is joined into it, until the
    /// open space is reached or the `GcConfig` limits are hit.
    ///
    /// `on_move(reference, handle)` is called for every block that was
    /// moved, with the reference it was allocated with and its new
    /// handle. The old handle must not be used afterwards.
    ///
    /// Call this regularly until `GcStats::pending` is false.
    pub fn gc<F>(&mut self, mut on_move: F) -> GcStats
        where F: FnMut(Ref, Handle)
    {
        let mut stats = GcStats::default();
        while self.firstfree != self.openspace
                && stats.blocks < self.config.max_blocks
                && stats.bytes < self.config.max_bytes {
            stats.blocks += 1;
            let block = self.firstfree;
            let free = Header::read(&self.buf, block);
            let next = block + free.units();
            let n = Header::read(&self.buf, next);
            if n.is_free() {
                // join the Free block into ours, nothing moves
                debug_assert_eq!(n.size == 0, next == self.sentinel);
                Header::free(free.size + n.size).write(self.buf, block);
                if next == self.openspace {
                    self.openspace = self.firstfree;
                }
                trace!("gc: joined {} into {}", next, block);
            } else {
                // move the Full block down, the hole ends up after it
                let start = next as usize * UNIT;
                let len = n.size as usize;
                self.buf.copy_within(start..start + len, block as usize * UNIT);
                let hole = block + n.units();
                Header::free(free.size).write(self.buf, hole);
                self.firstfree = hole;
                stats.bytes += len;
                stats.moved += 1;
                trace!("gc: moved ref {} from {} to {}", n.reference, next, block);
                on_move(n.reference, Handle::from_header(block));
            }
            self.checked();
        }
        stats.pending = self.firstfree != self.openspace;
        if stats.blocks > 0 {
            debug!("gc: inspected {} blocks, moved {} ({} bytes), pending: {}",
                   stats.blocks, stats.moved, stats.bytes, stats.pending);
        }
        stats
    }

    /// Run `gc` until nothing is left to compact.
    ///
    /// This does unbounded work, prefer calling `gc` from the main loop.
    pub fn compact<F>(&mut self, mut on_move: F) -> GcStats
        where F: FnMut(Ref, Handle)
    {
        let mut total = GcStats::default();
        loop {
            let s = self.gc(&mut on_move);
            total.blocks += s.blocks;
            total.bytes += s.bytes;
            total.moved += s.moved;
            if !s.pending {
                return total;
            }
        }
    }
}

// ##################################################
// # Internal Tests

#[cfg(test)]
use super::config::GcConfig;

#[cfg(test)]
fn ignore(_: Ref, _: Handle) {}

#[test]
fn test_gc_empty() {
    let mut buf = [0u8; 128];
    let mut arena = Arena::new(&mut buf);
    let s = arena.gc(ignore);
    assert_eq!(s, GcStats::default());
    assert!(!s.pending);
}

#[test]
fn test_gc_join_into_open() {
    let mut buf = [0u8; 128];
    let mut arena = Arena::new(&mut buf);
    let _a = arena.alloc(8, 0).unwrap();
    let b = arena.alloc(8, 1).unwrap();
    arena.free(b);
    // b is right before open space: one join finishes the job
    let s = arena.gc(ignore);
    assert_eq!(s.blocks, 1);
    assert_eq!(s.moved, 0);
    assert!(!s.pending);
    assert!(arena.is_compacted());
    assert_eq!(arena.open_space(), 124 - 12);
}

#[test]
fn test_gc_join_sentinel() {
    let mut buf = [0u8; 64];
    let mut arena = Arena::new(&mut buf);
    let _a = arena.alloc(16, 0).unwrap();
    let _b = arena.alloc(16, 1).unwrap();
    let c = arena.alloc(16, 2).unwrap();
    assert_eq!(arena.openspace, arena.sentinel);
    arena.free(c);
    // c is joined with the sentinel, which brings back open space
    let s = arena.gc(ignore);
    assert_eq!(s.blocks, 1);
    assert!(arena.is_compacted());
    assert_eq!(arena.openspace, c.header());
    assert_eq!(arena.open_space(), 20);
}

#[test]
fn test_gc_moves() {
    let mut buf = [0u8; 64];
    let mut arena = Arena::new(&mut buf);
    let a = arena.alloc_copy(&[1; 16], 0).unwrap();
    let b = arena.alloc_copy(&[2; 16], 1).unwrap();
    let _c = arena.alloc_copy(&[3; 16], 2).unwrap();
    arena.free(a);
    assert_eq!(arena.alloc(16, 3), Err(Error::Fragmented));

    let mut moves = std::vec::Vec::new();
    let s = arena.compact(|r, h| moves.push((r, h)));
    assert_eq!(s.moved, 2);
    assert_eq!(s.bytes, 40);
    assert_eq!(moves.len(), 2);
    assert_eq!(moves[0], (1, a));
    assert_eq!(arena.payload(moves[0].1), &[2; 16]);
    assert_eq!(moves[1].0, 2);
    assert_eq!(moves[1].1, b);
    assert_eq!(arena.payload(moves[1].1), &[3; 16]);
    assert!(arena.is_compacted());

    let d = arena.alloc_copy(&[4; 16], 3).unwrap();
    assert_eq!(arena.payload(d), &[4; 16]);
    assert_eq!(arena.free_space(), 0);
}

#[test]
fn test_gc_overlapping_move() {
    // a small hole followed by a large block: source and destination overlap
    let mut buf = [0u8; 256];
    let mut arena = Arena::new(&mut buf);
    let a = arena.alloc(1, 0).unwrap();
    let data: std::vec::Vec<u8> = (0..100).collect();
    arena.alloc_copy(&data, 1).unwrap();
    arena.free(a);
    let mut moved = None;
    let s = arena.gc(|r, h| moved = Some((r, h)));
    assert_eq!(s.moved, 1);
    let (r, h) = moved.unwrap();
    assert_eq!(r, 1);
    assert_eq!(h, a);
    assert_eq!(arena.payload(h), &data[..]);
    assert_eq!(arena.get_size(h), 100);
}

#[test]
fn test_gc_block_budget() {
    let mut buf = [0u8; 1024];
    let config = GcConfig {
        max_blocks: 3,
        ..GcConfig::default()
    };
    let mut arena = Arena::with_config(&mut buf, config);
    let mut handles = std::vec::Vec::new();
    for r in 0..20 {
        handles.push(arena.alloc(4, r).unwrap());
    }
    arena.free(handles[0]);
    // 19 blocks to move and one join with open space
    let mut calls = 0;
    loop {
        let s = arena.gc(ignore);
        assert!(s.blocks <= 3);
        calls += 1;
        if !s.pending {
            break;
        }
    }
    assert_eq!(calls, 7);
    assert!(arena.is_compacted());
}

#[test]
fn test_gc_byte_budget() {
    let mut buf = [0u8; 4096];
    let config = GcConfig {
        max_blocks: 1000,
        max_bytes: 100,
    };
    let mut arena = Arena::with_config(&mut buf, config);
    let first = arena.alloc(4, 0).unwrap();
    for r in 1..30 {
        arena.alloc(36, r).unwrap();
    }
    arena.free(first);
    let mut calls = 0;
    loop {
        let s = arena.gc(ignore);
        // the last move may overshoot by one block
        assert!(s.bytes < 100 + 40, "{:?}", s);
        calls += 1;
        if !s.pending {
            break;
        }
    }
    // 29 moves of 40 bytes, 3 per call, then the final join
    assert_eq!(calls, 10);
}
