/*!
This test framework intends to combine both performance and correctness tests
into a single test.

It measures the time spent in the collector only, not in its own checking.
Performance checking is secondary, the primary goal of this suite is
correctness testing.

It has:
 - pseudo random number generator which ensures that allocations are identical
     on each run (can be altered by changing seed)
 - "Allocation Array" which tracks and determines which allocations shall be
      made, and what their data must look like.
*/

use std::string::String;
use std::vec::Vec;
use core::result;

use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use stopwatch::Stopwatch;

use super::*;

type TResult<T> = result::Result<T, String>;

/// one allocation slot. `i` is used as the ref of its block.
struct Allocation {
    i: Ref,
    data: Vec<u8>,
    handle: Option<Handle>,
}

impl Allocation {
    fn assert_valid(&self, arena: &Arena) -> TResult<()> {
        let handle = match self.handle {
            Some(h) => h,
            None => return Ok(()),
        };
        if arena.reference(handle) != self.i {
            return Err(format!("ref at {:?} is {}, expected {}",
                               handle, arena.reference(handle), self.i));
        }
        let pdata = arena.payload(handle);
        let sdata = &self.data;
        if sdata.len() != pdata.len() {
            return Err(format!("lengths not equal: {} != {}", sdata.len(), pdata.len()));
        }
        for (i, (s, p)) in sdata.iter().zip(pdata.iter()).enumerate() {
            if s != p {
                return Err(format!("values at i={} differ: {} != {}", i, s, p));
            }
        }
        Ok(())
    }

    /// fill the Allocation up with data, don't check
    fn fill(&mut self, arena: &mut Arena, gen: &mut XorShiftRng) {
        let handle = match self.handle {
            Some(h) => h,
            None => return,
        };
        let pdata = arena.payload_mut(handle);
        for (s, p) in self.data.iter_mut().zip(pdata.iter_mut()) {
            let val = gen.gen::<u8>();
            *s = val;
            *p = val;
        }
    }

    /// allocate some new data and fill it
    fn alloc(&mut self, arena: &mut Arena, allocs: &mut [Option<Handle>],
             gen: &mut XorShiftRng, sw: &mut Stopwatch) -> TResult<()> {
        assert!(self.handle.is_none());
        let len = gen.gen_range(1..200);
        self.handle = match arena.alloc(len, self.i) {
            Ok(h) => Some(h),
            Err(Error::OutOfMemory) => return Ok(()), // not allocated
            Err(Error::Fragmented) => {
                // collect until it fits, exactly like a main loop would
                loop {
                    sw.start();
                    let stats = arena.gc(|r, h| allocs[r as usize] = Some(h));
                    sw.stop();
                    match arena.alloc(len, self.i) {
                        Ok(h) => break Some(h),
                        Err(Error::Fragmented) if stats.pending => continue,
                        Err(e) => return Err(format!("alloc after gc: {:?}\n{}",
                                                     e, arena.display())),
                    }
                }
            }
            Err(e) => return Err(format!("alloc: {:?}", e)),
        };
        self.data.clear();
        self.data.resize(len, 0);
        self.fill(arena, gen);
        Ok(())
    }
}

/// pick up the moves reported by the collector
fn sync(allocs: &mut [Allocation], moved: &mut [Option<Handle>]) {
    for (a, m) in allocs.iter_mut().zip(moved.iter_mut()) {
        if let Some(h) = m.take() {
            assert!(a.handle.is_some(), "moved a freed block {}", a.i);
            a.handle = Some(h);
        }
    }
}

#[test]
fn test_it() {
    let len_allocs = 200;
    let mut buf = std::vec![0u8; 8192];
    let mut arena = Arena::new(&mut buf);
    let mut allocs: Vec<_> = (0..len_allocs)
        .map(|i| Allocation {
            i: i as Ref,
            data: Vec::new(),
            handle: None,
        })
        .collect();
    let mut moved: Vec<Option<Handle>> = std::vec![None; len_allocs];
    let seed = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];
    let mut gen = XorShiftRng::from_seed(seed);
    let mut sw = Stopwatch::new();
    let mut gc_calls = 0;

    for _ in 0..200 {
        for i in 0..len_allocs {
            allocs[i].assert_valid(&arena).unwrap();
            match allocs[i].handle {
                // we have data, we need to decide what to do with it
                Some(h) => match gen.gen_range(0..10) {
                    0..=1 => {
                        // deallocate the data
                        arena.free(h);
                        allocs[i].handle = None;
                    }
                    2..=4 => allocs[i].fill(&mut arena, &mut gen),
                    8..=9 => {
                        sw.start();
                        arena.gc(|r, h| moved[r as usize] = Some(h));
                        sw.stop();
                        gc_calls += 1;
                    }
                    _ => {} // do nothing
                },
                // there is no data, should we allocate it?
                None => if gen.gen_range(0..10) < 4 {
                    allocs[i].alloc(&mut arena, &mut moved, &mut gen, &mut sw).unwrap();
                },
            }
            sync(&mut allocs, &mut moved);
            allocs[i].assert_valid(&arena).unwrap();
        }
        arena.check();
        let used: usize = arena.blocks()
            .filter(|b| !b.is_free())
            .map(|b| align_up(b.size as usize))
            .sum();
        assert_eq!(used + arena.free_space(), arena.size() - UNIT);
    }
    for a in allocs.iter() {
        a.assert_valid(&arena).unwrap();
    }
    println!("{} gc calls took {}ms", gc_calls, sw.elapsed_ms());
    println!("{}", arena.display());
}

#[test]
fn test_bounded_work() {
    // far more garbage than a single call may collect
    let mut buf = std::vec![0u8; 32768];
    let mut arena = Arena::new(&mut buf);
    let mut handles = Vec::new();
    for r in 0..400 {
        handles.push(arena.alloc(60, r).unwrap());
    }
    for h in handles.iter().step_by(2) {
        arena.free(*h);
    }
    let config = *arena.config();
    let mut calls = 0;
    let mut moved = 0;
    loop {
        let stats = arena.gc(|_, _| ());
        assert!(stats.blocks <= config.max_blocks);
        assert!(stats.bytes < config.max_bytes + 64);
        moved += stats.moved;
        calls += 1;
        if !stats.pending {
            break;
        }
    }
    // 200 blocks move and 200 holes get joined, 10 steps per call
    assert_eq!(moved, 200);
    assert_eq!(calls, 40);
    assert_eq!(arena.open_space(), 32764 - 200 * 64);
}

#[test]
fn test_reuse_not_growth() {
    let mut buf = [0u8; 512];
    let mut arena = Arena::new(&mut buf);
    let a = arena.alloc(100, 0).unwrap();
    let _b = arena.alloc(100, 1).unwrap();
    let used = arena.used_space();
    arena.free(a);
    arena.compact(|_, _| ());
    let c = arena.alloc(100, 2).unwrap();
    assert_eq!(arena.used_space(), used);
    assert_eq!(arena.get_size(c), 100);
}

#[test]
fn test_hard_capacity() {
    let mut buf = [0u8; 256];
    let mut arena = Arena::new(&mut buf);
    let too_big = arena.size() - UNIT;
    assert_eq!(arena.alloc(too_big, 0), Err(Error::OutOfMemory));
    let a = arena.alloc(50, 0).unwrap();
    arena.alloc(50, 1).unwrap();
    arena.free(a);
    assert_eq!(arena.alloc(too_big, 2), Err(Error::OutOfMemory));
    arena.compact(|_, _| ());
    assert_eq!(arena.alloc(too_big, 2), Err(Error::OutOfMemory));
}

mod proptests {
    use std::vec::Vec;

    use proptest::prelude::*;

    use crate::{Arena, Handle, Ref, UNIT, align_up};

    #[derive(Debug, Clone)]
    enum Op {
        Alloc(usize),
        Free(usize),
        Gc,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1usize..120).prop_map(Op::Alloc),
            any::<usize>().prop_map(Op::Free),
            Just(Op::Gc),
        ]
    }

    /// the byte pattern stored under `r`
    fn pattern(r: Ref, len: usize) -> Vec<u8> {
        (0..len).map(|i| (r as usize * 31 + i) as u8).collect()
    }

    proptest! {
        #[test]
        fn space_is_conserved(ops in proptest::collection::vec(op(), 1..200)) {
            let mut buf = [0u8; 1024];
            let mut arena = Arena::new(&mut buf);
            let mut live: Vec<(Ref, Handle)> = Vec::new();
            let mut next: Ref = 0;
            for op in ops {
                match op {
                    Op::Alloc(len) => {
                        if let Ok(h) = arena.alloc_copy(&pattern(next, len), next) {
                            live.push((next, h));
                        }
                        next += 1;
                    }
                    Op::Free(i) => if !live.is_empty() {
                        let (_, h) = live.swap_remove(i % live.len());
                        arena.free(h);
                    },
                    Op::Gc => {
                        arena.gc(|r, h| {
                            for l in live.iter_mut() {
                                if l.0 == r {
                                    l.1 = h;
                                }
                            }
                        });
                    }
                }
                let used: usize = live.iter()
                    .map(|&(_, h)| UNIT + align_up(arena.get_size(h)))
                    .sum();
                prop_assert_eq!(used, arena.used_space());
                prop_assert_eq!(used + arena.free_space(), arena.size() - UNIT);
            }
            for &(r, h) in live.iter() {
                prop_assert_eq!(arena.payload(h), &pattern(r, arena.get_size(h))[..]);
            }
        }

        #[test]
        fn compaction_completes(
            lens in proptest::collection::vec(1usize..60, 1..40),
            freed in proptest::collection::vec(any::<bool>(), 40),
        ) {
            let mut buf = [0u8; 4096];
            let mut arena = Arena::new(&mut buf);
            let mut live = Vec::new();
            for (i, &len) in lens.iter().enumerate() {
                let r = i as Ref;
                let h = arena.alloc_copy(&pattern(r, len), r).unwrap();
                if freed[i] {
                    arena.free(h);
                } else {
                    live.push((r, h));
                }
            }
            let free = arena.free_space();
            arena.compact(|r, h| {
                for l in live.iter_mut() {
                    if l.0 == r {
                        l.1 = h;
                    }
                }
            });
            prop_assert!(arena.is_compacted());
            // every free byte is now open space
            prop_assert_eq!(arena.open_space(), free);
            for &(r, h) in live.iter() {
                prop_assert_eq!(arena.payload(h), &pattern(r, arena.get_size(h))[..]);
            }
        }
    }
}
