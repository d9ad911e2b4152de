/*!
An incremental, compacting block allocator for small embedded arenas.

All memory is a single caller-provided buffer. Blocks are carved off the
high end of the used region ("open space") and tagged with a caller `Ref`.
Freed blocks are left in place until `Arena::gc` compacts them away: it
moves live blocks down and reports every move as `(ref, new handle)`, so
the caller can update whatever it keeps for that ref. Each `gc` call does a
bounded amount of work (see `GcConfig`), which makes it safe to call once
per iteration of a real-time main loop.

```
use incgc::{Arena, Error};

let mut buf = [0u8; 256];
let mut arena = Arena::new(&mut buf);
let a = arena.alloc_copy(b"/some/uri", 1).unwrap();
let mut b = arena.alloc_copy(b"/another", 2).unwrap();
arena.free(a);

while arena.gc(|r, h| if r == 2 { b = h }).pending {}
assert_eq!(arena.payload(b), b"/another");
assert!(arena.alloc(250, 3) == Err(Error::OutOfMemory));
```
*/

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
extern crate log;
extern crate cbuf;

#[cfg(test)]
extern crate rand;
#[cfg(test)]
extern crate rand_xorshift;
#[cfg(test)]
extern crate stopwatch;

mod types;
mod block;
mod config;
mod arena;
mod gc;
mod table;

#[cfg(test)]
mod tests;

pub use types::{Loc, Ref, Error, Result, INVALID, UNIT, MAX_CAPACITY, MAX_REF,
                align_up, align_down};
pub use block::{BlockInfo, Blocks};
pub use config::GcConfig;
pub use arena::{Arena, Handle, DisplayArena};
pub use gc::GcStats;
pub use table::{RefTable, Slot};
