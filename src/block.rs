//! contains the block header and the codec that reads and writes it
//! inside the arena's memory

use core::fmt;
use core::mem;

use super::types::*;

// ##################################################
// # Header

/// Every block starts with a `Header`.
///
/// For a Full block `size` is the header plus the caller's payload length
/// (not rounded), for a Free block it is a multiple of `UNIT`.
/// `reference` is the caller's `Ref`, or `INVALID` for Free blocks.
#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Header {
    pub size: Loc,
    pub reference: Loc,
}

const _: () = assert!(mem::size_of::<Header>() == UNIT, "header must be UNIT wide");

#[derive(Debug, Eq, PartialEq)]
pub enum BlockType {
    Free,
    Full,
}

impl Header {
    /// a free header of `size` bytes
    pub fn free(size: Loc) -> Header {
        Header {
            size: size,
            reference: INVALID,
        }
    }

    pub fn ty(&self) -> BlockType {
        if self.reference == INVALID {
            BlockType::Free
        } else {
            BlockType::Full
        }
    }

    pub fn is_free(&self) -> bool {
        self.ty() == BlockType::Free
    }

    /// number of units the block occupies, header included
    pub fn units(&self) -> Loc {
        (align_up(self.size as usize) / UNIT) as Loc
    }

    /// read the header of the block at unit index `index`
    pub fn read(buf: &[u8], index: Loc) -> Header {
        let o = index as usize * UNIT;
        let s = mem::size_of::<Loc>();
        Header {
            size: Loc::from_ne_bytes([buf[o], buf[o + 1]]),
            reference: Loc::from_ne_bytes([buf[o + s], buf[o + s + 1]]),
        }
    }

    /// write this header at unit index `index`
    pub fn write(&self, buf: &mut [u8], index: Loc) {
        let o = index as usize * UNIT;
        let s = mem::size_of::<Loc>();
        buf[o..o + s].copy_from_slice(&self.size.to_ne_bytes());
        buf[o + s..o + UNIT].copy_from_slice(&self.reference.to_ne_bytes());
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.ty() {
            BlockType::Free => write!(f, "Free{{size: {}}}", self.size),
            BlockType::Full => write!(f, "Full{{size: {}, ref: {}}}",
                                      self.size, self.reference),
        }
    }
}

// ##################################################
// # Blocks iterator

/// information about a single block, as yielded by `Arena::blocks`
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BlockInfo {
    /// unit index of the block's header
    pub index: Loc,
    /// size in bytes, header included (not rounded for Full blocks)
    pub size: Loc,
    /// the caller's reference, `None` for Free blocks
    pub reference: Option<Ref>,
}

impl BlockInfo {
    pub fn is_free(&self) -> bool {
        self.reference.is_none()
    }
}

/// walks every block from index 0 up to (not including) the sentinel
pub struct Blocks<'a> {
    buf: &'a [u8],
    index: Loc,
    sentinel: Loc,
}

impl<'a> Blocks<'a> {
    pub(crate) fn new(buf: &'a [u8], sentinel: Loc) -> Blocks<'a> {
        Blocks {
            buf: buf,
            index: 0,
            sentinel: sentinel,
        }
    }
}

impl<'a> Iterator for Blocks<'a> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        if self.index >= self.sentinel {
            return None;
        }
        let h = Header::read(self.buf, self.index);
        assert!(h.units() != 0, "zero sized block at {}", self.index);
        let info = BlockInfo {
            index: self.index,
            size: h.size,
            reference: if h.is_free() { None } else { Some(h.reference) },
        };
        self.index += h.units();
        Some(info)
    }
}

// ##################################################
// # Internal Tests

#[test]
fn test_codec() {
    let mut buf = [0u8; 4 * UNIT];
    let full = Header { size: 13, reference: 42 };
    full.write(&mut buf, 1);
    Header::free(8).write(&mut buf, 3);
    assert_eq!(Header::read(&buf, 1), full);
    assert_eq!(Header::read(&buf, 3), Header::free(8));
    // neighbours untouched
    assert_eq!(&buf[..UNIT], &[0u8; UNIT]);
    assert_eq!(&buf[2 * UNIT..3 * UNIT], &[0u8; UNIT]);
}

#[test]
fn test_types() {
    let full = Header { size: UNIT as Loc + 5, reference: 0 };
    assert_eq!(full.ty(), BlockType::Full);
    // Full sizes are rounded up to find the next block
    assert_eq!(full.units(), 3);
    let free = Header::free(3 * UNIT as Loc);
    assert!(free.is_free());
    assert_eq!(free.units(), 3);
    assert_eq!(Header::free(0).units(), 0);
}

#[test]
fn test_blocks_walk() {
    let mut buf = [0u8; 8 * UNIT];
    Header { size: UNIT as Loc + 1, reference: 7 }.write(&mut buf, 0);
    Header::free(3 * UNIT as Loc).write(&mut buf, 2);
    Header { size: 2 * UNIT as Loc, reference: 9 }.write(&mut buf, 5);
    Header::free(UNIT as Loc).write(&mut buf, 7);
    let blocks: std::vec::Vec<_> = Blocks::new(&buf, 8).collect();
    assert_eq!(blocks.len(), 4);
    assert_eq!(blocks[0], BlockInfo { index: 0, size: 5, reference: Some(7) });
    assert!(blocks[1].is_free());
    assert_eq!(blocks[2].index, 5);
    assert_eq!(blocks[3].index, 7);
}
