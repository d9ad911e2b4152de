use core::fmt;
use core::mem;
use core::result;

/// index type used for every offset, size and reference stored in the arena
pub type Loc = u16;

/// the opaque reference value a caller attaches to an allocated block
pub type Ref = Loc;

/// reserved value of `Loc`: marks a free block when stored as a reference
pub const INVALID: Loc = Loc::max_value();

/// width of a block header in bytes, also the allocation granularity
pub const UNIT: usize = 2 * mem::size_of::<Loc>();

/// arena memory must be strictly smaller than this (in bytes), anything
/// larger could overflow `Loc` while rounding sizes
pub const MAX_CAPACITY: usize = ((INVALID as usize) & !(UNIT - 1)) - UNIT;

/// largest reference value a caller may use
pub const MAX_REF: Ref = INVALID - 1;

const _: () = assert!(UNIT.is_power_of_two(), "UNIT must be a power of two");
const _: () = assert!(MAX_CAPACITY < INVALID as usize);
const _: () = assert!(MAX_CAPACITY % UNIT == 0);

/// round `size` up to a multiple of `UNIT`
#[inline]
pub const fn align_up(size: usize) -> usize {
    (size + UNIT - 1) & !(UNIT - 1)
}

/// round `size` down to a multiple of `UNIT`
#[inline]
pub const fn align_down(size: usize) -> usize {
    size & !(UNIT - 1)
}

/// arena error codes
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Error {
    /// The arena has enough free space but not contiguously at the
    /// frontier. Collect garbage and try again.
    Fragmented,
    /// The arena does not have enough free space, even after a full
    /// collection.
    OutOfMemory,
    /// Every reference in a `RefTable` is in use
    OutOfRefs,
    /// The data is empty or does not fit in the arena at all
    InvalidSize,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Fragmented => write!(f, "arena is fragmented, collect and try again"),
            Error::OutOfMemory => write!(f, "arena is out of memory"),
            Error::OutOfRefs => write!(f, "no unused references left"),
            Error::InvalidSize => write!(f, "size is zero or larger than the arena"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

pub type Result<T> = result::Result<T, Error>;

#[test]
fn test_alignment() {
    assert_eq!(UNIT, 4);
    assert_eq!(align_up(0), 0);
    assert_eq!(align_up(1), UNIT);
    assert_eq!(align_up(UNIT), UNIT);
    assert_eq!(align_up(UNIT + 1), 2 * UNIT);
    assert_eq!(align_down(UNIT - 1), 0);
    assert_eq!(align_down(2 * UNIT + 3), 2 * UNIT);
}

#[test]
fn test_limits() {
    // both the arena size and the refs must stay strictly below INVALID
    assert!(MAX_CAPACITY + UNIT < INVALID as usize);
    assert!(MAX_REF < INVALID);
    assert_eq!(MAX_CAPACITY, 0xfff8);
}
