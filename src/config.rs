//! collector configuration

/// Limits on the work a single `Arena::gc` call may do.
///
/// The collector stops as soon as either limit is reached, which bounds
/// the latency each call adds to the caller's main loop. A call may go
/// over `max_bytes` by at most the size of the last block it moved.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct GcConfig {
    /// blocks inspected (moved or coalesced) per call, must be non-zero
    pub max_blocks: usize,
    /// bytes relocated per call, must be non-zero
    pub max_bytes: usize,
}

impl GcConfig {
    pub const DEFAULT_MAX_BLOCKS: usize = 10;
    pub const DEFAULT_MAX_BYTES: usize = 4096;

    pub fn new() -> GcConfig {
        GcConfig {
            max_blocks: Self::DEFAULT_MAX_BLOCKS,
            max_bytes: Self::DEFAULT_MAX_BYTES,
        }
    }
}

impl Default for GcConfig {
    fn default() -> GcConfig {
        GcConfig::new()
    }
}

#[test]
fn test_defaults() {
    let c = GcConfig::default();
    assert_eq!(c.max_blocks, 10);
    assert_eq!(c.max_bytes, 4096);
    assert_eq!(c, GcConfig::new());
}
