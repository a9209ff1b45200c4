//! Fixed header prefix carried by every mapped area file.

use bytemuck::{Pod, Zeroable};

/// Size of the [`AreaHeader`] prefix in bytes.
pub const AFD_WORD_OFFSET: usize = 16;

/// Sentinel in [`AreaHeader::count`] marking a superseded generation.
pub const STALE: i32 = -1;

/// The fixed prefix of every mapped area file.
///
/// Field offsets are part of the on-disk format:
///
/// | Offset | Bytes | Field |
/// |--------|-------|-------|
/// | 0 | 4 | `count`, or [`STALE`] |
/// | 4 | 1 | `feature_flags` |
/// | 5 | 2 | reserved |
/// | 7 | 1 | `version` |
/// | 8 | 4 | `page_size` (advisory, captured at creation) |
/// | 12 | 4 | reserved |
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct AreaHeader {
    pub count: i32,
    pub feature_flags: u8,
    _reserved1: [u8; 2],
    pub version: u8,
    pub page_size: u32,
    _reserved2: [u8; 4],
}

impl AreaHeader {
    pub fn is_stale(&self) -> bool {
        self.count == STALE
    }
}
