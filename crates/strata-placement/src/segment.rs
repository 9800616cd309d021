//! Division of the 31-bit hash circle into equal-width segments.

use crate::error::PlacementError;

/// Size of the normalized hash space: hashes live in `[0, 2^31)`.
pub const HASH_SPACE: u64 = 1 << 31;

/// Fixed partition of the hash space into `num_segments` ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLayout {
    num_segments: usize,
    segment_size: u64,
}

impl SegmentLayout {
    /// Build the layout, rejecting zero segments or more segments than hash values.
    pub fn new(num_segments: usize) -> Result<Self, PlacementError> {
        if num_segments == 0 || num_segments as u64 > HASH_SPACE {
            return Err(PlacementError::InvalidParameters(format!(
                "num_segments must be in [1, 2^31], got {num_segments}"
            )));
        }
        Ok(Self {
            num_segments,
            segment_size: HASH_SPACE.div_ceil(num_segments as u64),
        })
    }

    pub fn num_segments(&self) -> usize {
        self.num_segments
    }

    /// `ceil(2^31 / num_segments)`.
    pub fn segment_size(&self) -> u64 {
        self.segment_size
    }

    /// Position of the start of `segment` on the circle.
    ///
    /// For very large segment counts the last starts can land just past
    /// `2^31 - 1`; distances are computed modulo the circle so that is harmless.
    pub fn segment_start(&self, segment: usize) -> u64 {
        segment as u64 * self.segment_size
    }

    /// Segment containing a normalized hash.
    pub fn segment_for(&self, normalized_hash: u32) -> usize {
        // Bounded by num_segments - 1 because segment_size * num_segments >= 2^31.
        (normalized_hash as u64 / self.segment_size) as usize
    }
}

/// Distance between two points on the `2^31` circle, going whichever way is shorter.
pub fn circle_distance(a: u64, b: u64) -> u64 {
    let a = a % HASH_SPACE;
    let b = b % HASH_SPACE;
    let d = a.abs_diff(b);
    d.min(HASH_SPACE - d)
}
