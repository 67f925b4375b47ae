use crate::{BitPlane, LaneLength, Pixel, MAX_BITS_PER_PIXEL, MAX_LANE_SIZE};
use smallvec::SmallVec;

/// Bit-planes of one lane, least significant plane first
pub type Planes = SmallVec<[BitPlane; MAX_BITS_PER_PIXEL as usize]>;

/// The shuffled representation of a lane.
///
/// Plane `i` holds bit `i` of every pixel, with pixel `P-1` in the most significant of the
/// `P` used bits and pixel `0` in the least significant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitPlaneBlock {
    planes: Planes,
    lane_size: usize,
}

impl BitPlaneBlock {
    /// The bit-planes, least significant first
    pub fn planes(&self) -> &[BitPlane] {
        &self.planes
    }

    /// Number of pixels in the lane this block came from
    pub fn lane_size(&self) -> usize {
        self.lane_size
    }
}

/// A lane after length truncation: the planes up to and including the highest non-zero one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompressedLane {
    length: LaneLength,
    payload: Planes,
}

impl CompressedLane {
    /// Build a lane from already-shuffled planes, dropping trailing zero planes.
    pub fn from_planes(planes: &[BitPlane]) -> Self {
        let length = planes
            .iter()
            .rposition(|&plane| plane != 0)
            .map_or(0, |i| i + 1);
        Self {
            length: length as LaneLength,
            payload: planes[..length].into(),
        }
    }

    /// Number of significant bit-planes (L)
    #[inline]
    pub fn length(&self) -> LaneLength {
        self.length
    }

    /// The first `L` bit-planes
    #[inline]
    pub fn payload(&self) -> &[BitPlane] {
        &self.payload
    }
}

/// Transpose a lane of pixels into `bits_per_pixel` bit-planes.
///
/// Bits of a pixel at or above `bits_per_pixel` are ignored.
pub fn shuffle(pixels: &[Pixel], bits_per_pixel: u8) -> BitPlaneBlock {
    debug_assert!(pixels.len() <= MAX_LANE_SIZE);
    let planes = (0..bits_per_pixel)
        .map(|i| {
            pixels.iter().rev().fold(0, |plane: BitPlane, &pixel| {
                (plane << 1) | BitPlane::from((pixel >> i) & 1 == 1)
            })
        })
        .collect();
    BitPlaneBlock {
        planes,
        lane_size: pixels.len(),
    }
}

/// Undo [`shuffle`], recovering the low `B` bits of every pixel in the lane.
pub fn unshuffle(block: &BitPlaneBlock) -> Vec<Pixel> {
    (0..block.lane_size)
        .map(|j| {
            block
                .planes
                .iter()
                .enumerate()
                .fold(0, |pixel: Pixel, (i, &plane)| {
                    pixel | (Pixel::from((plane >> j) & 1 == 1) << i)
                })
        })
        .collect()
}

/// Drop the all-zero high-order planes of a shuffled lane.
pub fn length_compress(block: &BitPlaneBlock) -> CompressedLane {
    CompressedLane::from_planes(&block.planes)
}

/// [`shuffle`] then [`length_compress`] one lane
pub fn length_shuffle_compress(pixels: &[Pixel], bits_per_pixel: u8) -> CompressedLane {
    length_compress(&shuffle(pixels, bits_per_pixel))
}
