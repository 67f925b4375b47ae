#![warn(missing_docs)]

//! # planemerge-core
//!
//! A software model of an on-detector compression circuit for streams of 128×128 sensor
//! frames. A frame is sum-pooled down to 128×128, requantized to 10 bits, optionally
//! re-encoded to 7 bits, cut into lanes, and every lane is bit-plane shuffled and truncated
//! before a binary merge network packs all lanes into one aligned buffer.
//!
//! The entry point is [`codec::encoder::Encoder`] (or the free function
//! [`codec::encoder::encode`]), which turns one prepared [`Frame`] into an
//! [`EncodedFrame`](codec::encoder::EncodedFrame).

pub mod codec;

/// Spatial pre-reduction of detector frames
pub mod frame;

/// Dynamic-range reduction (stochastic requantization and non-linear re-encoding)
pub mod reduce;

pub use bitstream_io;
pub use ndarray;

use ndarray::Array2;

/// A normalized pixel value
pub type Pixel = u64;

/// A 128×128 frame of non-negative pixels, row-major
pub type Frame = Array2<Pixel>;

/// One bit-plane of a lane. Bit `j` holds the bit of pixel `j`, so a lane may hold at most
/// [`MAX_LANE_SIZE`] pixels.
pub type BitPlane = u128;

/// Number of significant bit-planes in a compressed lane
pub type LaneLength = u8;

/// Side length of a normalized frame
pub const FRAME_SIDE: usize = 128;

/// Number of pixels in a normalized frame
pub const FRAME_AREA: usize = FRAME_SIDE * FRAME_SIDE;

/// The 10-bit ceiling applied by stochastic requantization
pub const PIXEL_CEILING: Pixel = 1023;

/// Bit depth of the requantized pixels
pub const PIXEL_CEILING_BITS: f64 = 10.0;

/// Bit depth produced by the non-linear re-encoder
pub const POISSON_BITS: u8 = 7;

/// The widest lane a [`BitPlane`] can represent
pub const MAX_LANE_SIZE: usize = BitPlane::BITS as usize;

/// The deepest pixel the lane encoder accepts
pub const MAX_BITS_PER_PIXEL: u8 = 16;
