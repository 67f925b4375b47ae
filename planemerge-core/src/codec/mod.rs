#![warn(missing_docs)]

use crate::{
    Pixel, FRAME_AREA, FRAME_SIDE, MAX_BITS_PER_PIXEL, MAX_LANE_SIZE, PIXEL_CEILING_BITS,
    POISSON_BITS,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Per-frame encoder and the record wire format
pub mod encoder;

/// Classification headers derived from lane lengths
pub mod header;

/// Bit-plane shuffle and length truncation of single lanes
pub mod lane;

/// The hierarchical merge network
pub mod merge;

/// Default number of pixels per lane
pub const DEFAULT_LANE_SIZE: usize = 128;

/// Default bit-planes per lane
pub const DEFAULT_BITS_PER_PIXEL: u8 = POISSON_BITS;

/// Default fan-in of the merge network
pub const DEFAULT_LANE_COUNT: usize = FRAME_AREA / DEFAULT_LANE_SIZE;

/// Default simulated bus width, in bit-planes
pub const DEFAULT_MAX_BLOCKS: usize = 128;

/// Errors in the pipeline configuration. These are detected before any frame is processed
/// and are never recovered from.
#[allow(missing_docs)]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("lane size must be in 1..={MAX_LANE_SIZE}, found {0}")]
    LaneSize(usize),

    #[error("bits per pixel must be in 1..={MAX_BITS_PER_PIXEL}, found {0}")]
    BitsPerPixel(u8),

    #[error("lane count must be a power of two, found {0}")]
    LaneCount(usize),

    #[error("{lane_count} lanes of {lane_size} pixels do not partition a {FRAME_SIDE}x{FRAME_SIDE} frame")]
    LanePartition { lane_size: usize, lane_count: usize },

    #[error("bus width ({max_blocks}) must exceed bits per pixel ({bits_per_pixel})")]
    MaxBlocks { max_blocks: usize, bits_per_pixel: u8 },

    #[error("alignment modulus must start at a power of two, found {0}")]
    AlignmentStart(usize),

    #[error("target bit depth must be in (0, {PIXEL_CEILING_BITS}], found {0}")]
    TargetBits(f64),

    #[error("cannot requantize from {current} bits up to {target} bits")]
    BitDepth { current: f64, target: f64 },

    #[error("{bits_per_pixel} bit-planes cannot hold {needed}-bit pixels")]
    PixelWidth { bits_per_pixel: u8, needed: u8 },
}

/// Errors in the shape or content of a single frame. The frame is rejected as a unit and
/// processing continues with the next one.
#[allow(missing_docs)]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("frame is not square ({height}x{width})")]
    NotSquare { height: usize, width: usize },

    #[error("frame side {0} is not a positive multiple of {FRAME_SIDE}")]
    Side(usize),

    #[error("expected a {FRAME_SIDE}x{FRAME_SIDE} frame, found {height}x{width}")]
    FrameSize { height: usize, width: usize },

    #[error("pixel {index} has value {value}, which does not fit in {bits} bits")]
    PixelOutOfRange { index: usize, value: Pixel, bits: u8 },

    #[error("short frame: expected {expected} bytes, read {actual}")]
    ShortFrame { expected: usize, actual: usize },
}

/// Errors raised while collapsing lanes through the merge network
#[allow(missing_docs)]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("merge network needs a power-of-two number of lanes, found {0}")]
    LaneCount(usize),

    #[error("lane {lane} has {length} bit-planes, more than the {width} a slot holds")]
    LaneTooLong {
        lane: usize,
        length: usize,
        width: usize,
    },

    #[error("stage {stage}, pair {pair}: lengths {left}+{right} reach outside a slot of width {width}")]
    WindowOverflow {
        stage: usize,
        pair: usize,
        left: usize,
        right: usize,
        width: usize,
    },

    #[error("aligned total of {total} bit-planes exceeds the final slot width {width}")]
    TotalOverflow { total: usize, width: usize },
}

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Configuration error")]
    Config(#[from] ConfigError),

    #[error("Frame shape error")]
    Shape(#[from] ShapeError),

    #[error("Merge network error")]
    Merge(#[from] MergeError),

    #[error("IO error")]
    IoError(#[from] io::Error),
}

/// Recognized pipeline options.
///
/// Every relationship between the fields is checked by [`CodecConfig::validate`]; the
/// [`Encoder`](encoder::Encoder) refuses to exist with an invalid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Pixels per lane (P). One bit-plane holds one bit of every pixel in the lane.
    pub lane_size: usize,

    /// Bit-planes per lane (B)
    pub bits_per_pixel: u8,

    /// Number of lanes fed to the merge network (n). Must be a power of two.
    pub lane_count: usize,

    /// Simulated bus width. Once a merge slot grows wider than this, lengths are aligned.
    pub max_blocks: usize,

    /// The first alignment modulus applied once the slot width exceeds `max_blocks`
    pub alignment_start: usize,

    /// Bit depth that stochastic requantization reduces to
    pub target_bits: f64,

    /// Re-encode 10-bit pixels to 7 bits before shuffling
    pub poisson: bool,

    /// Seed for requantization. `None` draws from system entropy.
    pub seed: Option<u64>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            lane_size: DEFAULT_LANE_SIZE,
            bits_per_pixel: DEFAULT_BITS_PER_PIXEL,
            lane_count: DEFAULT_LANE_COUNT,
            max_blocks: DEFAULT_MAX_BLOCKS,
            alignment_start: 1,
            target_bits: PIXEL_CEILING_BITS,
            poisson: true,
            seed: None,
        }
    }
}

impl CodecConfig {
    /// Check every relationship between the options.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lane_size == 0 || self.lane_size > MAX_LANE_SIZE {
            return Err(ConfigError::LaneSize(self.lane_size));
        }
        if self.bits_per_pixel == 0 || self.bits_per_pixel > MAX_BITS_PER_PIXEL {
            return Err(ConfigError::BitsPerPixel(self.bits_per_pixel));
        }
        if !self.lane_count.is_power_of_two() {
            return Err(ConfigError::LaneCount(self.lane_count));
        }
        if self.lane_count.checked_mul(self.lane_size) != Some(FRAME_AREA) {
            return Err(ConfigError::LanePartition {
                lane_size: self.lane_size,
                lane_count: self.lane_count,
            });
        }
        if self.max_blocks <= self.bits_per_pixel as usize {
            return Err(ConfigError::MaxBlocks {
                max_blocks: self.max_blocks,
                bits_per_pixel: self.bits_per_pixel,
            });
        }
        if !self.alignment_start.is_power_of_two() {
            return Err(ConfigError::AlignmentStart(self.alignment_start));
        }
        if !(self.target_bits > 0.0 && self.target_bits <= PIXEL_CEILING_BITS) {
            return Err(ConfigError::TargetBits(self.target_bits));
        }
        let needed = self.pixel_bits();
        if self.bits_per_pixel < needed {
            return Err(ConfigError::PixelWidth {
                bits_per_pixel: self.bits_per_pixel,
                needed,
            });
        }
        Ok(())
    }

    /// The bit depth of pixels entering the lane encoder
    pub fn pixel_bits(&self) -> u8 {
        if self.poisson {
            POISSON_BITS
        } else {
            self.target_bits.ceil() as u8
        }
    }

    /// The random source for requantizing frame `frame_idx`.
    ///
    /// With a fixed seed, frame `k` draws from `seed + k`, so the outcome does not depend on
    /// which thread handles which frame.
    pub fn frame_rng(&self, frame_idx: usize) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(frame_idx as u64)),
            None => StdRng::from_entropy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = CodecConfig::default();
        assert_eq!(config.lane_count, 128);
        assert_eq!(config.lane_size, 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_lanes() {
        let config = CodecConfig {
            lane_count: 96,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::LaneCount(96)));
    }

    #[test]
    fn rejects_bad_partition() {
        let config = CodecConfig {
            lane_size: 64,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::LanePartition {
                lane_size: 64,
                lane_count: 128
            })
        );

        let config = CodecConfig {
            lane_size: 64,
            lane_count: 256,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_narrow_bus() {
        let config = CodecConfig {
            max_blocks: 7,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::MaxBlocks {
                max_blocks: 7,
                bits_per_pixel: 7
            })
        );
    }

    #[test]
    fn rejects_wide_lanes() {
        let config = CodecConfig {
            lane_size: 256,
            lane_count: 64,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::LaneSize(256)));
    }

    #[test]
    fn pixel_width_follows_poisson() {
        let config = CodecConfig {
            poisson: false,
            ..Default::default()
        };
        assert_eq!(config.pixel_bits(), 10);
        assert_eq!(
            config.validate(),
            Err(ConfigError::PixelWidth {
                bits_per_pixel: 7,
                needed: 10
            })
        );

        let config = CodecConfig {
            poisson: false,
            bits_per_pixel: 10,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn target_bits_bounds() {
        for target_bits in [0.0, -1.0, 10.5, f64::NAN] {
            let config = CodecConfig {
                target_bits,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(ConfigError::TargetBits(_))));
        }
    }

    #[test]
    fn partial_toml() {
        let config: CodecConfig = toml::from_str(
            r#"
            lane_size = 64
            lane_count = 256
            max_blocks = 32
            seed = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.lane_size, 64);
        assert_eq!(config.bits_per_pixel, DEFAULT_BITS_PER_PIXEL);
        assert_eq!(config.seed, Some(7));
        assert!(config.poisson);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn seeded_frame_rngs_differ_per_frame() {
        use rand::Rng;
        let config = CodecConfig {
            seed: Some(11),
            ..Default::default()
        };
        let a: u64 = config.frame_rng(0).gen();
        let b: u64 = config.frame_rng(0).gen();
        let c: u64 = config.frame_rng(1).gen();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
