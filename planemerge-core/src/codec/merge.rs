use crate::codec::lane::CompressedLane;
use crate::codec::{CodecConfig, ConfigError, MergeError};
use crate::{BitPlane, LaneLength, MAX_BITS_PER_PIXEL};
use itertools::Itertools;
use tracing::debug;

/// A binary reduction tree that packs variable-length lanes into one buffer.
///
/// Lanes start in slots of `B` bit-planes. Each level merges adjacent pairs into a slot twice
/// as wide: the right lane's planes that fit are moved into the gap behind the left lane's
/// valid planes, and the ones that do not (`pivot` of them) stay where they were, directly
/// after the gap. Once the slot width exceeds the simulated bus (`max_blocks`), every
/// level rounds its lengths up to a multiple of the alignment modulus, which then doubles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeNetwork {
    bits_per_pixel: u8,
    max_blocks: usize,
    alignment_start: usize,
}

/// A record of one level of the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStage {
    /// Slot width of the operands at this level
    pub width: usize,

    /// The alignment modulus applied after merging, if the widened slot exceeded the bus
    pub modulus: Option<usize>,

    /// Pair lengths before alignment
    pub merged_lengths: Vec<usize>,

    /// Pair lengths handed to the next level
    pub lengths: Vec<usize>,
}

/// The packed payload left once the tree collapses to a single slot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergedBuffer {
    planes: Vec<BitPlane>,
}

impl MergedBuffer {
    pub(crate) fn from_planes(planes: Vec<BitPlane>) -> Self {
        Self { planes }
    }

    /// Total number of bit-planes, alignment padding included
    #[inline]
    pub fn total_length(&self) -> usize {
        self.planes.len()
    }

    /// The packed bit-planes
    #[inline]
    pub fn planes(&self) -> &[BitPlane] {
        &self.planes
    }

    /// `true` if no lane contributed any planes
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }
}

/// Running state of the tree between levels.
///
/// Slot `i` occupies `arena[width * i..width * (i + 1)]`. When only lengths are being
/// replayed, there is no arena.
struct MergeState {
    width: usize,
    modulus: usize,
    lengths: Vec<usize>,
    arena: Option<Vec<BitPlane>>,
}

impl MergeState {
    fn new(
        lengths: Vec<usize>,
        width: usize,
        modulus: usize,
        arena: Option<Vec<BitPlane>>,
    ) -> Result<Self, MergeError> {
        if !lengths.len().is_power_of_two() {
            return Err(MergeError::LaneCount(lengths.len()));
        }
        if let Some((lane, &length)) = lengths.iter().find_position(|&&length| length > width) {
            return Err(MergeError::LaneTooLong {
                lane,
                length,
                width,
            });
        }
        Ok(Self {
            width,
            modulus,
            lengths,
            arena,
        })
    }

    /// Run levels until a single slot remains
    fn collapse(&mut self, max_blocks: usize) -> Result<Vec<MergeStage>, MergeError> {
        let mut stages = Vec::new();
        while self.lengths.len() > 1 {
            let stage = self.step(max_blocks, stages.len())?;
            stages.push(stage);
        }

        let total = self.lengths[0];
        if total > self.width {
            return Err(MergeError::TotalOverflow {
                total,
                width: self.width,
            });
        }
        Ok(stages)
    }

    /// Merge every adjacent pair of slots into the next, twice-as-wide level
    fn step(&mut self, max_blocks: usize, stage: usize) -> Result<MergeStage, MergeError> {
        let width = self.width;

        // Each pair's new slot covers exactly its two old slots, so the next arena starts as
        // a copy and only the gap behind the left operand is rewritten.
        let mut next_arena = self.arena.clone();
        let mut merged_lengths = Vec::with_capacity(self.lengths.len() / 2);

        for (pair, (&left, &right)) in self.lengths.iter().tuples().enumerate() {
            if left > width || right > width {
                return Err(MergeError::WindowOverflow {
                    stage,
                    pair,
                    left,
                    right,
                    width,
                });
            }
            let pivot = (left + right).saturating_sub(width);

            if let (Some(old), Some(new)) = (self.arena.as_deref(), next_arena.as_deref_mut()) {
                let base = 2 * width * pair;
                new[base + left..base + width]
                    .copy_from_slice(&old[base + width + pivot..base + 2 * width - left + pivot]);
            }
            merged_lengths.push(left + right);
        }

        self.width *= 2;
        let mut lengths = merged_lengths.clone();
        let modulus = if self.width > max_blocks {
            let modulus = self.modulus;
            for length in lengths.iter_mut() {
                *length = align(*length, modulus);
            }
            self.modulus *= 2;
            Some(modulus)
        } else {
            None
        };

        debug!(stage, width, ?modulus, lanes = lengths.len(), "merged level");
        self.lengths = lengths.clone();
        self.arena = next_arena;

        Ok(MergeStage {
            width,
            modulus,
            merged_lengths,
            lengths,
        })
    }
}

/// Round `length` up to a multiple of `modulus`
#[inline]
fn align(length: usize, modulus: usize) -> usize {
    match length % modulus {
        0 => length,
        rem => length + modulus - rem,
    }
}

impl MergeNetwork {
    /// Create a network for lanes of `bits_per_pixel` planes behind a bus `max_blocks` wide.
    ///
    /// # Errors
    /// The bus must be wider than one lane and the first alignment modulus a power of two.
    pub fn new(
        bits_per_pixel: u8,
        max_blocks: usize,
        alignment_start: usize,
    ) -> Result<Self, ConfigError> {
        if bits_per_pixel == 0 || bits_per_pixel > MAX_BITS_PER_PIXEL {
            return Err(ConfigError::BitsPerPixel(bits_per_pixel));
        }
        if max_blocks <= bits_per_pixel as usize {
            return Err(ConfigError::MaxBlocks {
                max_blocks,
                bits_per_pixel,
            });
        }
        if !alignment_start.is_power_of_two() {
            return Err(ConfigError::AlignmentStart(alignment_start));
        }
        Ok(Self {
            bits_per_pixel,
            max_blocks,
            alignment_start,
        })
    }

    /// Create the network described by a pipeline configuration
    pub fn from_config(config: &CodecConfig) -> Result<Self, ConfigError> {
        Self::new(
            config.bits_per_pixel,
            config.max_blocks,
            config.alignment_start,
        )
    }

    /// Pack all lanes into a single buffer.
    pub fn merge(&self, lanes: &[CompressedLane]) -> Result<MergedBuffer, MergeError> {
        self.merge_traced(lanes).map(|(buffer, _)| buffer)
    }

    /// Pack all lanes, also returning a record of every level of the tree.
    pub fn merge_traced(
        &self,
        lanes: &[CompressedLane],
    ) -> Result<(MergedBuffer, Vec<MergeStage>), MergeError> {
        let width = self.bits_per_pixel as usize;
        let mut arena: Vec<BitPlane> = Vec::with_capacity(lanes.len() * width);
        for lane in lanes {
            let payload = &lane.payload()[..lane.payload().len().min(width)];
            let slot_start = arena.len();
            arena.extend_from_slice(payload);
            arena.resize(slot_start + width, 0);
        }
        let lengths = lanes.iter().map(|lane| lane.payload().len()).collect();

        let mut state = MergeState::new(lengths, width, self.alignment_start, Some(arena))?;
        let stages = state.collapse(self.max_blocks)?;

        let total = state.lengths[0];
        let mut planes = state.arena.unwrap_or_default();
        planes.truncate(total);
        Ok((MergedBuffer { planes }, stages))
    }

    /// Replay only the length arithmetic of [`merge`](Self::merge), returning the final
    /// payload length in bit-planes. A reader of the wire format uses this to find the end
    /// of a record's payload from its headers.
    pub fn merged_length(&self, lengths: &[LaneLength]) -> Result<usize, MergeError> {
        let lengths = lengths.iter().map(|&length| usize::from(length)).collect();
        let mut state = MergeState::new(
            lengths,
            self.bits_per_pixel as usize,
            self.alignment_start,
            None,
        )?;
        state.collapse(self.max_blocks)?;
        Ok(state.lengths[0])
    }
}
