use crate::codec::header::HeaderSet;
use crate::codec::lane::{length_shuffle_compress, CompressedLane};
use crate::codec::merge::{MergeNetwork, MergedBuffer};
use crate::codec::{CodecConfig, CodecError, ConfigError, ShapeError};
use crate::frame::{combine_pixels, pooling_scale, remove_negative};
use crate::reduce::{poisson_encode_frame, reduce_bits};
use crate::{BitPlane, Frame, LaneLength, Pixel, FRAME_AREA, FRAME_SIDE};
use bitstream_io::{BigEndian, BitRead, BitWrite, BitWriter};
use ndarray::ArrayView2;
use num_traits::AsPrimitive;
use rand::Rng;
use serde::Serialize;
use std::io;
use std::ops::AddAssign;
use tracing::debug;

/// Turns prepared 128×128 frames into [`EncodedFrame`]s.
///
/// An [`Encoder`] holds nothing but its validated configuration, so one instance can be
/// shared by any number of threads.
#[derive(Debug, Clone)]
pub struct Encoder {
    config: CodecConfig,
    network: MergeNetwork,
}

impl Encoder {
    /// Create an encoder, rejecting an invalid configuration before any frame is seen.
    pub fn new(config: CodecConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let network = MergeNetwork::from_config(&config)?;
        Ok(Self { config, network })
    }

    /// The configuration in use
    #[inline]
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// The merge network in use
    #[inline]
    pub fn network(&self) -> &MergeNetwork {
        &self.network
    }

    /// Normalize a square detector frame to 128×128 and requantize it to the target depth.
    ///
    /// `source_bits` is the dynamic range of one input pixel. Sum-pooling `scale × scale`
    /// tiles adds `2·log2(scale)` bits; if the result exceeds
    /// [`target_bits`](CodecConfig::target_bits) the frame is reduced with draws from `rng`.
    pub fn prepare_frame<T, R>(
        &self,
        raw: ArrayView2<T>,
        source_bits: f64,
        rng: &mut R,
    ) -> Result<Frame, CodecError>
    where
        T: AsPrimitive<i64>,
        R: Rng + ?Sized,
    {
        let scale = pooling_scale(raw.dim())?;
        let frame = remove_negative(combine_pixels(raw, scale));
        let pooled_bits = source_bits + 2.0 * (scale as f64).log2();
        self.requantize(frame, pooled_bits, rng)
    }

    /// Reduce an already normalized frame whose pixels span `current_bits` of dynamic range.
    /// Frames already within the target depth pass through untouched.
    pub fn requantize<R: Rng + ?Sized>(
        &self,
        frame: Frame,
        current_bits: f64,
        rng: &mut R,
    ) -> Result<Frame, CodecError> {
        if current_bits > self.config.target_bits {
            Ok(reduce_bits(
                frame,
                current_bits,
                self.config.target_bits,
                rng,
            )?)
        } else {
            Ok(frame)
        }
    }

    /// Encode one prepared 128×128 frame.
    ///
    /// # Errors
    /// [`ShapeError::FrameSize`] for any other shape, and [`ShapeError::PixelOutOfRange`] if a
    /// pixel entering the lane encoder does not fit in `bits_per_pixel` bits.
    pub fn encode_frame(&self, frame: &Frame) -> Result<EncodedFrame, CodecError> {
        let (height, width) = frame.dim();
        if (height, width) != (FRAME_SIDE, FRAME_SIDE) {
            return Err(ShapeError::FrameSize { height, width }.into());
        }

        let bits_per_pixel = self.config.bits_per_pixel;
        let pixels: Vec<Pixel> = if self.config.poisson {
            poisson_encode_frame(frame.clone()).into_iter().collect()
        } else {
            frame.iter().copied().collect()
        };
        debug_assert_eq!(pixels.len(), FRAME_AREA);

        if let Some((index, &value)) = pixels
            .iter()
            .enumerate()
            .find(|(_, value)| **value >> bits_per_pixel != 0)
        {
            return Err(ShapeError::PixelOutOfRange {
                index,
                value,
                bits: bits_per_pixel,
            }
            .into());
        }

        let lanes: Vec<CompressedLane> = pixels
            .chunks(self.config.lane_size)
            .map(|lane| length_shuffle_compress(lane, bits_per_pixel))
            .collect();
        let lengths: Vec<LaneLength> = lanes.iter().map(CompressedLane::length).collect();

        let headers = HeaderSet::extract(&lengths);
        let payload = self.network.merge(&lanes)?;

        debug!(
            lanes = lanes.len(),
            long_lanes = headers.headers_3bit().len(),
            planes = payload.total_length(),
            "encoded frame"
        );

        Ok(EncodedFrame {
            headers,
            payload,
            lane_size: self.config.lane_size,
            bits_per_pixel,
        })
    }

    /// [`prepare_frame`](Self::prepare_frame), then [`encode_frame`](Self::encode_frame)
    pub fn encode_raw<T, R>(
        &self,
        raw: ArrayView2<T>,
        source_bits: f64,
        rng: &mut R,
    ) -> Result<EncodedFrame, CodecError>
    where
        T: AsPrimitive<i64>,
        R: Rng + ?Sized,
    {
        let frame = self.prepare_frame(raw, source_bits, rng)?;
        self.encode_frame(&frame)
    }
}

/// Encode a single prepared frame with the given configuration
pub fn encode(frame: &Frame, config: &CodecConfig) -> Result<EncodedFrame, CodecError> {
    Encoder::new(config.clone())?.encode_frame(frame)
}

/// The compressed form of one frame: classification headers plus the packed payload.
///
/// On the wire a frame is one record, big-endian (most significant bit first):
/// 1. the 2-bit header of every lane, in lane order
/// 2. the `headers_3bit` entries, each [`length_field_bits`](super::header::length_field_bits)
///    wide
/// 3. the payload bit-planes in ascending order, each exactly `lane_size` bits
/// 4. zero bits up to the next byte boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    headers: HeaderSet,
    payload: MergedBuffer,
    lane_size: usize,
    bits_per_pixel: u8,
}

impl EncodedFrame {
    /// The classification headers
    pub fn headers(&self) -> &HeaderSet {
        &self.headers
    }

    /// The merged payload
    pub fn payload(&self) -> &MergedBuffer {
        &self.payload
    }

    /// Split into `(headers, payload)`
    pub fn into_parts(self) -> (HeaderSet, MergedBuffer) {
        (self.headers, self.payload)
    }

    /// Bits occupied by both header streams
    pub fn header_bits(&self) -> usize {
        self.headers.bit_len(self.bits_per_pixel)
    }

    /// Bits occupied by the payload
    pub fn payload_bits(&self) -> usize {
        self.payload.total_length() * self.lane_size
    }

    /// Size of the record on the wire, padding included
    pub fn record_bytes(&self) -> usize {
        (self.header_bits() + self.payload_bits() + 7) / 8
    }

    /// Write this frame's record to a bit stream, leaving it byte-aligned
    pub fn write<W: BitWrite>(&self, stream: &mut W) -> io::Result<()> {
        self.headers.write(stream, self.bits_per_pixel)?;
        for &plane in self.payload.planes() {
            write_plane(stream, plane, self.lane_size)?;
        }
        stream.byte_align()
    }

    /// Serialize this frame's record
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut stream = BitWriter::endian(Vec::with_capacity(self.record_bytes()), BigEndian);
        self.write(&mut stream)?;
        Ok(stream.into_writer())
    }

    /// Read one record written with the same configuration.
    ///
    /// The payload length is not on the wire. It is recovered by replaying the merge
    /// network's length arithmetic over the lane lengths from the headers.
    pub fn read<R: BitRead>(stream: &mut R, config: &CodecConfig) -> Result<Self, CodecError> {
        let network = MergeNetwork::from_config(config)?;
        let headers = HeaderSet::read(stream, config.lane_count, config.bits_per_pixel)?;
        let total_length = network.merged_length(&headers.lane_lengths())?;

        let planes = (0..total_length)
            .map(|_| read_plane(stream, config.lane_size))
            .collect::<io::Result<Vec<_>>>()?;
        stream.byte_align();

        Ok(Self {
            headers,
            payload: MergedBuffer::from_planes(planes),
            lane_size: config.lane_size,
            bits_per_pixel: config.bits_per_pixel,
        })
    }

    /// Size accounting for this frame
    pub fn stats(&self) -> FrameStats {
        FrameStats {
            frames: 1,
            input_bits: (FRAME_AREA * self.bits_per_pixel as usize) as u64,
            header_bits: self.header_bits() as u64,
            payload_bits: self.payload_bits() as u64,
            record_bytes: self.record_bytes() as u64,
            zero_lanes: self
                .headers
                .headers_2bit()
                .iter()
                .filter(|&&code| code == 0)
                .count() as u64,
        }
    }

    /// Uncompressed size over record size
    pub fn compression_ratio(&self) -> f64 {
        self.stats().compression_ratio()
    }
}

/// Write the low `lane_size` bits of a plane, pixel `lane_size - 1` first
fn write_plane<W: BitWrite>(stream: &mut W, plane: BitPlane, lane_size: usize) -> io::Result<()> {
    let (high_bits, low_bits) = split_width(lane_size);
    if high_bits > 0 {
        stream.write(high_bits, (plane >> u64::BITS) as u64)?;
    }
    stream.write(low_bits, plane as u64)
}

fn read_plane<R: BitRead>(stream: &mut R, lane_size: usize) -> io::Result<BitPlane> {
    let (high_bits, low_bits) = split_width(lane_size);
    let high: u64 = if high_bits > 0 {
        stream.read(high_bits)?
    } else {
        0
    };
    let low: u64 = stream.read(low_bits)?;
    Ok((BitPlane::from(high) << u64::BITS) | BitPlane::from(low))
}

/// Planes wider than a `u64` go out as two words
#[inline]
fn split_width(lane_size: usize) -> (u32, u32) {
    let low_bits = lane_size.min(u64::BITS as usize) as u32;
    (lane_size as u32 - low_bits, low_bits)
}

/// Size accounting for one frame, or summed over many.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FrameStats {
    /// Frames counted
    pub frames: u64,

    /// `128 × 128 × B`: the frame before lane compression
    pub input_bits: u64,

    /// Bits taken by the 2-bit and 3-bit headers
    pub header_bits: u64,

    /// Bits taken by the merged payload, alignment padding included
    pub payload_bits: u64,

    /// Bytes on the wire, record padding included
    pub record_bytes: u64,

    /// Lanes whose every pixel was zero
    pub zero_lanes: u64,
}

impl FrameStats {
    /// Uncompressed size over record size
    pub fn compression_ratio(&self) -> f64 {
        if self.record_bytes == 0 {
            return 0.0;
        }
        self.input_bits as f64 / (self.record_bytes * 8) as f64
    }
}

impl AddAssign for FrameStats {
    fn add_assign(&mut self, rhs: Self) {
        self.frames += rhs.frames;
        self.input_bits += rhs.input_bits;
        self.header_bits += rhs.header_bits;
        self.payload_bits += rhs.payload_bits;
        self.record_bytes += rhs.record_bytes;
        self.zero_lanes += rhs.zero_lanes;
    }
}
