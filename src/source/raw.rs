use crate::source::detector::DetectorProfile;
use crate::source::{read_frame_bytes, Source, SourceError, SourceFrame};
use ndarray::{s, Array2};
use planemerge_core::codec::ShapeError;
use planemerge_core::frame::{combine_pixels, pooling_scale, remove_negative};
use planemerge_core::reduce::reduce_bits;
use planemerge_core::{Frame, PIXEL_CEILING_BITS};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs::File;
use std::io::{BufReader, Read};
use std::ops::Range;
use std::path::Path;
use tracing::{debug, warn};

/// How a [`RawFrameReader`] brings pooled frames down to the target depth
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Reduction {
    /// Reduce when the profile's bit depth plus the pooling gain exceeds the target
    #[default]
    Auto,

    /// Treat every pooled frame as spanning this many bits, as measured by
    /// [`measure_dynamic_range`]
    Custom(f64),

    /// Never reduce. Frames are reported at no more than the target depth, so the encoder
    /// passes them through untouched as well.
    Disabled,
}

/// Reads frames from a raw detector dump and normalizes them to 128×128.
///
/// For every frame: skip it if it is a known bad frame, crop the `128·c` square around the
/// centre, sum-pool `c × c` tiles, clamp negatives, requantize, then zero dead pixels.
pub struct RawFrameReader<R: Read> {
    input: R,
    profile: DetectorProfile,
    reduction: Reduction,
    target_bits: f64,
    seed: Option<u64>,
    window: (Range<usize>, Range<usize>),
    buffer: Vec<u8>,
    index: usize,
    exhausted: bool,
}

/// Builder for a [`RawFrameReader`]
#[derive(Debug, Clone)]
pub struct RawFrameReaderBuilder {
    profile: DetectorProfile,
    reduction: Reduction,
    target_bits: f64,
    seed: Option<u64>,
}

impl RawFrameReaderBuilder {
    /// Start building a reader for files from this detector
    pub fn new(profile: DetectorProfile) -> Self {
        Self {
            profile,
            reduction: Reduction::default(),
            target_bits: PIXEL_CEILING_BITS,
            seed: None,
        }
    }

    /// Set the reduction mode
    pub fn reduction(mut self, reduction: Reduction) -> Self {
        self.reduction = reduction;
        self
    }

    /// Set the depth that frames are reduced to
    pub fn target_bits(mut self, target_bits: f64) -> Self {
        self.target_bits = target_bits;
        self
    }

    /// Seed requantization. Frame `k` draws from `seed + k`.
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Read from an open stream
    pub fn finish<R: Read>(self, input: R) -> Result<RawFrameReader<R>, SourceError> {
        self.profile.validate()?;
        if !(self.target_bits > 0.0 && self.target_bits <= PIXEL_CEILING_BITS) {
            return Err(SourceError::BadParams(format!(
                "target bit depth {} is out of range",
                self.target_bits
            )));
        }
        let window = self.profile.crop_window()?;
        Ok(RawFrameReader {
            input,
            buffer: vec![0; self.profile.frame_bytes()],
            profile: self.profile,
            reduction: self.reduction,
            target_bits: self.target_bits,
            seed: self.seed,
            window,
            index: 0,
            exhausted: false,
        })
    }

    /// Read from a file
    pub fn open<P: AsRef<Path>>(
        self,
        path: P,
    ) -> Result<RawFrameReader<BufReader<File>>, SourceError> {
        let path = path.as_ref();
        let file =
            File::open(path).map_err(|_| SourceError::Open(path.display().to_string()))?;
        self.finish(BufReader::new(file))
    }
}

impl<R: Read> RawFrameReader<R> {
    /// The profile in use
    pub fn profile(&self) -> &DetectorProfile {
        &self.profile
    }

    /// Dynamic range of a frame as it leaves this reader
    fn reduce(&self, frame: Frame, index: usize) -> Result<(Frame, f64), SourceError> {
        let current_bits = match self.reduction {
            Reduction::Auto => self.profile.pooled_bits(),
            Reduction::Custom(bits) => bits,
            Reduction::Disabled => {
                return Ok((frame, self.profile.pooled_bits().min(self.target_bits)))
            }
        };
        if current_bits <= self.target_bits {
            return Ok((frame, current_bits));
        }
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
            None => StdRng::from_entropy(),
        };
        let frame = reduce_bits(frame, current_bits, self.target_bits, &mut rng)?;
        Ok((frame, self.target_bits))
    }

    fn normalize(&self, index: usize) -> Result<SourceFrame, SourceError> {
        let samples = self.profile.format.decode(&self.buffer);
        let raw = Array2::from_shape_vec((self.profile.height, self.profile.width), samples)?;

        let (rows, cols) = self.window.clone();
        let cropped = raw.slice(s![rows, cols]);
        let scale = pooling_scale(cropped.dim())?;
        let frame = remove_negative(combine_pixels(cropped, scale));

        let (mut frame, bits) = self.reduce(frame, index)?;
        self.profile.mask_dead_pixels(&mut frame);
        Ok(SourceFrame { index, frame, bits })
    }
}

impl<R: Read> Source for RawFrameReader<R> {
    fn next_frame(&mut self) -> Result<Option<SourceFrame>, SourceError> {
        loop {
            if self.exhausted {
                return Ok(None);
            }
            let read = read_frame_bytes(&mut self.input, &mut self.buffer)?;
            let index = self.index;
            self.index += 1;

            if read < self.buffer.len() {
                self.exhausted = true;
                if read == 0 {
                    return Ok(None);
                }
                return Err(ShapeError::ShortFrame {
                    expected: self.buffer.len(),
                    actual: read,
                }
                .into());
            }
            if self.profile.bad_frames.contains(&index) {
                debug!(index, "skipping known bad frame");
                continue;
            }
            return self.normalize(index).map(Some);
        }
    }
}

/// Measure the dynamic range of a raw file: `log2(max + 1)` over every normalized,
/// unreduced frame. Feeding this to [`Reduction::Custom`] scales by what the data actually
/// spans instead of what the detector could produce.
pub fn measure_dynamic_range<R: Read>(
    input: R,
    profile: &DetectorProfile,
) -> Result<f64, SourceError> {
    let mut reader = RawFrameReaderBuilder::new(profile.clone())
        .reduction(Reduction::Disabled)
        .finish(input)?;
    let mut maximum = 0;
    loop {
        match reader.next_frame() {
            Ok(Some(source_frame)) => {
                let frame_max = source_frame.frame.iter().copied().max().unwrap_or(0);
                maximum = maximum.max(frame_max);
            }
            Ok(None) => break,
            Err(SourceError::Shape(e)) => {
                warn!(%e, "ignoring trailing data");
            }
            Err(e) => return Err(e),
        }
    }
    Ok((maximum as f64 + 1.0).log2())
}
