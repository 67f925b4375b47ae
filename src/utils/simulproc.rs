use crate::source::detector::DetectorProfile;
use crate::source::formatted::FormattedFrameWriter;
use crate::source::raw::{measure_dynamic_range, Reduction};
use crate::source::{Source, SourceError, SourceFrame};
use clap::Parser;
use indicatif::ProgressBar;
use planemerge_core::codec::encoder::{Encoder, FrameStats};
use planemerge_core::codec::{CodecConfig, CodecError};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use std::cmp::max;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Command line arguments for encoding frames
#[derive(Parser, Debug, Clone, serde::Deserialize)]
#[clap(author, version, about, long_about = None)]
#[serde(default)]
pub struct EncodeArgs {
    /// Filename for args (optional; must be in .toml format)
    #[clap(short, long, default_value = "")]
    pub args_filename: String,

    /// Path to input file
    #[clap(short, long, default_value = "./in.bin")]
    pub input_filename: String,

    /// Built-in detector profile of a raw input file (ptychography, xpcs, pilatus). Leave
    /// empty for formatted 128x128 input
    #[clap(short, long, default_value = "")]
    pub profile: String,

    /// Detector profile of a raw input file, in .toml format. Overrides `profile`
    #[clap(long, default_value = "")]
    pub profile_filename: String,

    /// How raw input is requantized (auto, measured, none)
    #[clap(long, default_value = "auto")]
    pub reduction: String,

    /// Dynamic range of formatted input, in bits
    #[clap(long, default_value_t = 10.0)]
    pub input_bits: f64,

    /// Path to output records file
    #[clap(short, long, default_value = "./out.pm")]
    pub output_filename: String,

    /// Pixels per lane
    #[clap(long, default_value_t = 128)]
    pub lane_size: usize,

    /// Bit-planes per lane
    #[clap(short, long, default_value_t = 7)]
    pub bits_per_pixel: u8,

    /// Number of lanes in the merge network (power of two)
    #[clap(short = 'n', long, default_value_t = 128)]
    pub lane_count: usize,

    /// Simulated bus width, in bit-planes
    #[clap(short, long, default_value_t = 128)]
    pub max_blocks: usize,

    /// First alignment modulus once the bus width is exceeded
    #[clap(long, default_value_t = 1)]
    pub alignment_start: usize,

    /// Bit depth of stochastic requantization
    #[clap(short, long, default_value_t = 10.0)]
    pub target_bits: f64,

    /// Skip the 10-to-7-bit re-encoding
    #[clap(long, action)]
    pub no_poisson: bool,

    /// Seed for requantization (optional; system entropy otherwise)
    #[clap(short, long)]
    pub seed: Option<u64>,

    /// Max number of input frames to encode (0 = no limit)
    #[clap(short, long, default_value_t = 0)]
    pub frame_count_max: usize,

    /// Frames read ahead and encoded in parallel
    #[clap(long, default_value_t = 64)]
    pub batch_size: usize,

    /// Number of threads to use. If 0, will default to the number of cores on the system.
    #[clap(long, default_value_t = 0)]
    pub thread_count: u8,

    /// Show a progress bar
    #[clap(long, action)]
    pub progress: bool,

    /// Log run information
    #[clap(short, long, action)]
    pub verbose: bool,

    /// Log every frame
    #[clap(short, long, action)]
    pub debug: bool,
}

impl Default for EncodeArgs {
    fn default() -> Self {
        Self::parse_from(["planemerge_encode"])
    }
}

impl EncodeArgs {
    /// The pipeline configuration these arguments describe
    pub fn codec_config(&self) -> CodecConfig {
        CodecConfig {
            lane_size: self.lane_size,
            bits_per_pixel: self.bits_per_pixel,
            lane_count: self.lane_count,
            max_blocks: self.max_blocks,
            alignment_start: self.alignment_start,
            target_bits: self.target_bits,
            poisson: !self.no_poisson,
            seed: self.seed,
        }
    }
}

/// Command line arguments for converting a raw detector file to formatted frames
#[derive(Parser, Debug, Clone, serde::Deserialize)]
#[clap(author, version, about, long_about = None)]
#[serde(default)]
pub struct ConvertArgs {
    /// Filename for args (optional; must be in .toml format)
    #[clap(short, long, default_value = "")]
    pub args_filename: String,

    /// Path to raw detector file
    #[clap(short, long, default_value = "./in.raw")]
    pub input_filename: String,

    /// Built-in detector profile (ptychography, xpcs, pilatus)
    #[clap(short, long, default_value = "")]
    pub profile: String,

    /// Detector profile in .toml format. Overrides `profile`
    #[clap(long, default_value = "")]
    pub profile_filename: String,

    /// How frames are requantized (auto, measured, none)
    #[clap(long, default_value = "measured")]
    pub reduction: String,

    /// Path to output formatted frame file
    #[clap(short, long, default_value = "./out.bin")]
    pub output_filename: String,

    /// Bit depth of stochastic requantization
    #[clap(short, long, default_value_t = 10.0)]
    pub target_bits: f64,

    /// Seed for requantization (optional; system entropy otherwise)
    #[clap(short, long)]
    pub seed: Option<u64>,

    /// Max number of frames to convert (0 = no limit)
    #[clap(short, long, default_value_t = 0)]
    pub frame_count_max: usize,

    /// Log run information
    #[clap(short, long, action)]
    pub verbose: bool,

    /// Log every frame
    #[clap(short, long, action)]
    pub debug: bool,
}

impl Default for ConvertArgs {
    fn default() -> Self {
        Self::parse_from(["planemerge_convert"])
    }
}

/// Pick the detector profile named on the command line, if any
pub fn resolve_profile(
    profile: &str,
    profile_filename: &str,
) -> Result<Option<DetectorProfile>, SourceError> {
    if !profile_filename.is_empty() {
        return DetectorProfile::from_toml_file(profile_filename).map(Some);
    }
    if !profile.is_empty() {
        return DetectorProfile::builtin(profile).map(Some);
    }
    Ok(None)
}

/// Turn a reduction mode name into a [`Reduction`]. `measured` makes a first pass over
/// `input_filename`.
pub fn resolve_reduction<P: AsRef<Path>>(
    mode: &str,
    input_filename: P,
    profile: &DetectorProfile,
) -> Result<Reduction, SourceError> {
    match mode {
        "auto" => Ok(Reduction::Auto),
        "none" => Ok(Reduction::Disabled),
        "measured" => {
            let path = input_filename.as_ref();
            let file =
                File::open(path).map_err(|_| SourceError::Open(path.display().to_string()))?;
            let bits = measure_dynamic_range(BufReader::new(file), profile)?;
            info!(bits, "measured dynamic range");
            Ok(Reduction::Custom(bits))
        }
        other => Err(SourceError::BadParams(format!(
            "unknown reduction mode `{other}`"
        ))),
    }
}

/// Counts and sizes for one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Frames taken from the source
    pub frames_read: u64,

    /// Frames written to the output
    pub frames_written: u64,

    /// Frames rejected by the source or the encoder
    pub frames_skipped: u64,

    /// Summed size accounting of every written record
    pub stats: FrameStats,

    /// Wall-clock time of the run
    pub elapsed_ms: u64,
}

impl RunSummary {
    /// Uncompressed size over output size, across the run
    pub fn compression_ratio(&self) -> f64 {
        self.stats.compression_ratio()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Frames")?;
        writeln!(f, "\tRead: {}", self.frames_read)?;
        writeln!(f, "\tWritten: {}", self.frames_written)?;
        writeln!(f, "\tSkipped: {}", self.frames_skipped)?;
        if self.stats.frames > 0 {
            writeln!(f, "Sizes")?;
            writeln!(f, "\tInput bits: {}", self.stats.input_bits)?;
            writeln!(f, "\tHeader bits: {}", self.stats.header_bits)?;
            writeln!(f, "\tPayload bits: {}", self.stats.payload_bits)?;
            writeln!(f, "\tOutput bytes: {}", self.stats.record_bytes)?;
            writeln!(f, "\tZero lanes: {}", self.stats.zero_lanes)?;
            writeln!(f, "Compression ratio: {:.4}", self.compression_ratio())?;
        }
        write!(f, "{} ms elapsed", self.elapsed_ms)
    }
}

/// Encodes every frame of a [`Source`], writing one record per frame in input order.
///
/// Frames are read sequentially in batches; each batch is encoded on a thread pool. A frame
/// rejected for its shape or content is logged and skipped.
pub struct BatchProcessor<S: Source, W: Write> {
    source: S,
    encoder: Encoder,
    output: W,
    thread_pool: ThreadPool,
    batch_size: usize,
    frame_count_max: usize,
    progress: bool,
}

impl<S: Source, W: Write> BatchProcessor<S, W> {
    /// Create a new BatchProcessor
    ///
    /// # Arguments
    ///
    /// * `source`: where frames come from
    /// * `encoder`: the validated per-frame encoder
    /// * `output`: where records go
    /// * `num_threads`: number of threads to use (0 = number of cores)
    pub fn new(
        source: S,
        encoder: Encoder,
        output: W,
        num_threads: usize,
    ) -> Result<Self, SourceError> {
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?;
        Ok(Self {
            source,
            encoder,
            output,
            thread_pool,
            batch_size: 64,
            frame_count_max: 0,
            progress: false,
        })
    }

    /// Frames read ahead and encoded in parallel
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = max(batch_size, 1);
        self
    }

    /// Stop after this many frames (0 = no limit)
    pub fn frame_count_max(mut self, frame_count_max: usize) -> Self {
        self.frame_count_max = frame_count_max;
        self
    }

    /// Show a progress bar
    pub fn progress(mut self, show: bool) -> Self {
        self.progress = show;
        self
    }

    /// Hand back the output stream
    pub fn into_output(self) -> W {
        self.output
    }

    /// Read the next batch. Returns `true` once the source is exhausted.
    fn fill_batch(
        &mut self,
        batch: &mut Vec<SourceFrame>,
        summary: &mut RunSummary,
    ) -> Result<bool, SourceError> {
        while batch.len() < self.batch_size {
            if self.frame_count_max > 0 && summary.frames_read >= self.frame_count_max as u64 {
                return Ok(true);
            }
            match self.source.next_frame() {
                Ok(Some(frame)) => {
                    summary.frames_read += 1;
                    batch.push(frame);
                }
                Ok(None) => return Ok(true),
                Err(e) if e.is_frame_local() => {
                    warn!(%e, "skipping frame");
                    summary.frames_skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    /// Run until the source is exhausted
    pub fn run(&mut self) -> Result<RunSummary, SourceError> {
        let now = Instant::now();
        let mut summary = RunSummary::default();
        let mut batch = Vec::with_capacity(self.batch_size);
        let progress = match (self.progress, self.frame_count_max) {
            (false, _) => None,
            (true, 0) => Some(ProgressBar::new_spinner()),
            (true, max) => Some(ProgressBar::new(max as u64)),
        };

        loop {
            let done = self.fill_batch(&mut batch, &mut summary)?;

            let encoder = &self.encoder;
            let records: Vec<(usize, Result<(Vec<u8>, FrameStats), CodecError>)> =
                self.thread_pool.install(|| {
                    batch
                        .par_drain(..)
                        .map(|source_frame| (source_frame.index, encode_one(encoder, source_frame)))
                        .collect()
                });

            for (index, record) in records {
                match record.map_err(SourceError::from) {
                    Ok((bytes, stats)) => {
                        self.output.write_all(&bytes)?;
                        summary.frames_written += 1;
                        summary.stats += stats;
                        debug!(index, bytes = bytes.len(), "wrote record");
                    }
                    Err(e) if e.is_frame_local() => {
                        warn!(index, %e, "skipping frame");
                        summary.frames_skipped += 1;
                    }
                    Err(e) => return Err(e),
                }
                if let Some(progress) = &progress {
                    progress.inc(1);
                }
            }

            if done {
                break;
            }
        }

        self.output.flush()?;
        if let Some(progress) = &progress {
            progress.finish_and_clear();
        }
        summary.elapsed_ms = now.elapsed().as_millis() as u64;
        info!(
            frames = summary.frames_written,
            skipped = summary.frames_skipped,
            ratio = summary.compression_ratio(),
            "encoding finished"
        );
        Ok(summary)
    }
}

fn encode_one(
    encoder: &Encoder,
    source_frame: SourceFrame,
) -> Result<(Vec<u8>, FrameStats), CodecError> {
    let mut rng = encoder.config().frame_rng(source_frame.index);
    let frame = encoder.requantize(source_frame.frame, source_frame.bits, &mut rng)?;
    let encoded = encoder.encode_frame(&frame)?;
    Ok((encoded.to_bytes()?, encoded.stats()))
}

/// Copy every frame of a [`Source`] into a formatted frame file
pub fn convert_frames<S: Source, W: Write>(
    source: &mut S,
    writer: &mut FormattedFrameWriter<W>,
    frame_count_max: usize,
) -> Result<RunSummary, SourceError> {
    let now = Instant::now();
    let mut summary = RunSummary::default();
    while frame_count_max == 0 || summary.frames_read < frame_count_max as u64 {
        match source.next_frame() {
            Ok(Some(source_frame)) => {
                summary.frames_read += 1;
                match writer.write_frame(&source_frame.frame) {
                    Ok(()) => summary.frames_written += 1,
                    Err(e) if e.is_frame_local() => {
                        warn!(index = source_frame.index, %e, "skipping frame");
                        summary.frames_skipped += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(None) => break,
            Err(e) if e.is_frame_local() => {
                warn!(%e, "skipping frame");
                summary.frames_skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }
    summary.elapsed_ms = now.elapsed().as_millis() as u64;
    info!(frames = summary.frames_written, "conversion finished");
    Ok(summary)
}
