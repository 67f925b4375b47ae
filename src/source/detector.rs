use crate::source::SourceError;
use ndarray::Array2;
use planemerge_core::FRAME_SIDE;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;

/// Sample type of a raw detector file. Every format is little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Unsigned 8-bit
    U8,
    /// Unsigned 16-bit
    U16,
    /// Unsigned 32-bit
    U32,
    /// Signed 32-bit
    I32,
}

impl PixelFormat {
    /// Size of one sample
    pub fn bytes(&self) -> usize {
        match self {
            PixelFormat::U8 => 1,
            PixelFormat::U16 => 2,
            PixelFormat::U32 | PixelFormat::I32 => 4,
        }
    }

    /// Decode a buffer of samples
    pub fn decode(&self, bytes: &[u8]) -> Vec<i64> {
        let chunks = bytes.chunks_exact(self.bytes());
        match self {
            PixelFormat::U8 => bytes.iter().map(|&b| i64::from(b)).collect(),
            PixelFormat::U16 => chunks
                .map(|c| i64::from(u16::from_le_bytes([c[0], c[1]])))
                .collect(),
            PixelFormat::U32 => chunks
                .map(|c| i64::from(u32::from_le_bytes([c[0], c[1], c[2], c[3]])))
                .collect(),
            PixelFormat::I32 => chunks
                .map(|c| i64::from(i32::from_le_bytes([c[0], c[1], c[2], c[3]])))
                .collect(),
        }
    }
}

/// Everything needed to turn a raw dump from one detector into 128×128 frames.
///
/// Profiles are plain data: the built-in ones are constructed on demand, and others can be
/// loaded from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorProfile {
    /// Short name, also the default output file stem
    pub name: String,

    /// Frame width in pixels
    pub width: usize,

    /// Frame height in pixels
    pub height: usize,

    /// Bytes per sample on disk
    pub bytes_per_pixel: usize,

    /// Sample type on disk
    pub format: PixelFormat,

    /// Dynamic range of one sample
    pub bits_per_pixel: f64,

    /// `(x, y)` centre of the crop window. The frame centre if absent.
    #[serde(default)]
    pub centre: Option<(usize, usize)>,

    /// `(x, y)` of pixels to zero, in 128×128 coordinates
    #[serde(default)]
    pub dead_pixels: Vec<(usize, usize)>,

    /// Indices of frames to skip
    #[serde(default)]
    pub bad_frames: Vec<usize>,
}

impl DetectorProfile {
    /// Ptychography scan, 558×514 `u32`
    pub fn ptychography() -> Self {
        Self {
            name: "ptychography".to_string(),
            width: 558,
            height: 514,
            bytes_per_pixel: 4,
            format: PixelFormat::U32,
            bits_per_pixel: 14.0,
            centre: None,
            dead_pixels: vec![],
            bad_frames: vec![],
        }
    }

    /// XPCS series, 1556×516 `u8`
    pub fn xpcs() -> Self {
        Self {
            name: "xpcs".to_string(),
            width: 1556,
            height: 516,
            bytes_per_pixel: 1,
            format: PixelFormat::U8,
            bits_per_pixel: 10.0,
            centre: None,
            dead_pixels: vec![],
            bad_frames: vec![347, 815],
        }
    }

    /// Pilatus series, 1475×1679 `i32`
    pub fn pilatus() -> Self {
        Self {
            name: "pilatus".to_string(),
            width: 1475,
            height: 1679,
            bytes_per_pixel: 4,
            format: PixelFormat::I32,
            bits_per_pixel: 14.0,
            centre: None,
            dead_pixels: vec![(63, 22)],
            bad_frames: vec![],
        }
    }

    /// All built-in profiles
    pub fn builtins() -> Vec<Self> {
        vec![Self::ptychography(), Self::xpcs(), Self::pilatus()]
    }

    /// Look up a built-in profile by name
    pub fn builtin(name: &str) -> Result<Self, SourceError> {
        Self::builtins()
            .into_iter()
            .find(|profile| profile.name == name)
            .ok_or_else(|| SourceError::UnknownProfile(name.to_string()))
    }

    /// Load a profile from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let content = std::fs::read_to_string(path)?;
        let profile: Self = toml::from_str(&content)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Bytes in one raw frame
    pub fn frame_bytes(&self) -> usize {
        self.width * self.height * self.bytes_per_pixel
    }

    /// Pooling factor: the largest `c` such that a `128·c` square fits the frame
    pub fn combine(&self) -> usize {
        self.width.min(self.height) / FRAME_SIDE
    }

    /// Dynamic range of a pooled frame before any requantization
    pub fn pooled_bits(&self) -> f64 {
        self.bits_per_pixel + 2.0 * (self.combine() as f64).log2()
    }

    /// Rows and columns of the `128·c` square cropped around the centre
    pub fn crop_window(&self) -> Result<(Range<usize>, Range<usize>), SourceError> {
        let half = FRAME_SIDE / 2 * self.combine();
        let (x, y) = self.centre.unwrap_or((self.width / 2, self.height / 2));
        if half == 0 || x < half || y < half || x + half > self.width || y + half > self.height
        {
            return Err(SourceError::BadParams(format!(
                "a {0}x{0} window around ({x}, {y}) does not fit a {1}x{2} frame",
                2 * half,
                self.width,
                self.height
            )));
        }
        Ok((y - half..y + half, x - half..x + half))
    }

    /// Check that the profile describes a frame the pipeline can use
    pub fn validate(&self) -> Result<(), SourceError> {
        if self.bytes_per_pixel != self.format.bytes() {
            return Err(SourceError::BadParams(format!(
                "{} bytes per pixel does not match {:?} samples",
                self.bytes_per_pixel, self.format
            )));
        }
        if !(self.bits_per_pixel.is_finite() && self.bits_per_pixel >= 0.0) {
            return Err(SourceError::BadParams(format!(
                "bit depth {} is not usable",
                self.bits_per_pixel
            )));
        }
        self.crop_window()?;
        if let Some(&(x, y)) = self
            .dead_pixels
            .iter()
            .find(|(x, y)| *x >= FRAME_SIDE || *y >= FRAME_SIDE)
        {
            return Err(SourceError::BadParams(format!(
                "dead pixel ({x}, {y}) is outside a {FRAME_SIDE}x{FRAME_SIDE} frame"
            )));
        }
        Ok(())
    }

    /// Zero the known dead pixels of a normalized frame
    pub fn mask_dead_pixels<T: Default>(&self, frame: &mut Array2<T>) {
        for &(x, y) in &self.dead_pixels {
            if let Some(pixel) = frame.get_mut((y, x)) {
                *pixel = T::default();
            }
        }
    }
}
