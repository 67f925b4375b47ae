use planemerge_core::codec::{CodecError, ConfigError, ShapeError};
use planemerge_core::Frame;
use std::io;
use std::io::Read;
use thiserror::Error;

/// Detector geometry, sample format, and known defects
pub mod detector;

/// Formatted 128×128 `u16` frame files
pub mod formatted;

/// Raw detector dumps
pub mod raw;

/// Various errors that can occur while reading or processing frames
#[derive(Error, Debug)]
pub enum SourceError {
    /// Could not open source file
    #[error("Could not open source file `{0}`")]
    Open(String),

    /// A detector profile does not describe a usable frame
    #[error("Detector parameters are invalid: `{0}`")]
    BadParams(String),

    /// No profile with this name is built in
    #[error("Unknown detector profile `{0}`")]
    UnknownProfile(String),

    /// The frame was rejected; processing continues with the next one
    #[error("Frame shape error")]
    Shape(#[from] ShapeError),

    /// The pipeline configuration is unusable
    #[error("Configuration error")]
    Config(#[from] ConfigError),

    /// Codec error
    #[error("Codec core error")]
    CodecError(CodecError),

    /// Array shape error
    #[error("Array shape error")]
    ArrayShape(#[from] ndarray::ShapeError),

    /// Could not parse a TOML file
    #[error("TOML error")]
    Toml(#[from] toml::de::Error),

    /// Could not build the worker pool
    #[error("Thread pool error")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// IO error
    #[error("IO error")]
    Io(#[from] io::Error),
}

impl From<CodecError> for SourceError {
    fn from(value: CodecError) -> Self {
        match value {
            CodecError::Shape(e) => SourceError::Shape(e),
            CodecError::Config(e) => SourceError::Config(e),
            CodecError::IoError(e) => SourceError::Io(e),
            other => SourceError::CodecError(other),
        }
    }
}

impl SourceError {
    /// `true` if only the current frame is affected
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            SourceError::Shape(_) | SourceError::CodecError(CodecError::Merge(_))
        )
    }
}

/// A normalized frame ready for the encoder
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFrame {
    /// Position of the frame in its file, counting skipped frames
    pub index: usize,

    /// The 128×128 frame
    pub frame: Frame,

    /// Dynamic range of the frame's pixels, in bits
    pub bits: f64,
}

/// A sequence of same-shaped frames
pub trait Source {
    /// Produce the next frame, or `None` once the source is exhausted.
    ///
    /// A [`SourceError::Shape`] rejects only the current frame; the caller may keep reading.
    fn next_frame(&mut self) -> Result<Option<SourceFrame>, SourceError>;
}

/// Fill `buffer` from `input`, stopping early only at end of input. Returns the number of
/// bytes read.
pub(crate) fn read_frame_bytes<R: Read>(input: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match input.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use planemerge_core::codec::MergeError;
    use std::io::Cursor;

    /// Hands out at most `chunk` bytes per read
    struct Trickle<R: Read> {
        inner: R,
        chunk: usize,
    }

    impl<R: Read> Read for Trickle<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let len = buf.len().min(self.chunk);
            self.inner.read(&mut buf[..len])
        }
    }

    #[test]
    fn fills_across_short_reads() {
        let mut input = Trickle {
            inner: Cursor::new((0..100u8).collect::<Vec<_>>()),
            chunk: 7,
        };
        let mut buffer = vec![0; 40];
        assert_eq!(read_frame_bytes(&mut input, &mut buffer).unwrap(), 40);
        assert_eq!(buffer[39], 39);

        let mut buffer = vec![0; 80];
        assert_eq!(read_frame_bytes(&mut input, &mut buffer).unwrap(), 60);
        assert_eq!(read_frame_bytes(&mut input, &mut buffer).unwrap(), 0);
    }

    #[test]
    fn codec_errors_keep_their_class() {
        let err: SourceError = CodecError::Shape(ShapeError::Side(3)).into();
        assert!(matches!(err, SourceError::Shape(ShapeError::Side(3))));
        assert!(err.is_frame_local());

        let err: SourceError = CodecError::Merge(MergeError::LaneCount(3)).into();
        assert!(err.is_frame_local());

        let err: SourceError = CodecError::Config(ConfigError::LaneCount(3)).into();
        assert!(!err.is_frame_local());
    }
}
