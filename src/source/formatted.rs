use crate::source::{read_frame_bytes, Source, SourceError, SourceFrame};
use planemerge_core::codec::ShapeError;
use planemerge_core::{Frame, Pixel, FRAME_AREA, FRAME_SIDE, PIXEL_CEILING_BITS};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Bytes in one formatted frame
pub const FORMATTED_FRAME_BYTES: usize = FRAME_AREA * 2;

/// Writes 128×128 frames as little-endian `u16`, row-major, with no header
pub struct FormattedFrameWriter<W: Write> {
    output: W,
    frames_written: usize,
}

impl FormattedFrameWriter<BufWriter<File>> {
    /// Create (or truncate) a formatted frame file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file =
            File::create(path).map_err(|_| SourceError::Open(path.display().to_string()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> FormattedFrameWriter<W> {
    /// Write to an open stream
    pub fn new(output: W) -> Self {
        Self {
            output,
            frames_written: 0,
        }
    }

    /// Append one frame
    pub fn write_frame(&mut self, frame: &Frame) -> Result<(), SourceError> {
        let (height, width) = frame.dim();
        if (height, width) != (FRAME_SIDE, FRAME_SIDE) {
            return Err(ShapeError::FrameSize { height, width }.into());
        }
        let mut bytes = Vec::with_capacity(FORMATTED_FRAME_BYTES);
        for (index, &value) in frame.iter().enumerate() {
            let sample = u16::try_from(value).map_err(|_| ShapeError::PixelOutOfRange {
                index,
                value,
                bits: 16,
            })?;
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        self.output.write_all(&bytes)?;
        self.frames_written += 1;
        Ok(())
    }

    /// Number of frames written so far
    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    /// Flush and hand back the underlying stream
    pub fn finish(mut self) -> Result<W, SourceError> {
        self.output.flush()?;
        Ok(self.output)
    }
}

/// Reads frames written by [`FormattedFrameWriter`]
pub struct FormattedFrameReader<R: Read> {
    input: R,
    bits: f64,
    buffer: Vec<u8>,
    index: usize,
    exhausted: bool,
}

impl FormattedFrameReader<BufReader<File>> {
    /// Open a formatted frame file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|_| SourceError::Open(path.display().to_string()))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read> FormattedFrameReader<R> {
    /// Read from an open stream. Frames are assumed to span 10 bits.
    pub fn new(input: R) -> Self {
        Self {
            input,
            bits: PIXEL_CEILING_BITS,
            buffer: vec![0; FORMATTED_FRAME_BYTES],
            index: 0,
            exhausted: false,
        }
    }

    /// Declare the dynamic range of the stored frames
    pub fn bit_depth(mut self, bits: f64) -> Self {
        self.bits = bits;
        self
    }
}

impl<R: Read> Source for FormattedFrameReader<R> {
    fn next_frame(&mut self) -> Result<Option<SourceFrame>, SourceError> {
        if self.exhausted {
            return Ok(None);
        }
        let read = read_frame_bytes(&mut self.input, &mut self.buffer)?;
        if read < FORMATTED_FRAME_BYTES {
            self.exhausted = true;
            if read == 0 {
                return Ok(None);
            }
            return Err(ShapeError::ShortFrame {
                expected: FORMATTED_FRAME_BYTES,
                actual: read,
            }
            .into());
        }

        let samples: Vec<Pixel> = self
            .buffer
            .chunks_exact(2)
            .map(|c| Pixel::from(u16::from_le_bytes([c[0], c[1]])))
            .collect();
        let frame = Frame::from_shape_vec((FRAME_SIDE, FRAME_SIDE), samples)?;
        let index = self.index;
        self.index += 1;
        Ok(Some(SourceFrame {
            index,
            frame,
            bits: self.bits,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn write_then_read() {
        let frames: Vec<Frame> = (0..3)
            .map(|k| Frame::from_shape_fn((128, 128), |(i, j)| (i * 7 + j * 3 + k) as Pixel))
            .collect();
        let mut writer = FormattedFrameWriter::new(Vec::new());
        for frame in &frames {
            writer.write_frame(frame).unwrap();
        }
        assert_eq!(writer.frames_written(), 3);
        let bytes = writer.finish().unwrap();
        assert_eq!(bytes.len(), 3 * FORMATTED_FRAME_BYTES);
        // pixel (0, 1) of frame 0 = 3, little-endian
        assert_eq!(&bytes[2..4], &[3, 0]);

        let mut reader = FormattedFrameReader::new(Cursor::new(bytes)).bit_depth(9.5);
        for (k, frame) in frames.iter().enumerate() {
            let read = reader.next_frame().unwrap().unwrap();
            assert_eq!(read.index, k);
            assert_eq!(read.bits, 9.5);
            assert_eq!(&read.frame, frame);
        }
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn rejects_unrepresentable_frames() {
        let mut writer = FormattedFrameWriter::new(Vec::new());
        assert!(matches!(
            writer.write_frame(&Frame::zeros((64, 128))),
            Err(SourceError::Shape(ShapeError::FrameSize { .. }))
        ));
        let mut frame = Frame::zeros((128, 128));
        frame[[0, 2]] = 70_000;
        assert!(matches!(
            writer.write_frame(&frame),
            Err(SourceError::Shape(ShapeError::PixelOutOfRange {
                index: 2,
                value: 70_000,
                bits: 16
            }))
        ));
        assert_eq!(writer.frames_written(), 0);
    }

    #[test]
    fn trailing_partial_frame() {
        let mut bytes = vec![0; FORMATTED_FRAME_BYTES];
        bytes.extend_from_slice(&[1, 2, 3]);
        let mut reader = FormattedFrameReader::new(Cursor::new(bytes));
        assert!(reader.next_frame().unwrap().is_some());
        assert!(matches!(
            reader.next_frame(),
            Err(SourceError::Shape(ShapeError::ShortFrame { actual: 3, .. }))
        ));
        assert!(reader.next_frame().unwrap().is_none());
    }
}
