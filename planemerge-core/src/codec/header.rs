use crate::LaneLength;
use bitstream_io::{BitRead, BitWrite};
use std::cmp::max;
use std::io;

/// Lane lengths at or above this value are carried by a 3-bit header
pub const LONG_LANE: LaneLength = 3;

/// Width of a 2-bit header entry
pub const SHORT_FIELD_BITS: u32 = 2;

/// Width of one `headers_3bit` entry for lanes of `bits_per_pixel` planes.
///
/// Three bits cover every length up to B = 7. Wider lanes need `bits(B)` bits.
#[inline]
pub fn length_field_bits(bits_per_pixel: u8) -> u32 {
    max(3, u8::BITS - bits_per_pixel.leading_zeros())
}

/// Classification headers for one frame.
///
/// `headers_2bit` holds `min(L, 3)` for every lane. `headers_3bit` holds `L` itself for every
/// lane with `L ≥ 3`, in lane order, so it has exactly one entry per 2-bit header equal to 3.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderSet {
    headers_2bit: Vec<u8>,
    headers_3bit: Vec<LaneLength>,
}

impl HeaderSet {
    /// Derive both header streams from the lane lengths, before any merging.
    pub fn extract(lengths: &[LaneLength]) -> Self {
        let headers_2bit = lengths.iter().map(|&l| l.min(LONG_LANE)).collect();
        let headers_3bit = lengths.iter().copied().filter(|&l| l >= LONG_LANE).collect();
        Self {
            headers_2bit,
            headers_3bit,
        }
    }

    /// One `min(L, 3)` code per lane
    pub fn headers_2bit(&self) -> &[u8] {
        &self.headers_2bit
    }

    /// Full lengths of the lanes with `L ≥ 3`
    pub fn headers_3bit(&self) -> &[LaneLength] {
        &self.headers_3bit
    }

    /// Number of lanes described
    pub fn lane_count(&self) -> usize {
        self.headers_2bit.len()
    }

    /// Rebuild the per-lane lengths the headers were extracted from
    pub fn lane_lengths(&self) -> Vec<LaneLength> {
        let mut long = self.headers_3bit.iter();
        self.headers_2bit
            .iter()
            .map(|&code| match code {
                LONG_LANE => long.next().copied().unwrap_or(LONG_LANE),
                short => short,
            })
            .collect()
    }

    /// Size of both header streams on the wire
    pub fn bit_len(&self, bits_per_pixel: u8) -> usize {
        self.headers_2bit.len() * SHORT_FIELD_BITS as usize
            + self.headers_3bit.len() * length_field_bits(bits_per_pixel) as usize
    }

    /// Write the 2-bit headers, then the 3-bit headers
    pub fn write<W: BitWrite>(&self, stream: &mut W, bits_per_pixel: u8) -> io::Result<()> {
        for &code in &self.headers_2bit {
            stream.write(SHORT_FIELD_BITS, code)?;
        }
        let field_bits = length_field_bits(bits_per_pixel);
        for &length in &self.headers_3bit {
            stream.write(field_bits, length)?;
        }
        Ok(())
    }

    /// Read the headers of a record with `lane_count` lanes
    pub fn read<R: BitRead>(
        stream: &mut R,
        lane_count: usize,
        bits_per_pixel: u8,
    ) -> io::Result<Self> {
        let headers_2bit = (0..lane_count)
            .map(|_| stream.read::<u8>(SHORT_FIELD_BITS))
            .collect::<io::Result<Vec<_>>>()?;
        let long_lanes = headers_2bit.iter().filter(|&&code| code == LONG_LANE).count();

        let field_bits = length_field_bits(bits_per_pixel);
        let mut headers_3bit = Vec::with_capacity(long_lanes);
        for _ in 0..long_lanes {
            let length: LaneLength = stream.read(field_bits)?;
            if length < LONG_LANE || length > bits_per_pixel {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid lane length header {length}"),
                ));
            }
            headers_3bit.push(length);
        }
        Ok(Self {
            headers_2bit,
            headers_3bit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitstream_io::{BigEndian, BitReader, BitWriter};
    use rand::prelude::StdRng;
    use rand::{Rng, SeedableRng};
    use std::io::Cursor;

    #[test]
    fn extract_small_example() {
        let headers = HeaderSet::extract(&[0, 1, 2, 3, 7, 5, 0]);
        assert_eq!(headers.headers_2bit(), &[0, 1, 2, 3, 3, 3, 0]);
        assert_eq!(headers.headers_3bit(), &[3, 7, 5]);
        assert_eq!(headers.lane_count(), 7);
    }

    #[test]
    fn long_header_count_matches_codes() {
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..100 {
            let lengths: Vec<LaneLength> = (0..128).map(|_| rng.gen_range(0..=7)).collect();
            let headers = HeaderSet::extract(&lengths);
            let threes = headers.headers_2bit().iter().filter(|&&c| c == 3).count();
            assert_eq!(threes, headers.headers_3bit().len());
            assert_eq!(headers.lane_lengths(), lengths);
        }
    }

    #[test]
    fn field_width() {
        assert_eq!(length_field_bits(1), 3);
        assert_eq!(length_field_bits(7), 3);
        assert_eq!(length_field_bits(8), 4);
        assert_eq!(length_field_bits(10), 4);
        assert_eq!(length_field_bits(16), 5);
    }

    #[test]
    fn wire_layout() {
        let headers = HeaderSet::extract(&[2, 5, 0, 3]);
        assert_eq!(headers.bit_len(7), 4 * 2 + 2 * 3);

        let mut stream = BitWriter::endian(Vec::new(), BigEndian);
        headers.write(&mut stream, 7).unwrap();
        stream.byte_align().unwrap();
        let bytes = stream.into_writer();
        // 10 11 00 11 | 101 011 00
        assert_eq!(bytes, vec![0b1011_0011, 0b1010_1100]);

        let mut reader = BitReader::endian(Cursor::new(bytes), BigEndian);
        let read = HeaderSet::read(&mut reader, 4, 7).unwrap();
        assert_eq!(read, headers);
    }

    #[test]
    fn rejects_corrupt_long_header() {
        // one long lane whose 3-bit header claims length 1
        let bytes = vec![0b1100_1000];
        let mut reader = BitReader::endian(Cursor::new(bytes), BigEndian);
        let err = HeaderSet::read(&mut reader, 1, 7).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
