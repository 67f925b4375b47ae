extern crate planemerge_core;

use planemerge_core::bitstream_io::{BigEndian, BitReader, BitWriter};
use planemerge_core::codec::encoder::{encode, EncodedFrame, Encoder};
use planemerge_core::codec::header::HeaderSet;
use planemerge_core::codec::lane::{shuffle, unshuffle};
use planemerge_core::codec::merge::MergeNetwork;
use planemerge_core::codec::{CodecConfig, CodecError, ConfigError, ShapeError};
use planemerge_core::ndarray::Array2;
use planemerge_core::reduce::poisson_encode;
use planemerge_core::{Frame, Pixel, FRAME_SIDE};
use rand::prelude::StdRng;
use rand::{Rng, SeedableRng};
use std::error::Error;
use std::io::Cursor;

/// A detector-like frame: mostly dark, with a bright spot in the middle
fn get_spot_frame(seed: u64, side: usize, peak: u32) -> Array2<u32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let centre = side as f64 / 2.0;
    Array2::from_shape_fn((side, side), |(i, j)| {
        let r2 = (i as f64 - centre).powi(2) + (j as f64 - centre).powi(2);
        let mean = peak as f64 * (-r2 / (side as f64 * 4.0)).exp();
        (mean + rng.gen_range(0.0..2.0)) as u32
    })
}

/// The number of significant bit-planes of every lane, computed directly
fn direct_lane_lengths(frame: &Frame, config: &CodecConfig) -> Vec<u8> {
    let pixels: Vec<Pixel> = frame.iter().map(|&p| poisson_encode(p)).collect();
    pixels
        .chunks(config.lane_size)
        .map(|lane| {
            let max = lane.iter().copied().max().unwrap_or(0);
            (Pixel::BITS - max.leading_zeros()) as u8
        })
        .collect()
}

#[test]
fn test_encode_detector_frame() -> Result<(), Box<dyn Error>> {
    let config = CodecConfig {
        seed: Some(17),
        ..Default::default()
    };
    let encoder = Encoder::new(config.clone())?;

    // 14-bit pixels pooled 4×4 span 18 bits and are reduced to 10
    let raw = get_spot_frame(1, 512, 12_000);
    let frame = encoder.prepare_frame(raw.view(), 14.0, &mut config.frame_rng(0))?;
    assert_eq!(frame.dim(), (FRAME_SIDE, FRAME_SIDE));
    assert!(frame.iter().all(|&p| p <= 1023));

    let encoded = encoder.encode_frame(&frame)?;
    assert_eq!(
        encoded.headers().lane_lengths(),
        direct_lane_lengths(&frame, &config)
    );
    assert!(encoded.compression_ratio() > 1.0);

    let again = encoder.encode_raw(raw.view(), 14.0, &mut config.frame_rng(0))?;
    assert_eq!(again, encoded);
    Ok(())
}

#[test]
fn test_payload_holds_every_lane() -> Result<(), Box<dyn Error>> {
    // Without alignment the payload is a permutation of the lanes' significant planes
    let config = CodecConfig {
        max_blocks: 1 << 16,
        seed: Some(3),
        ..Default::default()
    };
    let encoder = Encoder::new(config.clone())?;
    let raw = get_spot_frame(2, 256, 600);
    let frame = encoder.prepare_frame(raw.view(), 10.0, &mut config.frame_rng(0))?;
    let encoded = encoder.encode_frame(&frame)?;

    let mut expected = Vec::new();
    for (row, length) in frame
        .rows()
        .into_iter()
        .zip(encoded.headers().lane_lengths())
    {
        let pixels: Vec<Pixel> = row.iter().map(|&p| poisson_encode(p)).collect();
        let block = shuffle(&pixels, config.bits_per_pixel);
        assert_eq!(unshuffle(&block), pixels);
        expected.extend_from_slice(&block.planes()[..length as usize]);
    }
    let mut actual = encoded.payload().planes().to_vec();
    expected.sort_unstable();
    actual.sort_unstable();
    assert_eq!(actual, expected);
    Ok(())
}

#[test]
fn test_concatenated_records() -> Result<(), Box<dyn Error>> {
    let config = CodecConfig {
        lane_size: 64,
        lane_count: 256,
        max_blocks: 32,
        seed: Some(8),
        ..Default::default()
    };
    let encoder = Encoder::new(config.clone())?;

    let mut stream = BitWriter::endian(Vec::new(), BigEndian);
    let mut frames = Vec::new();
    for idx in 0..5 {
        let raw = get_spot_frame(idx as u64, 128, 40 * (idx + 1));
        let mut rng = config.frame_rng(idx as usize);
        let encoded = encoder.encode_raw(raw.view(), 10.0, &mut rng)?;
        encoded.write(&mut stream)?;
        frames.push(encoded);
    }
    let bytes = stream.into_writer();
    assert_eq!(
        bytes.len(),
        frames.iter().map(EncodedFrame::record_bytes).sum::<usize>()
    );

    let mut reader = BitReader::endian(Cursor::new(bytes), BigEndian);
    for expected in &frames {
        let read = EncodedFrame::read(&mut reader, &config)?;
        assert_eq!(&read, expected);
    }
    Ok(())
}

#[test]
fn test_header_counts() {
    let network = MergeNetwork::new(7, 128, 1).unwrap();
    let mut rng = StdRng::seed_from_u64(4);
    for _ in 0..50 {
        let lengths: Vec<u8> = (0..128).map(|_| rng.gen_range(0..=7)).collect();
        let headers = HeaderSet::extract(&lengths);
        let threes = headers.headers_2bit().iter().filter(|&&c| c == 3).count();
        assert_eq!(threes, headers.headers_3bit().len());
        let total: usize = lengths.iter().map(|&l| l as usize).sum();
        assert!(network.merged_length(&lengths).unwrap() >= total);
    }
}

#[test]
fn test_all_zero_frame() -> Result<(), Box<dyn Error>> {
    let frame = Frame::zeros((FRAME_SIDE, FRAME_SIDE));
    for lane_size in [128, 64, 32, 16, 8, 4, 2, 1] {
        let config = CodecConfig {
            lane_size,
            lane_count: FRAME_SIDE * FRAME_SIDE / lane_size,
            max_blocks: 16,
            ..Default::default()
        };
        let (headers, payload) = encode(&frame, &config)?.into_parts();
        assert!(payload.is_empty());
        assert!(headers.headers_2bit().iter().all(|&c| c == 0));
        assert!(headers.headers_3bit().is_empty());
    }
    Ok(())
}

#[test]
fn test_error_taxonomy() {
    let config = CodecConfig {
        lane_count: 100,
        ..Default::default()
    };
    assert!(matches!(
        Encoder::new(config),
        Err(ConfigError::LaneCount(100))
    ));

    let encoder = Encoder::new(CodecConfig::default()).unwrap();
    let raw = Array2::<u16>::zeros((300, 300));
    let result = encoder.prepare_frame(raw.view(), 10.0, &mut StdRng::seed_from_u64(0));
    assert!(matches!(
        result,
        Err(CodecError::Shape(ShapeError::Side(300)))
    ));
}
