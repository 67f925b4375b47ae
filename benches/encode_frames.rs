use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use planemerge::planemerge_core::codec::encoder::Encoder;
use planemerge::planemerge_core::codec::CodecConfig;
use planemerge::planemerge_core::{Frame, Pixel};
use planemerge::source::{Source, SourceError, SourceFrame};
use planemerge::utils::simulproc::BatchProcessor;
use rand::prelude::StdRng;
use rand::{Rng, SeedableRng};
use std::io::sink;

fn get_spot_frame(rng: &mut StdRng) -> Frame {
    Frame::from_shape_fn((128, 128), |(i, j)| {
        let d = (i as i64 - 64).pow(2) + (j as i64 - 64).pow(2);
        if d < 100 {
            rng.gen_range(200..1024) as Pixel
        } else {
            rng.gen_range(0..3) as Pixel
        }
    })
}

struct RepeatSource {
    frames: Vec<Frame>,
    index: usize,
}

impl Source for RepeatSource {
    fn next_frame(&mut self) -> Result<Option<SourceFrame>, SourceError> {
        let index = self.index;
        self.index += 1;
        Ok(self.frames.get(index).cloned().map(|frame| SourceFrame {
            index,
            frame,
            bits: 10.0,
        }))
    }
}

fn bench(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0);
    let frames: Vec<Frame> = (0..64).map(|_| get_spot_frame(&mut rng)).collect();
    let config = CodecConfig {
        seed: Some(0),
        ..Default::default()
    };

    let mut group = c.benchmark_group("encode");
    let encoder = Encoder::new(config.clone()).unwrap();
    group.bench_function(BenchmarkId::new("encode_frame", "spot"), |b| {
        b.iter(|| encoder.encode_frame(black_box(&frames[0])).unwrap())
    });

    for threads in [1, 4] {
        group.bench_function(BenchmarkId::new("batch_64", threads), |b| {
            b.iter(|| {
                let source = RepeatSource {
                    frames: frames.clone(),
                    index: 0,
                };
                let encoder = Encoder::new(config.clone()).unwrap();
                BatchProcessor::new(source, encoder, sink(), threads)
                    .unwrap()
                    .run()
                    .unwrap()
            })
        });
    }
    group.finish()
}

criterion_group!(
    name = encode_frames;
    config = Criterion::default().sample_size(10);
    targets = bench
);
criterion_main!(encode_frames);
