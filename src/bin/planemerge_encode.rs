use clap::Parser;
use planemerge::planemerge_core::codec::encoder::Encoder;
use planemerge::source::formatted::FormattedFrameReader;
use planemerge::source::raw::RawFrameReaderBuilder;
use planemerge::source::Source;
use planemerge::utils::logging::init_tracing;
use planemerge::utils::simulproc::{
    resolve_profile, resolve_reduction, BatchProcessor, EncodeArgs, RunSummary,
};
use rayon::current_num_threads;
use std::error::Error;
use std::fs::File;
use std::io::BufWriter;

fn main() -> Result<(), Box<dyn Error>> {
    let mut args: EncodeArgs = EncodeArgs::parse();
    if !args.args_filename.is_empty() {
        let content = std::fs::read_to_string(args.args_filename)?;
        args = toml::from_str(&content)?;
    }
    init_tracing(args.verbose, args.debug);

    let encoder = Encoder::new(args.codec_config())?;
    let output = BufWriter::new(File::create(&args.output_filename)?);
    let num_threads = match args.thread_count {
        0 => current_num_threads(),
        num => num as usize,
    };

    let summary = match resolve_profile(&args.profile, &args.profile_filename)? {
        Some(profile) => {
            let reduction = resolve_reduction(&args.reduction, &args.input_filename, &profile)?;
            let source = RawFrameReaderBuilder::new(profile)
                .reduction(reduction)
                .target_bits(args.target_bits)
                .seed(args.seed)
                .open(&args.input_filename)?;
            run(source, encoder, output, num_threads, &args)?
        }
        None => {
            let source =
                FormattedFrameReader::open(&args.input_filename)?.bit_depth(args.input_bits);
            run(source, encoder, output, num_threads, &args)?
        }
    };

    println!("{summary}");
    Ok(())
}

fn run<S: Source>(
    source: S,
    encoder: Encoder,
    output: BufWriter<File>,
    num_threads: usize,
    args: &EncodeArgs,
) -> Result<RunSummary, Box<dyn Error>> {
    let mut processor = BatchProcessor::new(source, encoder, output, num_threads)?
        .batch_size(args.batch_size)
        .frame_count_max(args.frame_count_max)
        .progress(args.progress);
    Ok(processor.run()?)
}
