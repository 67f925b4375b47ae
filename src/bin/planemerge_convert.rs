use clap::Parser;
use planemerge::source::formatted::FormattedFrameWriter;
use planemerge::source::raw::RawFrameReaderBuilder;
use planemerge::source::SourceError;
use planemerge::utils::logging::init_tracing;
use planemerge::utils::simulproc::{convert_frames, resolve_profile, resolve_reduction, ConvertArgs};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    let mut args: ConvertArgs = ConvertArgs::parse();
    if !args.args_filename.is_empty() {
        let content = std::fs::read_to_string(args.args_filename)?;
        args = toml::from_str(&content)?;
    }
    init_tracing(args.verbose, args.debug);

    let profile = resolve_profile(&args.profile, &args.profile_filename)?.ok_or_else(|| {
        SourceError::BadParams("a detector profile is required for conversion".to_string())
    })?;
    let reduction = resolve_reduction(&args.reduction, &args.input_filename, &profile)?;
    let mut source = RawFrameReaderBuilder::new(profile)
        .reduction(reduction)
        .target_bits(args.target_bits)
        .seed(args.seed)
        .open(&args.input_filename)?;
    let mut writer = FormattedFrameWriter::create(&args.output_filename)?;

    let summary = convert_frames(&mut source, &mut writer, args.frame_count_max)?;
    writer.finish()?;

    println!("{summary}");
    Ok(())
}
