use tracing_subscriber::EnvFilter;

/// Install a `tracing` subscriber that writes to stderr.
///
/// `debug` logs every frame and `verbose` logs run information. With neither, the level comes
/// from `RUST_LOG`, falling back to warnings only. Installing twice is a no-op.
pub fn init_tracing(verbose: bool, debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
