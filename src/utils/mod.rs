/// Batch encoding of frame sources, and the command line arguments of the programs
pub mod simulproc;

/// Log output for the command line programs
pub mod logging;
