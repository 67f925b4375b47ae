#![warn(missing_docs)]

//! # planemerge
//!
//! Drives [`planemerge_core`] over real detector data: detector profiles, readers for raw
//! detector dumps and for formatted 128×128 frame files, and a batch processor that encodes
//! frames in parallel and writes their records in input order.

/// Frame sources: detector profiles and raw/formatted file readers
pub mod source;

/// A module for utilities which may be common between programs
pub mod utils;

pub extern crate planemerge_core;
