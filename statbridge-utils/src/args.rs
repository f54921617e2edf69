//!
//! Argument groups shared by statbridge binaries, flattened into each binary's `clap` parser
//!
pub mod log;
pub mod metrics;
pub mod source;
