pub mod args;
#[macro_use]
pub mod log;
pub mod paths;
