//! Line source: produces the lines appended to the watched file.

pub mod file;

pub use file::*;
