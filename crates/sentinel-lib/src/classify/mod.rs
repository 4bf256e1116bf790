//! Log parsing and classification
//!
//! Raw lines are parsed into whatever structure they carry, then assigned a
//! severity, the names of the patterns they match, and metadata flags that
//! drive the advisory windows.

mod classifier;
mod parser;
pub mod patterns;

pub use classifier::{severity_from_level, LogClassifier};
pub use parser::parse_line;
