//! # Sluice CLI Library
//!
//! Command-line front end for consume runs: replay files or Kafka topics
//! through registered apply functions.

pub mod commands;
pub mod functions;

pub use commands::*;
pub use functions::*;
