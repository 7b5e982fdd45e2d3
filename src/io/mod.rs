//! File I/O for panel runs.
//!
//! Configurations and results are stored as JSON.

pub mod config;

pub use config::{read_batch, read_config, read_result, write_config, write_result};
