//! WARCex CLI: extract structured records from WACZ and WARC web archives.

pub mod commands;
pub mod config;

pub use commands::{ExitStatus, ExtractOptions};
pub use config::{resolve_extractor_dir, resolve_output_root};
