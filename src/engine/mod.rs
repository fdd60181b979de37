//! Engine module: CLI plumbing and helpers around the pipeline

pub mod arg_parser;
pub mod handlers;
pub mod hashing;
pub mod progress;
pub mod tools;

// Re-export commonly used functions
pub use arg_parser::Cli;
pub use handlers::{ManifestRecord, handle_run, store_or_skip, store_task};
pub use hashing::{HashingWriter, hash_bytes};
pub use tools::{bucket_selected, changed_since, glob_match, local_path_for_key, path_relative_to};
