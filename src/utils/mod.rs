pub mod config;
pub mod fd_limit;
pub mod logger;
pub mod options_toml;
pub mod tempfiles;

pub use config::*;
pub use fd_limit::{FDS_PER_WORKER, cap_workers, max_open_fds, max_workers_by_fd_limit};
pub use logger::setup_logging;
pub use tempfiles::{prepare_work_dir, remove_work_dir, unique_temp_path};
