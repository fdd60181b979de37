use colored::Colorize;
use env_logger::Builder;
use log::{Level, LevelFilter};
use std::io::Write;

use crate::utils::config::PackagePaths;

/// Install the colored logger. Relayed pipeline messages (job log target) get a `job` tag.
/// Safe to call more than once; later calls are ignored.
pub fn setup_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let _ = Builder::from_default_env()
        .filter_level(LevelFilter::Warn) // Default: only warnings from dependencies
        .filter_module(env!("CARGO_PKG_NAME"), level) // Our crate (and job log): requested level
        .format(|buf, record| {
            let paths = PackagePaths::get();
            let name = paths.pkg_name();
            let tag = if record.target() == paths.job_log_target() {
                format!("{} {}", name.cyan(), "job".blue())
            } else {
                name.cyan().to_string()
            };
            let line = match record.level() {
                Level::Error | Level::Warn => {
                    let level_str = match record.level() {
                        Level::Warn => "WARN".yellow(),
                        _ => "ERROR".red(),
                    };
                    let path = record.target().to_string().white();
                    format!("[{} {} {}] {}", tag, level_str, path, record.args())
                }
                _ => format!("[{}] {}", tag, record.args()),
            };
            writeln!(buf, "{}", line)
        })
        .try_init();
}
