//! Cloudfetch CLI: fetch changed objects from a directory-backed store; use --dry-run to only list them.

use anyhow::Result;
use clap::Parser;
use cloudfetch::engine::arg_parser::Cli;
use cloudfetch::engine::handle_run;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
