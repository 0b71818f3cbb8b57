#[macro_use]
extern crate log;

use std::time::SystemTime;

use clap::Parser;
use log::LevelFilter;

use crate::result::Result;

mod cli;
mod config;
mod error;
mod negotiation;
mod result;
mod rtc;
mod session;
mod signaller;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    let path = args.config.clone().unwrap_or_else(config::default_path);
    let config = config::load(&path)?;

    let level = match args.verbose {
        0 => config.log_level.parse().unwrap_or(LevelFilter::Info),
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    setup_logger(level)?;
    debug!("loaded config from {}", path.display());

    cli::run(args, config).await
}

fn setup_logger(level: LevelFilter) -> Result<()> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339_seconds(SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        // webrtc is chatty below warn
        .level(LevelFilter::Warn)
        .level_for("mira_p2p", level)
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}
