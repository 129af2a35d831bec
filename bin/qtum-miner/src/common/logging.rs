//! Logging configuration for the qtum-miner tool.
//!
//! Verbosity comes from `-v` flags unless `RUST_LOG` is set. Logs go to stderr, or to the
//! file named by `--log.file`.

use std::path::PathBuf;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use super::{MinerError, Result};

/// Logging configuration arguments.
#[derive(Debug, Clone, Default, Parser)]
pub struct LogArgs {
    /// Increase logging verbosity (-v = error, -vv = warn, -vvv = info, -vvvv = debug, -vvvvv =
    /// trace)
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log file path. If specified, logs are written to this file instead of stderr.
    #[arg(long = "log.file", visible_aliases = ["log-file"], global = true)]
    pub log_file: Option<PathBuf>,

    /// Disable colorful console logging. Only applies when logging to stderr (no --log.file).
    #[arg(long = "log.no-color", visible_aliases = ["log-no-color"], global = true)]
    pub log_no_color: bool,
}

impl LogArgs {
    /// The filter selected by `RUST_LOG` or the verbosity flags. Logging is off by default.
    pub fn filter(&self) -> EnvFilter {
        if std::env::var("RUST_LOG").is_ok() {
            return EnvFilter::from_default_env();
        }
        let level = match self.verbose {
            0 => return EnvFilter::new("off"),
            1 => Level::ERROR,
            2 => Level::WARN,
            3 => Level::INFO,
            4 => Level::DEBUG,
            _ => Level::TRACE,
        };
        // consensus events log under `qtum::<component>` targets
        EnvFilter::new(format!("qtum_miner={level},qtum={level}"))
    }

    /// Installs the global tracing subscriber.
    ///
    /// Targets are shown from the debug level on.
    pub fn init(&self) -> Result<()> {
        let filter = self.filter();
        let show_target = self.verbose >= 4;

        let installed = if let Some(ref log_file) = self.log_file {
            let file = std::fs::File::create(log_file)
                .map_err(|source| MinerError::Io { path: log_file.clone(), source })?;
            fmt()
                .with_env_filter(filter)
                .with_target(show_target)
                .with_writer(file)
                .with_ansi(false)
                .try_init()
        } else {
            fmt()
                .with_env_filter(filter)
                .with_target(show_target)
                .with_writer(std::io::stderr)
                .with_ansi(!self.log_no_color)
                .try_init()
        };
        installed.map_err(|e| MinerError::Logging(e.to_string()))
    }
}
