use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use clap::Parser;
use serde::{de::DeserializeOwned, Serialize};

use super::{MinerError, Result};

/// Reads and parses the JSON file at `path`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        fs::read_to_string(path).map_err(|source| MinerError::Io { path: path.into(), source })?;
    serde_json::from_str(&content).map_err(|source| MinerError::Json { path: path.into(), source })
}

/// Where a command writes its JSON result.
#[derive(Parser, Debug, Clone, Default)]
pub struct OutputArgs {
    /// Write the result to this file instead of stdout
    #[arg(long = "output", short = 'o')]
    pub output: Option<PathBuf>,
}

impl OutputArgs {
    /// Writes `value` as pretty JSON.
    pub fn write<T: Serialize>(&self, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        match &self.output {
            Some(path) => fs::write(path, json + "\n")
                .map_err(|source| MinerError::Io { path: path.clone(), source }),
            None => {
                let mut stdout = std::io::stdout().lock();
                writeln!(stdout, "{json}")?;
                Ok(())
            }
        }
    }
}
