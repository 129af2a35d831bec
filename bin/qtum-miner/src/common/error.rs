use std::path::PathBuf;

use qtum_consensus::{assembler::AssemblerError, difficulty::DifficultyError};

/// Error types of the qtum-miner subcommands
#[derive(Debug, thiserror::Error)]
pub enum MinerError {
    /// Failed to read or write a file
    #[error("Failed to access {path}: {source}")]
    Io {
        /// File accessed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Failed to write to stdout
    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),

    /// Malformed JSON input
    #[error("Invalid JSON in {path}: {source}")]
    Json {
        /// File parsed.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// Failed to encode the output
    #[error("Failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),

    /// The chain has no block to build on
    #[error("The header chain is empty")]
    EmptyChain,

    /// Block assembly failed
    #[error("Block assembly failed: {0}")]
    Assembler(#[from] AssemblerError),

    /// Target computation failed
    #[error("Target computation failed: {0}")]
    Difficulty(#[from] DifficultyError),

    /// Failed to set up logging
    #[error("Failed to set up logging: {0}")]
    Logging(String),
}

/// Result type for the qtum-miner subcommands
pub type Result<T> = std::result::Result<T, MinerError>;
