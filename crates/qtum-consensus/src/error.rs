use crate::{
    assembler::AssemblerError, delegation::DelegationError, dgp::DgpError,
    difficulty::DifficultyError, evm::EvmError, script::ScriptError,
};

/// Result type of the consensus core.
pub type Result<T, E = ConsensusError> = core::result::Result<T, E>;

/// Any error surfaced by the consensus core.
///
/// Consensus-fatal conditions reach callers through this type. Transaction-level failures
/// inside block assembly and governance fallbacks are handled where they occur and never
/// show up here.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    /// Difficulty computation or validation failed.
    #[error(transparent)]
    Difficulty(#[from] DifficultyError),
    /// A script could not be parsed.
    #[error(transparent)]
    Script(#[from] ScriptError),
    /// A governance read failed hard.
    #[error(transparent)]
    Dgp(#[from] DgpError),
    /// A delegation lookup or proof failed.
    #[error(transparent)]
    Delegation(#[from] DelegationError),
    /// Block assembly was aborted.
    #[error(transparent)]
    Assembler(#[from] AssemblerError),
    /// The EVM bridge was misused.
    #[error(transparent)]
    Evm(#[from] EvmError),
}
