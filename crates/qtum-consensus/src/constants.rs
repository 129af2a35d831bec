//! Constants of the consensus core.
//!
//! It groups the constants by the subsystem that owns them.

/// Monetary units.
pub mod money {
    /// Amount in the smallest unit.
    pub type Amount = i64;

    /// Number of smallest units in one coin.
    pub const COIN: Amount = 100_000_000;
    /// Largest amount that can ever exist.
    pub const MAX_MONEY: Amount = 107_822_406 * COIN + 25_000_000;

    /// Returns whether `value` is a valid amount.
    pub const fn money_range(value: Amount) -> bool {
        value >= 0 && value <= MAX_MONEY
    }
}

/// Block budget constants.
pub mod block {
    /// Scale factor between non-witness bytes and weight units.
    pub const WITNESS_SCALE_FACTOR: u64 = 4;
    /// Default block size governed by the block size contract.
    pub const DEFAULT_BLOCK_SIZE: u32 = 2_000_000;
    /// Ratio between the block weight budget and the signature operation budget.
    pub const SIGOPS_PER_WEIGHT_DIVISOR: u64 = 100;
    /// Weight reserved for the coinbase transaction.
    pub const COINBASE_RESERVED_WEIGHT: u64 = 4_000;
    /// Signature operation cost reserved for the coinbase transaction.
    pub const COINBASE_RESERVED_SIGOPS: u64 = 400;
    /// Number of consecutive failed package attempts tolerated once the block is near full.
    pub const MAX_CONSECUTIVE_FAILURES: u32 = 1000;
    /// Free weight below which the block counts as near full.
    pub const NEAR_FULL_WEIGHT_MARGIN: u64 = 4_000;
    /// Lock time values below this are block heights, at or above are timestamps.
    pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;
}

/// Bounds of the governed parameters.
pub mod dgp {
    /// Smallest block size a governance contract may set.
    pub const MIN_BLOCK_SIZE_DGP: u64 = 500_000;
    /// Largest block size a governance contract may set.
    pub const MAX_BLOCK_SIZE_DGP: u64 = 32_000_000;
    /// Block size used when no governance value applies.
    pub const DEFAULT_BLOCK_SIZE_DGP: u64 = 2_000_000;

    /// Smallest minimum gas price a governance contract may set.
    pub const MIN_MIN_GAS_PRICE_DGP: u64 = 1;
    /// Largest minimum gas price a governance contract may set.
    pub const MAX_MIN_GAS_PRICE_DGP: u64 = 10_000;
    /// Minimum gas price used when no governance value applies.
    pub const DEFAULT_MIN_GAS_PRICE_DGP: u64 = 40;

    /// Smallest block gas limit a governance contract may set.
    pub const MIN_BLOCK_GAS_LIMIT_DGP: u64 = 1_000_000;
    /// Largest block gas limit a governance contract may set.
    pub const MAX_BLOCK_GAS_LIMIT_DGP: u64 = 1_000_000_000;
    /// Block gas limit used when no governance value applies.
    pub const DEFAULT_BLOCK_GAS_LIMIT_DGP: u64 = 40_000_000;

    /// Gas supplied to every governance read.
    pub const DGP_READ_GAS: u64 = 30_000_000;

    /// Smallest gas limit a contract output may declare.
    pub const STANDARD_MINIMUM_GAS_LIMIT: u64 = 10_000;
    /// Smallest gas price a contract output may declare.
    pub const STANDARD_MINIMUM_GAS_PRICE: u64 = 1;
}

/// Miner and staker timing, in seconds unless stated otherwise.
///
/// Each value is divided by the timestamp downscale factor of the height being mined.
pub mod miner {
    /// Time before the deadline at which no new contract transaction is admitted.
    pub const BYTECODE_TIME_BUFFER: i64 = 6;
    /// Time reserved at the end of a staking slot for signing.
    pub const STAKE_TIME_BUFFER: i64 = 2;
    /// Staker polling period in milliseconds.
    pub const STAKER_POLLING_PERIOD: u64 = 5000;
    /// Staker polling period in milliseconds on chains with minimum difficulty blocks.
    pub const STAKER_POLLING_PERIOD_MIN_DIFFICULTY: u64 = 20_000;
    /// Number of future stake timestamps tried per attempt.
    pub const MAX_STAKE_LOOKAHEAD: i64 = 48;
    /// Default soft block gas limit of the staker.
    pub const DEFAULT_STAKER_SOFT_BLOCK_GAS_LIMIT: u64 = super::dgp::DEFAULT_BLOCK_GAS_LIMIT_DGP;
    /// Default minimum block fee rate per kilo-weight.
    pub const DEFAULT_BLOCK_MIN_TX_FEE: i64 = 1000;
}

/// EVM constants not governed by the gas schedule.
pub mod evm {
    /// Constants inherited from `revm`.
    pub use revm::interpreter::gas::{
        COLD_ACCOUNT_ACCESS_COST, COLD_SLOAD_COST, WARM_STORAGE_READ_COST,
    };

    /// Refund quotient before London.
    pub const MAX_REFUND_QUOTIENT: u64 = 2;
    /// Refund quotient from London on.
    pub const MAX_REFUND_QUOTIENT_LONDON: u64 = 5;
    /// Storage refund for clearing a slot from London on.
    pub const SSTORE_CLEARS_SCHEDULE_LONDON: u64 = 4800;
    /// Gas charged for an unchanged slot under net metering from Istanbul on.
    pub const SSTORE_UNCHANGED_GAS_ISTANBUL: u64 = 800;
    /// Maximum init code size from Shanghai on.
    pub const MAX_INITCODE_SIZE: u64 = 2 * 0x6000;
    /// Gas per 32-byte word of init code from Shanghai on.
    pub const INITCODE_WORD_COST: u64 = 2;
    /// Version byte of the EVM contract output format.
    pub const VM_VERSION_EVM: u8 = 4;
    /// Version byte of a contract output that carries no execution.
    pub const VM_VERSION_NO_EXEC: u8 = 0;
    /// Most outputs a condensing transaction may have.
    pub const MAX_CONTRACT_VOUTS: usize = 1000;
}
