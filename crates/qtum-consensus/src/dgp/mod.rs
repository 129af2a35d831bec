//! The gas governor.
//!
//! Gas economics are tuned on chain through the decentralized governance protocol (DGP). For
//! each governed parameter a governance contract at a fixed address keeps an ordered list of
//! `(activation height, template address)` pairs; the template active at a height publishes the
//! value in force. Every read falls back to the compiled default of its parameter, on its own,
//! whenever no template applies, the template misbehaves or the published value is out of
//! bounds.
//!
//! Reads run against the caller's [`ContractState`] and never leave a trace in it: the state is
//! checkpointed before each template call and restored right after.

mod decode;
pub use decode::*;

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::SolCall;
use revm::primitives::HashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    constants::dgp::*,
    evm::{
        BlockEnv, CallParams, ContractState, ExecutionStatus, Executor, GasSchedule,
        GOVERNED_SCHEDULE_LEN,
    },
    params::ConsensusParams,
    system_contracts::dgp::{
        IBlockGasLimit, IBlockSize, IGasSchedule, IMinGasPrice, BLOCK_GAS_LIMIT_DGP,
        BLOCK_SIZE_DGP, GAS_PRICE_DGP, GAS_SCHEDULE_DGP,
    },
};

/// Number of template storage slots holding a schedule in storage mode.
const STORAGE_SCHEDULE_SLOTS: u8 = 5;

/// Error of a governance read. Never escapes the governor's getters, which fall back to the
/// compiled defaults instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DgpError {
    /// The length of the governance contract's template list is not a valid length.
    #[error("governance contract {dgp} declares {length} templates")]
    MalformedParamsInstance {
        /// Governance contract.
        dgp: Address,
        /// Declared length.
        length: U256,
    },
    /// The template call did not succeed.
    #[error("template {template} call failed with {status:?}")]
    CallFailed {
        /// Template contract.
        template: Address,
        /// Outcome of the call.
        status: ExecutionStatus,
    },
    /// The template returned something other than one word.
    #[error("template {template} returned {len} bytes")]
    MalformedOutput {
        /// Template contract.
        template: Address,
        /// Length of the output.
        len: usize,
    },
    /// The published schedule has the wrong number of entries.
    #[error("schedule has {0} entries")]
    ScheduleLength(usize),
    /// A schedule entry is out of bounds.
    #[error("schedule entry {index} is out of bounds: {value}")]
    ScheduleOutOfBounds {
        /// Position of the entry.
        index: usize,
        /// Published value.
        value: u32,
    },
    /// A single parameter is out of bounds.
    #[error("{parameter:?} is out of bounds: {value}")]
    ValueOutOfBounds {
        /// The parameter.
        parameter: ScalarParameter,
        /// Published value.
        value: u64,
    },
}

/// A template entry of a governance contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceContractRef {
    /// First height the template applies to.
    pub activation_height: u64,
    /// Template contract.
    pub address: Address,
}

/// Governed parameters holding a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarParameter {
    /// Maximum serialized block size.
    BlockSize,
    /// Minimum gas price of contract outputs.
    MinGasPrice,
    /// Gas available to the contract outputs of a block.
    BlockGasLimit,
}

impl ScalarParameter {
    /// The governance contract of the parameter.
    pub const fn governance_address(self) -> Address {
        match self {
            Self::BlockSize => BLOCK_SIZE_DGP,
            Self::MinGasPrice => GAS_PRICE_DGP,
            Self::BlockGasLimit => BLOCK_GAS_LIMIT_DGP,
        }
    }

    /// Selector of the template getter.
    pub const fn selector(self) -> [u8; 4] {
        match self {
            Self::BlockSize => IBlockSize::getBlockSizeCall::SELECTOR,
            Self::MinGasPrice => IMinGasPrice::getMinGasPriceCall::SELECTOR,
            Self::BlockGasLimit => IBlockGasLimit::getBlockGasLimitCall::SELECTOR,
        }
    }

    /// Inclusive bounds of a published value.
    pub const fn bounds(self) -> (u64, u64) {
        match self {
            Self::BlockSize => (MIN_BLOCK_SIZE_DGP, MAX_BLOCK_SIZE_DGP),
            Self::MinGasPrice => (MIN_MIN_GAS_PRICE_DGP, MAX_MIN_GAS_PRICE_DGP),
            Self::BlockGasLimit => (MIN_BLOCK_GAS_LIMIT_DGP, MAX_BLOCK_GAS_LIMIT_DGP),
        }
    }

    /// The value in force when no template applies.
    pub const fn default_value(self) -> u64 {
        match self {
            Self::BlockSize => DEFAULT_BLOCK_SIZE_DGP,
            Self::MinGasPrice => DEFAULT_MIN_GAS_PRICE_DGP,
            Self::BlockGasLimit => DEFAULT_BLOCK_GAS_LIMIT_DGP,
        }
    }
}

/// How templates are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ReadMode {
    /// Read-only call of the template getter.
    #[default]
    Call,
    /// Direct read of template storage.
    Storage,
}

/// Returns the template of the governance contract `dgp` active at `height`.
///
/// The governance contract keeps its templates in a dynamic array at slot 0: the length at
/// slot 0, entry `i` at `keccak(0) + 2i` (activation height) and `keccak(0) + 2i + 1`
/// (address). Entries are ordered by activation height; the last one activated at or before
/// `height` wins. A zero template address means no template.
pub fn governance_contract(
    state: &ContractState,
    dgp: Address,
    height: u32,
) -> Result<Option<GovernanceContractRef>, DgpError> {
    let length = state.storage(&dgp, &U256::ZERO);
    let count = u64::try_from(length).map_err(|_| DgpError::MalformedParamsInstance { dgp, length })?;
    let base = U256::from_be_bytes(keccak256(B256::ZERO).0);
    for index in (0..count).rev() {
        let slot = base.wrapping_add(U256::from(index) << 1);
        let activation = state.storage(&dgp, &slot);
        if activation > U256::from(height) {
            continue;
        }
        let word = state.storage(&dgp, &slot.wrapping_add(U256::from(1)));
        let address = Address::from_word(B256::from(word));
        if address.is_zero() {
            return Ok(None);
        }
        return Ok(Some(GovernanceContractRef { activation_height: activation.to(), address }));
    }
    Ok(None)
}

/// Reads the governed parameters in force at a height.
///
/// Results are cached per height for the chain tip last passed to [`GasGovernor::at_tip`]. A
/// new tip drops every cached value, so that a reorganization never serves values read from
/// the state of another branch.
#[derive(Debug, Clone)]
pub struct GasGovernor {
    params: ConsensusParams,
    mode: ReadMode,
    tip: Option<B256>,
    schedules: HashMap<u32, GasSchedule>,
    scalars: HashMap<(ScalarParameter, u32), u64>,
}

impl GasGovernor {
    /// Creates a governor reading templates through calls.
    pub fn new(params: ConsensusParams) -> Self {
        Self {
            params,
            mode: ReadMode::Call,
            tip: None,
            schedules: HashMap::default(),
            scalars: HashMap::default(),
        }
    }

    /// Reads templates straight from their storage instead of calling them.
    pub fn with_storage_mode(mut self) -> Self {
        self.mode = ReadMode::Storage;
        self.clear_cache();
        self
    }

    /// The consensus parameters.
    pub const fn params(&self) -> &ConsensusParams {
        &self.params
    }

    /// Reads from now on run against the state at `tip`. Cached values are dropped when the
    /// tip changes.
    pub fn at_tip(&mut self, tip: B256) {
        if self.tip != Some(tip) {
            trace!(target: "qtum::dgp", %tip, "new chain tip, dropping cached values");
            self.tip = Some(tip);
            self.clear_cache();
        }
    }

    /// Forgets every cached value.
    pub fn clear_cache(&mut self) {
        self.schedules.clear();
        self.scalars.clear();
    }

    /// The gas schedule in force at `height`.
    ///
    /// An accepted override replaces the governed entries of the height's default schedule and
    /// keeps its upgrade flags.
    pub fn schedule_for(&mut self, state: &mut ContractState, height: u32) -> GasSchedule {
        if let Some(schedule) = self.schedules.get(&height) {
            return schedule.clone();
        }
        let default = GasSchedule::for_height(&self.params, height);
        let schedule = match self.read_schedule(state, height, default.upgrades.shanghai) {
            Ok(Some(values)) => default.clone().with_governed_values(&values).unwrap_or(default),
            Ok(None) => default,
            Err(err) => {
                debug!(target: "qtum::dgp", %err, height, "using the default gas schedule");
                default
            }
        };
        self.schedules.insert(height, schedule.clone());
        schedule
    }

    /// The maximum serialized block size at `height`.
    pub fn block_size_for(&mut self, state: &mut ContractState, height: u32) -> u32 {
        self.scalar_for(state, height, ScalarParameter::BlockSize) as u32
    }

    /// The minimum gas price of contract outputs at `height`.
    pub fn min_gas_price_for(&mut self, state: &mut ContractState, height: u32) -> u64 {
        self.scalar_for(state, height, ScalarParameter::MinGasPrice)
    }

    /// The gas available to the contract outputs of the block at `height`.
    pub fn block_gas_limit_for(&mut self, state: &mut ContractState, height: u32) -> u64 {
        self.scalar_for(state, height, ScalarParameter::BlockGasLimit)
    }

    fn scalar_for(
        &mut self,
        state: &mut ContractState,
        height: u32,
        parameter: ScalarParameter,
    ) -> u64 {
        if let Some(value) = self.scalars.get(&(parameter, height)) {
            return *value;
        }
        let value = match self.read_scalar(state, height, parameter) {
            Ok(value) => value.unwrap_or(parameter.default_value()),
            Err(err) => {
                debug!(target: "qtum::dgp", %err, height, ?parameter, "using the default value");
                parameter.default_value()
            }
        };
        self.scalars.insert((parameter, height), value);
        value
    }

    /// Reads and checks the schedule published for `height`, if any.
    fn read_schedule(
        &self,
        state: &mut ContractState,
        height: u32,
        allow_initcode_limit: bool,
    ) -> Result<Option<Vec<u32>>, DgpError> {
        let Some(template) = governance_contract(state, GAS_SCHEDULE_DGP, height)? else {
            return Ok(None);
        };
        let values = match self.mode {
            ReadMode::Call => {
                let output = self.call_template(
                    state,
                    template.address,
                    IGasSchedule::getScheduleCall::SELECTOR,
                    height,
                )?;
                decode_schedule_words(&output)
            }
            ReadMode::Storage => {
                let slots = (0..STORAGE_SCHEDULE_SLOTS)
                    .map(|slot| state.storage(&template.address, &U256::from(slot)));
                let mut values = decode_storage_schedule(slots);
                values.truncate(GOVERNED_SCHEDULE_LEN);
                values
            }
        };
        check_schedule_bounds(&values, allow_initcode_limit)?;
        trace!(target: "qtum::dgp", height, template = %template.address, "gas schedule override");
        Ok(Some(values))
    }

    /// Reads and checks the value of `parameter` published for `height`, if any.
    fn read_scalar(
        &self,
        state: &mut ContractState,
        height: u32,
        parameter: ScalarParameter,
    ) -> Result<Option<u64>, DgpError> {
        let Some(template) = governance_contract(state, parameter.governance_address(), height)?
        else {
            return Ok(None);
        };
        let value = match self.mode {
            ReadMode::Call => {
                let output = self.call_template(state, template.address, parameter.selector(), height)?;
                decode_scalar_word(&output).ok_or(DgpError::MalformedOutput {
                    template: template.address,
                    len: output.len(),
                })?
            }
            ReadMode::Storage => state.storage(&template.address, &U256::ZERO).as_limbs()[0],
        };
        let (min, max) = parameter.bounds();
        if !(min..=max).contains(&value) {
            return Err(DgpError::ValueOutOfBounds { parameter, value });
        }
        Ok(Some(value))
    }

    /// Calls a template getter, leaving `state` as it was.
    fn call_template(
        &self,
        state: &mut ContractState,
        template: Address,
        selector: [u8; 4],
        height: u32,
    ) -> Result<Bytes, DgpError> {
        let checkpoint = state.checkpoint();
        let block = BlockEnv { number: height.into(), gas_limit: DGP_READ_GAS, ..Default::default() };
        let result = Executor::new(state, GasSchedule::for_height(&self.params, height), block)
            .call(CallParams {
                receiver: template,
                gas_limit: DGP_READ_GAS,
                data: Bytes::copy_from_slice(&selector),
                ..Default::default()
            });
        state.restore(checkpoint);
        if result.is_success() {
            Ok(result.output)
        } else {
            Err(DgpError::CallFailed { template, status: result.status })
        }
    }
}
