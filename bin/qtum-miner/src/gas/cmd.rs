use clap::Parser;
use qtum_consensus::{
    assembler::GasLimits, evm::GasSchedule, BlockAssembler, GasGovernor, HeaderChain,
};
use serde::Serialize;

use crate::common::{ChainArgs, LogArgs, MinerError, OutputArgs, Result, StakerArgs};

/// Gas parameters in force at one height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GasParams {
    /// Height the parameters apply to.
    pub height: u32,
    /// Governed block size.
    pub block_size: u32,
    /// Gas budgets of a template at the height, after operator limits.
    pub gas_limits: GasLimits,
    /// Gas schedule of contract execution.
    pub schedule: GasSchedule,
}

/// Show the gas parameters governing a height
#[derive(Parser, Debug)]
pub struct Cmd {
    /// Chain configuration
    #[command(flatten)]
    pub chain_args: ChainArgs,

    /// Operator limits
    #[command(flatten)]
    pub staker_args: StakerArgs,

    /// Output configuration
    #[command(flatten)]
    pub output_args: OutputArgs,

    /// Logging configuration
    #[command(flatten)]
    pub log_args: LogArgs,

    /// Height to report; the block after the tip when absent
    #[arg(long = "height")]
    pub height: Option<u32>,
}

impl Cmd {
    /// Execute the gas-params command
    pub fn run(&self) -> Result<()> {
        let gas = self.execute()?;
        self.output_args.write(&gas)
    }

    /// Reads the governed parameters.
    pub fn execute(&self) -> Result<GasParams> {
        let params = self.chain_args.params();
        let height = match self.height {
            Some(height) => height,
            None => {
                let chain = self.chain_args.load_chain(&params)?;
                chain.tip().ok_or(MinerError::EmptyChain)?.height + 1
            }
        };
        let mut state = self.chain_args.load_state()?;
        let mut governor = GasGovernor::new(params.clone());
        let assembler = BlockAssembler::new(params, self.staker_args.options());
        Ok(GasParams {
            height,
            block_size: governor.block_size_for(&mut state, height),
            gas_limits: assembler.gas_limits(&mut governor, &mut state, height),
            schedule: governor.schedule_for(&mut state, height),
        })
    }
}
