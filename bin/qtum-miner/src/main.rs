//! Command-line front end of the qtum consensus core.
//!
//! Assembles block templates from mempool snapshots, reports the governed gas parameters and
//! computes the next compact target of a header chain.

use clap::Parser;
use qtum_miner::{Error, MainCmd};

fn main() -> Result<(), Error> {
    set_thread_panic_hook();
    let cmd = MainCmd::parse();
    cmd.log_args().init()?;
    cmd.run().inspect_err(|e| eprintln!("{e}"))
}

/// Exits the process when any thread panics.
fn set_thread_panic_hook() {
    use std::{
        backtrace::Backtrace,
        panic::{set_hook, take_hook},
        process::exit,
    };
    let orig_hook = take_hook();
    set_hook(Box::new(move |panic_info| {
        eprintln!("Custom backtrace: {}", Backtrace::capture());
        orig_hook(panic_info);
        exit(1);
    }));
}
