//! The background staking loop.
//!
//! The staker owns a thread that repeatedly takes the shared chain state lock, lets a
//! [`StakeAttempt`] look for a kernel and build a proof-of-stake block, releases the lock and
//! sleeps for the polling period. The lock is only waited for a bounded time so that the
//! staker never stalls block validation; a missed lock simply skips one round.

use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{assembler::MinerParams, ConsensusParams};

/// What one staking attempt achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StakeOutcome {
    /// A block was staked.
    Staked,
    /// No kernel satisfied the target.
    NoKernel,
    /// Staking is not possible right now, e.g. while syncing or without mature coins.
    NotReady,
}

/// One round of staking against the locked chain state.
pub trait StakeAttempt<S>: Send {
    /// Looks for a kernel and builds a block with `state` locked.
    fn attempt(&mut self, state: &mut S) -> StakeOutcome;
}

impl<S, F> StakeAttempt<S> for F
where
    F: FnMut(&mut S) -> StakeOutcome + Send,
{
    fn attempt(&mut self, state: &mut S) -> StakeOutcome {
        self(state)
    }
}

/// Configuration of the staker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StakerConfig {
    /// Sleep between rounds, in milliseconds.
    pub polling_period: u64,
    /// Sleep between rounds on chains with minimum difficulty blocks, in milliseconds.
    pub polling_period_min_difficulty: u64,
    /// Uses the minimum difficulty polling period.
    pub min_difficulty: bool,
    /// Longest wait for the chain state lock, in milliseconds.
    pub lock_timeout: u64,
}

impl Default for StakerConfig {
    fn default() -> Self {
        Self {
            polling_period: crate::constants::miner::STAKER_POLLING_PERIOD,
            polling_period_min_difficulty: crate::constants::miner::STAKER_POLLING_PERIOD_MIN_DIFFICULTY,
            min_difficulty: false,
            lock_timeout: 100,
        }
    }
}

impl StakerConfig {
    /// Configuration for staking on top of `height`.
    pub fn for_height(params: &ConsensusParams, height: u32) -> Self {
        let miner = MinerParams::for_height(params, height);
        Self {
            polling_period: miner.polling_period,
            polling_period_min_difficulty: miner.polling_period_min_difficulty,
            min_difficulty: params.pow_allow_min_difficulty_blocks,
            ..Default::default()
        }
    }

    /// Sets the polling period.
    pub const fn with_polling_period(mut self, millis: u64) -> Self {
        self.polling_period = millis;
        self
    }

    /// Sets the lock timeout.
    pub const fn with_lock_timeout(mut self, millis: u64) -> Self {
        self.lock_timeout = millis;
        self
    }

    /// Sleep between rounds.
    pub const fn sleep(&self) -> Duration {
        Duration::from_millis(if self.min_difficulty {
            self.polling_period_min_difficulty
        } else {
            self.polling_period
        })
    }
}

/// Counters of a staker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakerStats {
    /// Rounds that got the lock.
    pub attempts: u64,
    /// Blocks staked.
    pub staked: u64,
    /// Rounds skipped because the lock was busy.
    pub lock_misses: u64,
}

/// A running staker thread.
#[derive(Debug)]
pub struct Staker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<StakerStats>,
}

impl Staker {
    /// Starts staking on `chain` with `attempt`.
    pub fn spawn<S, A>(chain: Arc<Mutex<S>>, mut attempt: A, config: StakerConfig) -> io::Result<Self>
    where
        S: Send + 'static,
        A: StakeAttempt<S> + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new().name("qtum-staker".into()).spawn(move || {
            let mut stats = StakerStats::default();
            while !flag.load(Ordering::Acquire) {
                match chain.try_lock_for(Duration::from_millis(config.lock_timeout)) {
                    Some(mut state) => {
                        stats.attempts += 1;
                        let outcome = attempt.attempt(&mut state);
                        drop(state);
                        trace!(target: "qtum::staker", ?outcome, "staking round done");
                        if outcome == StakeOutcome::Staked {
                            stats.staked += 1;
                        }
                    }
                    None => stats.lock_misses += 1,
                }
                if flag.load(Ordering::Acquire) {
                    break;
                }
                thread::park_timeout(config.sleep());
            }
            debug!(target: "qtum::staker", ?stats, "staker stopped");
            stats
        })?;
        Ok(Self { stop, handle })
    }

    /// Returns whether the thread is still running.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stops the thread, waking it if it sleeps, and returns its counters.
    pub fn stop(self) -> StakerStats {
        self.stop.store(true, Ordering::Release);
        self.handle.thread().unpark();
        self.handle.join().unwrap_or_default()
    }
}
