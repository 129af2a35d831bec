//! In-memory chain, log index and clock.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicI64, Ordering},
};

use alloy_primitives::{Address, Log, B256};
use delegate::delegate;

use crate::{
    assembler::Clock,
    delegation::LogIndex,
    difficulty::{to_compact, BlockIndexEntry, HeaderChain},
    params::ProofKind,
    ConsensusParams, Txid,
};

/// Timestamp of the first block of generated chains.
pub const GENESIS_TIME: i64 = 1_504_695_029;

/// An active chain held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryChain {
    blocks: Vec<BlockIndexEntry>,
}

impl MemoryChain {
    delegate! {
        to self.blocks {
            /// Number of blocks.
            pub fn len(&self) -> usize;
            /// Returns whether the chain has no block.
            pub fn is_empty(&self) -> bool;
        }
    }

    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// A proof-of-work chain up to `tip_height`, one block per target spacing at the
    /// easiest target.
    pub fn pow(params: &ConsensusParams, tip_height: u32) -> Self {
        let mut chain = Self::new();
        let mut time = GENESIS_TIME;
        for height in 0..=tip_height {
            let bits = to_compact(params.target_limit(height, ProofKind::Work));
            chain.push(time, bits, ProofKind::Work);
            time += params.target_spacing(height + 1);
        }
        chain
    }

    /// Appends a block on top of the tip.
    pub fn push(&mut self, time: i64, bits: u32, proof: ProofKind) -> BlockIndexEntry {
        let height = self.blocks.len() as u32;
        let mut hash = [0u8; 32];
        hash[..4].copy_from_slice(&height.to_be_bytes());
        hash[31] = 1;
        let entry = BlockIndexEntry { height, time, bits, proof, hash: B256::from(hash) };
        self.blocks.push(entry);
        entry
    }

    /// Timestamp of the tip, the genesis time for an empty chain.
    pub fn tip_time(&self) -> i64 {
        self.blocks.last().map_or(GENESIS_TIME, |entry| entry.time)
    }
}

impl HeaderChain for MemoryChain {
    fn ancestor(&self, height: u32) -> Option<BlockIndexEntry> {
        self.blocks.get(height as usize).copied()
    }

    fn tip(&self) -> Option<BlockIndexEntry> {
        self.blocks.last().copied()
    }
}

/// A log index held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogIndex {
    tip_height: u32,
    blocks: BTreeMap<u32, Vec<(Txid, Vec<Log>)>>,
}

impl MemoryLogIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the logs of `txid` in the block at `height`, moving the tip up if needed.
    pub fn add(&mut self, height: u32, txid: Txid, logs: Vec<Log>) {
        self.tip_height = self.tip_height.max(height);
        self.blocks.entry(height).or_default().push((txid, logs));
    }

    /// Sets the tip height.
    pub fn set_tip_height(&mut self, height: u32) {
        self.tip_height = height;
    }
}

impl LogIndex for MemoryLogIndex {
    fn tip_height(&self) -> u32 {
        self.tip_height
    }

    fn transactions(&self, address: Address, from: u32, to: u32) -> Vec<Vec<Txid>> {
        self.blocks
            .range(from..=to)
            .map(|(_, txs)| {
                txs.iter()
                    .filter(|(_, logs)| logs.iter().any(|log| log.address == address))
                    .map(|(txid, _)| *txid)
                    .collect::<Vec<_>>()
            })
            .filter(|txids| !txids.is_empty())
            .collect()
    }

    fn logs(&self, txid: &Txid) -> Vec<Log> {
        self.blocks
            .values()
            .flatten()
            .find(|(id, _)| id == txid)
            .map(|(_, logs)| logs.clone())
            .unwrap_or_default()
    }
}

/// A clock stuck at one time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.0
    }
}

/// A clock moving forward by a step every time it is read.
#[derive(Debug, Default)]
pub struct SteppingClock {
    now: AtomicI64,
    step: i64,
}

impl SteppingClock {
    /// Creates a clock starting at `start`.
    pub const fn new(start: i64, step: i64) -> Self {
        Self { now: AtomicI64::new(start), step }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> i64 {
        self.now.fetch_add(self.step, Ordering::Relaxed)
    }
}
