use chrono::{TimeZone, Utc};
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use super::clock::Clock;
use super::merkle::{digest, meets_difficulty, merkle_root};
use super::transaction::Transaction;

/// Nonces handed to the worker pool per round of parallel sealing
const SEAL_BATCH: u64 = 1 << 14;

/// Errors that can occur while sealing a block
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("Sealing cancelled before nonce {next_nonce}")]
    Cancelled { next_nonce: u64 },
}

/// Represents a block in the blockchain
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Hash of the previous block
    pub previous_hash: String,

    /// Creation time in milliseconds since the Unix epoch
    pub timestamp: i64,

    /// Proof of work counter
    pub nonce: u64,

    /// Merkle root over the transaction ids, fixed at construction
    pub merkle_root: String,

    /// Hash of previous_hash, timestamp, nonce and merkle_root
    pub hash: String,

    /// Transactions included in this block
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Creates a new, unsealed block
    ///
    /// # Arguments
    ///
    /// * `transactions` - The list of transactions to include in the block
    /// * `previous_hash` - The hash of the previous block
    /// * `clock` - Source of the block's timestamp
    ///
    /// # Returns
    ///
    /// A new Block with nonce 0 and its initial hash computed
    pub fn new(transactions: Vec<Transaction>, previous_hash: String, clock: &dyn Clock) -> Self {
        let tx_ids: Vec<String> = transactions.iter().map(|tx| tx.tx_id.clone()).collect();

        let mut block = Block {
            previous_hash,
            timestamp: clock.now_millis(),
            nonce: 0,
            merkle_root: merkle_root(&tx_ids),
            hash: String::new(),
            transactions,
        };
        block.hash = block.calculate_hash();

        block
    }

    /// Calculates the hash of the block at its current nonce
    ///
    /// # Returns
    ///
    /// The SHA-256 hash of the block as a hexadecimal string
    pub fn calculate_hash(&self) -> String {
        self.hash_with_nonce(self.nonce)
    }

    fn hash_with_nonce(&self, nonce: u64) -> String {
        digest(format!(
            "{}{}{}{}",
            self.previous_hash, self.timestamp, nonce, self.merkle_root
        ))
    }

    /// Whether the stored hash has at least `difficulty` leading zeros
    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        meets_difficulty(&self.hash, difficulty)
    }

    /// Searches nonces upward from the current one until the hash meets
    /// `difficulty`. Blocks the calling thread until a nonce is found.
    pub fn seal(&mut self, difficulty: usize) {
        while !self.meets_difficulty(difficulty) {
            self.nonce += 1;
            self.hash = self.calculate_hash();
        }

        debug!("Sealed block with nonce {} hash {}", self.nonce, self.hash);
    }

    /// Same search as [`Block::seal`] spread across the rayon pool
    ///
    /// Nonces are scanned in batches and the lowest qualifying nonce of a
    /// batch is taken, so the outcome matches the sequential search. The
    /// `cancel` flag is polled between batches; on cancellation the block
    /// is left as it was before the call.
    pub fn seal_parallel(&mut self, difficulty: usize, cancel: &AtomicBool) -> Result<(), BlockError> {
        if self.meets_difficulty(difficulty) {
            return Ok(());
        }

        let mut start = self.nonce + 1;
        loop {
            if cancel.load(Ordering::Relaxed) {
                debug!("Sealing cancelled at nonce {}", start);
                return Err(BlockError::Cancelled { next_nonce: start });
            }

            let end = start.saturating_add(SEAL_BATCH);
            let found = (start..end)
                .into_par_iter()
                .find_first(|nonce| meets_difficulty(&self.hash_with_nonce(*nonce), difficulty));

            if let Some(nonce) = found {
                self.nonce = nonce;
                self.hash = self.calculate_hash();
                debug!("Sealed block with nonce {} hash {}", self.nonce, self.hash);
                return Ok(());
            }

            start = end;
        }
    }

    /// Checks every transaction's amount and every non-coinbase
    /// transaction's signature
    pub fn validate_transactions(&self) -> bool {
        self.transactions
            .iter()
            .all(|tx| tx.has_valid_amount() && (tx.is_coinbase() || tx.verify()))
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short_hash: String = self.hash.chars().take(12).collect();
        write!(f, "Block{{hash={}.., txs={}, ts=", short_hash, self.transactions.len())?;
        match Utc.timestamp_millis_opt(self.timestamp).single() {
            Some(ts) => write!(f, "{}}}", ts.to_rfc3339()),
            None => write!(f, "{}}}", self.timestamp),
        }
    }
}
