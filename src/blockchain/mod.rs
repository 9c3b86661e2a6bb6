// Blockchain module
//
// This module contains the ledger engine:
// - Digest and Merkle root helpers
// - Keys, signatures and wallets
// - Signed and coinbase transactions
// - Blocks and proof of work sealing
// - The blockchain with its pending pool

pub mod block;
pub mod chain;
pub mod clock;
pub mod crypto;
pub mod merkle;
pub mod transaction;

// Re-export main components for easier access
pub use block::{Block, BlockError};
pub use chain::{Blockchain, ChainViolation, LedgerError};
pub use clock::{Clock, FixedClock, SystemClock};
pub use crypto::{AccountKey, CryptoError, DigitalSignature, Wallet};
pub use transaction::{Transaction, TransactionError};
