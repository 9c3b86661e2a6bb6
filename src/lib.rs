//! An educational proof-of-work ledger: Merkle-committed, hash-linked blocks,
//! ed25519-signed account transfers and full-chain replay for balances and
//! validation, with a small REST API on top.

pub mod api;
pub mod blockchain;
pub mod config;
pub mod demo;
