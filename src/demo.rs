//! Scripted walkthrough of the ledger: bootstrap mining, two transfers,
//! a second mining round, balances and validity

use log::{info, warn};

use std::fmt;

use crate::blockchain::{Blockchain, LedgerError, Wallet};

/// Outcome of a transfer attempted during the walkthrough
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub recipient: String,
    pub amount: f64,
    pub error: Option<String>,
}

/// What the walkthrough observed
#[derive(Debug, Clone)]
pub struct DemoReport {
    pub alice_address: String,
    pub bob_address: String,
    pub miner_address: String,
    pub transfers: Vec<TransferOutcome>,
    pub alice_balance: f64,
    pub bob_balance: f64,
    pub miner_balance: f64,
    pub chain_valid: bool,
    pub blocks: Vec<String>,
}

/// Runs the walkthrough against a fresh ledger
pub fn run_demo(difficulty: usize, mining_reward: f64) -> Result<DemoReport, LedgerError> {
    let blockchain = Blockchain::new(difficulty, mining_reward)?;

    let alice = Wallet::new();
    let bob = Wallet::new();
    let miner = Wallet::new();

    info!("Alice: {}", alice.address());
    info!("Bob:   {}", bob.address());
    info!("Miner: {}", miner.address());

    blockchain.mine_pending_transactions(miner.account_key());
    info!(
        "Miner balance after bootstrap: {:.2}",
        blockchain.get_balance(miner.account_key())
    );

    let mut transfers = Vec::new();
    for (name, recipient, amount) in [("Alice", &alice, 25.0), ("Bob", &bob, 15.0)] {
        let result = miner
            .send_funds(recipient.account_key(), amount)
            .map_err(|e| e.to_string())
            .and_then(|tx| blockchain.add_transaction(tx).map_err(|e| e.to_string()));

        if let Err(err) = &result {
            warn!("Transfer of {:.2} to {} refused: {}", amount, name, err);
        }

        transfers.push(TransferOutcome {
            recipient: name.to_string(),
            amount,
            error: result.err(),
        });
    }

    info!("Mining block with transactions...");
    blockchain.mine_pending_transactions(miner.account_key());

    Ok(DemoReport {
        alice_address: alice.address(),
        bob_address: bob.address(),
        miner_address: miner.address(),
        transfers,
        alice_balance: blockchain.get_balance(alice.account_key()),
        bob_balance: blockchain.get_balance(bob.account_key()),
        miner_balance: blockchain.get_balance(miner.account_key()),
        chain_valid: blockchain.is_valid(),
        blocks: blockchain.get_chain().iter().map(ToString::to_string).collect(),
    })
}

impl fmt::Display for DemoReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Alice: {}", self.alice_address)?;
        writeln!(f, "Bob:   {}", self.bob_address)?;
        writeln!(f, "Miner: {}", self.miner_address)?;
        for transfer in &self.transfers {
            match &transfer.error {
                None => writeln!(f, "Sent {:.2} to {}", transfer.amount, transfer.recipient)?,
                Some(err) => writeln!(
                    f,
                    "Could not send {:.2} to {}: {}",
                    transfer.amount, transfer.recipient, err
                )?,
            }
        }
        writeln!(f, "Alice balance: {:.2}", self.alice_balance)?;
        writeln!(f, "Bob balance:   {:.2}", self.bob_balance)?;
        writeln!(f, "Miner balance: {:.2}", self.miner_balance)?;
        writeln!(f, "Chain valid? {}", self.chain_valid)?;
        for (index, block) in self.blocks.iter().enumerate() {
            writeln!(f, "#{} {}", index, block)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_refuses_overspending() {
        let report = run_demo(1, 10.0).unwrap();

        // The miner holds 10.0 after bootstrap, which covers neither transfer.
        assert!(report.transfers.iter().all(|t| t.error.is_some()));
        assert_eq!(report.alice_balance, 0.0);
        assert_eq!(report.bob_balance, 0.0);
        assert_eq!(report.miner_balance, 20.0);
        assert!(report.chain_valid);
        assert_eq!(report.blocks.len(), 3);
    }

    #[test]
    fn test_demo_with_larger_reward() {
        let report = run_demo(1, 50.0).unwrap();

        assert!(report.transfers.iter().all(|t| t.error.is_none()));
        assert_eq!(report.alice_balance, 25.0);
        assert_eq!(report.bob_balance, 15.0);
        assert_eq!(report.miner_balance, 60.0);
        assert!(report.chain_valid);

        let printed = report.to_string();
        assert!(printed.contains("Sent 25.00 to Alice"));
        assert!(printed.contains("Chain valid? true"));
    }
}
