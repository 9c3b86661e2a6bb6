use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;

use super::crypto::{verify_signature, AccountKey, CryptoError, DigitalSignature, Wallet};
use super::merkle::digest;

/// Stands in for the sender of a coinbase transaction in the canonical payload.
/// `O` and `I` are outside the base58 alphabet, so no encoded key can equal it.
pub const COINBASE_SENDER: &str = "COINBASE";

/// Errors that can occur while constructing a transaction
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(f64),

    #[error("Crypto failure: {0}")]
    CryptoFailure(#[from] CryptoError),
}

/// A value transfer between two accounts
///
/// Immutable once built: either minted by the protocol (no sender, no
/// signature) or signed by the sender over its canonical payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Digest of the canonical payload
    pub tx_id: String,

    /// Sender's key, absent for coinbase transactions
    pub from: Option<AccountKey>,

    /// Recipient's key
    pub to: AccountKey,

    /// Amount being transferred
    pub amount: f64,

    /// Sender's signature over the canonical payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<DigitalSignature>,
}

impl Transaction {
    /// Creates a coinbase transaction (mining reward)
    ///
    /// # Arguments
    ///
    /// * `to` - The account receiving the minted amount
    /// * `amount` - The reward amount
    pub fn new_coinbase(to: AccountKey, amount: f64) -> Self {
        let payload = Self::canonical(None, &to, amount);

        Transaction {
            tx_id: digest(&payload),
            from: None,
            to,
            amount,
            signature: None,
        }
    }

    /// Creates a transfer and signs it
    ///
    /// The signature covers the canonical payload of `from`, `to` and
    /// `amount`. `signer` is expected to hold the secret key for `from`;
    /// if it does not, construction still succeeds but `verify` fails.
    ///
    /// # Returns
    ///
    /// The signed transaction, or an error if the amount is negative or
    /// signing fails
    pub fn create_and_sign(
        signer: &Wallet,
        from: AccountKey,
        to: AccountKey,
        amount: f64,
    ) -> Result<Self, TransactionError> {
        if !is_valid_amount(amount) {
            return Err(TransactionError::InvalidAmount(amount));
        }

        let payload = Self::canonical(Some(&from), &to, amount);
        let signature = signer.sign(payload.as_bytes())?;

        Ok(Transaction {
            tx_id: digest(&payload),
            from: Some(from),
            to,
            amount,
            signature: Some(signature),
        })
    }

    /// Checks the transaction's signature
    ///
    /// Coinbase transactions are always valid. Any decoding or verification
    /// failure counts as an invalid signature.
    pub fn verify(&self) -> bool {
        let from = match &self.from {
            Some(from) => from,
            None => return true,
        };

        let signature = match &self.signature {
            Some(signature) => signature,
            None => return false,
        };

        let payload = Self::canonical(Some(from), &self.to, self.amount);
        verify_signature(payload.as_bytes(), signature, from).unwrap_or(false)
    }

    /// Checks if the transaction is a coinbase transaction
    pub fn is_coinbase(&self) -> bool {
        self.from.is_none()
    }

    /// Whether the amount is finite and non-negative
    ///
    /// A signature says nothing about this: a sender can sign a negative
    /// amount to pull funds from the recipient.
    pub fn has_valid_amount(&self) -> bool {
        is_valid_amount(self.amount)
    }

    /// Renders the fixed-field payload that is hashed and signed
    pub fn canonical(from: Option<&AccountKey>, to: &AccountKey, amount: f64) -> String {
        let from = from.map_or(COINBASE_SENDER, |key| key.0.as_str());
        format!(
            "{{\"from\":\"{}\",\"to\":\"{}\",\"amount\":{:?}}}",
            from, to.0, amount
        )
    }
}

fn is_valid_amount(amount: f64) -> bool {
    amount.is_finite() && amount >= 0.0
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short_id: String = self.tx_id.chars().take(8).collect();
        write!(f, "TX{{{}.., amount={:?}}}", short_id, self.amount)
    }
}
