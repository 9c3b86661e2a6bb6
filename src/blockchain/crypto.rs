use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;
use std::str::FromStr;

use super::merkle::digest;
use super::transaction::{Transaction, TransactionError};

/// Number of hex characters kept from the key digest for a wallet address
pub const ADDRESS_LEN: usize = 40;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Failed to sign message: {0}")]
    SigningError(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// Identity of an account: an ed25519 verification key in base58
///
/// The encoded form is what gets compared, hashed and signed over, so two
/// handles to the same key are always the same account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct AccountKey(pub String);

impl AccountKey {
    /// Encodes a verification key
    pub fn from_verifying_key(public_key: &VerifyingKey) -> Self {
        AccountKey(bs58::encode(public_key.as_bytes()).into_string())
    }

    /// Decodes back into a verification key
    pub fn to_verifying_key(&self) -> Result<VerifyingKey, CryptoError> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let key_bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidPublicKey("Invalid public key length".to_string())
        })?;

        VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    /// Short displayable identifier derived from the encoded key
    pub fn address(&self) -> String {
        let mut hash = digest(&self.0);
        hash.truncate(ADDRESS_LEN);
        hash
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountKey {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = AccountKey(s.to_string());
        key.to_verifying_key()?;
        Ok(key)
    }
}

/// Represents a digital signature (base58 of the 64 signature bytes)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DigitalSignature(pub String);

impl DigitalSignature {
    /// Creates a new digital signature from a signature
    pub fn from_signature(signature: &Signature) -> Self {
        DigitalSignature(bs58::encode(signature.to_bytes()).into_string())
    }

    /// Converts the digital signature to a signature
    pub fn to_signature(&self) -> Result<Signature, CryptoError> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let signature_bytes: [u8; 64] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidSignature("Invalid signature length".to_string())
        })?;

        Ok(Signature::from_bytes(&signature_bytes))
    }
}

/// A signing identity: an ed25519 key pair
#[derive(Debug, Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    account_key: AccountKey,
}

impl Wallet {
    /// Creates a new wallet with a random keypair
    pub fn new() -> Self {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        Self::from_signing_key(signing_key)
    }

    /// Creates a wallet from an existing 32-byte secret key
    pub fn from_secret_key(secret_key_bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes_array: [u8; 32] = secret_key_bytes.try_into().map_err(|_| {
            CryptoError::InvalidPrivateKey(format!(
                "expected 32 bytes, got {}",
                secret_key_bytes.len()
            ))
        })?;

        Ok(Self::from_signing_key(SigningKey::from_bytes(&bytes_array)))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let account_key = AccountKey::from_verifying_key(&signing_key.verifying_key());
        Wallet {
            signing_key,
            account_key,
        }
    }

    /// The wallet's verification key, used as its account identity
    pub fn account_key(&self) -> &AccountKey {
        &self.account_key
    }

    /// Truncated digest of the encoded verification key
    pub fn address(&self) -> String {
        self.account_key.address()
    }

    /// Signs a message with the wallet's private key
    pub fn sign(&self, message: &[u8]) -> Result<DigitalSignature, CryptoError> {
        let signature = self
            .signing_key
            .try_sign(message)
            .map_err(|e| CryptoError::SigningError(e.to_string()))?;
        Ok(DigitalSignature::from_signature(&signature))
    }

    /// Builds and signs a transfer from this wallet to `recipient`
    pub fn send_funds(
        &self,
        recipient: &AccountKey,
        amount: f64,
    ) -> Result<Transaction, TransactionError> {
        Transaction::create_and_sign(self, self.account_key.clone(), recipient.clone(), amount)
    }

    /// Exports the wallet's secret key as bytes
    pub fn export_secret_key(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

/// Verifies a signature against a message and public key
pub fn verify_signature(
    message: &[u8],
    signature: &DigitalSignature,
    public_key: &AccountKey,
) -> Result<bool, CryptoError> {
    let signature = signature.to_signature()?;
    let public_key = public_key.to_verifying_key()?;

    Ok(public_key.verify(message, &signature).is_ok())
}
