//! Validation logic for transactions separated from type definitions
use crate::blockchain::WorldState;
use crate::crypto::{address_from_public_key, address_to_hex};
use crate::error::ChainError;
use crate::transaction::types::Transaction;
use secp256k1::constants::PUBLIC_KEY_SIZE;

impl Transaction {
    /// Validates just the signature of the transaction, without access to chain state.
    pub fn validate_signature(&self) -> Result<(), ChainError> {
        let (signature, public_key) = match (&self.signature, &self.public_key) {
            (Some(sig), Some(pk)) => (sig, pk),
            _ => {
                return Err(ChainError::InvalidTransaction(
                    "Transaction not signed".to_string(),
                ))
            }
        };

        crate::crypto::verify_signature(public_key, &self.signable_message(), signature)?;

        let key: [u8; PUBLIC_KEY_SIZE] = public_key
            .as_slice()
            .try_into()
            .map_err(|_| ChainError::InvalidTransaction("Malformed public key".to_string()))?;
        if address_from_public_key(&key) != self.sender {
            return Err(ChainError::InvalidTransaction(format!(
                "Public key does not belong to sender {}",
                address_to_hex(&self.sender)
            )));
        }
        Ok(())
    }

    /// Performs a full validation of the transaction against the given state.
    pub fn validate(&self, state: &WorldState) -> Result<(), ChainError> {
        self.validate_size()?;
        self.validate_signature()?;

        let expected_nonce = state.nonce(&self.sender);
        if self.nonce != expected_nonce {
            return Err(ChainError::InvalidTransaction(format!(
                "Invalid nonce for {}: expected {}, got {}",
                address_to_hex(&self.sender),
                expected_nonce,
                self.nonce
            )));
        }

        let balance = state.balance(&self.sender);
        if balance < self.value {
            return Err(ChainError::InvalidTransaction(format!(
                "Insufficient balance for {}: has {}, needs {}",
                address_to_hex(&self.sender),
                balance,
                self.value
            )));
        }
        Ok(())
    }
}
