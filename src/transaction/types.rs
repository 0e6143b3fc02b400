//! Transaction types for SimChain
use crate::abi::Token;
use crate::blockchain::Sha256Hash;
use crate::crypto::{Address, KeyPair};
use crate::error::ChainError;
use sha2::{Digest, Sha256};

/// Maximum transaction size in bytes (100KB) to prevent DoS
pub const MAX_TRANSACTION_SIZE: usize = 100_000;

/// What a transaction does once its sender has been authenticated.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TxKind {
    Transfer {
        to: Address,
    },
    Deploy {
        code: Vec<u8>,
        args: Vec<Token>,
    },
    Call {
        to: Address,
        function: String,
        args: Vec<Token>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Transaction {
    pub sender: Address,
    pub nonce: u64,
    pub value: u128,
    pub gas_limit: u64,
    pub kind: TxKind,
    pub signature: Option<Vec<u8>>,
    pub public_key: Option<Vec<u8>>,
}

impl Transaction {
    pub fn new(sender: Address, nonce: u64, value: u128, gas_limit: u64, kind: TxKind) -> Self {
        Self {
            sender,
            nonce,
            value,
            gas_limit,
            kind,
            signature: None,
            public_key: None,
        }
    }

    pub fn transfer(sender: Address, nonce: u64, to: Address, value: u128, gas_limit: u64) -> Self {
        Self::new(sender, nonce, value, gas_limit, TxKind::Transfer { to })
    }

    pub fn deploy(sender: Address, nonce: u64, code: Vec<u8>, args: Vec<Token>, gas_limit: u64) -> Self {
        Self::new(sender, nonce, 0, gas_limit, TxKind::Deploy { code, args })
    }

    pub fn call(
        sender: Address,
        nonce: u64,
        to: Address,
        function: &str,
        args: Vec<Token>,
        value: u128,
        gas_limit: u64,
    ) -> Self {
        Self::new(
            sender,
            nonce,
            value,
            gas_limit,
            TxKind::Call {
                to,
                function: function.to_string(),
                args,
            },
        )
    }

    /// Bytes covered by the signature: every field except the signature itself.
    pub fn signable_message(&self) -> Vec<u8> {
        let mut message = Vec::new();
        message.extend_from_slice(&self.sender);
        message.extend_from_slice(&self.nonce.to_le_bytes());
        message.extend_from_slice(&self.value.to_le_bytes());
        message.extend_from_slice(&self.gas_limit.to_le_bytes());
        match &self.kind {
            TxKind::Transfer { to } => {
                message.push(0);
                message.extend_from_slice(to);
            }
            TxKind::Deploy { code, args } => {
                message.push(1);
                message.extend_from_slice(&(code.len() as u64).to_le_bytes());
                message.extend_from_slice(code);
                for arg in args {
                    message.extend_from_slice(&arg.to_word());
                }
            }
            TxKind::Call { to, function, args } => {
                message.push(2);
                message.extend_from_slice(to);
                message.extend_from_slice(&(function.len() as u64).to_le_bytes());
                message.extend_from_slice(function.as_bytes());
                for arg in args {
                    message.extend_from_slice(&arg.to_word());
                }
            }
        }
        message
    }

    pub fn sign(&mut self, keypair: &KeyPair) -> Result<(), ChainError> {
        let signature = keypair.sign(&self.signable_message())?;
        self.signature = Some(signature.to_vec());
        self.public_key = Some(keypair.public_key_bytes().to_vec());
        Ok(())
    }

    pub fn signed(mut self, keypair: &KeyPair) -> Result<Self, ChainError> {
        self.sign(keypair)?;
        Ok(self)
    }

    /// Calculate the hash of this transaction
    pub fn hash(&self) -> Sha256Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.signable_message());
        if let Some(sig) = &self.signature {
            hasher.update(sig);
        }
        hasher.finalize().into()
    }

    pub fn hash_str(&self) -> String {
        hex::encode(self.hash())
    }

    /// Validate transaction size to prevent DoS attacks
    pub fn validate_size(&self) -> Result<(), ChainError> {
        let serialized = bincode::serialize(self)
            .map_err(|e| ChainError::InvalidTransaction(format!("Serialization failed: {}", e)))?;

        if serialized.len() > MAX_TRANSACTION_SIZE {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction too large: {} bytes (max: {})",
                serialized.len(),
                MAX_TRANSACTION_SIZE
            )));
        }
        Ok(())
    }
}
