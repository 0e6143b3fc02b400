//! Execution engine seam.
//!
//! The chain core never interprets contract code itself. It hands each
//! transaction to an [`ExecutionEngine`] together with a [`LogSink`] that
//! receives every log at the moment it is emitted.

pub mod native;
pub mod token;

pub use native::{native_code, CallContext, NativeContract, NativeEngine};

use crate::abi::{Log, Token};
use crate::blockchain::{Sha256Hash, WorldState};
use crate::crypto::Address;
use crate::error::ChainError;
use crate::transaction::Transaction;

/// Flat cost charged for every transaction.
pub const TX_BASE_GAS: u64 = 21_000;
/// Extra cost for contract creation.
pub const DEPLOY_GAS: u64 = 32_000;
pub const CODE_BYTE_GAS: u64 = 200;
pub const STORAGE_WRITE_GAS: u64 = 5_000;
pub const STORAGE_READ_GAS: u64 = 200;
pub const LOG_GAS: u64 = 375;
pub const LOG_TOPIC_GAS: u64 = 375;
pub const LOG_DATA_BYTE_GAS: u64 = 8;

/// Receives raw logs synchronously, in emission order.
pub trait LogSink {
    fn emit(&mut self, log: &Log);
}

/// Discards every log. Used when the chain replays a block it already saw.
pub struct NullSink;

impl LogSink for NullSink {
    fn emit(&mut self, _log: &Log) {}
}

impl LogSink for Vec<Log> {
    fn emit(&mut self, log: &Log) {
        self.push(log.clone());
    }
}

/// Block context visible to the engine while a transaction runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEnv {
    pub number: u64,
    pub timestamp: u64,
    pub coinbase: Address,
    pub gas_limit: u64,
    /// Gas already consumed by earlier transactions of the same block.
    pub gas_used: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Receipt {
    pub tx_hash: Sha256Hash,
    pub gas_used: u64,
    pub contract_address: Option<Address>,
    pub logs: Vec<Log>,
    pub output: Vec<Token>,
}

/// The execution-engine collaborator: applies transactions to a state and
/// computes state roots. Implementations must be deterministic.
pub trait ExecutionEngine: Send + Sync {
    /// Applies `tx` to `state`. On error the state must be left untouched.
    fn apply_transaction(
        &self,
        state: &mut WorldState,
        env: &BlockEnv,
        tx: &Transaction,
        sink: &mut dyn LogSink,
    ) -> Result<Receipt, ChainError>;

    fn state_root(&self, state: &WorldState) -> Result<Sha256Hash, ChainError> {
        state.root()
    }

    fn clone_state(&self, state: &WorldState) -> WorldState {
        state.clone()
    }

    /// Address a deployment by `sender` at `nonce` will create.
    fn contract_address(&self, sender: &Address, nonce: u64) -> Address {
        native::contract_address(sender, nonce)
    }
}

/// Tracks gas consumption against a transaction's limit.
#[derive(Debug, Clone, Copy)]
pub struct GasMeter {
    limit: u64,
    used: u64,
}

impl GasMeter {
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    pub fn charge(&mut self, amount: u64) -> Result<(), ChainError> {
        let used = self.used.saturating_add(amount);
        if used > self.limit {
            return Err(ChainError::ExecutionReverted(format!(
                "out of gas: needs {}, limit {}",
                used, self.limit
            )));
        }
        self.used = used;
        Ok(())
    }

    pub fn used(&self) -> u64 {
        self.used
    }
}
