use crate::consensus::ConsensusStrategy;
use crate::crypto::{address_to_hex, sha256, Address};
use crate::error::ChainError;
use crate::execution::{BlockEnv, ExecutionEngine, NullSink, Receipt};
use crate::transaction::Transaction;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;

use super::state::{ensure_funded, WorldState};
use super::validation::{validate_header_linkage, validate_no_replay};

pub type Sha256Hash = [u8; 32];

/// Hash recorded in `uncles_hash`: this chain never includes uncles.
pub fn empty_uncles_hash() -> Sha256Hash {
    sha256(&[])
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    pub parent_hash: Sha256Hash,
    pub timestamp: u64,
    pub coinbase: Address,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub state_root: Sha256Hash,
    pub tx_root: Sha256Hash,
    pub uncles_hash: Sha256Hash,
    pub difficulty: u32,
    pub nonce: u64,
}

impl BlockHeader {
    pub fn hash(&self) -> Sha256Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.number.to_le_bytes());
        hasher.update(self.parent_hash);
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(self.coinbase);
        hasher.update(self.gas_limit.to_le_bytes());
        hasher.update(self.gas_used.to_le_bytes());
        hasher.update(self.state_root);
        hasher.update(self.tx_root);
        hasher.update(self.uncles_hash);
        hasher.update(self.difficulty.to_le_bytes());
        hasher.update(self.nonce.to_le_bytes());
        hasher.finalize().into()
    }

    pub fn env(&self, gas_used: u64) -> BlockEnv {
        BlockEnv {
            number: self.number,
            timestamp: self.timestamp,
            coinbase: self.coinbase,
            gas_limit: self.gas_limit,
            gas_used,
        }
    }
}

/// An account seeded outside any transaction. Recorded in the block so a
/// replay of the block reproduces it at the same position.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Allocation {
    pub address: Address,
    pub balance: u128,
    /// Index of the first transaction applied after the seeding.
    pub before_tx: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub allocations: Vec<Allocation>,
}

impl Block {
    pub fn hash(&self) -> Sha256Hash {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// Commits to the ordered transactions and the allocations between them.
    pub fn calculate_tx_root(transactions: &[Transaction], allocations: &[Allocation]) -> Sha256Hash {
        let mut hasher = Sha256::new();
        for tx in transactions {
            hasher.update(tx.hash());
        }
        for allocation in allocations {
            hasher.update(allocation.address);
            hasher.update(allocation.balance.to_le_bytes());
            hasher.update((allocation.before_tx as u64).to_le_bytes());
        }
        hasher.finalize().into()
    }

    pub fn empty(header: BlockHeader) -> Self {
        Block {
            header,
            transactions: Vec::new(),
            allocations: Vec::new(),
        }
    }

    pub fn hash_to_target(difficulty: &u32) -> [u8; 32] {
        let mut target = [0xFF; 32];
        let leading_zeros = *difficulty / 8;
        let partial_bits = *difficulty % 8;

        for item in target.iter_mut().take(leading_zeros as usize) {
            *item = 0;
        }

        if leading_zeros < 32 && partial_bits > 0 {
            target[leading_zeros as usize] = 0xFF >> partial_bits;
        }
        target
    }

    /// True when the header hash meets the target implied by its difficulty.
    pub fn meets_difficulty(&self) -> bool {
        self.hash() <= Block::hash_to_target(&self.header.difficulty)
    }
}

/// The persisted, committed sequence of blocks and the state after the tip.
pub struct Chain {
    blocks: Vec<Block>,
    state: WorldState,
    engine: Arc<dyn ExecutionEngine>,
    consensus: Arc<dyn ConsensusStrategy>,
}

impl Chain {
    /// Builds a chain whose genesis block commits `alloc` directly.
    pub fn genesis(
        alloc: WorldState,
        timestamp: u64,
        gas_limit: u64,
        difficulty: u32,
        engine: Arc<dyn ExecutionEngine>,
        consensus: Arc<dyn ConsensusStrategy>,
    ) -> Result<Self, ChainError> {
        let header = BlockHeader {
            number: 0,
            parent_hash: [0u8; 32],
            timestamp,
            coinbase: [0u8; 20],
            gas_limit,
            gas_used: 0,
            state_root: engine.state_root(&alloc)?,
            tx_root: Block::calculate_tx_root(&[], &[]),
            uncles_hash: empty_uncles_hash(),
            difficulty,
            nonce: 0,
        };
        info!(
            state_root = %hex::encode(header.state_root),
            accounts = alloc.accounts.len(),
            "created genesis block"
        );

        Ok(Chain {
            blocks: vec![Block::empty(header)],
            state: alloc,
            engine,
            consensus,
        })
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn tip(&self) -> &Block {
        // Never empty: the constructor installs the genesis block.
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn height(&self) -> u64 {
        self.tip().header.number
    }

    pub fn block(&self, number: u64) -> Option<&Block> {
        self.blocks.get(number as usize)
    }

    pub fn state(&self) -> &WorldState {
        &self.state
    }

    pub fn state_root(&self) -> Result<Sha256Hash, ChainError> {
        self.engine.state_root(&self.state)
    }

    /// Empty successor of the tip; roots are filled in by finalisation.
    pub fn block_template(&self, timestamp: u64, coinbase: Address) -> Block {
        let parent = &self.tip().header;
        Block::empty(BlockHeader {
            number: parent.number + 1,
            parent_hash: self.tip().hash(),
            timestamp: timestamp.max(parent.timestamp + 1),
            coinbase,
            gas_limit: parent.gas_limit,
            gas_used: 0,
            state_root: [0u8; 32],
            tx_root: Block::calculate_tx_root(&[], &[]),
            uncles_hash: empty_uncles_hash(),
            difficulty: parent.difficulty,
            nonce: 0,
        })
    }

    /// A finalised, transaction-free successor ready for the proof-of-work step.
    pub fn head_candidate(&self, timestamp: u64, coinbase: Address) -> Result<Block, ChainError> {
        let mut block = self.block_template(timestamp, coinbase);
        let mut state = self.engine.clone_state(&self.state);
        self.consensus.initialize(&mut state, &block);
        self.consensus.finalize(&mut state, &block)?;
        block.header.state_root = self.engine.state_root(&state)?;
        Ok(block)
    }

    /// Replays `block` against the tip state and appends it when every
    /// recorded field matches the replay. A replayed state root that differs
    /// from the sealed one is reported as `StateRootMismatch`.
    pub fn add_block(&mut self, block: Block) -> Result<Vec<Receipt>, ChainError> {
        validate_header_linkage(self.tip(), &block)?;
        validate_no_replay(&block)?;

        if !self.consensus.check_seal(&block) {
            return Err(ChainError::InvalidBlock(
                "Invalid Proof-of-Work: Block hash does not meet difficulty target.".to_string(),
            ));
        }

        let expected_tx_root = Block::calculate_tx_root(&block.transactions, &block.allocations);
        if expected_tx_root != block.header.tx_root {
            return Err(ChainError::InvalidBlock(format!(
                "Transaction root mismatch. Expected {}, but got {}.",
                hex::encode(expected_tx_root),
                hex::encode(block.header.tx_root)
            )));
        }

        let mut temp_state = self.engine.clone_state(&self.state);
        self.consensus.initialize(&mut temp_state, &block);

        let mut allocations = block.allocations.iter().peekable();
        let mut gas_used = 0u64;
        let mut receipts = Vec::with_capacity(block.transactions.len());
        for (index, tx) in block.transactions.iter().enumerate() {
            while let Some(allocation) = allocations.next_if(|a| a.before_tx <= index) {
                ensure_funded(&mut temp_state, &allocation.address, allocation.balance);
            }
            let receipt = self.engine.apply_transaction(
                &mut temp_state,
                &block.header.env(gas_used),
                tx,
                &mut NullSink,
            )?;
            gas_used += receipt.gas_used;
            receipts.push(receipt);
        }
        for allocation in allocations {
            ensure_funded(&mut temp_state, &allocation.address, allocation.balance);
        }
        self.consensus.finalize(&mut temp_state, &block)?;

        if gas_used != block.header.gas_used {
            return Err(ChainError::InvalidBlock(format!(
                "Gas used mismatch. Expected {}, but got {}.",
                gas_used, block.header.gas_used
            )));
        }

        let state_root = self.engine.state_root(&temp_state)?;
        if state_root != block.header.state_root {
            return Err(ChainError::StateRootMismatch {
                expected: hex::encode(state_root),
                actual: hex::encode(block.header.state_root),
            });
        }

        info!(
            number = block.header.number,
            hash = %hex::encode(block.hash()),
            txs = block.transactions.len(),
            coinbase = %address_to_hex(&block.header.coinbase),
            "committed block"
        );
        self.blocks.push(block);
        self.state = temp_state;
        Ok(receipts)
    }
}
