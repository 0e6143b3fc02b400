use crate::blockchain::{Block, WorldState};
use crate::error::ChainError;
use tracing::debug;

/// Lifecycle hooks applied to a block/state pair around transaction
/// application: `initialize` when a block is opened, `finalize` before it is
/// sealed. The same hooks run when the chain replays a block, so both sides
/// must be deterministic.
pub trait ConsensusStrategy: Send + Sync {
    fn initialize(&self, state: &mut WorldState, block: &Block) {
        let _ = (state, block);
    }

    /// Settles pending rewards for `block` into `state`.
    fn finalize(&self, state: &mut WorldState, block: &Block) -> Result<(), ChainError>;

    /// Checks the block's proof (seal).
    fn check_seal(&self, block: &Block) -> bool;
}

/// Proof-of-work consensus: a fixed reward to the coinbase, seals checked
/// against the header difficulty.
#[derive(Debug, Clone, Copy)]
pub struct PowConsensus {
    pub block_reward: u128,
}

impl PowConsensus {
    pub fn new(block_reward: u128) -> Self {
        Self { block_reward }
    }
}

impl ConsensusStrategy for PowConsensus {
    fn initialize(&self, _state: &mut WorldState, block: &Block) {
        debug!(number = block.header.number, "opened block");
    }

    fn finalize(&self, state: &mut WorldState, block: &Block) -> Result<(), ChainError> {
        state.credit(&block.header.coinbase, self.block_reward)
    }

    fn check_seal(&self, block: &Block) -> bool {
        block.meets_difficulty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{empty_uncles_hash, BlockHeader};

    fn block(coinbase: [u8; 20], difficulty: u32) -> Block {
        Block::empty(BlockHeader {
            number: 1,
            parent_hash: [0u8; 32],
            timestamp: 1,
            coinbase,
            gas_limit: 1,
            gas_used: 0,
            state_root: [0u8; 32],
            tx_root: [0u8; 32],
            uncles_hash: empty_uncles_hash(),
            difficulty,
            nonce: 0,
        })
    }

    #[test]
    fn test_finalize_credits_coinbase() {
        let consensus = PowConsensus::new(7);
        let mut state = WorldState::new();
        let block = block([3u8; 20], 0);

        consensus.finalize(&mut state, &block).unwrap();
        consensus.finalize(&mut state, &block).unwrap();
        assert_eq!(state.balance(&[3u8; 20]), 14);
    }

    #[test]
    fn test_zero_difficulty_is_always_sealed() {
        assert!(PowConsensus::new(0).check_seal(&block([0u8; 20], 0)));
    }
}
