//! Proof-of-work search.

use crate::blockchain::Block;
use crate::error::ChainError;
use tracing::debug;

/// The proof-of-work collaborator: searches nonces starting at `start_nonce`
/// for at most `max_rounds` attempts.
pub trait ProofOfWork: Send + Sync {
    fn mine(&self, block: Block, max_rounds: u64, start_nonce: u64) -> Result<Block, ChainError>;
}

/// Linear nonce search over the SHA-256 header hash.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashMiner;

impl ProofOfWork for HashMiner {
    fn mine(&self, mut block: Block, max_rounds: u64, start_nonce: u64) -> Result<Block, ChainError> {
        for round in 0..max_rounds {
            block.header.nonce = start_nonce.wrapping_add(round);
            if block.meets_difficulty() {
                debug!(
                    number = block.header.number,
                    nonce = block.header.nonce,
                    rounds = round + 1,
                    "found proof of work"
                );
                return Ok(block);
            }
        }
        Err(ChainError::MiningExhausted { rounds: max_rounds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{empty_uncles_hash, BlockHeader};

    fn block(difficulty: u32) -> Block {
        Block::empty(BlockHeader {
            number: 1,
            parent_hash: [1u8; 32],
            timestamp: 1,
            coinbase: [0u8; 20],
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
    fn test_mined_block_meets_target() {
        let mined = HashMiner.mine(block(8), 1_000_000, 0).unwrap();
        assert!(mined.meets_difficulty());
    }

    #[test]
    fn test_zero_rounds_exhausts() {
        let result = HashMiner.mine(block(1), 0, 0);
        assert!(matches!(result, Err(ChainError::MiningExhausted { rounds: 0 })));
    }

    #[test]
    fn test_impossible_difficulty_exhausts() {
        let result = HashMiner.mine(block(255), 50, 0);
        assert!(matches!(result, Err(ChainError::MiningExhausted { rounds: 50 })));
    }
}
