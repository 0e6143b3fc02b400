use crate::blockchain::core::chain::{empty_uncles_hash, Block};
use crate::crypto::address_to_hex;
use crate::error::ChainError;

/// Checks that `block` is a well-formed direct successor of `parent`.
pub fn validate_header_linkage(parent: &Block, block: &Block) -> Result<(), ChainError> {
    let (parent, header) = (&parent.header, &block.header);

    if header.number != parent.number + 1 {
        return Err(ChainError::InvalidBlock(format!(
            "Invalid block number. Expected {}, but got {}.",
            parent.number + 1,
            header.number
        )));
    }

    let parent_hash = parent.hash();
    if header.parent_hash != parent_hash {
        return Err(ChainError::InvalidBlock(format!(
            "Invalid parent hash. Expected {}, but got {}.",
            hex::encode(parent_hash),
            hex::encode(header.parent_hash)
        )));
    }

    if header.timestamp <= parent.timestamp {
        return Err(ChainError::InvalidBlock(format!(
            "Timestamp {} is not after parent timestamp {}.",
            header.timestamp, parent.timestamp
        )));
    }

    if header.gas_limit != parent.gas_limit || header.difficulty != parent.difficulty {
        return Err(ChainError::InvalidBlock(
            "Gas limit and difficulty must match the parent block.".to_string(),
        ));
    }

    if header.gas_used > header.gas_limit {
        return Err(ChainError::InvalidBlock(format!(
            "Gas used {} exceeds gas limit {}.",
            header.gas_used, header.gas_limit
        )));
    }

    if header.uncles_hash != empty_uncles_hash() {
        return Err(ChainError::InvalidBlock("Blocks may not include uncles.".to_string()));
    }
    Ok(())
}

/// Rejects blocks that contain the same (sender, nonce) pair twice.
pub fn validate_no_replay(block: &Block) -> Result<(), ChainError> {
    let mut seen = std::collections::HashMap::new();
    for tx in &block.transactions {
        if let Some(conflicting_tx_hash) = seen.insert((tx.sender, tx.nonce), tx.hash()) {
            return Err(ChainError::InvalidTransaction(format!(
                "Replay detected in block. Sender {} uses nonce {} in both {} and {}",
                address_to_hex(&tx.sender),
                tx.nonce,
                hex::encode(conflicting_tx_hash),
                tx.hash_str()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::core::chain::BlockHeader;
    use crate::transaction::Transaction;

    fn genesis() -> Block {
        Block::empty(BlockHeader {
            number: 0,
            parent_hash: [0u8; 32],
            timestamp: 10,
            coinbase: [0u8; 20],
            gas_limit: 1_000,
            gas_used: 0,
            state_root: [0u8; 32],
            tx_root: Block::calculate_tx_root(&[], &[]),
            uncles_hash: empty_uncles_hash(),
            difficulty: 1,
            nonce: 0,
        })
    }

    fn child(parent: &Block) -> Block {
        let mut block = parent.clone();
        block.header.number += 1;
        block.header.parent_hash = parent.hash();
        block.header.timestamp += 1;
        block
    }

    #[test]
    fn test_valid_successor_passes() {
        let parent = genesis();
        assert!(validate_header_linkage(&parent, &child(&parent)).is_ok());
    }

    #[test]
    fn test_number_gap_and_stale_timestamp_fail() {
        let parent = genesis();

        let mut skipped = child(&parent);
        skipped.header.number += 1;
        assert!(validate_header_linkage(&parent, &skipped).is_err());

        let mut stale = child(&parent);
        stale.header.timestamp = parent.header.timestamp;
        assert!(validate_header_linkage(&parent, &stale).is_err());
    }

    #[test]
    fn test_duplicate_nonce_is_replay() {
        let mut block = child(&genesis());
        let tx = Transaction::transfer([1u8; 20], 0, [2u8; 20], 1, 21_000);
        let mut again = tx.clone();
        again.value = 2;
        block.transactions = vec![tx, again];
        assert!(validate_no_replay(&block).is_err());
    }
}
