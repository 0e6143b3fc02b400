//! Integration tests for mining, commits and head rotation

use simchain::blockchain::{Block, Ledger, LedgerPhase, WorldState};
use simchain::config::SimConfig;
use simchain::crypto::KeyPair;
use simchain::execution::{BlockEnv, ExecutionEngine, LogSink, NativeEngine, Receipt};
use simchain::miner::{HashMiner, ProofOfWork};
use simchain::transaction::Transaction;
use simchain::ChainError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Fails its first search, then behaves like [`HashMiner`].
struct FlakyMiner {
    failed_once: AtomicBool,
}

impl ProofOfWork for FlakyMiner {
    fn mine(&self, block: Block, max_rounds: u64, start_nonce: u64) -> Result<Block, ChainError> {
        if !self.failed_once.swap(true, Ordering::SeqCst) {
            return Err(ChainError::MiningExhausted { rounds: max_rounds });
        }
        HashMiner.mine(block, max_rounds, start_nonce)
    }
}

/// Credits the sender one extra unit on every second transaction it applies,
/// so a block replayed by the chain never matches the head it was sealed from.
struct DivergingEngine {
    inner: NativeEngine,
    applied: AtomicU64,
}

impl ExecutionEngine for DivergingEngine {
    fn apply_transaction(
        &self,
        state: &mut WorldState,
        env: &BlockEnv,
        tx: &Transaction,
        sink: &mut dyn LogSink,
    ) -> Result<Receipt, ChainError> {
        let receipt = self.inner.apply_transaction(state, env, tx, sink)?;
        if self.applied.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
            state.credit(&tx.sender, 1)?;
        }
        Ok(receipt)
    }
}

fn funded_ledger(key: &KeyPair) -> Result<Ledger, ChainError> {
    let mut alloc = WorldState::new();
    alloc.set_balance(&key.address(), 1_000_000);
    let ticks = AtomicU64::new(5_000);
    Ledger::builder(SimConfig::default(), Arc::new(NativeEngine::new()))
        .alloc(alloc)
        .clock(move || ticks.fetch_add(3, Ordering::SeqCst))
        .build()
}

fn transfer(ledger: &mut Ledger, key: &KeyPair, to: [u8; 20], value: u128) -> Result<(), ChainError> {
    let nonce = ledger.nonce(&key.address())?;
    let tx = Transaction::transfer(key.address(), nonce, to, value, 50_000).signed(key)?;
    ledger.transact(tx)?;
    Ok(())
}

#[test]
fn test_mine_one_commits_recomputable_root() -> Result<(), Box<dyn std::error::Error>> {
    let key = KeyPair::from_secret_bytes(&[11u8; 32])?;
    let mut ledger = funded_ledger(&key)?;
    transfer(&mut ledger, &key, [2u8; 20], 10)?;
    ledger.ensure_funded(&[3u8; 20], 99)?;
    transfer(&mut ledger, &key, [3u8; 20], 1)?;

    let before = ledger.head_number();
    ledger.mine(1, [9u8; 20])?;

    assert_eq!(ledger.head_number(), before + 1);
    let tip = ledger.chain().tip();
    assert_eq!(tip.header.state_root, ledger.chain().state().root()?);
    assert_eq!(tip.transactions.len(), 2);
    assert_eq!(ledger.chain().state().balance(&[3u8; 20]), 100);
    Ok(())
}

#[test]
fn test_mine_many_appends_ordered_blocks() -> Result<(), Box<dyn std::error::Error>> {
    let key = KeyPair::from_secret_bytes(&[11u8; 32])?;
    let mut ledger = funded_ledger(&key)?;
    transfer(&mut ledger, &key, [2u8; 20], 10)?;

    let hashes = ledger.mine(4, [9u8; 20])?;
    assert_eq!(hashes.len(), 4);
    assert_eq!(ledger.head_number(), 4);

    let blocks = ledger.chain().blocks();
    for pair in blocks.windows(2) {
        assert_eq!(pair[1].header.number, pair[0].header.number + 1);
        assert_eq!(pair[1].header.parent_hash, pair[0].hash());
        assert!(pair[1].header.timestamp >= pair[0].header.timestamp);
    }
    for (hash, block) in hashes.iter().zip(&blocks[1..]) {
        assert_eq!(hash, &block.hash());
    }
    // Only the first block carries the pending transaction.
    assert_eq!(blocks[1].transactions.len(), 1);
    assert!(blocks[2..].iter().all(|b| b.transactions.is_empty()));
    Ok(())
}

#[test]
fn test_head_rotates_onto_new_tip() -> Result<(), Box<dyn std::error::Error>> {
    let key = KeyPair::from_secret_bytes(&[11u8; 32])?;
    let mut ledger = funded_ledger(&key)?;
    transfer(&mut ledger, &key, [2u8; 20], 10)?;
    ledger.mine(1, [9u8; 20])?;

    let head = ledger.head();
    assert!(head.block().transactions.is_empty());
    assert_eq!(head.block().header.number, ledger.head_number() + 1);
    assert_eq!(head.block().header.parent_hash, ledger.chain().tip().hash());
    assert_eq!(head.state().root()?, ledger.chain().state().root()?);

    // The nonce carried over from the committed block.
    transfer(&mut ledger, &key, [2u8; 20], 10)?;
    ledger.mine(1, [9u8; 20])?;
    assert_eq!(ledger.chain().state().balance(&[2u8; 20]), 20);
    Ok(())
}

#[test]
fn test_mining_exhaustion_is_recoverable() -> Result<(), Box<dyn std::error::Error>> {
    let key = KeyPair::from_secret_bytes(&[11u8; 32])?;
    let mut alloc = WorldState::new();
    alloc.set_balance(&key.address(), 1_000_000);
    let mut ledger = Ledger::builder(SimConfig::default(), Arc::new(NativeEngine::new()))
        .alloc(alloc)
        .miner(FlakyMiner {
            failed_once: AtomicBool::new(false),
        })
        .clock(|| 9_000u64)
        .build()?;
    transfer(&mut ledger, &key, [2u8; 20], 10)?;

    let err = ledger.mine(1, [9u8; 20]).unwrap_err();
    assert!(matches!(err, ChainError::MiningExhausted { .. }));
    assert!(!err.is_fatal());
    assert_eq!(ledger.phase(), LedgerPhase::Building);
    assert_eq!(ledger.head_number(), 0);

    ledger.mine(1, [9u8; 20])?;
    assert_eq!(ledger.head_number(), 1);
    assert_eq!(ledger.chain().tip().transactions.len(), 1);
    Ok(())
}

#[test]
fn test_wrong_nonce_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let key = KeyPair::from_secret_bytes(&[11u8; 32])?;
    let mut ledger = funded_ledger(&key)?;
    let tx = Transaction::transfer(key.address(), 5, [2u8; 20], 1, 50_000).signed(&key)?;

    assert!(matches!(ledger.transact(tx), Err(ChainError::InvalidTransaction(_))));
    assert!(ledger.head().block().transactions.is_empty());
    Ok(())
}

#[test]
fn test_diverging_replay_is_fatal() -> Result<(), Box<dyn std::error::Error>> {
    let key = KeyPair::from_secret_bytes(&[11u8; 32])?;
    let mut alloc = WorldState::new();
    alloc.set_balance(&key.address(), 1_000_000);
    let engine = DivergingEngine {
        inner: NativeEngine::new(),
        applied: AtomicU64::new(0),
    };
    let mut ledger = Ledger::builder(SimConfig::default(), Arc::new(engine))
        .alloc(alloc)
        .clock(|| 9_000u64)
        .build()?;
    transfer(&mut ledger, &key, [2u8; 20], 10)?;

    let err = ledger.mine(1, [9u8; 20]).unwrap_err();
    // The head keeps the finalized state the block was sealed with.
    let sealed_root = hex::encode(ledger.head().state().root()?);
    match &err {
        ChainError::StateRootMismatch { expected, actual } => {
            assert_eq!(actual, &sealed_root);
            assert_ne!(expected, actual);
        }
        other => panic!("expected a state root mismatch, got {:?}", other),
    }
    assert!(err.is_fatal());
    assert_eq!(ledger.phase(), LedgerPhase::Failed);
    assert_eq!(ledger.head_number(), 0);

    assert!(matches!(ledger.mine(1, [9u8; 20]), Err(ChainError::LedgerFailed)));
    assert!(matches!(ledger.nonce(&key.address()), Err(ChainError::LedgerFailed)));
    let tx = Transaction::transfer(key.address(), 1, [2u8; 20], 1, 50_000).signed(&key)?;
    assert!(matches!(ledger.transact(tx), Err(ChainError::LedgerFailed)));
    Ok(())
}
