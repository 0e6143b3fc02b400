//! The ledger: a committed [`Chain`] plus the mutable head state that pending
//! transactions execute against.
//!
//! Transactions are applied to the head immediately so their effects (and
//! their logs) are visible before any block is mined. `mine` seals the head
//! into a block, commits it to the chain, which replays it and must arrive
//! at the same state root, and opens a fresh head on top of the new tip.

use crate::abi::Log;
use crate::config::SimConfig;
use crate::consensus::{ConsensusStrategy, PowConsensus};
use crate::crypto::{address_to_hex, Address};
use crate::error::{ChainError, ListenerFailure};
use crate::execution::{ExecutionEngine, LogSink, NullSink, Receipt};
use crate::miner::{HashMiner, ProofOfWork};
use crate::transaction::Transaction;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::core::{ensure_funded, Allocation, Block, Chain, Sha256Hash, WorldState};

/// Receives every log emitted while a transaction executes on the head.
pub trait LogListener: Send + Sync {
    fn on_log(&self, log: &Log) -> Result<(), ChainError>;
}

/// The ledger's listener list. Every head state holds a clone of the same
/// `Arc`, so registrations made at any time are seen by all of them.
pub type LogListeners = Arc<RwLock<Vec<Arc<dyn LogListener>>>>;

/// Source of wall-clock seconds for block timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }
}

impl<F> Clock for F
where
    F: Fn() -> u64 + Send + Sync,
{
    fn now(&self) -> u64 {
        self()
    }
}

/// Where the ledger is in its block lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerPhase {
    /// Accepting transactions on the head.
    Building,
    Finalizing,
    Mining,
    Committing,
    /// A commit diverged from the head; the ledger refuses further work.
    Failed,
}

/// The open block: its state, template, and what has run against it so far.
pub struct HeadState {
    state: WorldState,
    block: Block,
    receipts: Vec<Receipt>,
    listeners: LogListeners,
}

impl HeadState {
    fn open(
        chain: &Chain,
        timestamp: u64,
        coinbase: Address,
        listeners: LogListeners,
        engine: &dyn ExecutionEngine,
        consensus: &dyn ConsensusStrategy,
    ) -> Self {
        let block = chain.block_template(timestamp, coinbase);
        let mut state = engine.clone_state(chain.state());
        consensus.initialize(&mut state, &block);
        Self {
            state,
            block,
            receipts: Vec::new(),
            listeners,
        }
    }

    pub fn state(&self) -> &WorldState {
        &self.state
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn receipts(&self) -> &[Receipt] {
        &self.receipts
    }

    pub fn listeners(&self) -> &LogListeners {
        &self.listeners
    }
}

/// Forwards logs to the registered listeners, collecting their failures
/// instead of interrupting the transaction. A log from a contract no
/// listener knows is kept apart as `unrouted` and fails the transaction.
struct Dispatcher<'a> {
    listeners: &'a LogListeners,
    failures: &'a mut Vec<ListenerFailure>,
    unrouted: Option<ChainError>,
}

impl LogSink for Dispatcher<'_> {
    fn emit(&mut self, log: &Log) {
        // Snapshot so a listener may register further listeners.
        let listeners: Vec<Arc<dyn LogListener>> = self.listeners.read().clone();
        for listener in listeners {
            match listener.on_log(log) {
                Ok(()) => {}
                Err(e @ ChainError::UnknownContract(_)) => {
                    self.unrouted.get_or_insert(e);
                }
                Err(ChainError::ListenerFailure(failures)) => self.failures.extend(failures),
                Err(e) => self
                    .failures
                    .push(ListenerFailure::new(address_to_hex(&log.address), e.to_string())),
            }
        }
    }
}

/// Builder for [`Ledger`]; consensus, miner and clock default to
/// [`PowConsensus`], [`HashMiner`] and [`SystemClock`].
pub struct LedgerBuilder {
    config: SimConfig,
    engine: Arc<dyn ExecutionEngine>,
    alloc: WorldState,
    consensus: Option<Arc<dyn ConsensusStrategy>>,
    miner: Option<Box<dyn ProofOfWork>>,
    clock: Option<Box<dyn Clock>>,
}

impl LedgerBuilder {
    /// Accounts present in the genesis state.
    pub fn alloc(mut self, alloc: WorldState) -> Self {
        self.alloc = alloc;
        self
    }

    pub fn consensus(mut self, consensus: Arc<dyn ConsensusStrategy>) -> Self {
        self.consensus = Some(consensus);
        self
    }

    pub fn miner(mut self, miner: impl ProofOfWork + 'static) -> Self {
        self.miner = Some(Box::new(miner));
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Box::new(clock));
        self
    }

    pub fn build(self) -> Result<Ledger, ChainError> {
        self.config.validate()?;
        let consensus = self
            .consensus
            .unwrap_or_else(|| Arc::new(PowConsensus::new(self.config.block_reward)));
        let clock = self.clock.unwrap_or_else(|| Box::new(SystemClock));

        let genesis_timestamp = clock.now().saturating_sub(1);
        let chain = Chain::genesis(
            self.alloc,
            genesis_timestamp,
            self.config.gas_limit,
            self.config.difficulty,
            self.engine.clone(),
            consensus.clone(),
        )?;

        let listeners: LogListeners = Arc::new(RwLock::new(Vec::new()));
        let head = HeadState::open(
            &chain,
            genesis_timestamp + 1,
            [0u8; 20],
            listeners.clone(),
            self.engine.as_ref(),
            consensus.as_ref(),
        );

        Ok(Ledger {
            mining_rounds: self.config.mining_rounds,
            chain,
            head,
            engine: self.engine,
            consensus,
            miner: self.miner.unwrap_or_else(|| Box::new(HashMiner)),
            clock,
            listeners,
            failures: Vec::new(),
            phase: LedgerPhase::Building,
        })
    }
}

pub struct Ledger {
    chain: Chain,
    head: HeadState,
    engine: Arc<dyn ExecutionEngine>,
    consensus: Arc<dyn ConsensusStrategy>,
    miner: Box<dyn ProofOfWork>,
    clock: Box<dyn Clock>,
    listeners: LogListeners,
    failures: Vec<ListenerFailure>,
    mining_rounds: u64,
    phase: LedgerPhase,
}

impl Ledger {
    pub fn builder(config: SimConfig, engine: Arc<dyn ExecutionEngine>) -> LedgerBuilder {
        LedgerBuilder {
            config,
            engine,
            alloc: WorldState::new(),
            consensus: None,
            miner: None,
            clock: None,
        }
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn head(&self) -> &HeadState {
        &self.head
    }

    pub fn phase(&self) -> LedgerPhase {
        self.phase
    }

    /// Number of the latest committed block; genesis is 0.
    pub fn head_number(&self) -> u64 {
        self.chain.height()
    }

    pub fn balance(&self, address: &Address) -> u128 {
        self.head.state.balance(address)
    }

    pub fn nonce(&self, address: &Address) -> Result<u64, ChainError> {
        self.ensure_usable()?;
        Ok(self.head.state.nonce(address))
    }

    /// Adds a listener for logs emitted by future transactions. It stays
    /// registered across head rotations.
    pub fn register_listener(&self, listener: Arc<dyn LogListener>) {
        self.listeners.write().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Address the next deployment from `deployer` will create.
    pub fn next_contract_address(&self, deployer: &Address) -> Result<Address, ChainError> {
        let nonce = self.nonce(deployer)?;
        Ok(self.engine.contract_address(deployer, nonce))
    }

    /// Creates `address` with `balance` on the head if it has no account yet.
    /// Returns whether an account was created.
    pub fn ensure_funded(&mut self, address: &Address, balance: u128) -> Result<bool, ChainError> {
        self.ensure_usable()?;
        if !ensure_funded(&mut self.head.state, address, balance) {
            return Ok(false);
        }
        self.head.block.allocations.push(Allocation {
            address: *address,
            balance,
            before_tx: self.head.block.transactions.len(),
        });
        debug!(address = %address_to_hex(address), balance, "seeded account");
        Ok(true)
    }

    /// Executes `tx` against the head state, dispatching its logs to the
    /// registered listeners as they are emitted.
    ///
    /// Listener failures do not fail the transaction; they are reported by
    /// the next [`Ledger::mine`]. A log from a contract the listeners do not
    /// know fails it with `UnknownContract`: the transaction is then left out
    /// of the head block and its state changes are discarded.
    pub fn transact(&mut self, tx: Transaction) -> Result<Receipt, ChainError> {
        self.ensure_usable()?;
        let env = self.head.block.header.env(self.head.block.header.gas_used);
        let mut state = self.engine.clone_state(&self.head.state);
        let mut dispatcher = Dispatcher {
            listeners: &self.head.listeners,
            failures: &mut self.failures,
            unrouted: None,
        };
        let receipt = self.engine.apply_transaction(&mut state, &env, &tx, &mut dispatcher)?;
        if let Some(err) = dispatcher.unrouted.take() {
            warn!(tx = %tx.hash_str(), error = %err, "transaction emitted an unroutable log");
            return Err(err);
        }

        self.head.state = state;
        self.head.block.header.gas_used += receipt.gas_used;
        self.head.block.transactions.push(tx);
        self.head.receipts.push(receipt.clone());
        Ok(receipt)
    }

    /// Runs `tx` against a copy of the head state and discards the result.
    /// Nothing is dispatched or recorded.
    pub fn query(&self, tx: &Transaction) -> Result<Receipt, ChainError> {
        self.ensure_usable()?;
        let env = self.head.block.header.env(self.head.block.header.gas_used);
        let mut scratch = self.engine.clone_state(&self.head.state);
        self.engine.apply_transaction(&mut scratch, &env, tx, &mut NullSink)
    }

    /// Listener failures collected since the last report.
    pub fn take_listener_failures(&mut self) -> Vec<ListenerFailure> {
        std::mem::take(&mut self.failures)
    }

    /// Seals the head and commits it, then `count - 1` further empty blocks,
    /// all paying `beneficiary`. Returns the committed block hashes.
    ///
    /// `MiningExhausted` leaves the ledger usable: if it hits the first
    /// block the head is restored unchanged, otherwise the blocks committed
    /// so far are kept. A commit failure is fatal; a replay that diverges
    /// from the head comes back as `StateRootMismatch`.
    /// Listener failures collected during the head's transactions are
    /// returned once the blocks are committed.
    pub fn mine(&mut self, count: u64, beneficiary: Address) -> Result<Vec<Sha256Hash>, ChainError> {
        self.ensure_usable()?;
        if count == 0 {
            return Err(ChainError::InvalidBlock("must mine at least one block".to_string()));
        }

        let snapshot = (self.head.state.clone(), self.head.block.clone());
        let block = match self.seal_head(beneficiary) {
            Ok(block) => block,
            Err(e) => {
                (self.head.state, self.head.block) = snapshot;
                self.phase = LedgerPhase::Building;
                warn!(error = %e, "head block was not sealed");
                return Err(e);
            }
        };

        self.phase = LedgerPhase::Committing;
        if let Err(e) = self.chain.add_block(block) {
            return Err(self.fail(e));
        }
        let mut hashes = vec![self.chain.tip().hash()];

        let mut outcome = Ok(());
        for _ in 1..count {
            self.phase = LedgerPhase::Finalizing;
            let candidate = match self.chain.head_candidate(self.clock.now(), beneficiary) {
                Ok(candidate) => candidate,
                Err(e) => return Err(self.fail(e)),
            };
            self.phase = LedgerPhase::Mining;
            let block = match self.miner.mine(candidate, self.mining_rounds, 0) {
                Ok(block) => block,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            };
            self.phase = LedgerPhase::Committing;
            if let Err(e) = self.chain.add_block(block) {
                return Err(self.fail(e));
            }
            hashes.push(self.chain.tip().hash());
        }

        self.rotate_head();
        info!(
            blocks = hashes.len(),
            head = self.chain.height(),
            "mined blocks"
        );
        outcome?;

        let failures = self.take_listener_failures();
        if !failures.is_empty() {
            warn!(failures = failures.len(), "listeners failed during the mined block");
            return Err(ChainError::ListenerFailure(failures));
        }
        Ok(hashes)
    }

    /// Finalizes the head with `beneficiary` as coinbase and runs the
    /// proof-of-work search on it.
    fn seal_head(&mut self, beneficiary: Address) -> Result<Block, ChainError> {
        self.phase = LedgerPhase::Finalizing;
        let head = &mut self.head;
        head.block.header.coinbase = beneficiary;
        self.consensus.finalize(&mut head.state, &head.block)?;
        head.block.header.state_root = self.engine.state_root(&head.state)?;
        head.block.header.tx_root = Block::calculate_tx_root(&head.block.transactions, &head.block.allocations);

        self.phase = LedgerPhase::Mining;
        self.miner.mine(head.block.clone(), self.mining_rounds, 0)
    }

    /// Opens a new head on the chain tip, sharing the ledger's listener list.
    fn rotate_head(&mut self) {
        self.head = HeadState::open(
            &self.chain,
            self.clock.now(),
            self.head.block.header.coinbase,
            self.listeners.clone(),
            self.engine.as_ref(),
            self.consensus.as_ref(),
        );
        self.phase = LedgerPhase::Building;
    }

    fn fail(&mut self, err: ChainError) -> ChainError {
        self.phase = LedgerPhase::Failed;
        error!(error = %err, head = self.chain.height(), "ledger failed");
        err
    }

    fn ensure_usable(&self) -> Result<(), ChainError> {
        if self.phase == LedgerPhase::Failed {
            return Err(ChainError::LedgerFailed);
        }
        Ok(())
    }
}
