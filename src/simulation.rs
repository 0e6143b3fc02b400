//! The simulation facade: one ledger, the identities acting on it, the
//! contracts deployed to it and the event routing between them.

use crate::abi::Token;
use crate::addressbook::{AddressRegistry, Identity};
use crate::blockchain::{Clock, Ledger, LedgerBuilder, Sha256Hash, WorldState};
use crate::cache::CachedSource;
use crate::config::SimConfig;
use crate::contracts::{ContractInstance, ContractRegistry, ContractSource, DEFAULT_TX_GAS_LIMIT};
use crate::error::ChainError;
use crate::events::{EventListener, EventRouter};
use crate::execution::token::{IouToken, IOU_TOKEN};
use crate::execution::{ExecutionEngine, NativeEngine, Receipt};
use crate::transaction::Transaction;
use std::sync::Arc;
use tracing::info;

/// Name of the genesis identity `index`.
pub fn genesis_account_name(index: u32) -> String {
    format!("account{}", index)
}

pub struct Simulation {
    config: SimConfig,
    ledger: Ledger,
    users: AddressRegistry,
    contracts: ContractRegistry,
    router: EventRouter,
    source: Box<dyn ContractSource>,
}

impl Simulation {
    pub fn new(
        config: SimConfig,
        engine: Arc<dyn ExecutionEngine>,
        source: impl ContractSource + 'static,
    ) -> Result<Self, ChainError> {
        Self::assemble(config, engine, Box::new(source), |builder| builder)
    }

    /// Like [`Simulation::new`], with block timestamps taken from `clock`.
    pub fn with_clock(
        config: SimConfig,
        engine: Arc<dyn ExecutionEngine>,
        source: impl ContractSource + 'static,
        clock: impl Clock + 'static,
    ) -> Result<Self, ChainError> {
        Self::assemble(config, engine, Box::new(source), |builder| builder.clock(clock))
    }

    /// A simulation running the built-in native programs, with contract
    /// resolutions cached.
    pub fn native(config: SimConfig) -> Result<Self, ChainError> {
        let engine = NativeEngine::new().with_program(IOU_TOKEN, Arc::new(IouToken));
        let source = CachedSource::new(engine.catalog(), config.source_cache_size);
        Self::new(config, Arc::new(engine), source)
    }

    fn assemble(
        config: SimConfig,
        engine: Arc<dyn ExecutionEngine>,
        source: Box<dyn ContractSource>,
        customize: impl FnOnce(LedgerBuilder) -> LedgerBuilder,
    ) -> Result<Self, ChainError> {
        config.validate()?;
        let mut users = AddressRegistry::new(config.default_balance);
        let mut alloc = WorldState::new();
        for index in 0..config.genesis_accounts {
            let identity = users.insert(Identity::derive(&genesis_account_name(index))?);
            alloc.set_balance(&identity.address, config.default_balance);
        }

        let ledger = customize(Ledger::builder(config.clone(), engine).alloc(alloc)).build()?;
        let contracts = ContractRegistry::new();
        let router = EventRouter::new(contracts.clone());
        ledger.register_listener(Arc::new(router.clone()));

        info!(
            accounts = config.genesis_accounts,
            difficulty = config.difficulty,
            "simulation ready"
        );
        Ok(Self {
            config,
            ledger,
            users,
            contracts,
            router,
            source,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    /// The identity that deploys contracts and collects block rewards.
    pub fn default_account(&mut self) -> Result<Identity, ChainError> {
        self.resolve_user(&genesis_account_name(0))
    }

    pub fn resolve_user(&mut self, name_or_address: &str) -> Result<Identity, ChainError> {
        self.users.resolve(&mut self.ledger, name_or_address)
    }

    /// Deploys the named contract from the default account and subscribes
    /// `listeners` to its events.
    pub fn deploy_contract(
        &mut self,
        name: &str,
        args: Vec<Token>,
        alias: Option<&str>,
        listeners: Vec<Arc<dyn EventListener>>,
    ) -> Result<ContractInstance, ChainError> {
        let artifact = self.source.resolve(name)?;
        let deployer = self.default_account()?;
        let instance = self
            .contracts
            .deploy(&mut self.ledger, &deployer, &artifact, args, alias)?;
        for listener in listeners {
            self.router.subscribe(instance.address, listener);
        }
        Ok(instance)
    }

    pub fn contract(&self, address_or_alias: &str) -> Result<ContractInstance, ChainError> {
        self.contracts.lookup(address_or_alias)
    }

    pub fn subscribe(&self, address_or_alias: &str, listener: Arc<dyn EventListener>) -> Result<(), ChainError> {
        let instance = self.contracts.lookup(address_or_alias)?;
        self.router.subscribe(instance.address, listener);
        Ok(())
    }

    /// Calls `function` on a contract as `sender`, recording the call in the
    /// head block.
    pub fn transact(
        &mut self,
        sender: &str,
        contract: &str,
        function: &str,
        args: Vec<Token>,
        value: u128,
    ) -> Result<Receipt, ChainError> {
        let tx = self.contract_call(sender, contract, function, args, value)?;
        self.ledger.transact(tx)
    }

    /// Evaluates `function` against the head state without recording it.
    pub fn call_contract(
        &mut self,
        sender: &str,
        contract: &str,
        function: &str,
        args: Vec<Token>,
    ) -> Result<Vec<Token>, ChainError> {
        let tx = self.contract_call(sender, contract, function, args, 0)?;
        Ok(self.ledger.query(&tx)?.output)
    }

    pub fn transfer(&mut self, from: &str, to: &str, value: u128) -> Result<Receipt, ChainError> {
        let sender = self.resolve_user(from)?;
        let recipient = self.resolve_user(to)?;
        let nonce = self.ledger.nonce(&sender.address)?;
        let tx = Transaction::transfer(sender.address, nonce, recipient.address, value, DEFAULT_TX_GAS_LIMIT)
            .signed(&sender.keypair()?)?;
        self.ledger.transact(tx)
    }

    pub fn balance(&mut self, user: &str) -> Result<u128, ChainError> {
        let identity = self.resolve_user(user)?;
        Ok(self.ledger.balance(&identity.address))
    }

    pub fn head_number(&self) -> u64 {
        self.ledger.head_number()
    }

    /// Mines `blocks` blocks with the default account as beneficiary.
    pub fn advance(&mut self, blocks: u64) -> Result<Vec<Sha256Hash>, ChainError> {
        let beneficiary = self.default_account()?;
        self.ledger.mine(blocks, beneficiary.address)
    }

    fn contract_call(
        &mut self,
        sender: &str,
        contract: &str,
        function: &str,
        args: Vec<Token>,
        value: u128,
    ) -> Result<Transaction, ChainError> {
        let identity = self.resolve_user(sender)?;
        let instance = self.contracts.lookup(contract)?;
        let nonce = self.ledger.nonce(&identity.address)?;
        Transaction::call(
            identity.address,
            nonce,
            instance.address,
            function,
            args,
            value,
            DEFAULT_TX_GAS_LIMIT,
        )
        .signed(&identity.keypair()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DecodedEvent, ListenerError};
    use parking_lot::Mutex;

    fn simulation() -> Simulation {
        let config = SimConfig {
            genesis_accounts: 2,
            ..SimConfig::default()
        };
        let engine = NativeEngine::new().with_program(IOU_TOKEN, Arc::new(IouToken));
        let catalog = engine.catalog();
        Simulation::with_clock(config, Arc::new(engine), catalog, || 1_000u64).unwrap()
    }

    #[test]
    fn test_genesis_accounts_are_funded() {
        let mut sim = simulation();
        let default_balance = sim.config().default_balance;
        assert_eq!(sim.balance("account0").unwrap(), default_balance);
        assert_eq!(sim.balance("account1").unwrap(), default_balance);
        assert!(sim.ledger().head().block().allocations.is_empty());
    }

    #[test]
    fn test_transfer_between_users() {
        let mut sim = simulation();
        sim.transfer("alice", "bob", 250).unwrap();
        let default_balance = sim.config().default_balance;
        assert_eq!(sim.balance("bob").unwrap(), default_balance + 250);

        sim.advance(1).unwrap();
        assert_eq!(sim.head_number(), 1);
        assert_eq!(sim.balance("bob").unwrap(), default_balance + 250);
    }

    #[test]
    fn test_token_events_reach_subscribers() {
        let mut sim = simulation();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: Arc<dyn EventListener> = Arc::new(move |event: &DecodedEvent| -> Result<(), ListenerError> {
            sink.lock().push(event.clone());
            Ok(())
        });

        sim.deploy_contract(IOU_TOKEN, vec![Token::Uint(1_000)], Some("iou"), vec![listener])
            .unwrap();
        let bob = sim.resolve_user("bob").unwrap();
        sim.transact("account0", "iou", "transfer", vec![Token::Address(bob.address), Token::Uint(40)], 0)
            .unwrap();
        sim.advance(1).unwrap();

        let events = seen.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "Transfer");
        assert_eq!(events[0].get("amount"), Some(&Token::Uint(40)));

        let balance = sim
            .call_contract("bob", "iou", "balanceOf", vec![Token::Address(bob.address)])
            .unwrap();
        assert_eq!(balance, vec![Token::Uint(40)]);
    }

    #[test]
    fn test_unknown_names_fail() {
        let mut sim = simulation();
        assert!(matches!(sim.contract("missing"), Err(ChainError::UnknownContract(_))));
        assert!(matches!(
            sim.deploy_contract("Missing", vec![], None, vec![]),
            Err(ChainError::UnknownContract(_))
        ));
        assert!(matches!(
            sim.resolve_user("0x0000000000000000000000000000000000000001"),
            Err(ChainError::UnknownIdentity(_))
        ));
    }
}
