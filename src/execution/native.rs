//! In-tree execution engine running contracts written as Rust programs.
//!
//! A deployed account's code is an opaque id (`native:<name>`) that selects
//! one of the installed [`NativeContract`] programs.

use super::{
    BlockEnv, ExecutionEngine, GasMeter, LogSink, Receipt, CODE_BYTE_GAS, DEPLOY_GAS, LOG_DATA_BYTE_GAS,
    LOG_GAS, LOG_TOPIC_GAS, STORAGE_READ_GAS, STORAGE_WRITE_GAS, TX_BASE_GAS,
};
use crate::abi::{ContractInterface, EventDescriptor, Log, Token, Word};
use crate::blockchain::{StorageKey, WorldState};
use crate::contracts::{ContractArtifact, ContractCatalog};
use crate::crypto::{address_to_hex, sha256, Address, ADDRESS_LENGTH};
use crate::error::ChainError;
use crate::transaction::{Transaction, TxKind};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const NATIVE_CODE_PREFIX: &[u8] = b"native:";

/// Code id stored in a contract account running the program called `name`.
pub fn native_code(name: &str) -> Vec<u8> {
    let mut code = NATIVE_CODE_PREFIX.to_vec();
    code.extend_from_slice(name.as_bytes());
    code
}

/// Address of a contract created by `sender` with `nonce`.
pub fn contract_address(sender: &Address, nonce: u64) -> Address {
    let mut preimage = sender.to_vec();
    preimage.extend_from_slice(&nonce.to_be_bytes());
    let digest = sha256(&preimage);
    let mut address = [0u8; ADDRESS_LENGTH];
    address.copy_from_slice(&digest[32 - ADDRESS_LENGTH..]);
    address
}

/// A contract program. Returning an error reverts the whole transaction.
pub trait NativeContract: Send + Sync {
    fn interface(&self) -> ContractInterface;

    fn construct(&self, ctx: &mut CallContext<'_>, args: &[Token]) -> Result<(), ChainError> {
        let _ = (ctx, args);
        Ok(())
    }

    fn call(&self, ctx: &mut CallContext<'_>, function: &str, args: &[Token]) -> Result<Vec<Token>, ChainError>;
}

/// What a running contract can see and touch.
pub struct CallContext<'a> {
    state: &'a mut WorldState,
    sink: &'a mut dyn LogSink,
    logs: &'a mut Vec<Log>,
    gas: &'a mut GasMeter,
    pub address: Address,
    pub sender: Address,
    pub value: u128,
    pub block_number: u64,
    pub timestamp: u64,
}

impl<'a> CallContext<'a> {
    /// Storage slot for `name`, optionally keyed like a mapping entry.
    pub fn slot(name: &str, keys: &[Token]) -> StorageKey {
        let mut preimage = name.as_bytes().to_vec();
        for key in keys {
            preimage.extend_from_slice(&key.to_word());
        }
        sha256(&preimage)
    }

    pub fn load(&mut self, key: &StorageKey) -> Result<Word, ChainError> {
        self.gas.charge(STORAGE_READ_GAS)?;
        Ok(self.state.storage(&self.address, key))
    }

    pub fn store(&mut self, key: StorageKey, value: Word) -> Result<(), ChainError> {
        self.gas.charge(STORAGE_WRITE_GAS)?;
        self.state.set_storage(&self.address, key, value);
        Ok(())
    }

    pub fn load_uint(&mut self, key: &StorageKey) -> Result<u128, ChainError> {
        let word = self.load(key)?;
        Token::from_word(crate::abi::ParamKind::Uint, &word)?
            .as_uint()
            .ok_or_else(|| ChainError::AbiError("expected uint in storage".to_string()))
    }

    pub fn store_uint(&mut self, key: StorageKey, value: u128) -> Result<(), ChainError> {
        self.store(key, Token::Uint(value).to_word())
    }

    pub fn balance_of(&self, address: &Address) -> u128 {
        self.state.balance(address)
    }

    /// Moves native balance out of the running contract.
    pub fn transfer(&mut self, to: &Address, amount: u128) -> Result<(), ChainError> {
        let from = self.address;
        self.state
            .transfer(&from, to, amount)
            .map_err(|e| ChainError::ExecutionReverted(e.to_string()))
    }

    /// Encodes and emits `event`; the log reaches the sink before this returns.
    pub fn emit(&mut self, event: &EventDescriptor, values: &[Token]) -> Result<(), ChainError> {
        let log = event.encode_log(self.address, values)?;
        let cost = LOG_GAS
            + LOG_TOPIC_GAS * log.topics.len() as u64
            + LOG_DATA_BYTE_GAS * log.data.len() as u64;
        self.gas.charge(cost)?;
        self.sink.emit(&log);
        self.logs.push(log);
        Ok(())
    }

    pub fn revert<T>(&self, reason: impl Into<String>) -> Result<T, ChainError> {
        Err(ChainError::ExecutionReverted(reason.into()))
    }
}

#[derive(Default, Clone)]
pub struct NativeEngine {
    programs: HashMap<Vec<u8>, (String, Arc<dyn NativeContract>)>,
}

impl NativeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, name: &str, program: Arc<dyn NativeContract>) {
        self.programs
            .insert(native_code(name), (name.to_string(), program));
    }

    pub fn with_program(mut self, name: &str, program: Arc<dyn NativeContract>) -> Self {
        self.install(name, program);
        self
    }

    /// Artifacts for every installed program, usable as a contract source.
    pub fn catalog(&self) -> ContractCatalog {
        let mut catalog = ContractCatalog::new();
        for (code, (name, program)) in &self.programs {
            catalog.insert(ContractArtifact::new(name, code.clone(), program.interface()));
        }
        catalog
    }

    fn program(&self, code: &[u8]) -> Result<&Arc<dyn NativeContract>, ChainError> {
        self.programs
            .get(code)
            .map(|(_, program)| program)
            .ok_or_else(|| {
                ChainError::ExecutionReverted(format!(
                    "no program installed for code {}",
                    String::from_utf8_lossy(code)
                ))
            })
    }

    fn execute(
        &self,
        state: &mut WorldState,
        env: &BlockEnv,
        tx: &Transaction,
        sink: &mut dyn LogSink,
        gas: &mut GasMeter,
        logs: &mut Vec<Log>,
    ) -> Result<(Option<Address>, Vec<Token>), ChainError> {
        gas.charge(TX_BASE_GAS)?;
        state.increment_nonce(&tx.sender);

        match &tx.kind {
            TxKind::Transfer { to } => {
                state.transfer(&tx.sender, to, tx.value)?;
                Ok((None, Vec::new()))
            }
            TxKind::Deploy { code, args } => {
                gas.charge(DEPLOY_GAS + CODE_BYTE_GAS * code.len() as u64)?;
                let address = contract_address(&tx.sender, tx.nonce);
                if state.code(&address).is_some() {
                    return Err(ChainError::ExecutionReverted(format!(
                        "contract already exists at {}",
                        address_to_hex(&address)
                    )));
                }
                let program = self.program(code)?;
                program.interface().check_constructor_args(args)?;

                state.account_mut(&address).code = code.clone();
                state.transfer(&tx.sender, &address, tx.value)?;

                let mut ctx = CallContext {
                    state,
                    sink,
                    logs,
                    gas,
                    address,
                    sender: tx.sender,
                    value: tx.value,
                    block_number: env.number,
                    timestamp: env.timestamp,
                };
                program.construct(&mut ctx, args)?;
                Ok((Some(address), Vec::new()))
            }
            TxKind::Call { to, function, args } => {
                let code = state
                    .code(to)
                    .ok_or_else(|| {
                        ChainError::ExecutionReverted(format!("no contract at {}", address_to_hex(to)))
                    })?
                    .to_vec();
                let program = self.program(&code)?;
                let interface = program.interface();
                let descriptor = interface.function(function).ok_or_else(|| {
                    ChainError::ExecutionReverted(format!("unknown function {}", function))
                })?;
                descriptor.check_args(args)?;

                state.transfer(&tx.sender, to, tx.value)?;

                let mut ctx = CallContext {
                    state,
                    sink,
                    logs,
                    gas,
                    address: *to,
                    sender: tx.sender,
                    value: tx.value,
                    block_number: env.number,
                    timestamp: env.timestamp,
                };
                let output = program.call(&mut ctx, function, args)?;
                Ok((None, output))
            }
        }
    }
}

impl ExecutionEngine for NativeEngine {
    fn apply_transaction(
        &self,
        state: &mut WorldState,
        env: &BlockEnv,
        tx: &Transaction,
        sink: &mut dyn LogSink,
    ) -> Result<Receipt, ChainError> {
        tx.validate(state)?;

        if env.gas_used.saturating_add(tx.gas_limit) > env.gas_limit {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction gas limit {} exceeds remaining block gas {}",
                tx.gas_limit,
                env.gas_limit.saturating_sub(env.gas_used)
            )));
        }

        let mut working = state.clone();
        let mut gas = GasMeter::new(tx.gas_limit);
        let mut logs = Vec::new();
        let (contract_address, output) =
            self.execute(&mut working, env, tx, sink, &mut gas, &mut logs)?;

        *state = working;
        debug!(
            tx = %tx.hash_str(),
            gas_used = gas.used(),
            logs = logs.len(),
            "applied transaction"
        );

        Ok(Receipt {
            tx_hash: tx.hash(),
            gas_used: gas.used(),
            contract_address,
            logs,
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{EventParam, FunctionDescriptor, ParamKind};
    use crate::blockchain::ensure_funded;
    use crate::crypto::KeyPair;
    use crate::execution::NullSink;

    struct Counter;

    impl Counter {
        fn bumped() -> EventDescriptor {
            EventDescriptor::new("Bumped", vec![EventParam::new("count", ParamKind::Uint)])
        }
    }

    impl NativeContract for Counter {
        fn interface(&self) -> ContractInterface {
            ContractInterface::new()
                .with_function(FunctionDescriptor::new("bump", vec![]))
                .with_function(FunctionDescriptor::new("fail", vec![]))
                .with_event(Self::bumped())
        }

        fn call(&self, ctx: &mut CallContext<'_>, function: &str, _args: &[Token]) -> Result<Vec<Token>, ChainError> {
            let slot = CallContext::slot("count", &[]);
            let count = ctx.load_uint(&slot)? + 1;
            ctx.store_uint(slot, count)?;
            ctx.emit(&Self::bumped(), &[Token::Uint(count)])?;
            if function == "fail" {
                return ctx.revert("asked to fail");
            }
            Ok(vec![Token::Uint(count)])
        }
    }

    fn env() -> BlockEnv {
        BlockEnv {
            number: 1,
            timestamp: 10,
            coinbase: [0u8; 20],
            gas_limit: 1_000_000_000,
            gas_used: 0,
        }
    }

    fn setup() -> (NativeEngine, WorldState, KeyPair, Address) {
        let engine = NativeEngine::new().with_program("Counter", Arc::new(Counter));
        let keypair = KeyPair::from_secret_bytes(&sha256(b"deployer")).unwrap();
        let mut state = WorldState::new();
        ensure_funded(&mut state, &keypair.address(), 1_000_000);

        let deploy = Transaction::deploy(keypair.address(), 0, native_code("Counter"), vec![], 1_000_000)
            .signed(&keypair)
            .unwrap();
        let receipt = engine
            .apply_transaction(&mut state, &env(), &deploy, &mut NullSink)
            .unwrap();
        let address = receipt.contract_address.unwrap();
        (engine, state, keypair, address)
    }

    #[test]
    fn test_deploy_uses_sender_and_nonce_for_address() {
        let (_, state, keypair, address) = setup();
        assert_eq!(address, contract_address(&keypair.address(), 0));
        assert_eq!(state.code(&address), Some(native_code("Counter").as_slice()));
        assert_eq!(state.nonce(&keypair.address()), 1);
    }

    #[test]
    fn test_call_emits_logs_to_sink() {
        let (engine, mut state, keypair, address) = setup();
        let call = Transaction::call(keypair.address(), 1, address, "bump", vec![], 0, 1_000_000)
            .signed(&keypair)
            .unwrap();

        let mut sink: Vec<Log> = Vec::new();
        let receipt = engine.apply_transaction(&mut state, &env(), &call, &mut sink).unwrap();

        assert_eq!(receipt.output, vec![Token::Uint(1)]);
        assert_eq!(sink, receipt.logs);
        assert_eq!(sink[0].address, address);
    }

    #[test]
    fn test_revert_leaves_state_untouched() {
        let (engine, mut state, keypair, address) = setup();
        let before = state.clone();
        let call = Transaction::call(keypair.address(), 1, address, "fail", vec![], 0, 1_000_000)
            .signed(&keypair)
            .unwrap();

        let result = engine.apply_transaction(&mut state, &env(), &call, &mut NullSink);
        assert!(matches!(result, Err(ChainError::ExecutionReverted(_))));
        assert_eq!(state, before);
    }

    #[test]
    fn test_out_of_gas_reverts() {
        let (engine, mut state, keypair, address) = setup();
        let call = Transaction::call(keypair.address(), 1, address, "bump", vec![], 0, TX_BASE_GAS + 10)
            .signed(&keypair)
            .unwrap();
        let result = engine.apply_transaction(&mut state, &env(), &call, &mut NullSink);
        assert!(result.unwrap_err().to_string().contains("out of gas"));
    }

    #[test]
    fn test_block_gas_limit_is_enforced() {
        let (engine, mut state, keypair, address) = setup();
        let call = Transaction::call(keypair.address(), 1, address, "bump", vec![], 0, 1_000_000)
            .signed(&keypair)
            .unwrap();
        let mut full = env();
        full.gas_used = full.gas_limit - 10;
        let result = engine.apply_transaction(&mut state, &full, &call, &mut NullSink);
        assert!(matches!(result, Err(ChainError::InvalidTransaction(_))));
    }
}
