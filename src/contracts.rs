//! Contract artifacts, sources and the registry of deployed instances.

use crate::abi::{ContractInterface, Token};
use crate::addressbook::Identity;
use crate::blockchain::Ledger;
use crate::crypto::{address_from_hex, address_to_hex, looks_like_address, Address};
use crate::error::ChainError;
use crate::transaction::Transaction;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Gas limit attached to transactions the simulation signs on a user's behalf.
pub const DEFAULT_TX_GAS_LIMIT: u64 = 10_000_000;

/// Deployable code together with the interface used to call it and decode its logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractArtifact {
    pub name: String,
    pub code: Vec<u8>,
    pub interface: Arc<ContractInterface>,
}

impl ContractArtifact {
    pub fn new(name: &str, code: Vec<u8>, interface: ContractInterface) -> Self {
        Self {
            name: name.to_string(),
            code,
            interface: Arc::new(interface),
        }
    }
}

/// Resolves a contract name to its artifact.
pub trait ContractSource: Send + Sync {
    fn resolve(&self, name: &str) -> Result<ContractArtifact, ChainError>;
}

/// In-memory name -> artifact table.
#[derive(Debug, Default, Clone)]
pub struct ContractCatalog {
    artifacts: HashMap<String, ContractArtifact>,
}

impl ContractCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the artifact registered under its name.
    pub fn insert(&mut self, artifact: ContractArtifact) {
        self.artifacts.insert(artifact.name.clone(), artifact);
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.artifacts.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl ContractSource for ContractCatalog {
    fn resolve(&self, name: &str) -> Result<ContractArtifact, ChainError> {
        self.artifacts
            .get(name)
            .cloned()
            .ok_or_else(|| ChainError::UnknownContract(name.to_string()))
    }
}

/// A contract deployed on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractInstance {
    pub address: Address,
    pub name: String,
    pub interface: Arc<ContractInterface>,
    pub alias: Option<String>,
}

impl ContractInstance {
    pub fn address_hex(&self) -> String {
        address_to_hex(&self.address)
    }
}

#[derive(Default)]
struct RegistryInner {
    by_address: HashMap<Address, ContractInstance>,
    aliases: HashMap<String, Address>,
}

/// Deployed contracts by address, plus human aliases.
///
/// Cloning yields a handle to the same registry.
#[derive(Clone, Default)]
pub struct ContractRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deploys `artifact` from `deployer` into the ledger's head state and
    /// registers the resulting instance.
    ///
    /// The instance is registered at its predicted address before the
    /// deployment runs, so events emitted by the constructor can be decoded.
    /// Nothing stays registered when the deployment transaction fails.
    pub fn deploy(
        &self,
        ledger: &mut Ledger,
        deployer: &Identity,
        artifact: &ContractArtifact,
        args: Vec<Token>,
        alias: Option<&str>,
    ) -> Result<ContractInstance, ChainError> {
        let nonce = ledger.nonce(&deployer.address)?;
        let instance = ContractInstance {
            address: ledger.next_contract_address(&deployer.address)?,
            name: artifact.name.clone(),
            interface: artifact.interface.clone(),
            alias: alias.map(str::to_string),
        };
        let tx = Transaction::deploy(deployer.address, nonce, artifact.code.clone(), args, DEFAULT_TX_GAS_LIMIT)
            .signed(&deployer.keypair()?)?;

        let displaced = self.register(instance.clone());
        let address = match ledger.transact(tx) {
            Ok(receipt) => receipt.contract_address,
            Err(e) => {
                self.unregister(&instance, displaced);
                return Err(e);
            }
        };
        if address != Some(instance.address) {
            self.unregister(&instance, displaced);
            return Err(ChainError::ExecutionReverted(format!(
                "deployment of {} did not create a contract at {}",
                artifact.name,
                instance.address_hex()
            )));
        }

        info!(
            contract = %artifact.name,
            address = %instance.address_hex(),
            alias = alias.unwrap_or("-"),
            "deployed contract"
        );
        Ok(instance)
    }

    /// Records an instance. A reused alias is re-pointed at the new address;
    /// the older instance stays reachable by address. Returns the address the
    /// alias pointed at before.
    pub fn register(&self, instance: ContractInstance) -> Option<Address> {
        let mut inner = self.inner.write();
        let displaced = instance
            .alias
            .as_ref()
            .and_then(|alias| inner.aliases.insert(alias.clone(), instance.address));
        inner.by_address.insert(instance.address, instance);
        displaced
    }

    /// Undoes [`ContractRegistry::register`], pointing the alias back at
    /// `displaced`.
    fn unregister(&self, instance: &ContractInstance, displaced: Option<Address>) {
        let mut inner = self.inner.write();
        inner.by_address.remove(&instance.address);
        if let Some(alias) = &instance.alias {
            match displaced {
                Some(previous) => inner.aliases.insert(alias.clone(), previous),
                None => inner.aliases.remove(alias),
            };
        }
    }

    pub fn get(&self, address: &Address) -> Option<ContractInstance> {
        self.inner.read().by_address.get(address).cloned()
    }

    /// Finds an instance by `0x`-prefixed address or by alias.
    pub fn lookup(&self, address_or_alias: &str) -> Result<ContractInstance, ChainError> {
        let unknown = || ChainError::UnknownContract(address_or_alias.to_string());
        let inner = self.inner.read();
        let address = if looks_like_address(address_or_alias) {
            address_from_hex(address_or_alias).map_err(|_| unknown())?
        } else {
            *inner.aliases.get(address_or_alias).ok_or_else(unknown)?
        };
        inner.by_address.get(&address).cloned().ok_or_else(unknown)
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
