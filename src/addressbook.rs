//! Named identities and the registry that resolves them to funded accounts.
//!
//! An identity's key is derived from its name, so the same name always maps
//! to the same address. Resolving an identity also makes sure its account
//! exists on the ledger head, seeded with the registry's default balance.

use crate::blockchain::Ledger;
use crate::crypto::{address_from_hex, address_to_hex, looks_like_address, sha256, Address, KeyPair, SigningKey};
use crate::error::ChainError;
use std::collections::HashMap;
use tracing::debug;

/// A named actor able to sign transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub address: Address,
    pub signing_key: SigningKey,
}

impl Identity {
    /// Derives the identity for `name`: key = sha256(name).
    pub fn derive(name: &str) -> Result<Self, ChainError> {
        let signing_key = sha256(name.as_bytes());
        let keypair = KeyPair::from_secret_bytes(&signing_key)?;
        Ok(Self {
            name: name.to_string(),
            address: keypair.address(),
            signing_key,
        })
    }

    pub fn keypair(&self) -> Result<KeyPair, ChainError> {
        KeyPair::from_secret_bytes(&self.signing_key)
    }

    pub fn address_hex(&self) -> String {
        address_to_hex(&self.address)
    }
}

/// Identities by name, cached after first derivation, with a reverse index
/// by address.
#[derive(Debug, Clone)]
pub struct AddressRegistry {
    by_name: HashMap<String, Identity>,
    by_address: HashMap<Address, String>,
    default_balance: u128,
}

impl AddressRegistry {
    pub fn new(default_balance: u128) -> Self {
        Self {
            by_name: HashMap::new(),
            by_address: HashMap::new(),
            default_balance,
        }
    }

    pub fn default_balance(&self) -> u128 {
        self.default_balance
    }

    /// Records an identity without touching the ledger, e.g. for accounts
    /// funded in the genesis state.
    pub fn insert(&mut self, identity: Identity) -> Identity {
        self.by_address.insert(identity.address, identity.name.clone());
        self.by_name.insert(identity.name.clone(), identity.clone());
        identity
    }

    /// Resolves a name or a `0x`-prefixed address to its identity.
    ///
    /// Names that have not been seen before are derived and registered. An
    /// address must belong to an identity that is already registered. Every
    /// successful resolution funds the account on the head if it is absent.
    pub fn resolve(&mut self, ledger: &mut Ledger, name_or_address: &str) -> Result<Identity, ChainError> {
        let identity = if looks_like_address(name_or_address) {
            self.by_address(name_or_address)?
        } else if let Some(identity) = self.by_name.get(name_or_address) {
            identity.clone()
        } else {
            let identity = self.insert(Identity::derive(name_or_address)?);
            debug!(name = name_or_address, address = %identity.address_hex(), "derived identity");
            identity
        };

        ledger.ensure_funded(&identity.address, self.default_balance)?;
        Ok(identity)
    }

    /// Looks up a registered identity without touching the ledger.
    pub fn get(&self, name_or_address: &str) -> Result<Identity, ChainError> {
        if looks_like_address(name_or_address) {
            return self.by_address(name_or_address);
        }
        self.by_name
            .get(name_or_address)
            .cloned()
            .ok_or_else(|| ChainError::UnknownIdentity(name_or_address.to_string()))
    }

    /// Name registered for `address`, if any.
    pub fn name_of(&self, address: &Address) -> Option<&str> {
        self.by_address.get(address).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    fn by_address(&self, address_hex: &str) -> Result<Identity, ChainError> {
        let unknown = || ChainError::UnknownIdentity(address_hex.to_string());
        let address = address_from_hex(address_hex).map_err(|_| unknown())?;
        self.by_address
            .get(&address)
            .and_then(|name| self.by_name.get(name))
            .cloned()
            .ok_or_else(unknown)
    }
}
