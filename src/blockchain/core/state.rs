use crate::crypto::{sha256, Address};
use crate::error::ChainError;
use std::collections::BTreeMap;

use super::chain::Sha256Hash;

pub type StorageKey = [u8; 32];
pub type StorageValue = [u8; 32];

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Account {
    pub balance: u128,
    pub nonce: u64,
    pub code: Vec<u8>,
    pub storage: BTreeMap<StorageKey, StorageValue>,
}

impl Account {
    pub fn with_balance(balance: u128) -> Self {
        Self {
            balance,
            ..Self::default()
        }
    }

    pub fn is_contract(&self) -> bool {
        !self.code.is_empty()
    }
}

/// Account-model world state. Ordered maps keep the encoding, and therefore
/// the state root, independent of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WorldState {
    pub accounts: BTreeMap<Address, Account>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account_exists(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }

    pub fn account(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address)
    }

    pub fn account_mut(&mut self, address: &Address) -> &mut Account {
        self.accounts.entry(*address).or_default()
    }

    pub fn balance(&self, address: &Address) -> u128 {
        self.accounts.get(address).map_or(0, |a| a.balance)
    }

    pub fn set_balance(&mut self, address: &Address, balance: u128) {
        self.account_mut(address).balance = balance;
    }

    pub fn credit(&mut self, address: &Address, amount: u128) -> Result<(), ChainError> {
        let account = self.account_mut(address);
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or_else(|| ChainError::InvalidTransaction("Balance overflow".to_string()))?;
        Ok(())
    }

    pub fn debit(&mut self, address: &Address, amount: u128) -> Result<(), ChainError> {
        let available = self.balance(address);
        let remaining = available.checked_sub(amount).ok_or_else(|| {
            ChainError::InvalidTransaction(format!(
                "Insufficient balance: has {}, needs {}",
                available, amount
            ))
        })?;
        self.account_mut(address).balance = remaining;
        Ok(())
    }

    pub fn transfer(&mut self, from: &Address, to: &Address, amount: u128) -> Result<(), ChainError> {
        if amount == 0 {
            return Ok(());
        }
        self.debit(from, amount)?;
        self.credit(to, amount)
    }

    pub fn nonce(&self, address: &Address) -> u64 {
        self.accounts.get(address).map_or(0, |a| a.nonce)
    }

    pub fn increment_nonce(&mut self, address: &Address) {
        self.account_mut(address).nonce += 1;
    }

    pub fn code(&self, address: &Address) -> Option<&[u8]> {
        self.accounts
            .get(address)
            .filter(|a| a.is_contract())
            .map(|a| a.code.as_slice())
    }

    pub fn storage(&self, address: &Address, key: &StorageKey) -> StorageValue {
        self.accounts
            .get(address)
            .and_then(|a| a.storage.get(key).copied())
            .unwrap_or_default()
    }

    /// Zero values delete the slot so that "never written" and "cleared" hash alike.
    pub fn set_storage(&mut self, address: &Address, key: StorageKey, value: StorageValue) {
        let account = self.account_mut(address);
        if value == StorageValue::default() {
            account.storage.remove(&key);
        } else {
            account.storage.insert(key, value);
        }
    }

    /// SHA-256 over the bincode encoding of the ordered account map.
    pub fn root(&self) -> Result<Sha256Hash, ChainError> {
        let encoded = bincode::serialize(&self.accounts)?;
        Ok(sha256(&encoded))
    }
}

/// Seeds `address` with `default_balance` only when the account does not
/// exist yet. Returns whether the account was created.
pub fn ensure_funded(state: &mut WorldState, address: &Address, default_balance: u128) -> bool {
    if state.account_exists(address) {
        return false;
    }
    state
        .accounts
        .insert(*address, Account::with_balance(default_balance));
    true
}
