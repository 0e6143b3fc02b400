// Thin re-export module: the committed chain lives in `blockchain/core.rs`,
// the in-progress head state and mining cycle in `blockchain/ledger.rs`.

pub mod core;
pub mod ledger;

pub use self::core::*;
pub use self::ledger::*;
