//! SimChain - a deterministic, embeddable blockchain for simulations
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Blockchain
//! - [`blockchain`] - Committed chain, world state and the ledger's head state
//! - [`transaction`] - Signed transfers, deployments and contract calls
//! - [`execution`] - Execution engine interface and the native engine
//!
//! ## Consensus
//! - [`consensus`] - Block lifecycle hooks and rewards
//! - [`miner`] - Proof-of-work search
//!
//! ## Cryptography
//! - [`crypto`] - Hashing, addresses and secp256k1 signatures
//!
//! ## Contracts & Events
//! - [`abi`] - Typed values, event and function descriptors
//! - [`contracts`] - Contract sources and the deployed-contract registry
//! - [`cache`] - Cached contract sources
//! - [`events`] - Decoding logs and routing them to listeners
//!
//! ## Simulation
//! - [`addressbook`] - Name-derived identities
//! - [`simulation`] - The facade tying the above together
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Blockchain
// ============================================================================
pub mod blockchain;
pub mod execution;
pub mod transaction;

// ============================================================================
// Consensus & Mining
// ============================================================================
pub mod consensus;
pub mod miner;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// Contracts & Events
// ============================================================================
pub mod abi;
pub mod cache;
pub mod contracts;
pub mod events;

// ============================================================================
// Simulation
// ============================================================================
pub mod addressbook;
pub mod simulation;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;

pub use error::{ChainError, Result};
pub use simulation::Simulation;
