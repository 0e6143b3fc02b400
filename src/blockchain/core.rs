// core.rs splits the committed chain into submodules: blocks and the persisted
// chain, world state, and header validation.
pub mod chain;
pub mod state;
pub mod validation;

pub use chain::*;
pub use state::*;
pub use validation::*;
