//! Domain models for quorum.
//!
//! Canonical definitions for the core entities:
//! - `TestCase`: immutable scenario with expected outputs
//! - `VariableMapping` / `VariableRegistry`: what can be validated and how

pub mod error;
pub mod test_case;
pub mod variable;

pub use error::{QuorumError, Result};
pub use test_case::TestCase;
pub use variable::{VariableMapping, VariableRegistry};
