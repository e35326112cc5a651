//! Transaction isolation and the commit engine (Component E).

pub mod engine;
pub mod isolation;

pub use engine::{CommitOutcome, Transaction};
pub use isolation::IsolationLevel;
