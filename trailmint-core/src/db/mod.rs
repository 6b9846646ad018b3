//! Local persistent state (SQLite)

pub mod repo;
pub mod schema;

pub use repo::{FlushOutcome, StateStore};
