//! SQLite backend for the revision engine.
//!
//! [`SqliteTransaction`] implements the engine's storage abstraction over a
//! `rusqlite` transaction. [`SqliteRevisor`] wraps [`tokio_rusqlite`] so every
//! composite operation runs as one transaction on a dedicated thread without
//! blocking the async runtime.

mod encode;
mod schema;
mod store;
mod transaction;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteRevisor;
pub use transaction::SqliteTransaction;

#[cfg(test)]
mod tests;
