//! Line Store Adapters
//!
//! Implementations of `LineStore` for PostgreSQL and for tests.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryLineStore;
pub use postgres::{ConnectError, PostgresLineStore};
