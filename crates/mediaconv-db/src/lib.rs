//! mediaconv row store
//!
//! Job and media records behind the [`JobStore`] trait, with an in-memory
//! implementation for single-node runs and tests, and a Postgres one.

pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;
pub use store::JobStore;
