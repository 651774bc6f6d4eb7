//! Database module for uptrail.
//!
//! Provides the storage interfaces consumed by the writer and the aggregator,
//! and a SQLite implementation of both.

mod models;
mod sink;
mod store;

pub use models::*;
pub use sink::*;
pub use store::*;
