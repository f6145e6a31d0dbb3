//! Storage layer for subscriptions
//!
//! The engines depend only on [`Store`]; backends are an in-memory map and
//! RocksDB.

mod backend;
mod memory;
mod rocks;

pub use backend::*;
pub use memory::*;
pub use rocks::*;
