//! Adapters for the domain ports.

pub mod in_memory;
pub mod lock;
pub mod notifier;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
