#![deny(unused)]
//! Storage backends for Sandboxer.
//!
//! This crate provides the durable operation-log and session stores plus
//! the optional read-through caches. The SQLite backend is the reference
//! durable store; the in-memory backend serves tests and small
//! single-process deployments; Redis backs the cache when one process is
//! not enough.

pub mod cache;
pub mod memory;
pub mod redis;
pub mod sqlite;

pub use cache::InMemoryOperationCache;
pub use memory::{InMemoryBaseSource, InMemoryStore};
pub use redis::RedisOperationCache;
pub use sqlite::SqliteStore;
