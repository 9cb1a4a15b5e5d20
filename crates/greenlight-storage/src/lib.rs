//! Greenlight storage: WAL-mode SQLite with migrations and the key/value
//! backends behind the embedding cache.

pub mod cache;
pub mod db;
pub mod migrations;

pub use cache::{
    open_store, CacheStats, CacheStore, DirectoryCacheStore, MemoryCacheStore, SqliteCacheStore,
};
pub use db::Database;
