//! # tiercache
//!
//! Tiered read-through/write-through cache.
//!
//! ## Architecture
//! - **MemoryStore**: arena-backed LRU list, O(1) recency updates
//! - **DiskStore** (from `tierstore`): durable entries with mtime-based eviction
//! - **TieredCache**: probes edges in order, falls back to the source,
//!   promotes hits into faster tiers and verifies writes against the source
//!
//! ```no_run
//! use std::sync::Arc;
//! use tiercache::{MemoryStore, SaveOptions, Tier, TieredCache};
//! use tierstore::{DiskConfig, DiskStore};
//!
//! # async fn run() -> tierstore::Result<()> {
//! let cache = TieredCache::new();
//! let disk = DiskStore::open(DiskConfig::new("/tmp/tiercache")).await?;
//! cache.set_edges([Arc::new(MemoryStore::new()) as Tier, Arc::new(disk) as Tier]);
//!
//! cache.save("user:1", serde_json::json!({ "name": "Ada" }), SaveOptions::default()).await?;
//! let user = cache.get("user:1").await;
//! # let _ = user;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod cache;
mod lru;
mod memory;
mod stats;

pub use cache::{SaveOptions, SaveOutcome, Tier, TieredCache};
pub use lru::{Iter, LruCache};
pub use memory::{MemoryConfig, MemoryStore};
pub use stats::CacheStats;
pub use tierstore::{Error, Result, Store};
