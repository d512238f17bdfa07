//! # tierstore
//!
//! Storage layer for TierCache.
//!
//! ## Contents
//! - **Store**: async capability contract every cache tier implements
//! - **DiskStore**: one file per entry, size/age metadata, mtime-based eviction
//! - **SerialQueue**: FIFO one-at-a-time execution for disk mutations
//! - **codec**: reversible id -> filename encoding

#![warn(missing_docs)]

pub mod codec;
mod config;
mod disk;
mod error;
pub mod metadata;
mod queue;
mod store;

pub use config::{DiskConfig, DEFAULT_ROOT};
pub use disk::{DiskEntry, DiskStore, Entries};
pub use error::{Error, Result};
pub use metadata::Metadata;
pub use queue::SerialQueue;
pub use store::{FnStore, Store};
