//! # screentrace-core
//!
//! Core library for screentrace - per-device usage capture, sessionization,
//! and idempotent ingestion into time-bucketed rollups.
//!
//! This library provides:
//! - Domain types for raw events, sessions, batches, and rollup rows
//! - The device-side collection pipeline and upload state machine
//! - The shared validator that runs on both client and server
//! - Queue and dedup capability interfaces with in-process implementations
//! - The stream processor and the SQLite rollup store
//!
//! ## Architecture
//!
//! ```text
//! device: RawEvents ─► Sessionizer ─► Clamper ─► Filter ─► Validator ─► Batcher ─► Upload
//! server: Gateway ─► ordered queue ─► Stream Processor (dedup + re-validate) ─► Rollup Store
//! ```
//!
//! Re-processing an already-aggregated item never double-counts: the dedup
//! cache absorbs recent resends and the rollup store's fragment ledger
//! catches anything the cache has evicted.

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use rollup::RollupStore;
pub use types::*;

// Public modules
pub mod agent;
pub mod collector;
pub mod config;
pub mod dedup;
pub mod error;
pub mod logging;
pub mod processor;
pub mod queue;
pub mod rollup;
pub mod types;
pub mod validate;
