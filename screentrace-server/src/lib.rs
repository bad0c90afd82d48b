//! # screentrace-server
//!
//! Ingest gateway and stream-processor host for screentrace.
//!
//! The gateway is a stateless, replicable axum service: it authenticates
//! batches, validates envelopes, appends events to the durable ordered
//! queue, and acknowledges immediately. Stream processor consumers share the
//! queue via partition assignment and maintain the rollup store.

pub mod api;
pub mod state;

pub use api::router;
pub use state::{AppState, SharedState};
