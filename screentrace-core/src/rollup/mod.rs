//! Rollup store
//!
//! Additive time-bucketed aggregates derived from the event stream, so query
//! paths never scan raw events. Three fixed widths (1m, 5m, 60m) are
//! maintained from the same events. The only writers are the stream
//! processor's idempotent upsert and the dead-letter path; everything else is
//! range/device-filtered reads.

mod schema;
mod store;

pub use store::{DeadLetterRow, RollupStore, UpsertResult};
