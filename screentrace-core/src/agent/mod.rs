//! Device-side agent tier
//!
//! Owns the per-device cursor, runs collection cycles over the local activity
//! log, and delivers validated batches through the retrying upload client.
//! All per-device state travels in an explicit [`DeviceContext`]; there is no
//! process-wide singleton, so one test process can run many simulated
//! devices.

mod batcher;
mod context;
mod cursor;
mod log;
mod retry;
mod uploader;

pub use batcher::{collect_items, run_cycle, run_cycle_with, CollectedWindow, CycleOutcome, CycleReport};
pub use context::{CredentialProvider, DeviceContext, StaticCredentials};
pub use cursor::CursorStore;
pub use log::{ActivityLog, MemoryActivityLog};
pub use retry::{retry_delay, transition, AttemptOutcome, UploadState};
pub use uploader::{UploadClient, UploadOutcome};
