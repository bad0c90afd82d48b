//! Device-side collection pipeline
//!
//! Turns the raw transition stream into validated usage items:
//!
//! ```text
//! ┌───────────┐    ┌─────────────┐    ┌─────────┐    ┌────────┐    ┌───────────┐
//! │ RawEvents │ ─► │ Sessionizer │ ─► │ Clamper │ ─► │ Filter │ ─► │ Validator │
//! │ (FG/BG)   │    │ + gap merge │    │ (screen)│    │        │    │ (shared)  │
//! └───────────┘    └─────────────┘    └─────────┘    └────────┘    └───────────┘
//! ```
//!
//! Each stage is pure over its inputs; the batcher owns the scan window and
//! feeds the stages in order.

mod clamp;
mod filter;
mod screen;
mod sessionizer;

pub use clamp::clamp_session;
pub use filter::{drop_short, NoiseFilter};
pub use screen::ScreenTracker;
pub use sessionizer::{merge_gaps, sessionize};
