//! Progress model and tracking
//!
//! - [`snapshot`] - the canonical snapshot document types
//! - [`tracker`] - per-session event aggregation with batched writes

pub mod snapshot;
pub mod tracker;

pub use snapshot::{
    ErrorContext, FileProgress, Phase, PhaseCounters, PhaseProgress, PhaseStatus, SessionSnapshot,
};
pub use tracker::{ProgressTracker, TrackerError};
