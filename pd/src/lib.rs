//! progressd - progress tracking and recovery for document pipelines
//!
//! Tracks a multi-phase pipeline (upload, processing, matching, report
//! generation) per session, persists a latest-only snapshot document, and
//! distributes it to consumers over pull and push transports so that any
//! view can recover the current state after a restart or reconnect.
//!
//! # Core Concepts
//!
//! - **Latest snapshot only**: one self-describing document per session,
//!   atomically overwritten; no history, no merging
//! - **Batched writes**: fine-grained events are folded in memory and
//!   flushed on phase boundaries or a throttle interval
//! - **Identical document everywhere**: pull, push, and the recovery cache
//!   all carry the same snapshot type
//!
//! # Modules
//!
//! - [`progress`] - snapshot model and the per-session tracker
//! - [`events`] - pipeline event types and the in-process snapshot bus
//! - [`ipc`] - Unix-socket protocol, client, and listener helpers
//! - [`server`] - pull/push distribution server
//! - [`client`] - consumer-side state machine and recovery cache
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod client;
pub mod config;
pub mod daemon;
pub mod events;
pub mod ipc;
pub mod progress;
pub mod server;

// Re-export commonly used types
pub use client::{
    Action, ConnectionState, FileCache, MemoryCache, ProgressMachine, ProgressState, RecoveryCache, open_cache,
    reduce, terminal_transition,
};
pub use config::{CacheConfig, Config, PhaseWeights, PushConfig, StorageConfig, TrackerConfig};
pub use events::{PipelineEvent, SnapshotBus, create_snapshot_bus};
pub use ipc::{ProgressClient, ProgressRequest, ProgressResponse, StreamFrame, Subscription};
pub use progress::{
    ErrorContext, FileProgress, Phase, PhaseCounters, PhaseProgress, PhaseStatus, ProgressTracker, SessionSnapshot,
    TrackerError,
};
pub use server::ProgressServer;
