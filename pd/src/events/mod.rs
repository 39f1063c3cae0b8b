//! Pipeline events and the snapshot bus

pub mod bus;
pub mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, SnapshotBus, create_snapshot_bus};
pub use types::PipelineEvent;
