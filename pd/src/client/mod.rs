//! Client-side consumption of progress: state machine and recovery cache

pub mod cache;
pub mod reducer;
pub mod watch;

pub use cache::{open_cache, CacheEntry, FileCache, MemoryCache, RecoveryCache};
pub use reducer::{reduce, terminal_transition, Action, ConnectionState, ProgressMachine, ProgressState};
pub use watch::{watch_session, WatchEvent};
