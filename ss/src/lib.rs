//! SnapStore - durable latest-only JSON document store
//!
//! Holds exactly one JSON document per key and replaces it atomically on
//! every save. Built for status-style data where only the current state
//! matters: no history, no audit log, no coordination between readers.
//!
//! # Architecture
//!
//! ```text
//! .snapstore/
//! ├── {key-a}.json     # latest document for key-a
//! ├── {key-b}.json
//! └── ...
//! ```
//!
//! # Example
//!
//! ```ignore
//! use snapstore::SnapStore;
//!
//! let store = SnapStore::open(".snapstore")?;
//! store.save("session-1", &snapshot)?;
//! let latest: Option<Snapshot> = store.load("session-1")?;
//! store.delete("session-1")?;
//! ```

pub mod cli;
pub mod config;
mod store;

pub use store::{SnapStore, StoreError, StoreResult};
