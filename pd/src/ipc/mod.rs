//! Inter-Process Communication for progress distribution
//!
//! JSON-over-newline protocol on a Unix Domain Socket. Pull requests are a
//! single request/response exchange; a `Subscribe` request turns the
//! connection into a one-directional stream of frames until the session
//! reaches a terminal phase.

use std::path::PathBuf;

pub mod client;
pub mod listener;
pub mod messages;

pub use client::{ProgressClient, Subscription};
pub use listener::{cleanup_socket, create_listener, create_listener_at};
pub use messages::{ProgressRequest, ProgressResponse, StreamFrame};

/// Get the socket path for progress IPC
///
/// Uses the same base directory as other daemon files (PID file, version file).
pub fn get_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("progressd")
        .join("progressd.sock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_path_ends_with_progressd_sock() {
        let path = get_socket_path();
        assert!(path.ends_with("progressd/progressd.sock"));
    }
}
