//! IPC message types for progress distribution
//!
//! Simple JSON-over-newline protocol. Each message is a single line of JSON
//! followed by `\n`. Pull and push carry the identical snapshot document;
//! they differ only in framing.

use serde::{Deserialize, Serialize};

use crate::progress::{Phase, SessionSnapshot};

/// Requests from clients to the daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ProgressRequest {
    /// Fetch the latest snapshot for a session (pull)
    Get { session_id: String },

    /// Open a one-directional stream of frames for a session (push)
    Subscribe { session_id: String },

    /// Remove the stored snapshot on session cleanup
    Delete { session_id: String },

    /// Ping to check if daemon is alive
    Ping,

    /// Request daemon to stop gracefully
    Shutdown,
}

/// Responses to request/response exchanges
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ProgressResponse {
    /// The latest snapshot for the requested session
    Snapshot { snapshot: SessionSnapshot },

    /// Acknowledgment
    Ok,

    /// Pong response to ping
    Pong { version: String },

    /// Error response
    Error { message: String },
}

/// Frames on a push stream
///
/// Exactly one `Complete` or `Error` frame closes the stream; `Heartbeat`
/// keeps idle connections from being reaped by intermediaries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamFrame {
    Progress { snapshot: SessionSnapshot },
    Heartbeat,
    Complete { snapshot: SessionSnapshot },
    Error { snapshot: SessionSnapshot },
}

impl StreamFrame {
    /// Classify a flushed snapshot into its stream frame
    pub fn for_snapshot(snapshot: SessionSnapshot) -> Self {
        match snapshot.current_phase {
            Phase::Completed => StreamFrame::Complete { snapshot },
            Phase::Failed => StreamFrame::Error { snapshot },
            _ => StreamFrame::Progress { snapshot },
        }
    }

    /// Whether this frame ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamFrame::Complete { .. } | StreamFrame::Error { .. })
    }
}
