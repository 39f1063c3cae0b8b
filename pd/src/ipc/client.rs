//! IPC client for communicating with the progress daemon
//!
//! Provides both the one-shot request/response interface (pull) and the
//! streaming subscription interface (push) over the Unix Domain Socket.

use std::path::PathBuf;
use std::time::Duration;

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use super::get_socket_path;
use super::listener::MAX_MESSAGE_SIZE;
use super::messages::{ProgressRequest, ProgressResponse, StreamFrame};
use crate::progress::SessionSnapshot;

/// Default timeout for request/response operations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default idle deadline for push streams
///
/// Three missed heartbeats at the default 15 s interval. A live daemon sends
/// heartbeats far more often than this, so silence past the deadline means
/// the connection is dead even if the socket is still open.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(45);

/// Client for communicating with the daemon via IPC
#[derive(Debug, Clone)]
pub struct ProgressClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Default for ProgressClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressClient {
    /// Create a new client with the default socket path
    pub fn new() -> Self {
        Self {
            socket_path: get_socket_path(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create a client with a custom socket path (for testing)
    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set a custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check if the daemon socket exists
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Fetch the latest snapshot for a session
    ///
    /// Unknown sessions resolve to a default pending snapshot on the daemon
    /// side, so this only errors on transport or protocol failures.
    pub async fn get(&self, session_id: &str) -> Result<SessionSnapshot> {
        debug!(%session_id, "ProgressClient: fetching snapshot");
        let msg = ProgressRequest::Get {
            session_id: session_id.to_string(),
        };
        let response = self.send_message(msg).await?;
        match response {
            ProgressResponse::Snapshot { snapshot } => Ok(snapshot),
            ProgressResponse::Error { message } => Err(eyre::eyre!("Daemon error: {}", message)),
            _ => Err(eyre::eyre!("Unexpected response")),
        }
    }

    /// Remove the stored snapshot for a session
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        debug!(%session_id, "ProgressClient: deleting snapshot");
        let msg = ProgressRequest::Delete {
            session_id: session_id.to_string(),
        };
        let response = self.send_message(msg).await?;
        match response {
            ProgressResponse::Ok => Ok(()),
            ProgressResponse::Error { message } => Err(eyre::eyre!("Daemon error: {}", message)),
            _ => Err(eyre::eyre!("Unexpected response")),
        }
    }

    /// Check if daemon is alive and get its version
    pub async fn ping(&self) -> Result<String> {
        debug!("ProgressClient: pinging daemon");
        let response = self.send_message(ProgressRequest::Ping).await?;
        match response {
            ProgressResponse::Pong { version } => Ok(version),
            ProgressResponse::Error { message } => Err(eyre::eyre!("Daemon error: {}", message)),
            _ => Err(eyre::eyre!("Unexpected response")),
        }
    }

    /// Request daemon to shutdown gracefully
    pub async fn shutdown(&self) -> Result<()> {
        debug!("ProgressClient: requesting daemon shutdown");
        let response = self.send_message(ProgressRequest::Shutdown).await?;
        match response {
            ProgressResponse::Ok => Ok(()),
            ProgressResponse::Error { message } => Err(eyre::eyre!("Daemon error: {}", message)),
            _ => Err(eyre::eyre!("Unexpected response")),
        }
    }

    /// Open a push stream for a session
    ///
    /// The connection stays open and delivers frames until the session
    /// reaches a terminal phase. Only the connect and the initial write are
    /// bounded by the client timeout; frames arrive at the daemon's pace,
    /// with heartbeats filling quiet stretches.
    pub async fn subscribe(&self, session_id: &str) -> Result<Subscription> {
        debug!(%session_id, "ProgressClient: subscribing");

        let mut stream = self.connect().await?;

        let msg = ProgressRequest::Subscribe {
            session_id: session_id.to_string(),
        };
        let msg_json = serde_json::to_string(&msg).context("Failed to serialize message")?;

        tokio::time::timeout(self.timeout, async {
            stream
                .write_all(msg_json.as_bytes())
                .await
                .context("Failed to write message")?;
            stream.write_all(b"\n").await.context("Failed to write newline")?;
            stream.flush().await.context("Failed to flush stream")?;
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Write timeout")??;

        Ok(Subscription {
            reader: BufReader::new(stream),
            closed: false,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        })
    }

    async fn connect(&self) -> Result<UnixStream> {
        tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("Connection timeout")?
            .context("Failed to connect to daemon socket")
    }

    /// Send a message to the daemon and wait for response
    async fn send_message(&self, msg: ProgressRequest) -> Result<ProgressResponse> {
        debug!(?self.socket_path, ?msg, "ProgressClient: sending message");

        let stream = self.connect().await?;
        self.send_on_stream(stream, msg).await
    }

    /// Send message on an existing stream (extracted for testing)
    async fn send_on_stream(&self, mut stream: UnixStream, msg: ProgressRequest) -> Result<ProgressResponse> {
        let msg_json = serde_json::to_string(&msg).context("Failed to serialize message")?;

        if msg_json.len() > MAX_MESSAGE_SIZE {
            return Err(eyre::eyre!("Message too large: {} bytes", msg_json.len()));
        }

        // Send message with newline
        tokio::time::timeout(self.timeout, async {
            stream
                .write_all(msg_json.as_bytes())
                .await
                .context("Failed to write message")?;
            stream.write_all(b"\n").await.context("Failed to write newline")?;
            stream.flush().await.context("Failed to flush stream")?;
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Write timeout")??;

        // Read response with size limit
        let mut reader = BufReader::new(&mut stream);
        let mut response_line = String::new();

        tokio::time::timeout(self.timeout, async {
            let bytes_read = reader
                .read_line(&mut response_line)
                .await
                .context("Failed to read response")?;

            if bytes_read > MAX_MESSAGE_SIZE {
                return Err(eyre::eyre!("Response too large: {} bytes", bytes_read));
            }

            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Read timeout")??;

        let response: ProgressResponse =
            serde_json::from_str(response_line.trim()).context("Failed to parse daemon response")?;

        debug!(?response, "ProgressClient: received response");
        Ok(response)
    }
}

/// An open push stream
///
/// Yields frames in order until a terminal frame or disconnect. Heartbeats
/// bound the quiet stretches: silence past the idle deadline is reported as
/// an error so the caller can treat the connection as lost.
pub struct Subscription {
    reader: BufReader<UnixStream>,
    closed: bool,
    idle_timeout: Duration,
}

impl Subscription {
    /// Set the idle deadline (a small multiple of the daemon's heartbeat
    /// interval)
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Wait for the next frame
    ///
    /// Returns `None` once a terminal frame has been delivered or the daemon
    /// closed the connection. Errors if nothing (not even a heartbeat)
    /// arrives within the idle deadline.
    pub async fn next(&mut self) -> Result<Option<StreamFrame>> {
        if self.closed {
            return Ok(None);
        }

        let mut line = String::new();
        let bytes_read = match tokio::time::timeout(self.idle_timeout, self.reader.read_line(&mut line)).await {
            Ok(read) => read.context("Failed to read frame")?,
            Err(_) => {
                self.closed = true;
                return Err(eyre::eyre!(
                    "Stream silent for {:?} with no heartbeat",
                    self.idle_timeout
                ));
            }
        };

        if bytes_read == 0 {
            self.closed = true;
            return Ok(None);
        }

        if bytes_read > MAX_MESSAGE_SIZE {
            return Err(eyre::eyre!("Frame too large: {} bytes", bytes_read));
        }

        let frame: StreamFrame = serde_json::from_str(line.trim()).context("Failed to parse frame")?;

        if frame.is_terminal() {
            self.closed = true;
        }

        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_client_default() {
        let client = ProgressClient::default();
        assert!(client.socket_path.ends_with("progressd.sock"));
    }

    #[test]
    fn test_client_with_custom_path() {
        let path = PathBuf::from("/custom/path/progressd.sock");
        let client = ProgressClient::with_socket_path(path.clone());
        assert_eq!(client.socket_path, path);
    }

    #[test]
    fn test_client_with_timeout() {
        let client = ProgressClient::new().with_timeout(Duration::from_secs(10));
        assert_eq!(client.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_socket_exists_false() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nonexistent.sock");
        let client = ProgressClient::with_socket_path(path);
        assert!(!client.socket_exists());
    }

    #[tokio::test]
    async fn test_subscription_stops_after_terminal_frame() {
        use super::super::listener::create_listener_at;
        use crate::progress::SessionSnapshot;

        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("test.sock");

        let (listener, _) = create_listener_at(&socket_path).unwrap();

        let mock_daemon = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            let msg = super::super::listener::read_request(&mut stream).await.unwrap();
            assert!(matches!(msg, ProgressRequest::Subscribe { .. }));

            let frames = vec![
                StreamFrame::Progress {
                    snapshot: SessionSnapshot::default_pending("sess-1"),
                },
                StreamFrame::Heartbeat,
                StreamFrame::Complete {
                    snapshot: SessionSnapshot::default_pending("sess-1").minimal_completed(),
                },
            ];
            for frame in frames {
                let json = serde_json::to_string(&frame).unwrap();
                stream.write_all(json.as_bytes()).await.unwrap();
                stream.write_all(b"\n").await.unwrap();
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let client = ProgressClient::with_socket_path(socket_path);
        let mut sub = client.subscribe("sess-1").await.unwrap();

        let first = sub.next().await.unwrap().unwrap();
        assert!(matches!(first, StreamFrame::Progress { .. }));

        let second = sub.next().await.unwrap().unwrap();
        assert!(matches!(second, StreamFrame::Heartbeat));

        let third = sub.next().await.unwrap().unwrap();
        assert!(third.is_terminal());

        // Stream is closed after the terminal frame
        assert!(sub.next().await.unwrap().is_none());

        mock_daemon.await.unwrap();
    }

    #[tokio::test]
    async fn test_subscription_errors_when_stream_goes_silent() {
        use super::super::listener::create_listener_at;
        use crate::progress::SessionSnapshot;

        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("test.sock");

        let (listener, _) = create_listener_at(&socket_path).unwrap();

        // Daemon that sends one frame and then holds the socket open silently
        let mock_daemon = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = super::super::listener::read_request(&mut stream).await.unwrap();

            let frame = StreamFrame::Progress {
                snapshot: SessionSnapshot::default_pending("sess-1"),
            };
            let json = serde_json::to_string(&frame).unwrap();
            stream.write_all(json.as_bytes()).await.unwrap();
            stream.write_all(b"\n").await.unwrap();

            // Keep the connection alive without writing anything further
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let client = ProgressClient::with_socket_path(socket_path);
        let mut sub = client
            .subscribe("sess-1")
            .await
            .unwrap()
            .with_idle_timeout(Duration::from_millis(100));

        let first = sub.next().await.unwrap().unwrap();
        assert!(matches!(first, StreamFrame::Progress { .. }));

        // Silence past the idle deadline surfaces as an error, not a hang
        let result = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .expect("next() did not honor the idle deadline");
        assert!(result.is_err());

        // The subscription is closed afterwards
        assert!(sub.next().await.unwrap().is_none());

        mock_daemon.abort();
    }
}
