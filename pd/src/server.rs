//! Progress distribution server
//!
//! Serves the pull endpoint (request/response) and the push streams
//! (subscribed connections) over the IPC socket. All state lives in the
//! snapshot store; the server itself is stateless between connections.

use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use tokio::net::UnixListener;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use snapstore::SnapStore;

use crate::events::SnapshotBus;
use crate::ipc::listener::{read_request, send_frame, send_response};
use crate::ipc::messages::{ProgressRequest, ProgressResponse, StreamFrame};
use crate::progress::SessionSnapshot;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long a freshly accepted connection may sit silent before we drop it
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Server side of the progress IPC protocol
#[derive(Clone)]
pub struct ProgressServer {
    store: Arc<SnapStore>,
    bus: Arc<SnapshotBus>,
    heartbeat_interval: Duration,
}

impl ProgressServer {
    pub fn new(store: Arc<SnapStore>, bus: Arc<SnapshotBus>, heartbeat_interval: Duration) -> Self {
        Self {
            store,
            bus,
            heartbeat_interval,
        }
    }

    /// Accept and serve connections until shutdown
    ///
    /// Returns when the shutdown channel fires or a `Shutdown` request is
    /// acknowledged. Every connection is handled in its own task so a slow
    /// or silent client never stalls the accept loop; subscriptions wind
    /// down when their session terminates or their client disconnects.
    pub async fn run(&self, listener: UnixListener, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        info!("ProgressServer: accepting connections");

        // Connection tasks report an IPC-requested shutdown back through
        // this channel.
        let (ipc_shutdown_tx, mut ipc_shutdown_rx) = mpsc::channel::<()>(1);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            debug!("run: IPC connection accepted");
                            let server = self.clone();
                            let ipc_shutdown_tx = ipc_shutdown_tx.clone();
                            tokio::spawn(async move {
                                match server.handle_connection(stream).await {
                                    Ok(true) => {
                                        let _ = ipc_shutdown_tx.send(()).await;
                                    }
                                    Ok(false) => {}
                                    Err(e) => {
                                        warn!(error = %e, "run: IPC connection error");
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "run: IPC accept error");
                        }
                    }
                }

                _ = ipc_shutdown_rx.recv() => {
                    info!("ProgressServer: shutdown requested via IPC");
                    return Ok(());
                }

                _ = shutdown_rx.recv() => {
                    info!("ProgressServer: shutdown signal received");
                    return Ok(());
                }
            }
        }
    }

    /// Handle a single connection; returns true if shutdown was requested
    async fn handle_connection(&self, mut stream: tokio::net::UnixStream) -> Result<bool> {
        let request = tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request(&mut stream))
            .await
            .map_err(|_| eyre::eyre!("Timed out waiting for a request"))??;

        match request {
            ProgressRequest::Get { session_id } => {
                let response = match self.latest_snapshot(&session_id) {
                    Ok(snapshot) => ProgressResponse::Snapshot { snapshot },
                    Err(e) => ProgressResponse::Error { message: e.to_string() },
                };
                send_response(&mut stream, &response).await?;
                Ok(false)
            }

            ProgressRequest::Subscribe { session_id } => {
                let (_read_half, write_half) = stream.into_split();
                let server = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = server.serve_subscription(write_half, &session_id).await {
                        debug!(%session_id, error = %e, "subscription ended with error");
                    }
                });
                Ok(false)
            }

            ProgressRequest::Delete { session_id } => {
                let response = match self.store.delete(&session_id) {
                    Ok(()) => ProgressResponse::Ok,
                    Err(e) => ProgressResponse::Error { message: e.to_string() },
                };
                send_response(&mut stream, &response).await?;
                Ok(false)
            }

            ProgressRequest::Ping => {
                let response = ProgressResponse::Pong {
                    version: VERSION.to_string(),
                };
                send_response(&mut stream, &response).await?;
                Ok(false)
            }

            ProgressRequest::Shutdown => {
                send_response(&mut stream, &ProgressResponse::Ok).await?;
                Ok(true)
            }
        }
    }

    /// Latest snapshot for a session; unknown sessions get a default pending
    /// document rather than an error
    fn latest_snapshot(&self, session_id: &str) -> Result<SessionSnapshot> {
        match self.store.load::<SessionSnapshot>(session_id)? {
            Some(snapshot) => Ok(snapshot),
            None => Ok(SessionSnapshot::default_pending(session_id)),
        }
    }

    /// Drive one push stream until the session terminates
    ///
    /// The current snapshot is delivered immediately on subscribe so clients
    /// recover state without waiting for the next flush. Exactly one terminal
    /// frame closes the stream.
    async fn serve_subscription(&self, mut writer: OwnedWriteHalf, session_id: &str) -> Result<()> {
        debug!(%session_id, "serve_subscription: stream opened");

        // Subscribe before reading the stored snapshot so no flush between
        // the two is lost.
        let mut rx = self.bus.subscribe();

        let initial = self.latest_snapshot(session_id)?;
        let initial_frame = StreamFrame::for_snapshot(initial);
        let terminal = initial_frame.is_terminal();
        send_frame(&mut writer, &initial_frame).await?;
        if terminal {
            debug!(%session_id, "serve_subscription: session already terminal");
            return Ok(());
        }

        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.tick().await; // first tick completes immediately

        loop {
            tokio::select! {
                received = rx.recv() => {
                    match received {
                        Ok(snapshot) => {
                            if snapshot.session_id != session_id {
                                continue;
                            }
                            let frame = StreamFrame::for_snapshot(snapshot);
                            let terminal = frame.is_terminal();
                            send_frame(&mut writer, &frame).await?;
                            if terminal {
                                debug!(%session_id, "serve_subscription: terminal frame sent");
                                return Ok(());
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // Missed intermediate snapshots; resync from the store
                            warn!(%session_id, skipped, "serve_subscription: lagged, resyncing");
                            let snapshot = self.latest_snapshot(session_id)?;
                            let frame = StreamFrame::for_snapshot(snapshot);
                            let terminal = frame.is_terminal();
                            send_frame(&mut writer, &frame).await?;
                            if terminal {
                                return Ok(());
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!(%session_id, "serve_subscription: bus closed");
                            return Ok(());
                        }
                    }
                }

                _ = heartbeat.tick() => {
                    send_frame(&mut writer, &StreamFrame::Heartbeat).await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::create_snapshot_bus;
    use crate::ipc::client::ProgressClient;
    use crate::ipc::listener::create_listener_at;
    use crate::progress::Phase;
    use tempfile::TempDir;

    fn test_server(temp: &TempDir) -> (ProgressServer, Arc<SnapStore>, Arc<SnapshotBus>) {
        let store = Arc::new(SnapStore::open(temp.path().join("store")).unwrap());
        let bus = create_snapshot_bus();
        let server = ProgressServer::new(store.clone(), bus.clone(), Duration::from_secs(15));
        (server, store, bus)
    }

    #[tokio::test]
    async fn test_get_unknown_session_returns_pending() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("test.sock");
        let (server, _store, _bus) = test_server(&temp);

        let (listener, _) = create_listener_at(&socket_path).unwrap();
        let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move { server.run(listener, shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let client = ProgressClient::with_socket_path(socket_path);
        let snapshot = client.get("never-seen").await.unwrap();
        assert_eq!(snapshot.session_id, "never-seen");
        assert_eq!(snapshot.current_phase, Phase::Pending);
        assert_eq!(snapshot.overall_percentage, 0);

        handle.abort();
    }

    #[tokio::test]
    async fn test_get_returns_stored_snapshot() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("test.sock");
        let (server, store, _bus) = test_server(&temp);

        let mut snap = SessionSnapshot::default_pending("sess-1");
        snap.overall_percentage = 42;
        store.save("sess-1", &snap).unwrap();

        let (listener, _) = create_listener_at(&socket_path).unwrap();
        let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move { server.run(listener, shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let client = ProgressClient::with_socket_path(socket_path);
        let fetched = client.get("sess-1").await.unwrap();
        assert_eq!(fetched.overall_percentage, 42);

        handle.abort();
    }

    #[tokio::test]
    async fn test_delete_removes_snapshot() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("test.sock");
        let (server, store, _bus) = test_server(&temp);

        store.save("sess-1", &SessionSnapshot::default_pending("sess-1")).unwrap();

        let (listener, _) = create_listener_at(&socket_path).unwrap();
        let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move { server.run(listener, shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let client = ProgressClient::with_socket_path(socket_path);
        client.delete("sess-1").await.unwrap();
        assert!(store.load::<SessionSnapshot>("sess-1").unwrap().is_none());

        handle.abort();
    }

    #[tokio::test]
    async fn test_shutdown_request_stops_server() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("test.sock");
        let (server, _store, _bus) = test_server(&temp);

        let (listener, _) = create_listener_at(&socket_path).unwrap();
        let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move { server.run(listener, shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let client = ProgressClient::with_socket_path(socket_path);
        client.shutdown().await.unwrap();

        // run() returns Ok after acknowledging shutdown
        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.unwrap().unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_subscribe_delivers_updates_and_terminal() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("test.sock");
        let (server, _store, bus) = test_server(&temp);

        let (listener, _) = create_listener_at(&socket_path).unwrap();
        let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move { server.run(listener, shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let client = ProgressClient::with_socket_path(socket_path);
        let mut sub = client.subscribe("sess-1").await.unwrap();

        // Initial frame reflects the (unknown) session as pending
        let first = sub.next().await.unwrap().unwrap();
        match first {
            StreamFrame::Progress { snapshot } => {
                assert_eq!(snapshot.current_phase, Phase::Pending);
            }
            other => panic!("Expected initial progress frame, got {:?}", other),
        }

        // Updates for other sessions are filtered out
        bus.emit(SessionSnapshot::default_pending("other-session"));

        let mut update = SessionSnapshot::default_pending("sess-1");
        update.current_phase = Phase::Processing;
        update.overall_percentage = 35;
        bus.emit(update);

        let second = sub.next().await.unwrap().unwrap();
        match second {
            StreamFrame::Progress { snapshot } => {
                assert_eq!(snapshot.session_id, "sess-1");
                assert_eq!(snapshot.overall_percentage, 35);
            }
            other => panic!("Expected progress frame, got {:?}", other),
        }

        let mut done = SessionSnapshot::default_pending("sess-1");
        done.current_phase = Phase::Completed;
        done.overall_percentage = 100;
        bus.emit(done);

        let third = sub.next().await.unwrap().unwrap();
        assert!(matches!(third, StreamFrame::Complete { .. }));

        // Connection closes after the terminal frame
        assert!(sub.next().await.unwrap().is_none());

        handle.abort();
    }

    #[tokio::test]
    async fn test_silent_connection_does_not_block_other_clients() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("test.sock");
        let (server, _store, _bus) = test_server(&temp);

        let (listener, _) = create_listener_at(&socket_path).unwrap();
        let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move { server.run(listener, shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(10)).await;

        // Connect and never send a request; the connection must not occupy
        // the accept loop.
        let _silent = tokio::net::UnixStream::connect(&socket_path).await.unwrap();

        let client = ProgressClient::with_socket_path(socket_path).with_timeout(Duration::from_millis(500));
        let version = client.ping().await.unwrap();
        assert!(!version.is_empty());

        handle.abort();
    }

    #[tokio::test]
    async fn test_subscribe_emits_heartbeats_while_idle() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("test.sock");
        let store = Arc::new(SnapStore::open(temp.path().join("store")).unwrap());
        let bus = create_snapshot_bus();
        let server = ProgressServer::new(store, bus, Duration::from_millis(50));

        let (listener, _) = create_listener_at(&socket_path).unwrap();
        let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move { server.run(listener, shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let client = ProgressClient::with_socket_path(socket_path);
        let mut sub = client.subscribe("sess-1").await.unwrap();

        let first = sub.next().await.unwrap().unwrap();
        assert!(matches!(first, StreamFrame::Progress { .. }));

        // With no flushes on the bus, the interval timer keeps the stream
        // warm on its own.
        for _ in 0..2 {
            let frame = tokio::time::timeout(Duration::from_secs(2), sub.next())
                .await
                .expect("heartbeat not emitted within deadline")
                .unwrap()
                .unwrap();
            assert!(matches!(frame, StreamFrame::Heartbeat));
        }

        handle.abort();
    }

    #[tokio::test]
    async fn test_subscribe_terminal_session_gets_single_frame() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("test.sock");
        let (server, store, _bus) = test_server(&temp);

        let done = SessionSnapshot::default_pending("sess-1").minimal_completed();
        store.save("sess-1", &done).unwrap();

        let (listener, _) = create_listener_at(&socket_path).unwrap();
        let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move { server.run(listener, shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let client = ProgressClient::with_socket_path(socket_path);
        let mut sub = client.subscribe("sess-1").await.unwrap();

        let frame = sub.next().await.unwrap().unwrap();
        assert!(matches!(frame, StreamFrame::Complete { .. }));
        assert!(sub.next().await.unwrap().is_none());

        handle.abort();
    }
}
