//! Live session watch with pull fallback
//!
//! Follows one session over the push stream and degrades to polling the pull
//! endpoint when the stream is lost or goes silent past the idle deadline.
//! Either way the caller sees the same sequence of snapshots, ending with
//! the terminal one.

use std::time::Duration;

use eyre::Result;
use tracing::debug;

use crate::ipc::{ProgressClient, StreamFrame};
use crate::progress::SessionSnapshot;

use super::reducer::ConnectionState;

/// What the watch observed, in order
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Snapshot(SessionSnapshot),
    Heartbeat,
    Connection(ConnectionState),
}

/// Follow a session until it reaches a terminal phase
///
/// `idle_timeout` bounds how long the push stream may stay silent (a small
/// multiple of the daemon's heartbeat interval); when it trips, or the
/// stream drops mid-session, the watch emits
/// `Connection(ConnectionState::Disconnected)` and switches to polling the
/// pull endpoint every `poll_interval`. Returns the terminal snapshot.
pub async fn watch_session(
    client: &ProgressClient,
    session_id: &str,
    idle_timeout: Duration,
    poll_interval: Duration,
    mut on_event: impl FnMut(WatchEvent),
) -> Result<SessionSnapshot> {
    match watch_stream(client, session_id, idle_timeout, &mut on_event).await {
        Ok(terminal) => Ok(terminal),
        Err(e) => {
            debug!(%session_id, error = %e, "push stream lost, falling back to pull");
            on_event(WatchEvent::Connection(ConnectionState::Disconnected));
            watch_poll(client, session_id, poll_interval, &mut on_event).await
        }
    }
}

async fn watch_stream(
    client: &ProgressClient,
    session_id: &str,
    idle_timeout: Duration,
    on_event: &mut impl FnMut(WatchEvent),
) -> Result<SessionSnapshot> {
    let mut subscription = client.subscribe(session_id).await?.with_idle_timeout(idle_timeout);

    while let Some(frame) = subscription.next().await? {
        match frame {
            StreamFrame::Heartbeat => on_event(WatchEvent::Heartbeat),
            StreamFrame::Progress { snapshot } => on_event(WatchEvent::Snapshot(snapshot)),
            StreamFrame::Complete { snapshot } | StreamFrame::Error { snapshot } => {
                on_event(WatchEvent::Snapshot(snapshot.clone()));
                return Ok(snapshot);
            }
        }
    }

    // EOF before a terminal frame counts as a lost stream
    Err(eyre::eyre!("Stream closed before the session terminated"))
}

async fn watch_poll(
    client: &ProgressClient,
    session_id: &str,
    poll_interval: Duration,
    on_event: &mut impl FnMut(WatchEvent),
) -> Result<SessionSnapshot> {
    let mut last: Option<SessionSnapshot> = None;

    loop {
        let snapshot = client.get(session_id).await?;
        if last.as_ref() != Some(&snapshot) {
            on_event(WatchEvent::Snapshot(snapshot.clone()));
            if snapshot.is_terminal() {
                return Ok(snapshot);
            }
            last = Some(snapshot);
        }
        tokio::time::sleep(poll_interval).await;
    }
}
