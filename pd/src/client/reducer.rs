//! Client-side progress state machine
//!
//! A pure reducer over snapshot and transport events. Consumers hold a
//! [`ProgressState`] and fold [`Action`]s into it; the reducer never touches
//! IO, so any transport (pull polling, push stream, cache recovery) can feed
//! it. Transport errors and pipeline errors stay separate: a dropped
//! connection is recoverable and keeps the last snapshot on screen, while a
//! pipeline failure arrives inside the snapshot itself.

use serde::{Deserialize, Serialize};

use crate::progress::SessionSnapshot;

/// Connection health as seen by the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Client view of one session's progress
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressState {
    pub snapshot: Option<SessionSnapshot>,
    pub connection: ConnectionState,
    /// Transport error, distinct from any pipeline error in the snapshot
    pub transport_error: Option<String>,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            snapshot: None,
            connection: ConnectionState::Connecting,
            transport_error: None,
        }
    }
}

impl ProgressState {
    pub fn is_terminal(&self) -> bool {
        self.snapshot.as_ref().is_some_and(|s| s.is_terminal())
    }
}

/// Events folded into the client state
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Wholesale replace the snapshot (last applied wins)
    SetProgress(SessionSnapshot),
    SetConnectionState(ConnectionState),
    /// Transport-level failure; the snapshot is left untouched
    SetError(String),
    ClearError,
    Reset,
}

/// Fold one action into the state
///
/// Applying the same action twice yields the same state as applying it once.
pub fn reduce(state: &ProgressState, action: Action) -> ProgressState {
    match action {
        Action::SetProgress(snapshot) => ProgressState {
            snapshot: Some(snapshot),
            ..state.clone()
        },
        Action::SetConnectionState(connection) => ProgressState {
            connection,
            ..state.clone()
        },
        Action::SetError(message) => ProgressState {
            transport_error: Some(message),
            ..state.clone()
        },
        Action::ClearError => ProgressState {
            transport_error: None,
            ..state.clone()
        },
        Action::Reset => ProgressState::default(),
    }
}

/// Edge detector for the terminal transition
///
/// True only when the new state is terminal and the old one was not. A
/// snapshot recovered from cache that is already terminal is an edge on the
/// first application and never again.
pub fn terminal_transition(old: &ProgressState, new: &ProgressState) -> bool {
    !old.is_terminal() && new.is_terminal()
}

/// Stateful wrapper that owns a [`ProgressState`] and fires a terminal
/// callback exactly once
pub struct ProgressMachine {
    state: ProgressState,
    on_terminal: Option<Box<dyn FnMut(&SessionSnapshot) + Send>>,
    terminal_fired: bool,
}

impl ProgressMachine {
    pub fn new() -> Self {
        Self {
            state: ProgressState::default(),
            on_terminal: None,
            terminal_fired: false,
        }
    }

    /// Register the callback fired on the first terminal transition
    pub fn on_terminal(mut self, callback: impl FnMut(&SessionSnapshot) + Send + 'static) -> Self {
        self.on_terminal = Some(Box::new(callback));
        self
    }

    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    /// Apply an action, firing the terminal callback on the edge
    pub fn apply(&mut self, action: Action) {
        if matches!(action, Action::Reset) {
            self.terminal_fired = false;
        }

        let new_state = reduce(&self.state, action);

        if !self.terminal_fired && terminal_transition(&self.state, &new_state) {
            self.terminal_fired = true;
            if let (Some(callback), Some(snapshot)) = (self.on_terminal.as_mut(), new_state.snapshot.as_ref()) {
                callback(snapshot);
            }
        }

        self.state = new_state;
    }
}

impl Default for ProgressMachine {
    fn default() -> Self {
        Self::new()
    }
}
