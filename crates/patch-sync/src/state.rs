use std::fmt;

use thiserror::Error;

/// Lifecycle of one subscription instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    /// Torn down by the consumer.
    Closed,
    /// Stopped after an unrecoverable failure.
    Errored,
    /// The server ended the stream on purpose.
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    Start,
    Opened,
    Lost,
    Retry,
    Finish,
    Fail,
    Teardown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} while {from}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub event: StateEvent,
}

impl ConnectionState {
    /// Next state for `event`. Illegal events leave the caller's state untouched.
    pub fn on(self, event: StateEvent) -> Result<ConnectionState, InvalidTransition> {
        use ConnectionState::*;
        use StateEvent::*;

        let next = match (self, event) {
            (_, Teardown) => Closed,
            (Idle, Start) => Connecting,
            (Connecting | Reconnecting, Opened) => Open,
            (Connecting | Open, Lost) => Reconnecting,
            (Reconnecting, Retry) => Connecting,
            (Open, Finish) => Completed,
            (Connecting | Open | Reconnecting, Fail) => Errored,
            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(next)
    }

    /// Only one connect attempt may be in flight, and only from here.
    pub fn may_connect(self) -> bool {
        self == ConnectionState::Connecting
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionState::Open
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
            ConnectionState::Errored => "errored",
            ConnectionState::Completed => "completed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
