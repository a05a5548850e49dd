//! Connection state machine and reconnect bookkeeping.
//!
//! [`Lifecycle`] performs no I/O. The client's driver task feeds it what
//! happened (connect requested, open succeeded, connection lost) and acts on
//! the returned [`Transition`] and [`NextStep`].

use std::fmt;
use std::time::Duration;

use crate::config::ReconnectConfig;

/// State of a [`ChatClient`](crate::ChatClient) session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No session.
    #[default]
    Disconnected,
    /// The first connection of a session is being established.
    Connecting,
    /// Connected and joined.
    Connected,
    /// The connection was lost; waiting for or performing a retry.
    Reconnecting,
    /// Retries are exhausted. Only an explicit `connect` leaves this state.
    Failed,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Reconnecting => write!(f, "Reconnecting"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// A state change, possibly to the same state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }

    /// What connection-change listeners hear about this transition.
    ///
    /// `true` when entering `Connected`, `false` when leaving it or when
    /// entering `Failed`, nothing otherwise.
    pub fn connection_signal(&self) -> Option<bool> {
        if !self.changed() {
            return None;
        }
        if self.to == ConnectionState::Connected {
            Some(true)
        } else if self.from == ConnectionState::Connected || self.to == ConnectionState::Failed {
            Some(false)
        } else {
            None
        }
    }
}

/// What to do after a failed or lost connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Wait `delay`, then make reconnection attempt `attempt` (1-based).
    Retry { attempt: u32, delay: Duration },
    /// Stop; `attempts` reconnection attempts were made.
    GiveUp { attempts: u32 },
}

/// The connection state machine.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: ConnectionState,
    attempts: u32,
    policy: ReconnectConfig,
}

impl Lifecycle {
    pub fn new(policy: ReconnectConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnection attempts made since the last successful connection.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> &ReconnectConfig {
        &self.policy
    }

    /// A new session starts connecting.
    pub fn begin_connect(&mut self) -> Transition {
        self.attempts = 0;
        self.move_to(ConnectionState::Connecting)
    }

    /// An explicit close-then-reopen of the current session.
    pub fn begin_forced_reconnect(&mut self) -> Transition {
        self.attempts = 0;
        self.move_to(ConnectionState::Reconnecting)
    }

    /// The transport opened.
    pub fn connected(&mut self) -> Transition {
        self.attempts = 0;
        self.move_to(ConnectionState::Connected)
    }

    /// Opening failed or an open connection dropped.
    pub fn connection_lost(&mut self) -> (Transition, NextStep) {
        if self.policy.allows_attempt(self.attempts) {
            self.attempts += 1;
            let delay = self.policy.delay_for_attempt(self.attempts);
            let transition = self.move_to(ConnectionState::Reconnecting);
            (
                transition,
                NextStep::Retry {
                    attempt: self.attempts,
                    delay,
                },
            )
        } else {
            let transition = self.move_to(ConnectionState::Failed);
            (
                transition,
                NextStep::GiveUp {
                    attempts: self.attempts,
                },
            )
        }
    }

    /// Starting a session was impossible; skip retries.
    pub fn fail(&mut self) -> Transition {
        self.move_to(ConnectionState::Failed)
    }

    /// The session ended on request.
    pub fn reset(&mut self) -> Transition {
        self.attempts = 0;
        self.move_to(ConnectionState::Disconnected)
    }

    fn move_to(&mut self, to: ConnectionState) -> Transition {
        let from = std::mem::replace(&mut self.state, to);
        Transition { from, to }
    }
}
