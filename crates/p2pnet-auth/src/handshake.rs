//! Per-session handshake state machine.
//!
//! ```text
//! initiator: Initiated --SendHandshake1--> AwaitingConfirm --ReceiveHandshake2--> Established
//! responder: Initiated --ReceiveHandshake1--> Established
//! any:       * --Close--> Closed
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Id reserved and local secrets being generated.
    Initiated,
    /// Handshake-1 sent, handshake-2 not yet received.
    AwaitingConfirm,
    /// Shared key and both MAC keys known.
    Established,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Initiated => "initiated",
            SessionState::AwaitingConfirm => "awaiting-confirm",
            SessionState::Established => "established",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    SendHandshake1,
    ReceiveHandshake1,
    ReceiveHandshake2,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTransition {
    pub from: SessionState,
    pub to: SessionState,
    pub event: SessionEvent,
}

#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("invalid state transition from {0} via {1:?}")]
    InvalidTransition(SessionState, SessionEvent),
    #[error("duplicate handshake-2")]
    DuplicateHandshake2,
}

#[derive(Debug, Clone)]
pub struct Handshake {
    role: Role,
    state: SessionState,
}

impl Handshake {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: SessionState::Initiated,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn on_send_handshake1(&mut self) -> Result<SessionTransition, HandshakeError> {
        match (self.role, self.state) {
            (Role::Initiator, SessionState::Initiated) => {
                self.transition(SessionEvent::SendHandshake1, SessionState::AwaitingConfirm)
            }
            _ => Err(HandshakeError::InvalidTransition(
                self.state,
                SessionEvent::SendHandshake1,
            )),
        }
    }

    pub fn on_receive_handshake1(&mut self) -> Result<SessionTransition, HandshakeError> {
        match (self.role, self.state) {
            (Role::Responder, SessionState::Initiated) => {
                self.transition(SessionEvent::ReceiveHandshake1, SessionState::Established)
            }
            _ => Err(HandshakeError::InvalidTransition(
                self.state,
                SessionEvent::ReceiveHandshake1,
            )),
        }
    }

    pub fn on_receive_handshake2(&mut self) -> Result<SessionTransition, HandshakeError> {
        match (self.role, self.state) {
            (Role::Initiator, SessionState::AwaitingConfirm) => {
                self.transition(SessionEvent::ReceiveHandshake2, SessionState::Established)
            }
            (Role::Initiator, SessionState::Established) => Err(HandshakeError::DuplicateHandshake2),
            _ => Err(HandshakeError::InvalidTransition(
                self.state,
                SessionEvent::ReceiveHandshake2,
            )),
        }
    }

    /// Closing is valid from every state, including `Closed`.
    pub fn on_close(&mut self) -> SessionTransition {
        let from = self.state;
        self.state = SessionState::Closed;
        SessionTransition {
            from,
            to: SessionState::Closed,
            event: SessionEvent::Close,
        }
    }

    fn transition(
        &mut self,
        event: SessionEvent,
        next: SessionState,
    ) -> Result<SessionTransition, HandshakeError> {
        let from = self.state;
        self.state = next;
        Ok(SessionTransition {
            from,
            to: next,
            event,
        })
    }
}
