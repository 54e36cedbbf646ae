//! Liveness state machine for one tracker-side peer connection.
//! Host-driven: the host reports read outcomes, the machine says what to do next.
//!
//! `Active --idle timeout--> Probing --PONG--> Active`
//! `Probing --timeout / other reply / CLOSE / disconnect--> Terminated`

use crate::protocol::Control;

/// Default idle window before a peer is probed.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    Active,
    Probing,
    Terminated,
}

/// Why a peer was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    /// Peer sent `CLOSE`.
    Left,
    /// Connection closed or errored.
    Disconnected,
    /// No reply to `PING` within the idle window.
    NoPong,
    /// Reply to `PING` was something other than `PONG`.
    BadPong,
    /// Application payload after the join handshake.
    ProtocolViolation,
}

/// What the host should do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessAction {
    /// Keep reading.
    Continue,
    /// Send `PING` and read again.
    SendPing,
    /// Remove the peer from the registry and close its connection.
    Evict(EvictReason),
}

#[derive(Debug)]
pub struct LivenessMonitor {
    state: LivenessState,
}

impl LivenessMonitor {
    pub fn new() -> Self {
        Self {
            state: LivenessState::Active,
        }
    }

    pub fn state(&self) -> LivenessState {
        self.state
    }

    /// The read window elapsed with no data.
    pub fn on_idle_timeout(&mut self) -> LivenessAction {
        match self.state {
            LivenessState::Active => {
                self.state = LivenessState::Probing;
                LivenessAction::SendPing
            }
            LivenessState::Probing => self.terminate(EvictReason::NoPong),
            LivenessState::Terminated => LivenessAction::Evict(EvictReason::NoPong),
        }
    }

    /// A complete payload arrived.
    pub fn on_payload(&mut self, payload: &[u8]) -> LivenessAction {
        let control = Control::parse(payload);
        match (self.state, control) {
            (LivenessState::Terminated, _) => LivenessAction::Evict(EvictReason::Disconnected),
            (_, Some(Control::Close)) => self.terminate(EvictReason::Left),
            (LivenessState::Probing, Some(Control::Pong)) => {
                self.state = LivenessState::Active;
                LivenessAction::Continue
            }
            (LivenessState::Probing, _) => self.terminate(EvictReason::BadPong),
            // A late PONG from an earlier probe.
            (LivenessState::Active, Some(Control::Pong)) => LivenessAction::Continue,
            (LivenessState::Active, _) => self.terminate(EvictReason::ProtocolViolation),
        }
    }

    /// The connection closed or a read failed.
    pub fn on_disconnect(&mut self) -> LivenessAction {
        self.terminate(EvictReason::Disconnected)
    }

    fn terminate(&mut self, reason: EvictReason) -> LivenessAction {
        self.state = LivenessState::Terminated;
        LivenessAction::Evict(reason)
    }
}

impl Default for LivenessMonitor {
    fn default() -> Self {
        Self::new()
    }
}
