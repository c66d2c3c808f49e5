//! Per-handshake state machine.
//!
//! ```text
//! Idle -> Opened -> Listening -> Processing -> Terminated(Success | Failure)
//!           |          |
//!           +----------+-------------------> Terminated(CancelledByUser)
//! ```
//!
//! Every transition goes through a guard method. `terminate` succeeds only
//! once; after that every guard refuses.

use std::cell::Cell;

use super::types::Outcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Opened,
    Listening,
    Processing,
    Terminated(Outcome),
}

/// Owned by exactly one controller; interior mutability lets the run loop
/// consult it while futures borrow the rest of the controller.
#[derive(Debug)]
pub struct HandshakeState {
    phase: Cell<Phase>,
}

impl HandshakeState {
    pub fn new() -> Self {
        Self {
            phase: Cell::new(Phase::Idle),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.phase(), Phase::Terminated(_))
    }

    /// Idle -> Opened.
    pub fn opened(&self) -> bool {
        self.advance(Phase::Idle, Phase::Opened)
    }

    /// Opened -> Listening.
    pub fn listening(&self) -> bool {
        self.advance(Phase::Opened, Phase::Listening)
    }

    /// Listening -> Processing. Refused while another message is in flight
    /// or after termination, which is what serializes message handling.
    pub fn begin_processing(&self) -> bool {
        self.advance(Phase::Listening, Phase::Processing)
    }

    /// Whether a closed child context should end the handshake quietly.
    /// Closure during Processing is expected (the issuer closes itself
    /// after posting) and is ignored.
    pub fn accepts_user_close(&self) -> bool {
        matches!(self.phase(), Phase::Opened | Phase::Listening)
    }

    /// Enter a terminal phase. Returns `false` if already terminated.
    pub fn terminate(&self, outcome: Outcome) -> bool {
        if self.is_terminated() {
            return false;
        }
        tracing::debug!(from = ?self.phase(), to = ?outcome, "handshake terminated");
        self.phase.set(Phase::Terminated(outcome));
        true
    }

    fn advance(&self, from: Phase, to: Phase) -> bool {
        if self.phase() != from {
            return false;
        }
        tracing::debug!(?from, ?to, "handshake transition");
        self.phase.set(to);
        true
    }
}

impl Default for HandshakeState {
    fn default() -> Self {
        Self::new()
    }
}
