//! Session lifecycle state machine.
//!
//! Models the coarse life of a serving session:
//! ```text
//! Starting → Serving → Closing
//! ```
//! The RFB per-client protocol keeps its own explicit read-handler machine;
//! this one only gates the outer event loop (when to accept clients, when
//! to stop and snapshot).

use statig::prelude::*;
use tracing::info;

/// Events dispatched to the session machine.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The host PTY spawned and is producing output.
    HostStarted,
    /// The host stream hit EOF or a fatal error.
    HostEof,
    /// Orderly shutdown requested.
    ShutdownRequested,
}

/// Shared storage for the session machine.
#[derive(Debug, Default)]
pub struct SessionMachine {
    /// Transitions into `closing` observed, for idempotent teardown.
    pub close_events: u32,
}

#[state_machine(
    initial = "State::starting()",
    state(derive(Debug, Clone, PartialEq))
)]
impl SessionMachine {
    /// Waiting for the host side to come up.
    #[state]
    fn starting(&mut self, event: &SessionEvent) -> Outcome<State> {
        match event {
            SessionEvent::HostStarted => {
                info!("host started; serving");
                Transition(State::serving())
            }
            SessionEvent::HostEof => {
                info!("host exited before serving");
                self.close_events += 1;
                Transition(State::closing())
            }
            SessionEvent::ShutdownRequested => {
                self.close_events += 1;
                Transition(State::closing())
            }
        }
    }

    /// Normal operation: clients may connect and exchange updates.
    #[state]
    fn serving(&mut self, event: &SessionEvent) -> Outcome<State> {
        match event {
            SessionEvent::HostEof => {
                info!("host stream closed");
                self.close_events += 1;
                Transition(State::closing())
            }
            SessionEvent::ShutdownRequested => {
                self.close_events += 1;
                Transition(State::closing())
            }
            SessionEvent::HostStarted => Handled,
        }
    }

    /// Tearing down: the event loop exits and the state snapshot is taken.
    #[state]
    fn closing(&mut self, event: &SessionEvent) -> Outcome<State> {
        let _ = event;
        Handled
    }
}
