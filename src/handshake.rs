//! Frequency-change handshake.
//!
//! ```text
//!   Idle --send COMMAND/SWITCH(f)--> AwaitingEcho --echo(f)--> Confirmed
//!                                        |
//!                                        +--deadline / cancel / I/O--> Aborted
//! ```
//!
//! Ground and remote must never end up on different frequencies because of
//! an ambiguous exchange. The local radio is retuned only after a matching
//! echo has been received *and* the final acknowledgment has been sent.
//! Every other path leaves the local frequency untouched.

use core::fmt;
use core::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::protocol::{parse_switch_frequency_echo, switch_frequency_ack, switch_frequency_command};
use crate::radio::{RadioError, RadioTransport};

pub const HANDSHAKE_WINDOW_MS: u64 = 3000;

/// Longest single receive while waiting for the echo, so cancellation is
/// noticed promptly.
pub const RECEIVE_SLICE_MS: u64 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    Timeout,
    Cancelled,
    Transport,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Timeout => write!(f, "no confirmation before deadline"),
            AbortReason::Cancelled => write!(f, "cancelled"),
            AbortReason::Transport => write!(f, "transport failure"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum HandshakeState {
    Idle,
    AwaitingEcho { requested: f32, deadline_ms: u64 },
    Confirmed { frequency: f32 },
    Aborted { reason: AbortReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum HandshakeOutcome {
    Confirmed { frequency: f32 },
    Aborted(AbortReason),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HandshakeError {
    #[error("handshake cannot {action} while {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: HandshakeState,
    },
    #[error("radio failure during handshake: {0}")]
    Radio(#[from] RadioError),
}

#[derive(Debug)]
pub struct FrequencyHandshake {
    requested: f32,
    window_ms: u64,
    state: HandshakeState,
    noise_frames: u32,
}

impl FrequencyHandshake {
    pub fn new(requested: f32) -> Self {
        Self {
            requested,
            window_ms: HANDSHAKE_WINDOW_MS,
            state: HandshakeState::Idle,
            noise_frames: 0,
        }
    }

    pub fn with_window(mut self, window_ms: u64) -> Self {
        self.window_ms = window_ms;
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Frames received while waiting that were not the expected echo.
    pub fn noise_frames(&self) -> u32 {
        self.noise_frames
    }

    /// Idle -> AwaitingEcho: sends the switch command and arms the deadline.
    pub fn begin(&mut self, radio: &mut dyn RadioTransport, clock: &dyn Clock) -> Result<(), HandshakeError> {
        if self.state != HandshakeState::Idle {
            return Err(HandshakeError::InvalidTransition {
                action: "begin",
                state: self.state,
            });
        }

        if let Err(e) = radio.send(&switch_frequency_command(self.requested)) {
            self.state = HandshakeState::Aborted {
                reason: AbortReason::Transport,
            };
            return Err(e.into());
        }

        let deadline_ms = clock.now_ms() + self.window_ms;
        info!(requested = self.requested, deadline_ms, "frequency switch command sent");
        self.state = HandshakeState::AwaitingEcho {
            requested: self.requested,
            deadline_ms,
        };
        Ok(())
    }

    /// One receive attempt while AwaitingEcho. Returns the state afterwards.
    pub fn step(
        &mut self,
        radio: &mut dyn RadioTransport,
        clock: &dyn Clock,
        cancel: &CancelToken,
    ) -> Result<HandshakeState, HandshakeError> {
        let HandshakeState::AwaitingEcho { requested, deadline_ms } = self.state else {
            return Err(HandshakeError::InvalidTransition {
                action: "step",
                state: self.state,
            });
        };

        if cancel.is_cancelled() {
            warn!(requested, "frequency handshake cancelled, local frequency unchanged");
            self.state = HandshakeState::Aborted {
                reason: AbortReason::Cancelled,
            };
            return Ok(self.state);
        }

        let now = clock.now_ms();
        if now >= deadline_ms {
            warn!(requested, "no frequency echo before deadline, local frequency unchanged");
            self.state = HandshakeState::Aborted {
                reason: AbortReason::Timeout,
            };
            return Ok(self.state);
        }

        let slice = (deadline_ms - now).min(RECEIVE_SLICE_MS);
        let frame = match radio.receive(Duration::from_millis(slice)) {
            Ok(frame) => frame,
            Err(e) => {
                self.state = HandshakeState::Aborted {
                    reason: AbortReason::Transport,
                };
                return Err(e.into());
            }
        };

        match frame {
            Some(frame) if parse_switch_frequency_echo(&frame) == Some(requested) => {
                self.confirm(radio, requested)?;
            }
            Some(frame) => {
                self.noise_frames = self.noise_frames.saturating_add(1);
                debug!(len = frame.len(), tag = frame.first().copied(), "ignoring frame during handshake");
            }
            None => {}
        }

        Ok(self.state)
    }

    // The final ack goes out before the local retune. If the ack cannot be
    // sent, the local radio stays where it is.
    fn confirm(&mut self, radio: &mut dyn RadioTransport, frequency: f32) -> Result<(), HandshakeError> {
        let applied = radio
            .send(&switch_frequency_ack())
            .and_then(|()| radio.set_frequency(frequency));

        if let Err(e) = applied {
            self.state = HandshakeState::Aborted {
                reason: AbortReason::Transport,
            };
            return Err(e.into());
        }

        info!(frequency, "frequency switch confirmed");
        self.state = HandshakeState::Confirmed { frequency };
        Ok(())
    }

    /// Drives the handshake from Idle to a terminal state.
    pub fn run(
        &mut self,
        radio: &mut dyn RadioTransport,
        clock: &dyn Clock,
        cancel: &CancelToken,
    ) -> Result<HandshakeOutcome, HandshakeError> {
        self.begin(radio, clock)?;

        loop {
            match self.step(radio, clock, cancel)? {
                HandshakeState::AwaitingEcho { .. } => continue,
                HandshakeState::Confirmed { frequency } => {
                    return Ok(HandshakeOutcome::Confirmed { frequency });
                }
                HandshakeState::Aborted { reason } => return Ok(HandshakeOutcome::Aborted(reason)),
                HandshakeState::Idle => {
                    return Err(HandshakeError::InvalidTransition {
                        action: "run",
                        state: HandshakeState::Idle,
                    });
                }
            }
        }
    }
}
