//! Radio transport capability.
//!
//! The core never talks to hardware directly. Anything that can move opaque
//! frames and retune itself satisfies [`RadioTransport`]: the in-process
//! [`SimulatedRocket`] used by the relay binary, or the scripted
//! [`MockRadio`] used by tests.

pub mod mock;
pub mod simulated;

pub use mock::{MockRadio, RadioEvent};
pub use simulated::SimulatedRocket;

use core::time::Duration;
use thiserror::Error;

/// RFM9x FIFO is 256 bytes, four of which carry the RadioHead header.
pub const MAX_FRAME_LEN: usize = 252;

pub type Frame = heapless::Vec<u8, MAX_FRAME_LEN>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RadioError {
    #[error("frame of {0} bytes exceeds the radio payload limit")]
    FrameTooLarge(usize),
    #[error("transport rejected frequency {0} MHz")]
    InvalidFrequency(f32),
    #[error("radio I/O failure: {0}")]
    Io(String),
}

pub trait RadioTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), RadioError>;

    /// Waits at most `timeout` for one frame. `Ok(None)` means nothing
    /// arrived, never an error.
    fn receive(&mut self, timeout: Duration) -> Result<Option<Frame>, RadioError>;

    fn set_frequency(&mut self, mhz: f32) -> Result<(), RadioError>;

    fn frequency(&self) -> f32;
}

pub fn frame_from_slice(bytes: &[u8]) -> Result<Frame, RadioError> {
    Frame::from_slice(bytes).map_err(|()| RadioError::FrameTooLarge(bytes.len()))
}
