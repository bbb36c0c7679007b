use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{frame_from_slice, Frame, RadioError, RadioTransport};
use crate::clock::ManualClock;

/// Everything the mock saw, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    Sent(Vec<u8>),
    Received(Vec<u8>),
    FrequencySet(f32),
}

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

struct Pending {
    delay_ms: u64,
    bytes: Vec<u8>,
}

struct MockState {
    inbox: VecDeque<Pending>,
    events: Vec<RadioEvent>,
    frequency: f32,
    responder: Option<Responder>,
    fail_sends: bool,
    fail_receives: bool,
}

/// Scripted radio on simulated time.
///
/// Queued frames become available after their delay; waiting for them, or
/// for a receive timeout, advances the shared [`ManualClock`]. Clones share
/// state so a test can keep a handle after giving the radio away.
#[derive(Clone)]
pub struct MockRadio {
    clock: ManualClock,
    state: Arc<Mutex<MockState>>,
}

impl MockRadio {
    pub fn new(clock: ManualClock, frequency: f32) -> Self {
        Self {
            clock,
            state: Arc::new(Mutex::new(MockState {
                inbox: VecDeque::new(),
                events: Vec::new(),
                frequency,
                responder: None,
                fail_sends: false,
                fail_receives: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread poisons the lock; the data is still usable.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn push_frame(&self, bytes: &[u8]) {
        self.push_frame_after(0, bytes);
    }

    /// Queues a frame that arrives `delay_ms` after the previous one.
    pub fn push_frame_after(&self, delay_ms: u64, bytes: &[u8]) {
        self.lock().inbox.push_back(Pending {
            delay_ms,
            bytes: bytes.to_vec(),
        });
    }

    /// Installs a callback run on every send; the frames it returns are
    /// queued for receipt.
    pub fn on_send<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        self.lock().responder = Some(Box::new(responder));
    }

    pub fn fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    pub fn fail_receives(&self, fail: bool) {
        self.lock().fail_receives = fail;
    }

    pub fn events(&self) -> Vec<RadioEvent> {
        self.lock().events.clone()
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.lock()
            .events
            .iter()
            .filter_map(|event| match event {
                RadioEvent::Sent(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn pending(&self) -> usize {
        self.lock().inbox.len()
    }
}

impl RadioTransport for MockRadio {
    fn send(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        let mut state = self.lock();
        if state.fail_sends {
            return Err(RadioError::Io("mock send failure".into()));
        }
        state.events.push(RadioEvent::Sent(frame.to_vec()));

        if let Some(responder) = state.responder.as_mut() {
            let replies = responder(frame);
            state.inbox.extend(replies.into_iter().map(|bytes| Pending { delay_ms: 0, bytes }));
        }
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Frame>, RadioError> {
        let timeout_ms = timeout.as_millis() as u64;
        let mut state = self.lock();
        if state.fail_receives {
            return Err(RadioError::Io("mock receive failure".into()));
        }

        let ready = match state.inbox.front_mut() {
            Some(next) if next.delay_ms > timeout_ms => {
                next.delay_ms -= timeout_ms;
                None
            }
            Some(next) => Some(next.delay_ms),
            None => None,
        };

        let Some(delay) = ready else {
            drop(state);
            self.clock.advance(timeout_ms);
            return Ok(None);
        };
        let Some(pending) = state.inbox.pop_front() else {
            return Ok(None);
        };
        state.events.push(RadioEvent::Received(pending.bytes.clone()));
        drop(state);

        self.clock.advance(delay);
        frame_from_slice(&pending.bytes).map(Some)
    }

    fn set_frequency(&mut self, mhz: f32) -> Result<(), RadioError> {
        let mut state = self.lock();
        state.frequency = mhz;
        state.events.push(RadioEvent::FrequencySet(mhz));
        Ok(())
    }

    fn frequency(&self) -> f32 {
        self.lock().frequency
    }
}
