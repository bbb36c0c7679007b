//! Ground station main loop.
//!
//! [`GroundStation`] owns every collaborator and is the only mutator of
//! station state. Each cycle does one bounded radio receive and one
//! non-blocking task poll; nothing that goes wrong inside a cycle stops the
//! loop.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::config::StationConfig;
use crate::protocol::{PacketRouter, RouterAction, RouterError, RouterStats};
use crate::queue::{QueueError, ResponseStore, TaskQueue};
use crate::radio::{Frame, RadioError, RadioTransport};
use crate::store::{StoreError, TelemetryStore, FREQUENCY_KEY};
use crate::tasks::{error_result, parse_task, Response, TaskContext, TaskHandler};
use crate::telemetry::{TelemetryReading, SERIES_KEYS};
use crate::telemetry_log::{LogError, TelemetryLog};

#[derive(Debug, Error)]
pub enum StationError {
    #[error("radio: {0}")]
    Radio(#[from] RadioError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("queue: {0}")]
    Queue(#[from] QueueError),
    #[error("log: {0}")]
    Log(#[from] LogError),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StationState {
    pub running: bool,
    pub cycles: u64,
    pub readings_persisted: u64,
    pub frames_dropped: u64,
    pub tasks_handled: u64,
    pub frequency_mhz: f32,
    pub last_error: Option<String>,
    pub router: RouterStats,
}

/// What happened to the frame received in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameDisposition {
    Persisted(TelemetryReading),
    Command(Frame),
    Ping,
    AckPong(Frame),
    Dropped(RouterError),
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub frame: Option<FrameDisposition>,
    pub response: Option<Response>,
    /// Failures that abandoned part of the cycle. The next cycle retries.
    pub errors: Vec<StationError>,
}

/// Everything the station talks to, injected at construction.
pub struct Collaborators {
    pub radio: Box<dyn RadioTransport + Send>,
    pub clock: Box<dyn Clock + Send>,
    pub store: Box<dyn TelemetryStore + Send>,
    pub tasks: Box<dyn TaskQueue + Send>,
    pub responses: Box<dyn ResponseStore + Send>,
    pub log: Box<dyn TelemetryLog + Send>,
}

pub struct GroundStation {
    config: StationConfig,
    radio: Box<dyn RadioTransport + Send>,
    clock: Box<dyn Clock + Send>,
    store: Box<dyn TelemetryStore + Send>,
    tasks: Box<dyn TaskQueue + Send>,
    responses: Box<dyn ResponseStore + Send>,
    log: Box<dyn TelemetryLog + Send>,
    router: PacketRouter,
    handler: TaskHandler,
    cancel: CancelToken,
    state: StationState,
    tasks_disconnected: bool,
    closed: bool,
}

impl GroundStation {
    /// Declares every telemetry series before the first write.
    pub fn new(config: StationConfig, collaborators: Collaborators) -> Result<Self, StationError> {
        let Collaborators {
            radio,
            clock,
            mut store,
            tasks,
            responses,
            log,
        } = collaborators;

        for key in SERIES_KEYS {
            store.declare_series(key, config.retention_ms)?;
        }

        let state = StationState {
            frequency_mhz: radio.frequency(),
            ..StationState::default()
        };

        Ok(Self {
            handler: TaskHandler::new(config.handshake_window_ms),
            config,
            radio,
            clock,
            store,
            tasks,
            responses,
            log,
            router: PacketRouter::new(),
            cancel: CancelToken::new(),
            state,
            tasks_disconnected: false,
            closed: false,
        })
    }

    pub fn start(&mut self) -> Result<(), StationError> {
        self.radio.set_frequency(self.config.frequency_mhz)?;
        self.store.set(FREQUENCY_KEY, &self.config.frequency_mhz.to_string())?;
        self.state.frequency_mhz = self.radio.frequency();
        self.state.running = true;

        info!(
            flight = %self.config.flight,
            frequency = self.config.frequency_mhz,
            "ground station started"
        );
        Ok(())
    }

    /// Token that stops [`run`](Self::run) and aborts an in-flight handshake.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> &StationState {
        &self.state
    }

    pub fn store(&self) -> &dyn TelemetryStore {
        &*self.store
    }

    pub fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        self.state.cycles += 1;

        match self.poll_radio() {
            Ok(frame) => report.frame = frame,
            Err(e) => report.errors.push(e),
        }

        match self.poll_tasks() {
            Ok(response) => report.response = response,
            Err(e) => report.errors.push(e),
        }

        for e in &report.errors {
            error!(error = %e, "cycle step abandoned");
        }
        if let Some(e) = report.errors.last() {
            self.state.last_error = Some(e.to_string());
        }
        self.state.router = self.router.stats();
        self.state.frequency_mhz = self.radio.frequency();

        report
    }

    /// Cycles until cancelled, then shuts down.
    pub fn run(&mut self) -> Result<(), StationError> {
        if !self.state.running {
            self.start()?;
        }

        while !self.cancel.is_cancelled() {
            self.run_cycle();
            self.clock.sleep(self.config.loop_period());
        }

        info!(cycles = self.state.cycles, "cancellation received");
        self.shutdown()
    }

    /// Closes the telemetry log. Safe to call more than once.
    pub fn shutdown(&mut self) -> Result<(), StationError> {
        self.state.running = false;
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.log.close()?;
        info!(
            readings = self.state.readings_persisted,
            tasks = self.state.tasks_handled,
            "ground station stopped"
        );
        Ok(())
    }

    fn poll_radio(&mut self) -> Result<Option<FrameDisposition>, StationError> {
        let Some(frame) = self.radio.receive(self.config.receive_timeout())? else {
            return Ok(None);
        };

        let disposition = match self.router.route(&frame) {
            Ok(RouterAction::Telemetry(reading)) => {
                self.persist(&reading)?;
                FrameDisposition::Persisted(reading)
            }
            Ok(RouterAction::Command(payload)) => {
                debug!(len = payload.len(), "command frame from remote, no handler");
                FrameDisposition::Command(payload)
            }
            Ok(RouterAction::Ping) => {
                debug!("ping from remote");
                FrameDisposition::Ping
            }
            Ok(RouterAction::AckPong(payload)) => {
                debug!(len = payload.len(), "unsolicited ack outside handshake");
                FrameDisposition::AckPong(payload)
            }
            Err(e) => {
                warn!(error = %e, len = frame.len(), "frame dropped");
                self.state.frames_dropped += 1;
                FrameDisposition::Dropped(e)
            }
        };

        Ok(Some(disposition))
    }

    fn persist(&mut self, reading: &TelemetryReading) -> Result<(), StationError> {
        self.store.append_reading(reading)?;
        self.log.append(reading)?;
        self.state.readings_persisted += 1;
        debug!(timestamp = reading.timestamp, "reading persisted");
        Ok(())
    }

    fn poll_tasks(&mut self) -> Result<Option<Response>, StationError> {
        if self.tasks_disconnected {
            return Ok(None);
        }

        let raw = match self.tasks.pop() {
            Ok(raw) => raw,
            Err(nb::Error::WouldBlock) => return Ok(None),
            Err(nb::Error::Other(QueueError::Disconnected)) => {
                warn!("task queue closed, no further operator tasks");
                self.tasks_disconnected = true;
                return Ok(None);
            }
            Err(nb::Error::Other(e)) => return Err(e.into()),
        };

        let response = match parse_task(&raw) {
            Ok(task) => {
                let mut ctx = TaskContext {
                    radio: &mut *self.radio,
                    clock: &*self.clock,
                    store: &mut *self.store,
                    cancel: &self.cancel,
                };
                self.handler.handle(&task, &mut ctx)
            }
            Err(malformed) => {
                warn!(task_id = ?malformed.task_id, error = %malformed.error, "malformed task");
                let Some(task_id) = malformed.task_id else {
                    return Ok(None);
                };
                Response {
                    task_id,
                    result: error_result(&malformed.error),
                }
            }
        };

        self.state.tasks_handled += 1;
        self.responses.put(&response, self.config.response_ttl())?;
        Ok(Some(response))
    }
}

impl Drop for GroundStation {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "telemetry log not closed cleanly");
        }
    }
}
