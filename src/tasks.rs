use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::handshake::{AbortReason, FrequencyHandshake, HandshakeError, HandshakeOutcome, HANDSHAKE_WINDOW_MS};
use crate::radio::{RadioError, RadioTransport};
use crate::store::{Sample, StoreError, TelemetryStore, FREQUENCY_KEY};
use crate::telemetry::SERIES_KEYS;

pub const MIN_FREQUENCY_MHZ: f64 = 900.0;
pub const MAX_FREQUENCY_MHZ: f64 = 930.0;

pub const OK_PREFIX: &str = "[OK]";
pub const ERROR_PREFIX: &str = "[ERROR]";
pub const NOT_IMPLEMENTED_PREFIX: &str = "[NOT IMPLEMENTED]";

/// Operator task as it arrives on the queue:
/// `{"task_id": "...", "task": "...", "params": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    #[serde(rename = "task")]
    pub task_name: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub task_id: String,
    pub result: String,
}

impl Response {
    pub fn is_error(&self) -> bool {
        self.result.starts_with(ERROR_PREFIX)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    #[error("invalid task JSON: {0}")]
    InvalidJson(String),
    #[error("unrecognized task: {0}")]
    Unrecognized(String),
    #[error("missing parameter '{0}'")]
    MissingParameter(&'static str),
    #[error("parameter '{name}' must be {expected}")]
    InvalidParameter {
        name: &'static str,
        expected: &'static str,
    },
    #[error("frequency {0} MHz out of range [900, 930]")]
    FrequencyOutOfRange(f64),
    #[error("frequency change not confirmed by remote: {0}")]
    NotConfirmed(AbortReason),
    #[error("{0}")]
    Handshake(#[from] HandshakeError),
    #[error("{0}")]
    Radio(#[from] RadioError),
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("cannot encode result: {0}")]
    Encode(String),
}

/// A task that could not be parsed. `task_id` is kept when it could be
/// recovered so the originator still gets an answer.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedTask {
    pub task_id: Option<String>,
    pub error: TaskError,
}

pub fn parse_task(json: &str) -> Result<Task, MalformedTask> {
    let value: Value = serde_json::from_str(json).map_err(|e| MalformedTask {
        task_id: None,
        error: TaskError::InvalidJson(e.to_string()),
    })?;

    let task_id = match value.get("task_id") {
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    };

    serde_json::from_value(value).map_err(|e| MalformedTask {
        task_id,
        error: TaskError::InvalidJson(e.to_string()),
    })
}

/// Validated form of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TaskKind {
    ChangeFrequency { frequency: f32 },
    ForceGroundFrequency { frequency: f32 },
    SendFlightReady,
    SetGroundStationId { id: i64 },
    SetRocketId { id: i64 },
    LatestTelemetry,
}

impl TaskKind {
    pub fn from_task(task: &Task) -> Result<Self, TaskError> {
        match task.task_name.as_str() {
            "change_frequency" => Ok(TaskKind::ChangeFrequency {
                frequency: frequency_param(&task.params)?,
            }),
            "force_ground_frequency" => Ok(TaskKind::ForceGroundFrequency {
                frequency: frequency_param(&task.params)?,
            }),
            "send_flight_ready" => Ok(TaskKind::SendFlightReady),
            "set_ground_station_id" => Ok(TaskKind::SetGroundStationId {
                id: id_param(&task.params)?,
            }),
            "set_rocket_id" => Ok(TaskKind::SetRocketId {
                id: id_param(&task.params)?,
            }),
            "latest_telemetry" => Ok(TaskKind::LatestTelemetry),
            other => Err(TaskError::Unrecognized(other.to_string())),
        }
    }
}

fn frequency_param(params: &Map<String, Value>) -> Result<f32, TaskError> {
    let frequency = params
        .get("frequency")
        .ok_or(TaskError::MissingParameter("frequency"))?
        .as_f64()
        .ok_or(TaskError::InvalidParameter {
            name: "frequency",
            expected: "a number",
        })?;

    if !(MIN_FREQUENCY_MHZ..=MAX_FREQUENCY_MHZ).contains(&frequency) {
        return Err(TaskError::FrequencyOutOfRange(frequency));
    }
    Ok(frequency as f32)
}

fn id_param(params: &Map<String, Value>) -> Result<i64, TaskError> {
    params
        .get("id")
        .ok_or(TaskError::MissingParameter("id"))?
        .as_i64()
        .ok_or(TaskError::InvalidParameter {
            name: "id",
            expected: "an integer",
        })
}

/// Collaborators a task may touch.
pub struct TaskContext<'a> {
    pub radio: &'a mut dyn RadioTransport,
    pub clock: &'a dyn Clock,
    pub store: &'a mut dyn TelemetryStore,
    pub cancel: &'a CancelToken,
}

#[derive(Debug, Clone)]
pub struct TaskHandler {
    handshake_window_ms: u64,
}

impl Default for TaskHandler {
    fn default() -> Self {
        Self::new(HANDSHAKE_WINDOW_MS)
    }
}

impl TaskHandler {
    pub fn new(handshake_window_ms: u64) -> Self {
        Self { handshake_window_ms }
    }

    /// Runs one task. Never fails: every error becomes an `[ERROR]` response.
    pub fn handle(&self, task: &Task, ctx: &mut TaskContext<'_>) -> Response {
        let result = match self.execute(task, ctx) {
            Ok(result) => {
                info!(task_id = %task.task_id, task = %task.task_name, %result, "task complete");
                result
            }
            Err(e) => {
                warn!(task_id = %task.task_id, task = %task.task_name, error = %e, "task failed");
                error_result(&e)
            }
        };

        Response {
            task_id: task.task_id.clone(),
            result,
        }
    }

    fn execute(&self, task: &Task, ctx: &mut TaskContext<'_>) -> Result<String, TaskError> {
        match TaskKind::from_task(task)? {
            TaskKind::ChangeFrequency { frequency } => {
                let outcome = FrequencyHandshake::new(frequency)
                    .with_window(self.handshake_window_ms)
                    .run(ctx.radio, ctx.clock, ctx.cancel)?;

                match outcome {
                    HandshakeOutcome::Confirmed { frequency } => Ok(format!(
                        "{OK_PREFIX} frequency changed to {frequency} MHz{}",
                        persist_frequency(ctx.store, frequency)
                    )),
                    HandshakeOutcome::Aborted(reason) => Err(TaskError::NotConfirmed(reason)),
                }
            }
            TaskKind::ForceGroundFrequency { frequency } => {
                // Operator override: no remote coordination, may desynchronize the link.
                ctx.radio.set_frequency(frequency)?;
                warn!(frequency, "ground frequency forced without remote handshake");
                Ok(format!(
                    "{OK_PREFIX} ground frequency forced to {frequency} MHz{}",
                    persist_frequency(ctx.store, frequency)
                ))
            }
            TaskKind::SendFlightReady => Ok(format!("{NOT_IMPLEMENTED_PREFIX} send_flight_ready")),
            TaskKind::SetGroundStationId { id } => {
                Ok(format!("{NOT_IMPLEMENTED_PREFIX} set_ground_station_id (requested id {id})"))
            }
            TaskKind::SetRocketId { id } => Ok(format!("{NOT_IMPLEMENTED_PREFIX} set_rocket_id (requested id {id})")),
            TaskKind::LatestTelemetry => {
                let latest = latest_samples(&*ctx.store)?;
                let body = serde_json::to_string(&latest).map_err(|e| TaskError::Encode(e.to_string()))?;
                Ok(format!("{OK_PREFIX} {body}"))
            }
        }
    }
}

/// The radio has already moved when this runs, so a store failure is
/// reported in the result text and the task still succeeds.
fn persist_frequency(store: &mut dyn TelemetryStore, frequency: f32) -> String {
    match store.set(FREQUENCY_KEY, &frequency.to_string()) {
        Ok(()) => String::new(),
        Err(e) => {
            warn!(frequency, error = %e, "frequency not persisted");
            format!(" (frequency not persisted: {e})")
        }
    }
}

/// Most recent sample of one telemetry series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesLatest {
    pub key: String,
    pub sample: Option<Sample>,
}

/// Last stored sample of every series, in wire order.
pub fn latest_samples(store: &dyn TelemetryStore) -> Result<Vec<SeriesLatest>, StoreError> {
    SERIES_KEYS
        .iter()
        .map(|key| {
            Ok(SeriesLatest {
                key: key.to_string(),
                sample: store.get_last(key)?,
            })
        })
        .collect()
}

/// Reads the body of a successful `latest_telemetry` result.
pub fn parse_latest(result: &str) -> Option<Vec<SeriesLatest>> {
    let body = result.strip_prefix(OK_PREFIX)?;
    serde_json::from_str(body.trim()).ok()
}

pub fn error_result(error: &TaskError) -> String {
    format!("{ERROR_PREFIX} {error}")
}
