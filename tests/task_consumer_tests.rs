use std::time::Duration;

use gsrelay::protocol::*;
use gsrelay::queue::*;
use gsrelay::radio::RadioEvent;
use gsrelay::store::FREQUENCY_KEY;
use gsrelay::telemetry::SERIES_KEYS;
use gsrelay::tasks::*;
use gsrelay::*;
use serde_json::json;

struct Harness {
    clock: ManualClock,
    radio: MockRadio,
    store: MemoryStore,
    cancel: CancelToken,
    handler: TaskHandler,
}

impl Harness {
    fn new() -> Self {
        let clock = ManualClock::new(0);
        Self {
            radio: MockRadio::new(clock.clone(), 915.0),
            store: MemoryStore::with_clock("TEST01", Box::new(clock.clone())),
            clock,
            cancel: CancelToken::new(),
            handler: TaskHandler::default(),
        }
    }

    /// Remote that answers switch commands with a matching echo.
    fn with_cooperative_remote(self) -> Self {
        self.radio.on_send(|frame| match parse_switch_frequency_command(frame) {
            Some(mhz) => vec![switch_frequency_echo(mhz).to_vec()],
            None => Vec::new(),
        });
        self
    }

    fn handle(&mut self, task: &Task) -> Response {
        let mut radio = self.radio.clone();
        let mut ctx = TaskContext {
            radio: &mut radio,
            clock: &self.clock,
            store: &mut self.store,
            cancel: &self.cancel,
        };
        self.handler.handle(task, &mut ctx)
    }

    fn stored_frequency(&self) -> Option<String> {
        self.store.get(FREQUENCY_KEY).unwrap()
    }
}

fn task(name: &str, params: serde_json::Value) -> Task {
    Task {
        task_id: "1717171717.123456".to_string(),
        task_name: name.to_string(),
        params: params.as_object().cloned().unwrap_or_default(),
    }
}

#[test]
fn test_out_of_range_frequency_rejected_before_transport() {
    let mut harness = Harness::new().with_cooperative_remote();

    let response = harness.handle(&task("change_frequency", json!({ "frequency": 850 })));

    assert!(response.is_error());
    assert!(response.result.starts_with("[ERROR]"));
    assert!(response.result.contains("out of range"));
    assert_eq!(response.task_id, "1717171717.123456");
    assert!(harness.radio.events().is_empty(), "range check fires before any radio I/O");
    assert_eq!(harness.stored_frequency(), None);
}

#[test]
fn test_change_frequency_runs_handshake_and_persists() {
    let mut harness = Harness::new().with_cooperative_remote();

    let response = harness.handle(&task("change_frequency", json!({ "frequency": 915 })));

    assert_eq!(response.result, "[OK] frequency changed to 915 MHz");
    assert!(!response.is_error());
    assert_eq!(harness.radio.sent()[0], switch_frequency_command(915.0).to_vec());
    assert!(harness.radio.events().contains(&RadioEvent::FrequencySet(915.0)));
    assert_eq!(harness.stored_frequency().as_deref(), Some("915"));
}

#[test]
fn test_change_frequency_without_confirmation_persists_nothing() {
    let mut harness = Harness::new();

    let response = harness.handle(&task("change_frequency", json!({ "frequency": 920.5 })));

    assert!(response.is_error());
    assert!(response.result.contains("not confirmed"));
    assert_eq!(harness.radio.frequency(), 915.0);
    assert_eq!(harness.stored_frequency(), None);
    assert_eq!(harness.clock.now_ms(), 3_000);
}

#[test]
fn test_change_frequency_transport_error_becomes_response() {
    let mut harness = Harness::new();
    harness.radio.fail_sends(true);

    let response = harness.handle(&task("change_frequency", json!({ "frequency": 910 })));

    assert!(response.is_error());
    assert!(response.result.contains("radio"));
    assert_eq!(harness.radio.frequency(), 915.0);
}

#[test]
fn test_range_boundaries_are_inclusive() {
    for frequency in [900.0, 930.0] {
        let kind = TaskKind::from_task(&task("change_frequency", json!({ "frequency": frequency }))).unwrap();
        assert_eq!(kind, TaskKind::ChangeFrequency { frequency: frequency as f32 });
    }

    for frequency in [899.99, 930.01] {
        assert!(matches!(
            TaskKind::from_task(&task("force_ground_frequency", json!({ "frequency": frequency }))),
            Err(TaskError::FrequencyOutOfRange(_))
        ));
    }
}

#[test]
fn test_unknown_task_is_reported_not_fatal() {
    let mut harness = Harness::new();

    let response = harness.handle(&task("noop_unknown", json!({})));

    assert_eq!(response.result, "[ERROR] unrecognized task: noop_unknown");
    assert!(harness.radio.events().is_empty());
}

#[test]
fn test_missing_and_invalid_parameters() {
    let mut harness = Harness::new();

    let missing = harness.handle(&task("change_frequency", json!({})));
    assert_eq!(missing.result, "[ERROR] missing parameter 'frequency'");

    let invalid = harness.handle(&task("change_frequency", json!({ "frequency": "fast" })));
    assert_eq!(invalid.result, "[ERROR] parameter 'frequency' must be a number");

    let bad_id = harness.handle(&task("set_rocket_id", json!({ "id": 1.5 })));
    assert_eq!(bad_id.result, "[ERROR] parameter 'id' must be an integer");

    assert!(harness.radio.events().is_empty());
}

#[test]
fn test_force_ground_frequency_skips_remote() {
    let mut harness = Harness::new().with_cooperative_remote();

    let response = harness.handle(&task("force_ground_frequency", json!({ "frequency": 905.25 })));

    assert_eq!(response.result, "[OK] ground frequency forced to 905.25 MHz");
    assert_eq!(harness.radio.events(), vec![RadioEvent::FrequencySet(905.25)]);
    assert_eq!(harness.stored_frequency().as_deref(), Some("905.25"));
}

#[test]
fn test_stub_tasks_say_not_implemented() {
    let mut harness = Harness::new();

    let ready = harness.handle(&task("send_flight_ready", json!({})));
    assert!(ready.result.starts_with(NOT_IMPLEMENTED_PREFIX));
    assert!(!ready.is_error());

    let gs = harness.handle(&task("set_ground_station_id", json!({ "id": 7 })));
    assert!(gs.result.starts_with("[NOT IMPLEMENTED]"));
    assert!(gs.result.contains("requested id 7"));

    let rocket = harness.handle(&task("set_rocket_id", json!({ "id": -3 })));
    assert!(rocket.result.contains("requested id -3"));

    assert!(harness.radio.events().is_empty());
}

#[test]
fn test_latest_telemetry_lists_every_series() {
    let mut harness = Harness::new();
    for key in SERIES_KEYS {
        harness.store.declare_series(key, gsrelay::store::DEFAULT_RETENTION_MS).unwrap();
    }

    let empty = harness.handle(&task("latest_telemetry", json!({})));
    let latest = parse_latest(&empty.result).unwrap();
    assert_eq!(latest.len(), 20);
    assert!(latest.iter().all(|series| series.sample.is_none()));

    harness.clock.advance(250);
    let reading = TelemetryReading {
        gps_speed: 12.5,
        timestamp: 9_000,
        ..TelemetryReading::default()
    };
    harness.store.append_reading(&reading).unwrap();

    let response = harness.handle(&task("latest_telemetry", json!({})));
    assert!(response.result.starts_with("[OK] "));
    let latest = parse_latest(&response.result).unwrap();
    let keys: Vec<&str> = latest.iter().map(|series| series.key.as_str()).collect();
    assert_eq!(keys, SERIES_KEYS);
    let speed = latest.iter().find(|series| series.key == "gps.speed").unwrap();
    assert_eq!(speed.sample.unwrap().value, 12.5);
    assert_eq!(speed.sample.unwrap().timestamp, 250);
}

#[test]
fn test_latest_telemetry_needs_declared_series() {
    let mut harness = Harness::new();

    let response = harness.handle(&task("latest_telemetry", json!({})));

    assert_eq!(response.result, "[ERROR] series TEST01.bmp280.temp has not been declared");
    assert!(parse_latest(&response.result).is_none());
}

#[test]
fn test_parse_task_paths() {
    let task = parse_task(r#"{"task_id": "abc", "task": "send_flight_ready"}"#).unwrap();
    assert_eq!(task.task_id, "abc");
    assert_eq!(task.task_name, "send_flight_ready");
    assert!(task.params.is_empty());

    let garbage = parse_task("not json").unwrap_err();
    assert_eq!(garbage.task_id, None);
    assert!(matches!(garbage.error, TaskError::InvalidJson(_)));

    // The id survives even when the rest of the task does not parse.
    let no_name = parse_task(r#"{"task_id": "abc", "params": {}}"#).unwrap_err();
    assert_eq!(no_name.task_id.as_deref(), Some("abc"));

    let numeric_id = parse_task(r#"{"task_id": 42, "task": "send_flight_ready"}"#).unwrap_err();
    assert_eq!(numeric_id.task_id.as_deref(), Some("42"));
}

#[test]
fn test_response_store_keys_and_take() {
    let mut responses = SharedResponses::new();
    let response = Response {
        task_id: "t-1".to_string(),
        result: "[OK] done".to_string(),
    };

    assert_eq!(response_key("t-1"), "response:t-1");

    responses.put(&response, Duration::from_secs(10)).unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses.take("t-1").as_deref(), Some("[OK] done"));
    assert_eq!(responses.take("t-1"), None, "responses are consumed on read");
    assert!(responses.is_empty());
}

#[test]
fn test_expired_responses_read_as_absent() {
    let mut responses = SharedResponses::new();
    let response = Response {
        task_id: "t-2".to_string(),
        result: "[OK] late".to_string(),
    };

    responses.put(&response, Duration::ZERO).unwrap();
    assert_eq!(responses.take("t-2"), None);

    responses.put(&response, Duration::ZERO).unwrap();
    assert_eq!(responses.purge_expired(), 1);
    assert!(responses.is_empty());
}

#[test]
fn test_channel_queue_is_fifo() {
    let (tx, mut queue) = ChannelTaskQueue::channel();
    tx.send("first".to_string()).unwrap();
    tx.send("second".to_string()).unwrap();

    assert_eq!(queue.pop().unwrap(), "first");
    assert_eq!(queue.pop().unwrap(), "second");
    assert!(matches!(queue.pop(), Err(nb::Error::WouldBlock)));
}
