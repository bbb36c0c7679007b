use std::time::Duration;

use gsrelay::queue::{ChannelTaskQueue, ResponseStore, SharedResponses, TaskQueue};
use gsrelay::server::{self, TaskEndpoint};
use gsrelay::tasks::{parse_task, Response};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Stands in for the station thread: answers every queued task.
fn spawn_responder(mut queue: ChannelTaskQueue, responses: SharedResponses) {
    std::thread::spawn(move || {
        let mut responses = responses;
        loop {
            match queue.pop() {
                Ok(raw) => {
                    let task = parse_task(&raw).unwrap();
                    let response = Response {
                        result: format!("[OK] {}", task.task_name),
                        task_id: task.task_id,
                    };
                    responses.put(&response, Duration::from_secs(10)).unwrap();
                }
                Err(nb::Error::WouldBlock) => std::thread::sleep(Duration::from_millis(1)),
                Err(nb::Error::Other(_)) => return,
            }
        }
    });
}

#[tokio::test]
async fn test_submit_waits_for_response() {
    let (tx, queue) = ChannelTaskQueue::channel();
    let responses = SharedResponses::new();
    spawn_responder(queue, responses.clone());

    let endpoint = TaskEndpoint::new(tx, responses.clone(), Duration::from_secs(2));
    let response = endpoint
        .submit(r#"{"task_id": "t-1", "task": "send_flight_ready", "params": {}}"#)
        .await;

    assert_eq!(response.task_id, "t-1");
    assert_eq!(response.result, "[OK] send_flight_ready");
    assert!(responses.is_empty(), "response consumed by the endpoint");
}

#[tokio::test]
async fn test_submit_times_out_with_error() {
    let (tx, _queue) = ChannelTaskQueue::channel();
    let endpoint = TaskEndpoint::new(tx, SharedResponses::new(), Duration::from_millis(50));

    let response = endpoint.submit(r#"{"task_id": 5, "task": "send_flight_ready"}"#).await;

    assert_eq!(response.task_id, "5");
    assert!(response.is_error());
    assert!(response.result.contains("no response"));
}

#[tokio::test]
async fn test_submit_without_task_id_or_station() {
    let (tx, queue) = ChannelTaskQueue::channel();
    let endpoint = TaskEndpoint::new(tx, SharedResponses::new(), Duration::from_secs(1));

    let response = endpoint.submit(r#"{"task": "send_flight_ready"}"#).await;
    assert_eq!(response.result, "[ERROR] task has no task_id");

    drop(queue);
    let response = endpoint.submit(r#"{"task_id": "t-2", "task": "send_flight_ready"}"#).await;
    assert_eq!(response.result, "[ERROR] ground station is not running");
}

#[tokio::test]
async fn test_unclaimed_responses_are_purged() {
    let (tx, _queue) = ChannelTaskQueue::channel();
    let responses = SharedResponses::new();
    let mut writer = responses.clone();
    let late = Response {
        task_id: "late".to_string(),
        result: "[OK] send_flight_ready".to_string(),
    };
    writer.put(&late, Duration::from_millis(1)).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(responses.len(), 1);

    let endpoint = TaskEndpoint::new(tx, responses.clone(), Duration::from_millis(20));
    let response = endpoint.submit(r#"{"task_id": "next", "task": "send_flight_ready"}"#).await;

    assert!(response.is_error());
    assert!(responses.is_empty());
}

#[tokio::test]
async fn test_tcp_round_trip() {
    let (tx, queue) = ChannelTaskQueue::channel();
    let responses = SharedResponses::new();
    spawn_responder(queue, responses.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let endpoint = TaskEndpoint::new(tx, responses, Duration::from_secs(2));
    tokio::spawn(server::serve(listener, endpoint));

    let stream = TcpStream::connect(addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    for id in ["a", "b"] {
        let line = format!("{{\"task_id\": \"{id}\", \"task\": \"set_rocket_id\", \"params\": {{\"id\": 3}}}}\n");
        writer.write_all(line.as_bytes()).await.unwrap();

        let mut reply = String::new();
        reader.read_line(&mut reply).await.unwrap();
        let response: Response = serde_json::from_str(reply.trim()).unwrap();
        assert_eq!(response.task_id, id);
        assert_eq!(response.result, "[OK] set_rocket_id");
    }
}
