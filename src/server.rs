//! Operator TCP endpoint.
//!
//! Clients send one JSON task per line. Each task is pushed onto the station's
//! task queue and the endpoint waits for the matching response, writing it
//! back as one JSON line. A task that gets no answer in time is reported as
//! an `[ERROR]` response so the client never hangs.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::queue::{SharedResponses, TaskSender};
use crate::tasks::{Response, ERROR_PREFIX};

const RESPONSE_POLL_MS: u64 = 20;

#[derive(Debug, Clone)]
pub struct TaskEndpoint {
    tasks: TaskSender,
    responses: SharedResponses,
    wait: Duration,
}

impl TaskEndpoint {
    pub fn new(tasks: TaskSender, responses: SharedResponses, wait: Duration) -> Self {
        Self {
            tasks,
            responses,
            wait,
        }
    }

    /// Queues one task line and waits for its response.
    pub async fn submit(&self, line: &str) -> Response {
        let Some(task_id) = task_id_of(line) else {
            return Response {
                task_id: String::new(),
                result: format!("{ERROR_PREFIX} task has no task_id"),
            };
        };

        // Answers that arrived after their client gave up are never taken.
        let purged = self.responses.purge_expired();
        if purged > 0 {
            debug!(purged, "expired responses dropped");
        }

        if self.tasks.send(line.to_string()).is_err() {
            return Response {
                task_id,
                result: format!("{ERROR_PREFIX} ground station is not running"),
            };
        }
        debug!(%task_id, "task queued");

        let deadline = Instant::now() + self.wait;
        loop {
            if let Some(result) = self.responses.take(&task_id) {
                return Response { task_id, result };
            }
            if Instant::now() >= deadline {
                warn!(%task_id, "no response before deadline");
                return Response {
                    task_id,
                    result: format!("{ERROR_PREFIX} no response within {} ms", self.wait.as_millis()),
                };
            }
            time::sleep(Duration::from_millis(RESPONSE_POLL_MS)).await;
        }
    }
}

fn task_id_of(line: &str) -> Option<String> {
    match serde_json::from_str::<Value>(line).ok()?.get("task_id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

pub async fn serve(listener: TcpListener, endpoint: TaskEndpoint) -> std::io::Result<()> {
    let endpoint = Arc::new(endpoint);
    info!(addr = %listener.local_addr()?, "task endpoint listening");

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!(%addr, "operator connected");
                let endpoint = Arc::clone(&endpoint);
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, &endpoint).await {
                        warn!(%addr, error = %e, "operator connection failed");
                    }
                    info!(%addr, "operator disconnected");
                });
            }
            Err(e) => {
                error!(error = %e, "failed to accept connection");
            }
        }
    }
}

async fn handle_client(stream: TcpStream, endpoint: &TaskEndpoint) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = endpoint.submit(trimmed).await;
        let mut reply = serde_json::to_string(&response)?;
        reply.push('\n');
        writer.write_all(reply.as_bytes()).await?;
    }
}
