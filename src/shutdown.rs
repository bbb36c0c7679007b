//! Process shutdown signals.
//!
//! Ctrl-C and, on unix, SIGTERM both end the relay the same way: the station
//! is cancelled and gets to close its telemetry log.

use std::io;

use tokio::signal;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cancel::CancelToken;

pub struct ShutdownSignal {
    #[cfg(unix)]
    terminate: signal::unix::Signal,
}

impl ShutdownSignal {
    /// Registers the handlers. SIGTERM no longer kills the process once this
    /// returns. Must be called inside a tokio runtime.
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: signal::unix::signal(signal::unix::SignalKind::terminate())?,
        })
    }

    /// Waits for the first shutdown signal and returns its name.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = ctrl_c() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> &'static str {
        ctrl_c().await;
        "Ctrl-C"
    }
}

// A failed Ctrl-C listener must not read as a shutdown request.
async fn ctrl_c() {
    if signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Cancels `cancel` when the process is asked to stop.
pub fn cancel_on_shutdown(mut signals: ShutdownSignal, cancel: CancelToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let name = signals.recv().await;
        info!(signal = name, "shutdown requested");
        cancel.cancel();
    })
}
