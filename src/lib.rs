//! # Ground Station Relay
//!
//! Ground-side core for a rocket telemetry radio link. Frames arrive from a
//! LoRa-class radio, are classified by a one-byte type tag, and sensor
//! packets are decoded and persisted. Operator tasks arrive on a queue and
//! are answered through an expiring response store.
//!
//! ## Features
//!
//! - **Telemetry codec**: fixed 54-byte little-endian sensor packet
//! - **Packet routing**: stateless dispatch on the packet type tag
//! - **Frequency-change handshake**: bounded, cancellable two-party agreement
//! - **Task queue consumer**: JSON operator tasks with `[OK]` / `[ERROR]` results
//! - **Injected collaborators**: radio, clock, store, queue and log are traits
//!
//! ## Quick Start
//!
//! ```rust
//! use gsrelay::{
//!     ChannelTaskQueue, Collaborators, CsvLog, GroundStation, ManualClock, MemoryStore,
//!     MockRadio, SharedResponses, StationConfig,
//! };
//!
//! let clock = ManualClock::new(0);
//! let radio = MockRadio::new(clock.clone(), 915.0);
//! let (_tasks_tx, tasks) = ChannelTaskQueue::channel();
//! let log = CsvLog::create(std::env::temp_dir().join("gsrelay-doc.csv")).unwrap();
//!
//! let mut station = GroundStation::new(
//!     StationConfig::default(),
//!     Collaborators {
//!         radio: Box::new(radio),
//!         clock: Box::new(clock),
//!         store: Box::new(MemoryStore::new("TEST01")),
//!         tasks: Box::new(tasks),
//!         responses: Box::new(SharedResponses::new()),
//!         log: Box::new(log),
//!     },
//! )
//! .unwrap();
//!
//! station.start().unwrap();
//! let report = station.run_cycle();
//! assert!(report.frame.is_none());
//! ```
//!
//! ## Architecture
//!
//! - [`station`] - Main loop and public entry point
//! - [`telemetry`] - Sensor packet codec
//! - [`protocol`] - Packet types, router and switch-frequency frames
//! - [`handshake`] - Frequency-change state machine
//! - [`tasks`] - Operator task validation and execution
//! - [`radio`] - Transport capability, simulated peripheral and test double
//! - [`store`], [`queue`], [`telemetry_log`] - Persistence collaborators
//! - [`server`] - TCP endpoint feeding the task queue
//! - [`shutdown`] - SIGINT/SIGTERM to cancellation

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod cancel;
pub mod clock;
pub mod config;
pub mod handshake;
pub mod protocol;
pub mod queue;
pub mod radio;
pub mod server;
pub mod shutdown;
pub mod station;
pub mod store;
pub mod tasks;
pub mod telemetry;
pub mod telemetry_log;

// Re-export main public types for convenience
pub use cancel::CancelToken;
pub use clock::{Clock, ManualClock, SystemClock, WallClock};
pub use config::StationConfig;
pub use handshake::{FrequencyHandshake, HandshakeOutcome, HandshakeState};
pub use protocol::{PacketRouter, PacketType, RouterAction};
pub use queue::{ChannelTaskQueue, SharedResponses};
pub use radio::{MockRadio, RadioTransport, SimulatedRocket};
pub use station::{Collaborators, GroundStation};
pub use store::{MemoryStore, TelemetryStore};
pub use tasks::{Response, Task, TaskHandler};
pub use telemetry::TelemetryReading;
pub use telemetry_log::CsvLog;
