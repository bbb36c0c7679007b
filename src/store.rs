//! Time-series persistence.
//!
//! Keys are namespaced by flight (`<flight>.<key>`) so several flights can
//! share one backend. Series must be declared, with a retention window,
//! before the first append.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::{Clock, WallClock};
use crate::telemetry::TelemetryReading;

pub const DEFAULT_RETENTION_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Key under which the current link frequency is kept.
pub const FREQUENCY_KEY: &str = "radio.frequency";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("series {0} has not been declared")]
    UnknownSeries(String),
    #[error("sample at {timestamp} is not newer than last sample at {last} in {key}")]
    OutOfOrder { key: String, timestamp: u64, last: u64 },
    #[error("store backend failure: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: u64,
    pub value: f64,
}

pub trait TelemetryStore {
    /// Creates the series if missing. Declaring an existing series is a no-op.
    fn declare_series(&mut self, key: &str, retention_ms: u64) -> Result<(), StoreError>;

    /// Appends with a store-assigned timestamp, which is returned.
    fn append(&mut self, key: &str, value: f64) -> Result<u64, StoreError>;

    fn append_with_timestamp(&mut self, key: &str, timestamp: u64, value: f64) -> Result<u64, StoreError>;

    /// Appends every channel of one reading, or nothing at all.
    fn append_reading(&mut self, reading: &TelemetryReading) -> Result<(), StoreError>;

    fn get_last(&self, key: &str) -> Result<Option<Sample>, StoreError>;

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;

    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
}

#[derive(Debug)]
struct Series {
    retention_ms: u64,
    samples: VecDeque<Sample>,
}

impl Series {
    fn last_timestamp(&self) -> Option<u64> {
        self.samples.back().map(|s| s.timestamp)
    }

    /// Store-assigned timestamps stay strictly increasing, even when two
    /// samples land in the same millisecond.
    fn push_at(&mut self, now_ms: u64, value: f64) -> u64 {
        let timestamp = match self.last_timestamp() {
            Some(last) if last >= now_ms => last + 1,
            _ => now_ms,
        };
        self.push(Sample { timestamp, value });
        timestamp
    }

    fn push(&mut self, sample: Sample) {
        self.samples.push_back(sample);
        let horizon = sample.timestamp.saturating_sub(self.retention_ms);
        while self.samples.front().is_some_and(|s| s.timestamp < horizon) {
            self.samples.pop_front();
        }
    }
}

/// In-process backend.
pub struct MemoryStore {
    namespace: String,
    series: HashMap<String, Series>,
    values: HashMap<String, String>,
    clock: Box<dyn Clock + Send>,
}

impl MemoryStore {
    pub fn new(flight: &str) -> Self {
        Self::with_clock(flight, Box::new(WallClock))
    }

    pub fn with_clock(flight: &str, clock: Box<dyn Clock + Send>) -> Self {
        Self {
            namespace: flight.to_string(),
            series: HashMap::new(),
            values: HashMap::new(),
            clock,
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}.{}", self.namespace, key)
    }

    fn series_mut(&mut self, key: &str) -> Result<&mut Series, StoreError> {
        let full = self.key(key);
        self.series.get_mut(&full).ok_or(StoreError::UnknownSeries(full))
    }

    pub fn len(&self, key: &str) -> usize {
        self.series.get(&self.key(key)).map_or(0, |s| s.samples.len())
    }

    pub fn is_declared(&self, key: &str) -> bool {
        self.series.contains_key(&self.key(key))
    }
}

impl TelemetryStore for MemoryStore {
    fn declare_series(&mut self, key: &str, retention_ms: u64) -> Result<(), StoreError> {
        let full = self.key(key);
        self.series.entry(full).or_insert_with(|| Series {
            retention_ms,
            samples: VecDeque::new(),
        });
        Ok(())
    }

    fn append(&mut self, key: &str, value: f64) -> Result<u64, StoreError> {
        let now = self.clock.now_ms();
        Ok(self.series_mut(key)?.push_at(now, value))
    }

    fn append_with_timestamp(&mut self, key: &str, timestamp: u64, value: f64) -> Result<u64, StoreError> {
        let full = self.key(key);
        let series = self.series_mut(key)?;
        if let Some(last) = series.last_timestamp() {
            if timestamp <= last {
                return Err(StoreError::OutOfOrder {
                    key: full,
                    timestamp,
                    last,
                });
            }
        }
        series.push(Sample { timestamp, value });
        Ok(timestamp)
    }

    fn append_reading(&mut self, reading: &TelemetryReading) -> Result<(), StoreError> {
        let channels = reading.channels();
        // Resolve every series before touching any of them.
        if let Some((key, _)) = channels.iter().find(|(key, _)| !self.is_declared(key)) {
            return Err(StoreError::UnknownSeries(self.key(key)));
        }

        let now = self.clock.now_ms();
        for (key, value) in channels {
            self.series_mut(key)?.push_at(now, value);
        }
        Ok(())
    }

    fn get_last(&self, key: &str) -> Result<Option<Sample>, StoreError> {
        let full = self.key(key);
        match self.series.get(&full) {
            Some(series) => Ok(series.samples.back().copied()),
            None => Err(StoreError::UnknownSeries(full)),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let full = self.key(key);
        self.values.insert(full, value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.get(&self.key(key)).cloned())
    }
}
