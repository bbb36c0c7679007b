//! SENSOR_DATA payload codec.
//!
//! The flight computer packs one sample of every sensor into a fixed
//! 54-byte little-endian record of fixed-point integers:
//!
//! | Offset | Field              | Wire type | Scale |
//! |--------|--------------------|-----------|-------|
//! | 0      | BMP280 temperature | i16       | /100  |
//! | 2      | BMP280 pressure    | u32       | /100  |
//! | 6      | BMP280 altitude    | i16       | /10   |
//! | 8      | accel x, y, z      | i16 x3    | /100  |
//! | 14     | gyro x, y, z       | i16 x3    | /100  |
//! | 20     | IMU temperature    | i16       | /100  |
//! | 22     | mag x, y, z        | i16 x3    | /100  |
//! | 28     | aux temperature    | i16       | /100  |
//! | 30     | GPS latitude       | i32       | /1e7  |
//! | 34     | GPS longitude      | i32       | /1e7  |
//! | 38     | GPS altitude       | i16       | /10   |
//! | 40     | GPS speed          | u16       | /100  |
//! | 42     | GPS angle          | u16       | /100  |
//! | 44     | timestamp          | u32       | raw   |
//! | 48     | reserved           | 6 bytes   |       |
//!
//! This layout is the wire contract with the remote peripheral. The reserved
//! trailer is written as zeros and ignored on decode.

use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use thiserror::Error;

pub const TELEMETRY_PACKET_LEN: usize = 54;

const FIELDS_LEN: usize = 2 + 4 + 2 + 3 * 2 + 3 * 2 + 2 + 3 * 2 + 2 + 4 + 4 + 2 + 2 + 2 + 4;
const RESERVED_LEN: usize = 6;
const_assert_eq!(FIELDS_LEN + RESERVED_LEN, TELEMETRY_PACKET_LEN);

const CENTI: f64 = 100.0;
const DECI: f64 = 10.0;
const GPS_DEGREES: f64 = 1e7;

/// Series keys in CSV column order. The first nineteen match the sensor
/// channels; the last carries the device clock.
pub const SERIES_KEYS: [&str; 20] = [
    "bmp280.temp",
    "bmp280.pressure",
    "bmp280.altitude",
    "accel.x",
    "accel.y",
    "accel.z",
    "gyro.x",
    "gyro.y",
    "gyro.z",
    "accel.temp",
    "mag.x",
    "mag.y",
    "mag.z",
    "temp.temp",
    "gps.latitude",
    "gps.longitude",
    "gps.altitude",
    "gps.speed",
    "gps.angle",
    "device.timestamp",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("telemetry packet must be {expected} bytes, got {got}")]
    WrongLength { expected: usize, got: usize },
    #[error("telemetry packet truncated at offset {offset}")]
    Truncated { offset: usize },
}

/// One decoded sample of every flight sensor.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetryReading {
    pub bmp280_temperature: f64,
    pub bmp280_pressure: f64,
    pub bmp280_altitude: f64,
    pub accel_x: f64,
    pub accel_y: f64,
    pub accel_z: f64,
    pub gyro_x: f64,
    pub gyro_y: f64,
    pub gyro_z: f64,
    pub imu_temperature: f64,
    pub mag_x: f64,
    pub mag_y: f64,
    pub mag_z: f64,
    pub auxiliary_temperature: f64,
    pub gps_latitude: f64,
    pub gps_longitude: f64,
    pub gps_altitude: f64,
    pub gps_speed: f64,
    pub gps_angle: f64,
    pub timestamp: u32,
}

impl TelemetryReading {
    /// `(series key, value)` for every channel, in [`SERIES_KEYS`] order.
    pub fn channels(&self) -> [(&'static str, f64); 20] {
        let values = [
            self.bmp280_temperature,
            self.bmp280_pressure,
            self.bmp280_altitude,
            self.accel_x,
            self.accel_y,
            self.accel_z,
            self.gyro_x,
            self.gyro_y,
            self.gyro_z,
            self.imu_temperature,
            self.mag_x,
            self.mag_y,
            self.mag_z,
            self.auxiliary_temperature,
            self.gps_latitude,
            self.gps_longitude,
            self.gps_altitude,
            self.gps_speed,
            self.gps_angle,
            f64::from(self.timestamp),
        ];

        let mut channels = [("", 0.0); 20];
        for (slot, (key, value)) in channels.iter_mut().zip(SERIES_KEYS.iter().zip(values)) {
            *slot = (*key, value);
        }
        channels
    }
}

struct LeReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> LeReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.pos + N;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(DecodeError::Truncated { offset: self.pos })?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        self.pos = end;
        Ok(out)
    }

    fn i16(&mut self, scale: f64) -> Result<f64, DecodeError> {
        Ok(f64::from(i16::from_le_bytes(self.take()?)) / scale)
    }

    fn u16(&mut self, scale: f64) -> Result<f64, DecodeError> {
        Ok(f64::from(u16::from_le_bytes(self.take()?)) / scale)
    }

    fn i32(&mut self, scale: f64) -> Result<f64, DecodeError> {
        Ok(f64::from(i32::from_le_bytes(self.take()?)) / scale)
    }

    fn u32(&mut self, scale: f64) -> Result<f64, DecodeError> {
        Ok(f64::from(u32::from_le_bytes(self.take()?)) / scale)
    }

    fn raw_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take()?))
    }
}

/// Decodes a SENSOR_DATA payload. Either every field decodes or nothing is
/// returned.
pub fn decode(bytes: &[u8]) -> Result<TelemetryReading, DecodeError> {
    if bytes.len() != TELEMETRY_PACKET_LEN {
        return Err(DecodeError::WrongLength {
            expected: TELEMETRY_PACKET_LEN,
            got: bytes.len(),
        });
    }

    let mut r = LeReader::new(bytes);
    Ok(TelemetryReading {
        bmp280_temperature: r.i16(CENTI)?,
        bmp280_pressure: r.u32(CENTI)?,
        bmp280_altitude: r.i16(DECI)?,
        accel_x: r.i16(CENTI)?,
        accel_y: r.i16(CENTI)?,
        accel_z: r.i16(CENTI)?,
        gyro_x: r.i16(CENTI)?,
        gyro_y: r.i16(CENTI)?,
        gyro_z: r.i16(CENTI)?,
        imu_temperature: r.i16(CENTI)?,
        mag_x: r.i16(CENTI)?,
        mag_y: r.i16(CENTI)?,
        mag_z: r.i16(CENTI)?,
        auxiliary_temperature: r.i16(CENTI)?,
        gps_latitude: r.i32(GPS_DEGREES)?,
        gps_longitude: r.i32(GPS_DEGREES)?,
        gps_altitude: r.i16(DECI)?,
        gps_speed: r.u16(CENTI)?,
        gps_angle: r.u16(CENTI)?,
        timestamp: r.raw_u32()?,
    })
}

struct LeWriter {
    buf: [u8; TELEMETRY_PACKET_LEN],
    pos: usize,
}

impl LeWriter {
    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    // Float to int `as` casts saturate, so out-of-range values clamp to the
    // wire type's limits.
    fn i16(&mut self, value: f64, scale: f64) {
        self.put(&((value * scale).round() as i16).to_le_bytes());
    }

    fn u16(&mut self, value: f64, scale: f64) {
        self.put(&((value * scale).round() as u16).to_le_bytes());
    }

    fn i32(&mut self, value: f64, scale: f64) {
        self.put(&((value * scale).round() as i32).to_le_bytes());
    }

    fn u32(&mut self, value: f64, scale: f64) {
        self.put(&((value * scale).round() as u32).to_le_bytes());
    }
}

/// Inverse of [`decode`], as the flight computer packs a sample.
pub fn encode(reading: &TelemetryReading) -> [u8; TELEMETRY_PACKET_LEN] {
    let mut w = LeWriter {
        buf: [0; TELEMETRY_PACKET_LEN],
        pos: 0,
    };

    w.i16(reading.bmp280_temperature, CENTI);
    w.u32(reading.bmp280_pressure, CENTI);
    w.i16(reading.bmp280_altitude, DECI);
    w.i16(reading.accel_x, CENTI);
    w.i16(reading.accel_y, CENTI);
    w.i16(reading.accel_z, CENTI);
    w.i16(reading.gyro_x, CENTI);
    w.i16(reading.gyro_y, CENTI);
    w.i16(reading.gyro_z, CENTI);
    w.i16(reading.imu_temperature, CENTI);
    w.i16(reading.mag_x, CENTI);
    w.i16(reading.mag_y, CENTI);
    w.i16(reading.mag_z, CENTI);
    w.i16(reading.auxiliary_temperature, CENTI);
    w.i32(reading.gps_latitude, GPS_DEGREES);
    w.i32(reading.gps_longitude, GPS_DEGREES);
    w.i16(reading.gps_altitude, DECI);
    w.u16(reading.gps_speed, CENTI);
    w.u16(reading.gps_angle, CENTI);
    w.put(&reading.timestamp.to_le_bytes());

    debug_assert_eq!(w.pos, FIELDS_LEN);
    w.buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_reports_offset_of_truncation() {
        let mut r = LeReader::new(&[1, 2, 3]);
        assert!(r.take::<2>().is_ok());
        assert_eq!(r.take::<2>(), Err(DecodeError::Truncated { offset: 2 }));
    }

    #[test]
    fn channels_follow_series_key_order() {
        let reading = TelemetryReading {
            bmp280_temperature: 1.0,
            gps_angle: 19.0,
            timestamp: 20,
            ..TelemetryReading::default()
        };

        let channels = reading.channels();
        assert_eq!(channels[0], ("bmp280.temp", 1.0));
        assert_eq!(channels[18], ("gps.angle", 19.0));
        assert_eq!(channels[19], ("device.timestamp", 20.0));
    }
}
