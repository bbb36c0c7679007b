use core::time::Duration;

use heapless::spsc::Queue;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{frame_from_slice, Frame, RadioError, RadioTransport, MAX_FRAME_LEN};
use crate::clock::Clock;
use crate::protocol::{
    parse_switch_frequency_command, switch_frequency_ack, switch_frequency_echo, PacketType,
};
use crate::telemetry::{self, TelemetryReading};

const MAX_DOWNLINK_QUEUE: usize = 16;
const TELEMETRY_PERIOD_MS: u64 = 500;

// Launch site used for the synthetic GPS track.
const PAD_LATITUDE: f64 = 52.1332;
const PAD_LONGITUDE: f64 = -106.67;
const PAD_ALTITUDE_M: f64 = 494.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocketState {
    pub link_up: bool,
    pub ground_frequency: f32,
    pub rocket_frequency: f32,
    pub pending_switch: Option<f32>,
    pub rx_packets: u32,
    pub tx_packets: u32,
    pub frequency_switches: u32,
}

/// In-process stand-in for the flight computer at the far end of the link.
///
/// Frames only cross when the link is up and both ends are tuned to the same
/// frequency. The rocket streams SENSOR_DATA every 500 ms, answers PING, and
/// follows the frequency-switch handshake: it echoes a switch command and
/// retunes only once the ground's final acknowledgment arrives.
pub struct SimulatedRocket<C: Clock> {
    clock: C,
    state: RocketState,
    downlink: Queue<Frame, MAX_DOWNLINK_QUEUE>,
    boot_ms: u64,
    next_telemetry_ms: u64,
}

impl<C: Clock> SimulatedRocket<C> {
    pub fn new(clock: C, frequency: f32) -> Self {
        let boot_ms = clock.now_ms();
        Self {
            clock,
            state: RocketState {
                link_up: true,
                ground_frequency: frequency,
                rocket_frequency: frequency,
                pending_switch: None,
                rx_packets: 0,
                tx_packets: 0,
                frequency_switches: 0,
            },
            downlink: Queue::new(),
            boot_ms,
            next_telemetry_ms: boot_ms + TELEMETRY_PERIOD_MS,
        }
    }

    pub fn set_link_up(&mut self, up: bool) {
        self.state.link_up = up;
    }

    pub fn state(&self) -> &RocketState {
        &self.state
    }

    fn in_contact(&self) -> bool {
        self.state.link_up && self.state.ground_frequency == self.state.rocket_frequency
    }

    fn queue_downlink(&mut self, bytes: &[u8]) {
        let Ok(frame) = frame_from_slice(bytes) else {
            return;
        };
        if self.downlink.enqueue(frame).is_err() {
            debug!("simulated rocket downlink queue full, frame discarded");
        }
    }

    fn handle_uplink(&mut self, frame: &[u8]) {
        self.state.rx_packets = self.state.rx_packets.saturating_add(1);

        if let Some(mhz) = parse_switch_frequency_command(frame) {
            self.state.pending_switch = Some(mhz);
            self.queue_downlink(&switch_frequency_echo(mhz));
        } else if frame == switch_frequency_ack() {
            if let Some(mhz) = self.state.pending_switch.take() {
                self.state.rocket_frequency = mhz;
                self.state.frequency_switches = self.state.frequency_switches.saturating_add(1);
            }
        } else if frame == [PacketType::Ping as u8] {
            self.queue_downlink(&[PacketType::AckPong as u8]);
        }
    }

    fn sample(&self, now_ms: u64) -> TelemetryReading {
        let t = now_ms.saturating_sub(self.boot_ms) as f64 / 1000.0;
        let altitude = 300.0 * (t * 0.05).sin().abs();
        let drift = t * 1e-6;

        TelemetryReading {
            bmp280_temperature: 29.6 - altitude * 0.0065,
            bmp280_pressure: 955.19 - altitude * 0.12,
            bmp280_altitude: PAD_ALTITUDE_M + altitude,
            accel_x: 0.1 * (t * 3.0).sin(),
            accel_y: -0.06,
            accel_z: 9.94 + (t * 0.05).cos(),
            gyro_x: 0.01,
            gyro_y: 0.01,
            gyro_z: 2.0 * (t * 0.5).sin(),
            imu_temperature: 30.21,
            mag_x: -1.01,
            mag_y: -19.83,
            mag_z: -18.55,
            auxiliary_temperature: 29.44,
            gps_latitude: PAD_LATITUDE + drift,
            gps_longitude: PAD_LONGITUDE - drift,
            gps_altitude: PAD_ALTITUDE_M + altitude,
            gps_speed: 15.0 * (t * 0.05).cos().abs(),
            gps_angle: (t * 10.0) % 360.0,
            // The wire field is u32 milliseconds; saturate instead of wrapping.
            timestamp: u32::try_from(now_ms.saturating_sub(self.boot_ms)).unwrap_or(u32::MAX),
        }
    }

    fn sensor_frame(&self, now_ms: u64) -> Frame {
        let mut frame = Frame::new();
        // 55 bytes always fit in a radio frame.
        let _ = frame.push(PacketType::SensorData as u8);
        let _ = frame.extend_from_slice(&telemetry::encode(&self.sample(now_ms)));
        frame
    }
}

impl<C: Clock> RadioTransport for SimulatedRocket<C> {
    fn send(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(RadioError::FrameTooLarge(frame.len()));
        }
        if self.in_contact() {
            self.handle_uplink(frame);
        }
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Frame>, RadioError> {
        let deadline = self.clock.now_ms() + timeout.as_millis() as u64;

        loop {
            let now = self.clock.now_ms();

            if self.in_contact() {
                if let Some(frame) = self.downlink.dequeue() {
                    self.state.tx_packets = self.state.tx_packets.saturating_add(1);
                    return Ok(Some(frame));
                }
                if now >= self.next_telemetry_ms {
                    self.next_telemetry_ms = now + TELEMETRY_PERIOD_MS;
                    self.state.tx_packets = self.state.tx_packets.saturating_add(1);
                    return Ok(Some(self.sensor_frame(now)));
                }
            }

            if now >= deadline {
                return Ok(None);
            }

            let wake = if self.in_contact() {
                deadline.min(self.next_telemetry_ms)
            } else {
                deadline
            };
            self.clock.sleep(Duration::from_millis(wake - now));
        }
    }

    fn set_frequency(&mut self, mhz: f32) -> Result<(), RadioError> {
        if !mhz.is_finite() || mhz <= 0.0 {
            return Err(RadioError::InvalidFrequency(mhz));
        }
        self.state.ground_frequency = mhz;
        Ok(())
    }

    fn frequency(&self) -> f32 {
        self.state.ground_frequency
    }
}
