//! ANT+ speed and cadence sensor profile, device type 121. Unlike HRM/FE,
//! the combined SCS page carries no page-number byte of its own — the wire
//! payload is `channel | cadence_event_time(u16) | cadence_rev_count(u16) |
//! speed_event_time(u16) | speed_rev_count(u16)`, all fields wrapping at
//! `0x10000` per spec §8 S4.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::channel::{ChannelConfig, ChannelInterface, ChannelRuntime};
use crate::data::SpeedCadenceData;
use crate::frame::Frame;
use crate::protocol::{ANT_PLUS_NETWORK_KEY, MSG_BROADCAST_DATA};

pub const DEVICE_TYPE_SPEED_CADENCE: u8 = 121;

/// Either profile side of an ANT+ SCS channel.
pub struct Scs {
    config: ChannelConfig,
    runtime: ChannelRuntime,
    data: Arc<Mutex<SpeedCadenceData>>,
    last_tick: Option<Instant>,
    cadence_event_time: u16,
    cadence_event_count: u16,
    speed_event_time: u16,
    speed_event_count: u16,
}

impl Scs {
    pub fn new(master: bool, device_number: u16, data: Arc<Mutex<SpeedCadenceData>>) -> Self {
        Self {
            config: ChannelConfig {
                master,
                device_type_id: DEVICE_TYPE_SPEED_CADENCE,
                device_number,
                transmission_type: ChannelConfig::default_transmission_type(master),
                rf_frequency: crate::protocol::DEFAULT_RF_FREQUENCY,
                channel_period: 8086,
                search_timeout: crate::config::DEFAULT_SEARCH_TIMEOUT_UNITS,
                transmit_power: crate::protocol::DEFAULT_TRANSMIT_POWER,
                network_key: Some(ANT_PLUS_NETWORK_KEY),
            },
            runtime: ChannelRuntime::new(0, 0),
            data,
            last_tick: None,
            cadence_event_time: 0,
            cadence_event_count: 0,
            speed_event_time: 0,
            speed_event_count: 0,
        }
    }

    /// Advance the event counters by `elapsed_secs` of wall-clock time and
    /// return the 8-byte SCS page body. Kept separate from `broadcast_message`
    /// so the rollover/rounding arithmetic (spec §8 S4) is directly testable
    /// without sleeping real time.
    fn advance(&mut self, speed_kmh: f64, cadence_rpm: f64, circumference_m: f64, elapsed_secs: f64) -> [u8; 8] {
        if elapsed_secs > 0.0 {
            if cadence_rpm > 0.0 {
                let revs = (cadence_rpm / 60.0 * elapsed_secs).round() as i64;
                self.cadence_event_count = self.cadence_event_count.wrapping_add(revs as u16);
                self.cadence_event_time = self
                    .cadence_event_time
                    .wrapping_add((elapsed_secs * 1024.0).round() as u16);
            }
            if speed_kmh > 0.0 && circumference_m > 0.0 {
                let revs = (speed_kmh / 3.6 / circumference_m * elapsed_secs).round() as i64;
                self.speed_event_count = self.speed_event_count.wrapping_add(revs as u16);
                self.speed_event_time = self
                    .speed_event_time
                    .wrapping_add((elapsed_secs * 1024.0).round() as u16);
            }
        }

        let cet = self.cadence_event_time.to_le_bytes();
        let cec = self.cadence_event_count.to_le_bytes();
        let set = self.speed_event_time.to_le_bytes();
        let sec = self.speed_event_count.to_le_bytes();
        [cet[0], cet[1], cec[0], cec[1], set[0], set[1], sec[0], sec[1]]
    }
}

impl ChannelInterface for Scs {
    fn config(&self) -> &ChannelConfig {
        &self.config
    }
    fn runtime(&self) -> &ChannelRuntime {
        &self.runtime
    }
    fn runtime_mut(&mut self) -> &mut ChannelRuntime {
        &mut self.runtime
    }
    fn interleave_reset(&self) -> u32 {
        1
    }

    fn broadcast_message(&mut self) -> Option<Frame> {
        let (speed_kmh, cadence_rpm, circumference_m) = {
            let d = self.data.lock().unwrap();
            (d.speed_kmh, d.cadence_rpm, d.wheel_circumference_m)
        };
        let now = Instant::now();
        let elapsed = self
            .last_tick
            .map(|last| now.duration_since(last).as_secs_f64())
            .unwrap_or(0.0);
        self.last_tick = Some(now);

        let body = self.advance(speed_kmh, cadence_rpm, circumference_m, elapsed);
        let mut payload = vec![self.runtime.number];
        payload.extend_from_slice(&body);
        Some(Frame::new(MSG_BROADCAST_DATA, payload))
    }

    fn handle_broadcast_data(&mut self, page_number: u8, body: &[u8; 7]) -> Option<Vec<Frame>> {
        // The dispatcher split the 8-byte SCS page as if byte 1 were a page
        // number; reassemble: page_number is actually cadence_event_time's
        // low byte, body[0] its high byte.
        let cadence_event_time = u16::from_le_bytes([page_number, body[0]]);
        let cadence_revolution_count = u16::from_le_bytes([body[1], body[2]]);
        let speed_event_time = u16::from_le_bytes([body[3], body[4]]);
        let speed_revolution_count = u16::from_le_bytes([body[5], body[6]]);

        let mut data = self.data.lock().unwrap();
        if let Some(prev_time) = data.cadence_event_time {
            if let Some(prev_count) = data.cadence_revolution_count {
                let dt = cadence_event_time.wrapping_sub(prev_time);
                let dc = cadence_revolution_count.wrapping_sub(prev_count);
                if dt > 0 {
                    data.cadence_rpm = dc as f64 / dt as f64 * 60.0 * 1024.0;
                }
            }
        }
        data.cadence_event_time = Some(cadence_event_time as u32);
        data.cadence_revolution_count = Some(cadence_revolution_count as u32);

        if let Some(prev_time) = data.speed_event_time {
            if let Some(prev_count) = data.speed_revolution_count {
                let dt = speed_event_time.wrapping_sub(prev_time as u16);
                let dc = speed_revolution_count.wrapping_sub(prev_count as u16);
                if dt > 0 {
                    let circumference = data.wheel_circumference_m;
                    data.speed_kmh = dc as f64 / dt as f64 * circumference * 1024.0 * 3.6;
                }
            }
        }
        data.speed_event_time = Some(speed_event_time as u32);
        data.speed_revolution_count = Some(speed_revolution_count as u32);

        None
    }

    fn handle_acknowledged_data(&mut self, page_number: u8, body: &[u8; 7]) -> Option<Vec<Frame>> {
        log::warn!("SCS channel {} received unexpected acknowledged message", self.runtime.number);
        self.handle_broadcast_data(page_number, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scs_with(speed_kmh: f64, cadence_rpm: f64, circumference_m: f64) -> Scs {
        let data = Arc::new(Mutex::new(SpeedCadenceData {
            speed_kmh,
            cadence_rpm,
            wheel_circumference_m: circumference_m,
            ..Default::default()
        }));
        let mut scs = Scs::new(true, 1, data);
        scs.runtime.number = 1;
        scs
    }

    #[test]
    fn advances_counts_per_scenario_s4() {
        // S4: cadence=60rpm, circumference=2.070m, speed=20.5km/h, two ticks
        // 1s apart -> cadence_event_count += 1, speed_event_count +=
        // round(20.5/3.6/2.070) = round(2.75) = 3.
        let mut scs = scs_with(20.5, 60.0, 2.070);
        scs.advance(20.5, 60.0, 2.070, 0.0); // first tick establishes baseline
        scs.advance(20.5, 60.0, 2.070, 1.0);
        assert_eq!(scs.cadence_event_count, 1);
        assert_eq!(scs.speed_event_count, 3);
    }

    #[test]
    fn counters_wrap_at_0x10000() {
        let mut scs = scs_with(0.0, 0.0, 2.070);
        scs.cadence_event_count = 0xFFFF;
        scs.advance(0.0, 60.0, 2.070, 1.0);
        assert_eq!(scs.cadence_event_count, 0); // (0xFFFF + 1) mod 0x10000
    }

    #[test]
    fn receiving_data_updates_shared_record() {
        let mut scs = scs_with(0.0, 0.0, 2.070);
        // first sample: times/counts all zero (initial)
        let body0 = [0u8, 0, 0, 0, 0, 0, 0];
        scs.handle_broadcast_data(0, &body0);
        // second sample: cadence advanced by 1024 (1s) and 1 rev
        let body1 = [0u8, 4, 1, 0, 0, 0, 0]; // cadence_event_time hi=0x04(256)+page0=1024
        scs.handle_broadcast_data(0, &body1);
        let data = scs.data.lock().unwrap();
        assert_eq!(data.cadence_rpm, 60.0);
    }
}
