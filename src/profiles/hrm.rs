//! ANT+ heart rate monitor profile, device type 120.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::channel::{ChannelConfig, ChannelInterface, ChannelRuntime};
use crate::data::HeartRateData;
use crate::frame::Frame;
use crate::page::{build_data_payload, ManufacturerInfo, ProductInfo};
use crate::protocol::{manufacturer, ANT_PLUS_NETWORK_KEY, MSG_BROADCAST_DATA};

pub const DEVICE_TYPE_HEART_RATE: u8 = 120;
const MODEL_NUMBER: u16 = 0x33;
const SERIAL_NUMBER: u32 = 5975;
const HW_REVISION: u8 = 1;
const SW_VERSION: u8 = 1;

/// Either profile side of an ANT+ HRM channel.
pub struct Hrm {
    config: ChannelConfig,
    runtime: ChannelRuntime,
    data: Arc<Mutex<HeartRateData>>,
    interleave: u32,
    heart_beat_counter: u32,
    heart_beat_event_time: f64,
    heart_beat_time: Instant,
    page_change_toggle: u8,
}

impl Hrm {
    pub fn new(master: bool, device_number: u16, data: Arc<Mutex<HeartRateData>>) -> Self {
        Self {
            config: ChannelConfig {
                master,
                device_type_id: DEVICE_TYPE_HEART_RATE,
                device_number,
                transmission_type: ChannelConfig::default_transmission_type(master),
                rf_frequency: crate::protocol::DEFAULT_RF_FREQUENCY,
                channel_period: 8070,
                search_timeout: crate::config::DEFAULT_SEARCH_TIMEOUT_UNITS,
                transmit_power: crate::protocol::DEFAULT_TRANSMIT_POWER,
                network_key: Some(ANT_PLUS_NETWORK_KEY),
            },
            runtime: ChannelRuntime::new(0, 0),
            data,
            interleave: 0,
            heart_beat_counter: 0,
            heart_beat_event_time: 0.0,
            heart_beat_time: Instant::now(),
            page_change_toggle: 0,
        }
    }

    fn encode_page(&mut self, page_number: u8) -> Option<[u8; 8]> {
        let heart_rate = self.data.lock().unwrap().heart_rate;

        // Toggle only on a nonzero interleave boundary: the literal source
        // toggles at interleave==0 too, but that disagrees with observed
        // device traces (toggle clear at tick 0, set by tick 68) — see
        // DESIGN.md.
        if self.interleave != 0 && self.interleave % 4 == 0 {
            self.page_change_toggle ^= 0x80;
        }

        if heart_rate > 0 {
            let elapsed = self.heart_beat_time.elapsed().as_secs_f64();
            if elapsed >= 60.0 / heart_rate as f64 {
                self.heart_beat_counter = (self.heart_beat_counter + 1) % 256;
                self.heart_beat_event_time += 60.0 / heart_rate as f64;
                if self.heart_beat_event_time >= 64.0 {
                    self.heart_beat_event_time = 0.0;
                }
                self.heart_beat_time = Instant::now();
            }
        }

        let (spec1, spec2, spec3) = match page_number {
            2 => (
                manufacturer::GARMIN as u8,
                (SERIAL_NUMBER & 0x00FF) as u8,
                ((SERIAL_NUMBER & 0xFF00) >> 8) as u8,
            ),
            3 => (HW_REVISION, SW_VERSION, MODEL_NUMBER as u8),
            6 => (0xFF, 0x00, 0x00), // reserved, features_supported, features_enabled
            0 => (0xFF, 0xFF, 0xFF),
            _ => return None,
        };

        let event_time_raw = (1024.0 * self.heart_beat_event_time) as u16;
        let event_time_bytes = event_time_raw.to_le_bytes();
        Some([
            self.page_change_toggle | page_number,
            spec1,
            spec2,
            spec3,
            event_time_bytes[0],
            event_time_bytes[1],
            self.heart_beat_counter as u8,
            heart_rate,
        ])
    }
}

impl ChannelInterface for Hrm {
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
        204
    }

    fn broadcast_message(&mut self) -> Option<Frame> {
        let page_number = match self.interleave {
            0..=3 => 2,
            68..=71 => 3,
            136..=139 => 6,
            _ => 0,
        };
        let page = self.encode_page(page_number)?;
        self.interleave = (self.interleave + 1) % self.interleave_reset();
        let payload = build_data_payload(self.runtime.number, page);
        Some(Frame::new(MSG_BROADCAST_DATA, payload.to_vec()))
    }

    fn encode_page_by_number(&mut self, page_number: u8) -> Option<[u8; 8]> {
        match page_number {
            80 => Some(
                ManufacturerInfo {
                    hw_revision: HW_REVISION,
                    manufacturer_id: manufacturer::GARMIN,
                    model_number: MODEL_NUMBER,
                }
                .encode(),
            ),
            81 => Some(
                ProductInfo {
                    sw_revision_supplemental: 0xFF,
                    sw_revision_main: SW_VERSION,
                    serial_number: Some(SERIAL_NUMBER),
                }
                .encode(),
            ),
            _ => None,
        }
    }

    fn handle_broadcast_data(&mut self, page_number: u8, body: &[u8; 7]) -> Option<Vec<Frame>> {
        let page_number = page_number & 0x7F;
        let heart_rate = body[6];
        {
            let mut data = self.data.lock().unwrap();
            data.heart_rate = heart_rate;
        }
        match page_number {
            0 | 2 | 3 | 6 => {}
            other => log::info!("HRM channel {} ignoring data page {}", self.runtime.number, other),
        }
        None
    }

    fn handle_acknowledged_data(&mut self, page_number: u8, body: &[u8; 7]) -> Option<Vec<Frame>> {
        log::warn!("HRM channel {} received unexpected acknowledged message", self.runtime.number);
        self.handle_broadcast_data(page_number, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hrm_with_rate(rate: u8) -> Hrm {
        let data = Arc::new(Mutex::new(HeartRateData {
            heart_rate: rate,
            ..Default::default()
        }));
        let mut hrm = Hrm::new(true, 12345, data);
        hrm.runtime.number = 1;
        hrm
    }

    #[test]
    fn toggle_is_clear_at_tick_zero_scenario_s2() {
        let mut hrm = hrm_with_rate(70);
        let frame = hrm.broadcast_message().unwrap();
        assert_eq!(frame.payload[1] & 0x80, 0);
    }

    #[test]
    fn toggle_is_set_by_tick_sixty_eight_scenario_s3() {
        let mut hrm = hrm_with_rate(70);
        for _ in 0..68 {
            hrm.broadcast_message().unwrap();
        }
        let frame = hrm.broadcast_message().unwrap();
        assert_eq!(frame.payload[1] & 0x80, 0x80);
    }

    #[test]
    fn schedule_sends_page_two_for_first_four_ticks() {
        let mut hrm = hrm_with_rate(70);
        for _ in 0..4 {
            let frame = hrm.broadcast_message().unwrap();
            assert_eq!(frame.payload[1] & 0x7F, 2);
        }
        let frame = hrm.broadcast_message().unwrap();
        assert_eq!(frame.payload[1] & 0x7F, 0);
    }

    #[test]
    fn handle_broadcast_data_updates_shared_heart_rate() {
        let mut hrm = hrm_with_rate(0xFF);
        let body = [0, 0, 0, 0, 0, 0, 142];
        hrm.handle_broadcast_data(0, &body);
        assert_eq!(hrm.data.lock().unwrap().heart_rate, 142);
    }
}
