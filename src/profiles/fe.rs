//! ANT+ FE-C fitness-equipment (trainer) profile, device type 17. Unlike HRM
//! this profile also receives control pages (basic resistance, target power,
//! track resistance) from a head unit and folds them into the shared
//! `TrainerData` record for the application to act on.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::channel::{ChannelConfig, ChannelInterface, ChannelRuntime};
use crate::data::{TrainerData, TrainerTargetMode};
use crate::frame::Frame;
use crate::page::{build_data_payload, ManufacturerInfo, ProductInfo};
use crate::protocol::{manufacturer, transmission_type, ANT_PLUS_NETWORK_KEY, MSG_BROADCAST_DATA};

pub const DEVICE_TYPE_FITNESS_EQUIPMENT: u8 = 17;
const MODEL_NUMBER: u16 = 2875;
const SERIAL_NUMBER: u32 = 19_590_705;
const HW_REVISION: u8 = 1;
const SW_VERSION: u8 = 1;

const PAGE_BASIC_RESISTANCE: u8 = 48;
const PAGE_TARGET_POWER: u8 = 49;
const PAGE_TRACK_RESISTANCE: u8 = 51;

/// Either profile side of an ANT+ FE-C channel.
pub struct Fe {
    config: ChannelConfig,
    runtime: ChannelRuntime,
    data: Arc<Mutex<TrainerData>>,
    interleave: u32,
    event_count: u8,
    accumulated_power: u16,
    accumulated_time: f64,
    distance_travelled: f64,
    last_tick: Instant,
}

impl Fe {
    pub fn new(master: bool, device_number: u16, data: Arc<Mutex<TrainerData>>) -> Self {
        Self {
            config: ChannelConfig {
                master,
                device_type_id: DEVICE_TYPE_FITNESS_EQUIPMENT,
                device_number,
                transmission_type: transmission_type::INDEPENDENT | transmission_type::GLOBAL_PAGES,
                rf_frequency: crate::protocol::DEFAULT_RF_FREQUENCY,
                channel_period: 8192,
                search_timeout: crate::config::DEFAULT_SEARCH_TIMEOUT_UNITS,
                transmit_power: crate::protocol::DEFAULT_TRANSMIT_POWER,
                network_key: Some(ANT_PLUS_NETWORK_KEY),
            },
            runtime: ChannelRuntime::new(0, 0),
            data,
            interleave: 0,
            event_count: 0,
            accumulated_power: 0,
            accumulated_time: 0.0,
            distance_travelled: 0.0,
            last_tick: Instant::now(),
        }
    }

    fn encode_page(&mut self, page_number: u8) -> [u8; 8] {
        let d = *self.data.lock().unwrap();

        let now = Instant::now();
        let dt = now.duration_since(self.last_tick).as_secs_f64();
        self.last_tick = now;
        self.accumulated_time += dt;
        self.distance_travelled += d.speed_kmh / 3.6 * dt;

        let power = d.power_w.round() as u16;
        self.accumulated_power = self.accumulated_power.wrapping_add(power);
        self.event_count = self.event_count.wrapping_add(1);

        match page_number {
            16 => {
                // Distance-travelled flag is always set once a real distance
                // value is available; an unconditional flag with the field
                // left at zero would misreport "no distance" to the head
                // unit (see DESIGN.md, distance-travelled resolution).
                let speed_raw = (d.speed_kmh / 3.6 * 1000.0).round() as u16;
                let speed = speed_raw.to_le_bytes();
                [
                    16,
                    0x19, // equipment type: trainer
                    (self.accumulated_time * 4.0).round() as u8,
                    (self.distance_travelled.round() as u64 & 0xFF) as u8,
                    speed[0],
                    speed[1],
                    d.heart_rate,
                    0b0011_0011, // HRM contact + distance enabled + FE state in-use
                ]
            }
            25 => {
                let acc_power = self.accumulated_power.to_le_bytes();
                let inst_power = power.min(0x0FFF).to_le_bytes();
                [
                    25,
                    self.event_count,
                    d.cadence_rpm.round() as u8,
                    acc_power[0],
                    acc_power[1],
                    inst_power[0],
                    inst_power[1],
                    0x30,
                ]
            }
            80 => ManufacturerInfo {
                hw_revision: HW_REVISION,
                manufacturer_id: manufacturer::TACX,
                model_number: MODEL_NUMBER,
            }
            .encode(),
            81 => ProductInfo {
                sw_revision_supplemental: 0xFF,
                sw_revision_main: SW_VERSION,
                serial_number: Some(SERIAL_NUMBER),
            }
            .encode(),
            _ => unreachable!("unscheduled FE page {page_number}"),
        }
    }
}

impl ChannelInterface for Fe {
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
        132
    }

    fn broadcast_message(&mut self) -> Option<Frame> {
        let page_number = if (64..=65).contains(&self.interleave) {
            80
        } else if (130..=131).contains(&self.interleave) {
            81
        } else if self.interleave < 64 && self.interleave % 4 >= 2 {
            25
        } else if self.interleave > 65 && self.interleave % 4 <= 1 {
            25
        } else {
            16
        };
        let page = self.encode_page(page_number);
        self.interleave = (self.interleave + 1) % self.interleave_reset();
        let payload = build_data_payload(self.runtime.number, page);
        Some(Frame::new(MSG_BROADCAST_DATA, payload.to_vec()))
    }

    fn encode_page_by_number(&mut self, page_number: u8) -> Option<[u8; 8]> {
        match page_number {
            80 | 81 => Some(self.encode_page(page_number)),
            _ => None,
        }
    }

    fn handle_broadcast_data(&mut self, page_number: u8, _body: &[u8; 7]) -> Option<Vec<Frame>> {
        log::warn!("FE channel {} received unexpected data page {}", self.runtime.number, page_number);
        None
    }

    fn handle_acknowledged_data(&mut self, page_number: u8, body: &[u8; 7]) -> Option<Vec<Frame>> {
        let mut data = self.data.lock().unwrap();
        match page_number {
            PAGE_BASIC_RESISTANCE if data.basic_supported => {
                data.mode = TrainerTargetMode::Resistance;
                data.target = body[6] as f64 / 2.0;
                log::info!("FE channel {} switched to resistance target {:.1}%", self.runtime.number, data.target);
            }
            PAGE_TARGET_POWER if data.power_supported => {
                let watts = u16::from_le_bytes([body[5], body[6]]) as f64 / 4.0;
                data.mode = TrainerTargetMode::Power;
                data.target = watts;
                log::info!("FE channel {} switched to power target {:.1}W", self.runtime.number, watts);
            }
            PAGE_TRACK_RESISTANCE if data.simulation_supported => {
                let grade_raw = u16::from_le_bytes([body[3], body[4]]) as i32 - 20000;
                let grade = grade_raw as f64 / 100.0;
                data.mode = TrainerTargetMode::Simulation;
                data.target = grade;
                log::info!("FE channel {} switched to simulation grade {:.2}%", self.runtime.number, grade);
            }
            other => log::warn!("FE channel {} received unsupported acknowledged page {}", self.runtime.number, other),
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fe_with(power_w: f64, speed_kmh: f64) -> Fe {
        let data = Arc::new(Mutex::new(TrainerData {
            power_w,
            speed_kmh,
            ..Default::default()
        }));
        let mut fe = Fe::new(true, 1, data);
        fe.runtime.number = 1;
        fe
    }

    #[test]
    fn page_sixteen_always_sets_distance_bit() {
        let mut fe = fe_with(150.0, 30.0);
        let page = fe.encode_page(16);
        assert_eq!(page[0], 16);
        assert_eq!(page[7] & 0b0000_0100, 0b0000_0100);
    }

    #[test]
    fn schedule_starts_on_page_sixteen() {
        let mut fe = fe_with(150.0, 30.0);
        let frame = fe.broadcast_message().unwrap();
        assert_eq!(frame.payload[1], 16);
    }

    #[test]
    fn schedule_visits_page_twenty_five_after_two_ticks() {
        let mut fe = fe_with(150.0, 30.0);
        fe.broadcast_message();
        fe.broadcast_message();
        let frame = fe.broadcast_message().unwrap();
        assert_eq!(frame.payload[1], 25);
    }

    #[test]
    fn basic_resistance_control_sets_mode_and_target() {
        let mut fe = fe_with(0.0, 0.0);
        let body = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 100];
        fe.handle_acknowledged_data(48, &body);
        let data = fe.data.lock().unwrap();
        assert_eq!(data.mode, TrainerTargetMode::Resistance);
        assert_eq!(data.target, 50.0);
    }

    #[test]
    fn target_power_control_sets_mode_and_target() {
        let mut fe = fe_with(0.0, 0.0);
        let body = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x20, 0x03]; // 800 -> 200W
        fe.handle_acknowledged_data(49, &body);
        let data = fe.data.lock().unwrap();
        assert_eq!(data.mode, TrainerTargetMode::Power);
        assert_eq!(data.target, 200.0);
    }
}
