//! Tacx Bushido vendor-extension profiles: the brake unit (master, device
//! type 81) and the head unit (slave, device type 82). Neither page 172
//! (sub-page request), 173 (sub-page response) nor 220 (target/resistance)
//! has a surviving reference implementation in this codebase's corpus — the
//! brake/head-unit source files are raw logfile passthroughs with no page
//! parsing at all. The choreography below is built from first principles
//! rather than adapted from existing code; see DESIGN.md.

use std::sync::{Arc, Mutex};

use crate::channel::{ChannelConfig, ChannelInterface, ChannelRuntime};
use crate::data::TrainerData;
use crate::frame::Frame;
use crate::page::build_data_payload;
use crate::protocol::{
    transmission_type, BUSHIDO_CHANNEL_PERIOD, BUSHIDO_RF_FREQUENCY, BUSHIDO_SEARCH_TIMEOUT,
    MSG_ACKNOWLEDGED_DATA, MSG_BROADCAST_DATA,
};

pub const DEVICE_TYPE_BRAKE: u8 = 81;
pub const DEVICE_TYPE_HEAD_UNIT: u8 = 82;

const SUB_PAGE_VERSION: u8 = 0;
const SUB_PAGE_BRAKE_VERSION: u8 = 1;
const SUB_PAGE_BRAKE_SERIAL: u8 = 2;

/// Mode-transition sequence the head unit drives the brake through after
/// every page-173 `serial` response, until `Training` is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BushidoMode {
    Standalone,
    Pc,
    ResetDistance,
    Paused,
    Training,
}

impl BushidoMode {
    fn next(self) -> Self {
        match self {
            BushidoMode::Standalone => BushidoMode::Pc,
            BushidoMode::Pc => BushidoMode::ResetDistance,
            BushidoMode::ResetDistance => BushidoMode::Paused,
            BushidoMode::Paused => BushidoMode::Training,
            BushidoMode::Training => BushidoMode::Training,
        }
    }

    fn as_code(self) -> u8 {
        match self {
            BushidoMode::Standalone => 0,
            BushidoMode::Pc => 1,
            BushidoMode::ResetDistance => 2,
            BushidoMode::Paused => 3,
            BushidoMode::Training => 4,
        }
    }
}

/// Bushido brake: a simple round-robin master, same shape as HRM/FE but with
/// no application-visible data pages beyond raw passthrough.
pub struct BushidoBrake {
    config: ChannelConfig,
    runtime: ChannelRuntime,
    interleave: u32,
}

impl BushidoBrake {
    pub fn new(master: bool, device_number: u16) -> Self {
        Self {
            config: ChannelConfig {
                master,
                device_type_id: DEVICE_TYPE_BRAKE,
                device_number,
                transmission_type: ChannelConfig::default_transmission_type(master),
                rf_frequency: BUSHIDO_RF_FREQUENCY,
                channel_period: BUSHIDO_CHANNEL_PERIOD,
                search_timeout: BUSHIDO_SEARCH_TIMEOUT,
                transmit_power: crate::protocol::DEFAULT_TRANSMIT_POWER,
                network_key: None,
            },
            runtime: ChannelRuntime::new(0, 0),
            interleave: 0,
        }
    }
}

impl ChannelInterface for BushidoBrake {
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
        3
    }

    fn broadcast_message(&mut self) -> Option<Frame> {
        let page_number = match self.interleave {
            0 => 16,
            1 => 1,
            _ => 2,
        };
        self.interleave = (self.interleave + 1) % self.interleave_reset();
        let page = [page_number, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        let payload = build_data_payload(self.runtime.number, page);
        Some(Frame::new(MSG_BROADCAST_DATA, payload.to_vec()))
    }

    fn handle_broadcast_data(&mut self, page_number: u8, _body: &[u8; 7]) -> Option<Vec<Frame>> {
        log::debug!("Bushido brake channel {} received page {}", self.runtime.number, page_number);
        None
    }

    fn handle_acknowledged_data(&mut self, page_number: u8, body: &[u8; 7]) -> Option<Vec<Frame>> {
        self.handle_broadcast_data(page_number, body)
    }
}

/// Bushido head unit: a slave that speaks on every RX turn rather than
/// waiting for a TX event, cycling a 32-tick request/keep-alive schedule and
/// driving the brake through its mode-transition sequence.
pub struct BushidoHeadUnit {
    config: ChannelConfig,
    runtime: ChannelRuntime,
    data: Arc<Mutex<TrainerData>>,
    interleave: u32,
    mode: BushidoMode,
}

impl BushidoHeadUnit {
    pub fn new(master: bool, device_number: u16, data: Arc<Mutex<TrainerData>>) -> Self {
        Self {
            config: ChannelConfig {
                master,
                device_type_id: DEVICE_TYPE_HEAD_UNIT,
                device_number,
                transmission_type: transmission_type::PAIRING,
                rf_frequency: BUSHIDO_RF_FREQUENCY,
                channel_period: BUSHIDO_CHANNEL_PERIOD,
                search_timeout: BUSHIDO_SEARCH_TIMEOUT,
                transmit_power: crate::protocol::DEFAULT_TRANSMIT_POWER,
                network_key: None,
            },
            runtime: ChannelRuntime::new(0, 0),
            data,
            interleave: 0,
            mode: BushidoMode::Standalone,
        }
    }

    fn encode_turn(&mut self) -> Frame {
        let channel = self.runtime.number;
        let frame = match self.interleave {
            0 => Frame::new(MSG_BROADCAST_DATA, build_data_payload(channel, [0; 8]).to_vec()),
            1 => request_page172(channel, SUB_PAGE_VERSION),
            2 => request_page172(channel, SUB_PAGE_BRAKE_VERSION),
            3 => request_page172(channel, SUB_PAGE_BRAKE_SERIAL),
            n if n % 2 == 0 => self.encode_page220_01(),
            _ => self.encode_page220_02(),
        };
        self.interleave = (self.interleave + 1) % self.interleave_reset();
        frame
    }

    fn encode_page220_01(&self) -> Frame {
        let d = self.data.lock().unwrap();
        let target = d.target.round() as u16;
        let target_bytes = target.to_le_bytes();
        let page = [
            220,
            0x01,
            self.mode.as_code(),
            target_bytes[0],
            target_bytes[1],
            0xFF,
            0xFF,
            0xFF,
        ];
        Frame::new(MSG_BROADCAST_DATA, build_data_payload(self.runtime.number, page).to_vec())
    }

    fn encode_page220_02(&self) -> Frame {
        let d = self.data.lock().unwrap();
        let wheel_raw = (d.wheel_circumference_m * 100.0).round() as u16;
        let wheel_bytes = wheel_raw.to_le_bytes();
        let page = [
            220,
            0x02,
            wheel_bytes[0],
            wheel_bytes[1],
            0xFF,
            0xFF,
            0xFF,
            0xFF,
        ];
        Frame::new(MSG_BROADCAST_DATA, build_data_payload(self.runtime.number, page).to_vec())
    }

    /// A page-173 `serial` response advances the mode-transition sequence.
    fn on_page173_serial(&mut self) {
        if self.mode != BushidoMode::Training {
            self.mode = self.mode.next();
            log::info!(
                "Bushido head unit channel {} advancing to mode {:?}",
                self.runtime.number,
                self.mode
            );
        }
    }
}

fn request_page172(channel: u8, sub_page: u8) -> Frame {
    let page = [172, sub_page, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
    Frame::new(MSG_ACKNOWLEDGED_DATA, build_data_payload(channel, page).to_vec())
}

impl ChannelInterface for BushidoHeadUnit {
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
        32
    }

    fn handle_broadcast_data(&mut self, page_number: u8, body: &[u8; 7]) -> Option<Vec<Frame>> {
        if page_number == 173 && body[0] == SUB_PAGE_BRAKE_SERIAL {
            self.on_page173_serial();
        }
        Some(vec![self.encode_turn()])
    }

    fn handle_acknowledged_data(&mut self, page_number: u8, body: &[u8; 7]) -> Option<Vec<Frame>> {
        self.handle_broadcast_data(page_number, body)
    }

    fn on_rx_fail(&mut self) -> Option<Frame> {
        Some(self.encode_turn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head_unit() -> BushidoHeadUnit {
        let data = Arc::new(Mutex::new(TrainerData::default()));
        let mut hu = BushidoHeadUnit::new(false, 0, data);
        hu.runtime.number = 3;
        hu
    }

    #[test]
    fn tick_zero_is_keep_alive() {
        let mut hu = head_unit();
        let frames = hu.handle_broadcast_data(0, &[0; 7]).unwrap();
        assert_eq!(frames[0].id, MSG_BROADCAST_DATA);
        assert_eq!(frames[0].payload[1], 0);
    }

    #[test]
    fn ticks_one_through_three_request_page172_sub_pages() {
        let mut hu = head_unit();
        hu.handle_broadcast_data(0, &[0; 7]);
        let f1 = hu.handle_broadcast_data(0, &[0; 7]).unwrap();
        assert_eq!(f1[0].payload[1], 172);
        assert_eq!(f1[0].payload[2], SUB_PAGE_VERSION);
        let f2 = hu.handle_broadcast_data(0, &[0; 7]).unwrap();
        assert_eq!(f2[0].payload[2], SUB_PAGE_BRAKE_VERSION);
        let f3 = hu.handle_broadcast_data(0, &[0; 7]).unwrap();
        assert_eq!(f3[0].payload[2], SUB_PAGE_BRAKE_SERIAL);
    }

    #[test]
    fn ticks_four_onward_alternate_page220_sub_pages() {
        let mut hu = head_unit();
        for _ in 0..4 {
            hu.handle_broadcast_data(0, &[0; 7]);
        }
        let f4 = hu.handle_broadcast_data(0, &[0; 7]).unwrap();
        assert_eq!(f4[0].payload[1], 220);
        assert_eq!(f4[0].payload[2], 0x01);
        let f5 = hu.handle_broadcast_data(0, &[0; 7]).unwrap();
        assert_eq!(f5[0].payload[2], 0x02);
    }

    #[test]
    fn page173_serial_advances_mode_sequence() {
        let mut hu = head_unit();
        assert_eq!(hu.mode, BushidoMode::Standalone);
        hu.on_page173_serial();
        assert_eq!(hu.mode, BushidoMode::Pc);
        hu.on_page173_serial();
        hu.on_page173_serial();
        hu.on_page173_serial();
        assert_eq!(hu.mode, BushidoMode::Training);
        hu.on_page173_serial();
        assert_eq!(hu.mode, BushidoMode::Training);
    }

    #[test]
    fn rx_fail_still_lets_head_unit_speak() {
        let mut hu = head_unit();
        let frame = hu.on_rx_fail().unwrap();
        assert_eq!(frame.payload[1], 0);
    }
}
