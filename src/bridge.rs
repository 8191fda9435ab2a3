//! A pair of channels that transparently relay broadcast/acknowledged data
//! between a real master and a real slave, rewriting the channel-number byte
//! in each direction. Grounded on
//! `original_source/src/libantplus/bridge.py::AntBridge`/`BridgeInterface`.

use crate::channel::{ChannelConfig, ChannelInterface, ChannelRuntime};
use crate::frame::Frame;
use crate::page::build_data_payload;
use crate::protocol::{MSG_ACKNOWLEDGED_DATA, MSG_BROADCAST_DATA};

/// One side of a bridge: holds the configuration of the real device it
/// impersonates, but never originates a page of its own — it only
/// retransmits whatever it receives onto `target_channel`.
pub struct BridgeInterface {
    config: ChannelConfig,
    runtime: ChannelRuntime,
    target_channel: Option<u8>,
}

impl BridgeInterface {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            runtime: ChannelRuntime::new(0, 0),
            target_channel: None,
        }
    }

    fn relay(&self, message_id: u8, page_number: u8, body: &[u8; 7]) -> Vec<Frame> {
        let Some(target) = self.target_channel else {
            log::warn!("bridge channel {} has no target channel yet, dropping page", self.runtime.number);
            return Vec::new();
        };
        let mut page = [0u8; 8];
        page[0] = page_number;
        page[1..].copy_from_slice(body);
        let payload = build_data_payload(target, page);
        log::info!(
            "bridge retransmitting page {} from channel {} to channel {}",
            page_number,
            self.runtime.number,
            target
        );
        vec![Frame::new(message_id, payload.to_vec())]
    }
}

impl ChannelInterface for BridgeInterface {
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

    fn handle_broadcast_data(&mut self, page_number: u8, body: &[u8; 7]) -> Option<Vec<Frame>> {
        Some(self.relay(MSG_BROADCAST_DATA, page_number, body))
    }

    fn handle_acknowledged_data(&mut self, page_number: u8, body: &[u8; 7]) -> Option<Vec<Frame>> {
        Some(self.relay(MSG_ACKNOWLEDGED_DATA, page_number, body))
    }
}

/// Owns both sides of a relay: `master` impersonates the real master device
/// towards a real slave (e.g. a head unit) and vice versa for `slave`.
pub struct Bridge {
    pub master: BridgeInterface,
    pub slave: BridgeInterface,
}

impl Bridge {
    pub fn new(master_config: ChannelConfig, slave_config: ChannelConfig) -> Self {
        Self {
            master: BridgeInterface::new(master_config),
            slave: BridgeInterface::new(slave_config),
        }
    }

    /// Cross-wire the two sides once the dongle has assigned both channel
    /// numbers: each side's retransmit target is the other's channel.
    pub fn link(&mut self) {
        self.master.target_channel = Some(self.slave.runtime.number);
        self.slave.target_channel = Some(self.master.runtime.number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ANT_PLUS_NETWORK_KEY;

    fn config(master: bool) -> ChannelConfig {
        ChannelConfig {
            master,
            device_type_id: 120,
            device_number: 0,
            transmission_type: ChannelConfig::default_transmission_type(master),
            rf_frequency: 57,
            channel_period: 8070,
            search_timeout: 0,
            transmit_power: 0x03,
            network_key: Some(ANT_PLUS_NETWORK_KEY),
        }
    }

    #[test]
    fn relays_broadcast_data_with_rewritten_channel() {
        let mut bridge = Bridge::new(config(true), config(false));
        bridge.master.runtime.number = 5;
        bridge.slave.runtime.number = 2;
        bridge.link();

        let body = [1, 2, 3, 4, 5, 6, 7];
        let frames = bridge.slave.handle_broadcast_data(0, &body).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload[0], 5); // rewritten to master's channel
        assert_eq!(frames[0].payload[1], 0);
        assert_eq!(&frames[0].payload[2..], &body);
    }

    #[test]
    fn drops_page_before_linking() {
        let mut bridge = Bridge::new(config(true), config(false));
        let frames = bridge.slave.handle_broadcast_data(0, &[0; 7]).unwrap();
        assert!(frames.is_empty());
    }

    #[test]
    fn never_originates_its_own_page() {
        let mut bridge = Bridge::new(config(true), config(false));
        assert!(bridge.master.broadcast_message().is_none());
    }
}
