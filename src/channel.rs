//! Per-channel state machine and the generic reception-dispatch contract
//! every profile (HRM, SCS, FE, Bushido, Bridge, Scanner) implements.

use crate::error::AntError;
use crate::frame::Frame;
use crate::page::Page70Request;
use crate::protocol::{
    transmission_type, ChannelType, EVENT_CHANNEL_CLOSED, EVENT_RX_FAIL,
    EVENT_RX_FAIL_GO_TO_SEARCH, EVENT_RX_SEARCH_TIMEOUT, EVENT_TX, MSG_ACKNOWLEDGED_DATA,
    MSG_ASSIGN_CHANNEL, MSG_BROADCAST_DATA, MSG_BURST_DATA, MSG_CHANNEL_ID, MSG_CHANNEL_RESPONSE,
    MSG_CLOSE_CHANNEL, MSG_OPEN_CHANNEL, MSG_REQUEST_MESSAGE, MSG_UNASSIGN_CHANNEL,
    RESPONSE_NO_ERROR,
};

/// Channel lifecycle, per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Unassigned,
    Assigned,
    Open,
    Closing,
    Closed,
}

/// Static per-interface configuration used when assigning and opening a
/// channel (spec §3 Channel entity, minus the dongle-assigned `number` and
/// mutable runtime fields which live in `ChannelRuntime`).
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub master: bool,
    pub device_type_id: u8,
    pub device_number: u16,
    pub transmission_type: u8,
    pub rf_frequency: u8,
    pub channel_period: u16,
    pub search_timeout: u8,
    pub transmit_power: u8,
    /// `None` means a public, keyless channel (Bushido vendor extension).
    pub network_key: Option<u64>,
}

impl ChannelConfig {
    pub fn channel_type(&self) -> ChannelType {
        if self.master {
            ChannelType::BidirectionalTransmit
        } else {
            ChannelType::BidirectionalReceive
        }
    }

    pub fn default_transmission_type(master: bool) -> u8 {
        if master {
            transmission_type::INDEPENDENT
        } else {
            transmission_type::PAIRING
        }
    }
}

/// Mutable per-channel state, owned by the dongle session and updated as
/// responses arrive.
#[derive(Debug, Clone)]
pub struct ChannelRuntime {
    pub number: u8,
    pub status: ChannelStatus,
    pub last_action: Option<u8>,
    pub paired: bool,
    pub peer_device_number: Option<u16>,
    pub peer_device_type_id: Option<u8>,
    pub peer_transmission_type: Option<u8>,
    pub interleave: u32,
    pub network_slot: u8,
}

impl ChannelRuntime {
    pub fn new(number: u8, network_slot: u8) -> Self {
        Self {
            number,
            status: ChannelStatus::Unassigned,
            last_action: None,
            paired: false,
            peer_device_number: None,
            peer_device_type_id: None,
            peer_transmission_type: None,
            interleave: 0,
            network_slot,
        }
    }
}

/// Implemented by every profile that owns a channel: HRM/SCS/FE/Bushido
/// masters and slaves, the Bridge's two inner interfaces, and the Scanner.
pub trait ChannelInterface {
    fn config(&self) -> &ChannelConfig;
    fn runtime(&self) -> &ChannelRuntime;
    fn runtime_mut(&mut self) -> &mut ChannelRuntime;

    /// Period (in ticks) of the interleave schedule; masters wrap `interleave`
    /// modulo this value after each `broadcast_message`.
    fn interleave_reset(&self) -> u32;

    /// Produce the next frame to transmit on `EVENT_TX` (masters only).
    /// Pure slaves/bridge sides return `None` — they never initiate.
    fn broadcast_message(&mut self) -> Option<Frame> {
        None
    }

    /// Encode `page_number` on demand for a Page 70 request reply. Profiles
    /// that don't implement a page return `None` (logged, no reply).
    fn encode_page_by_number(&mut self, _page_number: u8) -> Option<[u8; 8]> {
        None
    }

    fn handle_broadcast_data(&mut self, page_number: u8, body: &[u8; 7]) -> Option<Vec<Frame>>;
    fn handle_acknowledged_data(&mut self, page_number: u8, body: &[u8; 7]) -> Option<Vec<Frame>>;

    /// Hook for `EVENT_RX_FAIL`; most profiles ignore it.
    fn on_rx_fail(&mut self) -> Option<Frame> {
        None
    }
}

/// Dispatch one inbound frame to `iface` per spec §4.4. Returns the frame(s)
/// to write back to the dongle, if any.
pub fn handle_message(
    iface: &mut dyn ChannelInterface,
    frame: &Frame,
) -> Result<Option<Vec<Frame>>, AntError> {
    let channel = frame.channel().unwrap_or(0);
    if channel != iface.runtime().number {
        return Err(AntError::WrongChannel {
            expected: iface.runtime().number,
            found: channel,
        });
    }

    match frame.id {
        MSG_CHANNEL_ID => {
            handle_channel_id_message(iface, &frame.payload);
            Ok(None)
        }
        MSG_CHANNEL_RESPONSE => handle_channel_response(iface, &frame.payload),
        MSG_BROADCAST_DATA | MSG_ACKNOWLEDGED_DATA => {
            handle_data_message(iface, frame.id, &frame.payload)
        }
        MSG_BURST_DATA => Ok(None),
        other => Err(AntError::UnknownMessageId(other)),
    }
}

fn handle_channel_id_message(iface: &mut dyn ChannelInterface, payload: &[u8]) {
    if payload.len() < 5 {
        return;
    }
    let device_number = u16::from_le_bytes([payload[1], payload[2]]);
    let device_type_id = payload[3];
    let transmission_type = payload[4];
    let rt = iface.runtime_mut();
    rt.paired = true;
    rt.peer_device_number = Some(device_number);
    rt.peer_device_type_id = Some(device_type_id);
    rt.peer_transmission_type = Some(transmission_type);
}

fn handle_channel_response(
    iface: &mut dyn ChannelInterface,
    payload: &[u8],
) -> Result<Option<Vec<Frame>>, AntError> {
    if payload.len() < 3 {
        return Ok(None);
    }
    let message_id = payload[1];
    let code = payload[2];

    if code == EVENT_TX {
        if iface.config().master {
            return Ok(iface.broadcast_message().map(|f| vec![f]));
        }
        return Ok(None);
    }

    if code == EVENT_CHANNEL_CLOSED {
        iface.runtime_mut().status = ChannelStatus::Closed;
        return Ok(None);
    }

    if code == RESPONSE_NO_ERROR {
        let new_status = match message_id {
            MSG_ASSIGN_CHANNEL => Some(ChannelStatus::Assigned),
            MSG_OPEN_CHANNEL => Some(ChannelStatus::Open),
            MSG_CLOSE_CHANNEL => Some(ChannelStatus::Closing),
            MSG_UNASSIGN_CHANNEL => Some(ChannelStatus::Unassigned),
            _ => None,
        };
        let rt = iface.runtime_mut();
        if let Some(status) = new_status {
            rt.status = status;
        }
        rt.last_action = Some(message_id);
        return Ok(None);
    }

    if code == EVENT_RX_FAIL || code == EVENT_RX_FAIL_GO_TO_SEARCH || code == EVENT_RX_SEARCH_TIMEOUT
    {
        log::warn!(
            "channel {} rx event {:#x} on command {:#x}",
            iface.runtime().number,
            code,
            message_id
        );
        if code == EVENT_RX_FAIL {
            return Ok(iface.on_rx_fail().map(|f| vec![f]));
        }
        return Ok(None);
    }

    log::warn!(
        "channel {} unhandled channel response code {:#x}",
        iface.runtime().number,
        code
    );
    Ok(None)
}

fn handle_data_message(
    iface: &mut dyn ChannelInterface,
    message_id: u8,
    payload: &[u8],
) -> Result<Option<Vec<Frame>>, AntError> {
    if payload.len() < 9 {
        return Ok(None);
    }
    let channel = payload[0];
    let page_number = payload[1];
    let body: [u8; 7] = payload[2..9].try_into().unwrap();

    // Page 70 (request-for-page) is handled generically regardless of
    // pairing state, for both masters and slaves.
    if message_id == MSG_ACKNOWLEDGED_DATA && page_number == 70 {
        return Ok(Some(reply_to_page70(iface, channel, &body)));
    }

    // Pairing gate: a slave that hasn't seen CHANNEL_ID must request it
    // before any data page is processed, and must not mutate its Data record.
    if !iface.config().master && !iface.runtime().paired {
        let payload = vec![channel, MSG_CHANNEL_ID];
        return Ok(Some(vec![Frame::new(MSG_REQUEST_MESSAGE, payload)]));
    }

    let frames = if message_id == MSG_BROADCAST_DATA {
        iface.handle_broadcast_data(page_number, &body)
    } else {
        iface.handle_acknowledged_data(page_number, &body)
    };
    Ok(frames)
}

fn reply_to_page70(iface: &mut dyn ChannelInterface, channel: u8, body: &[u8; 7]) -> Vec<Frame> {
    let request = Page70Request::decode(body);
    let Some(page) = iface.encode_page_by_number(request.requested_page) else {
        log::warn!(
            "channel {} cannot reply to page70 request for unimplemented page {}",
            channel,
            request.requested_page
        );
        return Vec::new();
    };
    let reply_id = request.reply_message_id();
    let mut payload = vec![channel];
    payload.extend_from_slice(&page);
    (0..request.number_of_responses)
        .map(|_| Frame::new(reply_id, payload.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyHrm {
        config: ChannelConfig,
        runtime: ChannelRuntime,
        heart_rate: u8,
    }

    impl DummyHrm {
        fn slave() -> Self {
            Self {
                config: ChannelConfig {
                    master: false,
                    device_type_id: 120,
                    device_number: 0,
                    transmission_type: transmission_type::PAIRING,
                    rf_frequency: 57,
                    channel_period: 8070,
                    search_timeout: 0,
                    transmit_power: 0x03,
                    network_key: Some(crate::protocol::ANT_PLUS_NETWORK_KEY),
                },
                runtime: ChannelRuntime::new(2, 1),
                heart_rate: 0xFF,
            }
        }

        fn master() -> Self {
            let mut hrm = Self::slave();
            hrm.config.master = true;
            hrm
        }
    }

    impl ChannelInterface for DummyHrm {
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
        fn encode_page_by_number(&mut self, page_number: u8) -> Option<[u8; 8]> {
            if page_number == 80 {
                Some([80, 0xFF, 0xFF, 1, 1, 0, 0x33, 0])
            } else {
                None
            }
        }
        fn handle_broadcast_data(&mut self, _page_number: u8, body: &[u8; 7]) -> Option<Vec<Frame>> {
            self.heart_rate = body[6];
            None
        }
        fn handle_acknowledged_data(
            &mut self,
            page_number: u8,
            body: &[u8; 7],
        ) -> Option<Vec<Frame>> {
            self.handle_broadcast_data(page_number, body)
        }
    }

    #[test]
    fn pairing_gate_requests_channel_id_and_does_not_mutate_data() {
        let mut hrm = DummyHrm::slave();
        let payload = vec![2u8, 0, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 100];
        let frame = Frame::new(MSG_BROADCAST_DATA, payload);
        let result = handle_message(&mut hrm, &frame).unwrap();
        let frames = result.unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id, MSG_REQUEST_MESSAGE);
        assert_eq!(frames[0].payload, vec![2, MSG_CHANNEL_ID]);
        assert_eq!(hrm.heart_rate, 0xFF);
    }

    #[test]
    fn channel_id_clears_pairing_gate() {
        let mut hrm = DummyHrm::slave();
        let id_payload = vec![2u8, 0x34, 0x12, 120, transmission_type::PAIRING];
        handle_message(&mut hrm, &Frame::new(MSG_CHANNEL_ID, id_payload)).unwrap();
        assert!(hrm.runtime.paired);
        assert_eq!(hrm.runtime.peer_device_number, Some(0x1234));

        let payload = vec![2u8, 0, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 100];
        let result = handle_message(&mut hrm, &Frame::new(MSG_BROADCAST_DATA, payload)).unwrap();
        assert!(result.is_none());
        assert_eq!(hrm.heart_rate, 100);
    }

    #[test]
    fn page70_reply_count_and_message_id_scenario_s6() {
        let mut hrm = DummyHrm::master();
        hrm.runtime.paired = true;
        // transmission_response = 0x82 -> 2 responses, bit7 set -> acknowledged
        let body = [0, 0, 0, 0x82, 80, 1, 0];
        let mut payload = vec![2u8, 70];
        payload.extend_from_slice(&body);
        let result = handle_message(&mut hrm, &Frame::new(MSG_ACKNOWLEDGED_DATA, payload)).unwrap();
        let frames = result.unwrap();
        assert_eq!(frames.len(), 2);
        for f in &frames {
            assert_eq!(f.id, MSG_ACKNOWLEDGED_DATA);
            assert_eq!(f.payload[1], 80);
        }
    }

    #[test]
    fn page70_zero_responses_produces_no_replies() {
        let mut hrm = DummyHrm::master();
        hrm.runtime.paired = true;
        // transmission_response = 0x80 -> 0 responses, bit7 set -> acknowledged
        let body = [0, 0, 0, 0x80, 80, 1, 0];
        let mut payload = vec![2u8, 70];
        payload.extend_from_slice(&body);
        let result = handle_message(&mut hrm, &Frame::new(MSG_ACKNOWLEDGED_DATA, payload)).unwrap();
        assert_eq!(result.unwrap().len(), 0);
    }

    #[test]
    fn page70_unsupported_page_logs_and_does_not_reply() {
        let mut hrm = DummyHrm::master();
        hrm.runtime.paired = true;
        let body = [0, 0, 0, 0x01, 250, 1, 0];
        let mut payload = vec![2u8, 70];
        payload.extend_from_slice(&body);
        let result = handle_message(&mut hrm, &Frame::new(MSG_ACKNOWLEDGED_DATA, payload)).unwrap();
        assert_eq!(result.unwrap().len(), 0);
    }

    #[test]
    fn channel_response_assign_sets_status() {
        let mut hrm = DummyHrm::master();
        let payload = vec![2u8, MSG_ASSIGN_CHANNEL, RESPONSE_NO_ERROR];
        handle_message(&mut hrm, &Frame::new(MSG_CHANNEL_RESPONSE, payload)).unwrap();
        assert_eq!(hrm.runtime.status, ChannelStatus::Assigned);
        assert_eq!(hrm.runtime.last_action, Some(MSG_ASSIGN_CHANNEL));
    }

    #[test]
    fn wrong_channel_is_an_error() {
        let mut hrm = DummyHrm::master();
        let payload = vec![9u8, MSG_ASSIGN_CHANNEL, RESPONSE_NO_ERROR];
        let err = handle_message(&mut hrm, &Frame::new(MSG_CHANNEL_RESPONSE, payload)).unwrap_err();
        assert!(matches!(err, AntError::WrongChannel { .. }));
    }
}
