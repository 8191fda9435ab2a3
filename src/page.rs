//! Data-page payload helpers shared across profiles: the generic 8-byte page
//! shape, the common Page 70 (request-for-page) descriptor, and the common
//! manufacturer/product/battery pages (80/81/82).

use crate::protocol::{MSG_ACKNOWLEDGED_DATA, MSG_BROADCAST_DATA};

/// An 8-byte application-layer data-page payload, as carried inside a
/// `BroadcastData`/`AcknowledgedData` frame's payload (channel byte + 8 page
/// bytes = 9-byte frame payload per spec §3).
pub fn build_data_payload(channel: u8, page: [u8; 8]) -> [u8; 9] {
    let mut out = [0u8; 9];
    out[0] = channel;
    out[1..].copy_from_slice(&page);
    out
}

/// Common Page 70 (request-for-page), decoded from a received data-page body.
/// Byte layout: `{page_number=70, slave_serial(u16), desc1, desc2,
/// transmission_response, requested_page, command_type}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page70Request {
    pub slave_serial_number: u16,
    pub descriptor_1: u8,
    pub descriptor_2: u8,
    pub number_of_responses: u8,
    pub response_with_acknowledged: bool,
    pub requested_page: u8,
    pub command_type: u8,
}

impl Page70Request {
    /// `body` is the 7 bytes following the page-number byte.
    pub fn decode(body: &[u8; 7]) -> Self {
        let transmission_response = body[3];
        Self {
            slave_serial_number: u16::from_le_bytes([body[0], body[1]]),
            descriptor_1: body[0],
            descriptor_2: body[1],
            number_of_responses: transmission_response & 0x7F,
            response_with_acknowledged: (transmission_response & 0x80) != 0,
            requested_page: body[4],
            command_type: body[5],
        }
    }

    /// The message id to use for the replies this request asks for.
    pub fn reply_message_id(&self) -> u8 {
        if self.response_with_acknowledged {
            MSG_ACKNOWLEDGED_DATA
        } else {
            MSG_BROADCAST_DATA
        }
    }
}

/// Encode a Page 70 request for `requested_page`, to be sent as
/// `AcknowledgedData`. `number_of_responses` and `reply_with_acknowledged`
/// control the low-7/top-bit of the transmission-response byte.
pub fn encode_page70(
    requested_page: u8,
    number_of_responses: u8,
    reply_with_acknowledged: bool,
) -> [u8; 8] {
    let transmission_response = (number_of_responses & 0x7F)
        | if reply_with_acknowledged { 0x80 } else { 0 };
    [
        70,
        0xFF,
        0xFF,
        0xFF,
        0xFF,
        transmission_response,
        requested_page,
        1,
    ]
}

/// Decoded common page 80: manufacturer's information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManufacturerInfo {
    pub hw_revision: u8,
    pub manufacturer_id: u16,
    pub model_number: u16,
}

impl ManufacturerInfo {
    pub fn decode(body: &[u8; 7]) -> Self {
        Self {
            hw_revision: body[2],
            manufacturer_id: u16::from_le_bytes([body[3], body[4]]),
            model_number: u16::from_le_bytes([body[5], body[6]]),
        }
    }

    pub fn encode(&self) -> [u8; 8] {
        let man = self.manufacturer_id.to_le_bytes();
        let model = self.model_number.to_le_bytes();
        [
            80,
            0xFF,
            0xFF,
            self.hw_revision,
            man[0],
            man[1],
            model[0],
            model[1],
        ]
    }
}

/// Decoded common page 81: product information. `sw_revision_supplemental`
/// of `0xFF` or `0` means "not used" (matches the on-wire sentinel).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProductInfo {
    pub sw_revision_supplemental: u8,
    pub sw_revision_main: u8,
    pub serial_number: Option<u32>,
}

impl ProductInfo {
    pub fn decode(body: &[u8; 7]) -> Self {
        let serial = u32::from_le_bytes([body[3], body[4], body[5], body[6]]);
        Self {
            sw_revision_supplemental: body[1],
            sw_revision_main: body[2],
            serial_number: if serial != 0xFFFFFFFF && serial != 0 {
                Some(serial)
            } else {
                None
            },
        }
    }

    pub fn encode(&self) -> [u8; 8] {
        let serial = self.serial_number.unwrap_or(0xFFFFFFFF).to_le_bytes();
        [
            81,
            0xFF,
            self.sw_revision_supplemental,
            self.sw_revision_main,
            serial[0],
            serial[1],
            serial[2],
            serial[3],
        ]
    }
}

/// Decoded common page 82: battery status.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatteryStatus {
    pub level_percent: Option<u8>,
    pub voltage: Option<f32>,
}

impl BatteryStatus {
    pub fn decode(body: &[u8; 7]) -> Self {
        let level = body[6];
        let frac = body[1] as f32 / 256.0;
        let coarse = (body[2] & 0x0F) as f32;
        let voltage = coarse + frac;
        Self {
            level_percent: if level != 0xFF { Some(level) } else { None },
            voltage: if voltage > 0.0 { Some(voltage) } else { None },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page70_decode_matches_scenario_s6() {
        // S6: serial=0, d1=0, d2=0, transmission_response=0x82, requested=80, cmd=1
        let body = [0x00, 0x00, 0x00, 0x82, 80, 1, 0];
        let req = Page70Request::decode(&body);
        assert_eq!(req.number_of_responses, 2);
        assert!(req.response_with_acknowledged);
        assert_eq!(req.requested_page, 80);
        assert_eq!(req.reply_message_id(), MSG_ACKNOWLEDGED_DATA);
    }

    #[test]
    fn page70_decode_broadcast_reply() {
        let body = [0x00, 0x00, 0x00, 0x03, 81, 1, 0];
        let req = Page70Request::decode(&body);
        assert_eq!(req.number_of_responses, 3);
        assert!(!req.response_with_acknowledged);
        assert_eq!(req.reply_message_id(), MSG_BROADCAST_DATA);
    }

    #[test]
    fn manufacturer_info_roundtrip() {
        let info = ManufacturerInfo {
            hw_revision: 1,
            manufacturer_id: crate::protocol::manufacturer::GARMIN,
            model_number: 0x33,
        };
        let encoded = info.encode();
        let body: [u8; 7] = encoded[1..].try_into().unwrap();
        assert_eq!(ManufacturerInfo::decode(&body), info);
    }

    #[test]
    fn product_info_serial_sentinel() {
        let body = [0xFF, 0xFF, 1, 0xFF, 0xFF, 0xFF, 0xFF];
        let info = ProductInfo::decode(&body);
        assert_eq!(info.serial_number, None);
    }

    #[test]
    fn battery_status_sentinels() {
        let body = [0, 0, 0, 0, 0, 0, 0xFF];
        let status = BatteryStatus::decode(&body);
        assert_eq!(status.level_percent, None);
        assert_eq!(status.voltage, None);
    }
}
