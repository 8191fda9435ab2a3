use thiserror::Error;

/// Error taxonomy for the dongle session, channel state machine and page
/// codecs. Every fallible operation in this crate returns `Result<_, AntError>`.
#[derive(Error, Debug)]
pub enum AntError {
    #[error("no matching ANT USB dongle found")]
    NoDongle,

    #[error("no free channel slots remain")]
    NoMoreChannels,

    #[error("no free network-key slots remain")]
    NoMoreNetworks,

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("wrong message id: expected {expected:#x}, found {found:#x}")]
    WrongMessageId { expected: u8, found: u8 },

    #[error("unknown message id {0:#x}")]
    UnknownMessageId(u8),

    #[error("frame delivered to wrong channel: expected {expected}, found {found}")]
    WrongChannel { expected: u8, found: u8 },

    #[error("unsupported page {0}")]
    UnsupportedPage(u8),

    #[error("unknown data page {0}")]
    UnknownDataPage(u8),

    #[error("no complete frame available yet")]
    NoFrameYet,

    #[error("channel {channel} command {command:#x} failed with response code {code:#x}")]
    ChannelResponse { channel: u8, command: u8, code: u8 },

    #[error("timed out waiting for channel {channel} response to {command:#x}")]
    ResponseTimeout { channel: u8, command: u8 },

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
}

impl serde::Serialize for AntError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let code = match self {
            AntError::NoDongle => "no_dongle",
            AntError::NoMoreChannels => "no_more_channels",
            AntError::NoMoreNetworks => "no_more_networks",
            AntError::InvalidFrame(_) => "invalid_frame",
            AntError::WrongMessageId { .. } => "wrong_message_id",
            AntError::UnknownMessageId(_) => "unknown_message_id",
            AntError::WrongChannel { .. } => "wrong_channel",
            AntError::UnsupportedPage(_) => "unsupported_page",
            AntError::UnknownDataPage(_) => "unknown_data_page",
            AntError::NoFrameYet => "no_frame_yet",
            AntError::ChannelResponse { .. } => "channel_response_error",
            AntError::ResponseTimeout { .. } => "response_timeout",
            AntError::Usb(_) => "usb_error",
        };
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("code", code)?;
        map.serialize_entry("message", &self.to_string())?;
        map.end()
    }
}
