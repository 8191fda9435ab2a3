use std::time::Duration;

/// USB bulk transfer write timeout.
pub const USB_WRITE_TIMEOUT: Duration = Duration::from_millis(1000);

/// USB bulk transfer read timeout — short so the reader thread can check its
/// cancellation flag regularly.
pub const USB_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Size of a single USB bulk-in read. A single read may contain several
/// concatenated ANT messages.
pub const USB_READ_BUF_LEN: usize = 64;

/// Delay after RESET_SYSTEM before the dongle is ready to respond.
pub const RESET_SETTLE_TIME: Duration = Duration::from_millis(500);

/// Deadline for a single channel-configuration step (assign/id/rf/period/
/// power/search-timeout/open), per spec: configuration fails fatally on
/// expiry rather than leaving a half-configured channel.
pub const CHANNEL_CONFIG_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for CLOSE_CHANNEL's EVENT_CHANNEL_CLOSED response.
pub const CHANNEL_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Deadline for the one-shot network-key acknowledgement.
pub const NETWORK_KEY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default search timeout sent to slave channels: 30s in 2.5s units.
pub const DEFAULT_SEARCH_TIMEOUT_UNITS: u8 = 12;

/// Per-device interval margin (ANT ticks) added to `channel_period` before
/// the scanner warns that frames may have been missed.
pub const SCANNER_INTERVAL_MARGIN: u16 = 10;

/// Threshold (ANT ticks) below which a received interval looks like a slave
/// retransmission rather than a master broadcast period.
pub const SCANNER_SLAVE_INTERVAL_THRESHOLD: u16 = 100;
