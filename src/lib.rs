//! A userland library for the ANT / ANT+ wireless protocol over a USB radio
//! dongle.
//!
//! The library lets an application act as any combination of ANT+ master
//! devices (heart-rate monitor, speed-and-cadence sensor, fitness-equipment
//! trainer) and slave devices (receivers or controllers of the same), plus a
//! vendor extension for Tacx Bushido trainers and two supporting pieces: a
//! bridging relay between a real master and a real slave, and a passive
//! continuous-scan logger.
//!
//! Leaves-first module order: [`frame`] and [`page`] are the wire/page
//! codecs, [`deframer`] turns a byte stream into frames, [`network`] and
//! [`channel`] model the dongle's network-key table and per-channel state
//! machine, [`dongle`] owns the USB session and its reader/dispatcher
//! threads, [`profiles`] holds the concrete device implementations, and
//! [`bridge`]/[`scanner`] are built on top of [`channel::ChannelInterface`]
//! like any other profile.

pub mod bridge;
pub mod channel;
pub mod config;
pub mod data;
pub mod deframer;
pub mod dongle;
pub mod error;
pub mod frame;
pub mod network;
pub mod page;
pub mod profiles;
pub mod protocol;
pub mod scanner;
pub mod usb;

/// Test-only logging, matching the teacher's `lib.rs::run()` formatter style
/// so failing tests produce timestamped, module-tagged output. Never used by
/// non-test code — this crate never installs a logger on its consumers.
#[cfg(test)]
pub(crate) mod test_logging {
    use flexi_logger::{DeferredNow, Logger};
    use log::Record;
    use std::io::Write;
    use std::sync::Once;

    fn format(w: &mut dyn Write, now: &mut DeferredNow, record: &Record) -> std::io::Result<()> {
        write!(
            w,
            "{} {:<5} [{}] {}",
            now.format("%H:%M:%S%.3f"),
            record.level(),
            record.module_path().unwrap_or("<unknown>"),
            record.args()
        )
    }

    static INIT: Once = Once::new();

    /// Install a stderr logger once per test process. Safe to call from
    /// every test that wants log output; later calls are no-ops.
    pub fn init() {
        INIT.call_once(|| {
            let _ = Logger::try_with_env_or_str("debug")
                .expect("invalid test log spec")
                .format(format)
                .start();
        });
    }
}
