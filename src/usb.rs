//! Low-level USB transport for the ANT radio dongle: device discovery, bulk
//! I/O, and the CYCPLUS-quirk manufacturer-string check.

use rusb::{DeviceHandle, GlobalContext};

use crate::config::{USB_READ_BUF_LEN, USB_READ_TIMEOUT, USB_WRITE_TIMEOUT};
use crate::error::AntError;
use crate::protocol::{ANT_USB_PRODUCT_IDS, ANT_USB_VENDOR_ID, MSG_RESET_SYSTEM};

/// Thin USB transport. libusb is thread-safe for concurrent operations on
/// different endpoints, so a reader thread's `read_bulk` and a writer's
/// `write_bulk` can run concurrently without a lock on the handle itself —
/// callers serialize writes with their own mutex (spec §4.3's single-writer
/// discipline) to keep request ordering deterministic.
pub struct AntUsb {
    handle: DeviceHandle<GlobalContext>,
    endpoint_in: u8,
    endpoint_out: u8,
    pub cycplus: bool,
}

impl AntUsb {
    /// Find and open the first recognized ANT USB dongle.
    pub fn open() -> Result<Self, AntError> {
        let devices = rusb::devices()?;

        for device in devices.iter() {
            let desc = device.device_descriptor()?;

            if desc.vendor_id() != ANT_USB_VENDOR_ID
                || !ANT_USB_PRODUCT_IDS.contains(&desc.product_id())
            {
                continue;
            }

            let handle = device.open()?;

            if handle.kernel_driver_active(0).unwrap_or(false) {
                handle.detach_kernel_driver(0)?;
            }
            handle.claim_interface(0)?;

            let config = device.active_config_descriptor()?;
            let interface = config
                .interfaces()
                .next()
                .ok_or(AntError::NoDongle)?;
            let setting = interface
                .descriptors()
                .next()
                .ok_or(AntError::NoDongle)?;

            let mut ep_in = 0u8;
            let mut ep_out = 0u8;
            for ep in setting.endpoint_descriptors() {
                match ep.direction() {
                    rusb::Direction::In => ep_in = ep.address(),
                    rusb::Direction::Out => ep_out = ep.address(),
                }
            }
            if ep_in == 0 || ep_out == 0 {
                return Err(AntError::NoDongle);
            }

            handle.reset()?;
            if handle.kernel_driver_active(0).unwrap_or(false) {
                let _ = handle.detach_kernel_driver(0);
            }
            handle.claim_interface(0)?;

            let cycplus = handle
                .read_manufacturer_string_ascii(&desc)
                .map(|s| s.to_uppercase().contains("CYCPLUS"))
                .unwrap_or(false);

            return Ok(Self {
                handle,
                endpoint_in: ep_in,
                endpoint_out: ep_out,
                cycplus,
            });
        }

        Err(AntError::NoDongle)
    }

    /// Write a raw, already-composed wire frame.
    pub fn write_frame(&self, frame: &[u8]) -> Result<(), AntError> {
        self.handle
            .write_bulk(self.endpoint_out, frame, USB_WRITE_TIMEOUT)?;
        Ok(())
    }

    /// Read one bulk-in packet (up to `USB_READ_BUF_LEN` bytes). Returns an
    /// empty vec on timeout — the reader thread treats that as "nothing yet",
    /// not an error, per spec §4.3 ("swallows transient USB read errors").
    pub fn read_chunk(&self) -> Result<Vec<u8>, AntError> {
        let mut buf = [0u8; USB_READ_BUF_LEN];
        match self.handle.read_bulk(self.endpoint_in, &mut buf, USB_READ_TIMEOUT) {
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(rusb::Error::Timeout) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Check whether a recognized ANT dongle is plugged in without opening it.
    pub fn is_available() -> bool {
        let Ok(devices) = rusb::devices() else {
            return false;
        };
        devices.iter().any(|d| {
            d.device_descriptor().map_or(false, |desc| {
                desc.vendor_id() == ANT_USB_VENDOR_ID
                    && ANT_USB_PRODUCT_IDS.contains(&desc.product_id())
            })
        })
    }

    pub fn release_interfaces(&self) {
        let _ = self.handle.release_interface(0);
    }
}

impl Drop for AntUsb {
    fn drop(&mut self) {
        // CYCPLUS dongles lock up if sent RESET_SYSTEM a second time; skip it
        // entirely on those units, matching `DongleSession::release`.
        if !self.cycplus {
            let frame = crate::frame::compose(MSG_RESET_SYSTEM, &[0x00]).unwrap_or_default();
            let _ = self.write_frame(&frame);
        }
        let _ = self.handle.attach_kernel_driver(0);
    }
}
