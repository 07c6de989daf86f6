//! USB Link: spec.md §4.1. Opens and configures the USB device, performs
//! bulk OUT/IN transfers and FTDI vendor control transfers. Thin and
//! stateless with respect to JTAG semantics.

use std::time::Duration;

use failure::ResultExt;
use log::{debug, info};

use crate::error::JtagError;
use crate::progress::LogSink;

/// FTDI vendor control requests (bRequest values), per spec.md §4.1.
mod vendor_request {
    pub const RESET: u8 = 0x00;
    pub const SET_LATENCY_TIMER: u8 = 0x09;
    pub const SET_BITMODE: u8 = 0x0B;
}

/// FTDI `SIO_RESET` wValue selectors, sent via `vendor_request::RESET`.
mod reset_selector {
    pub const RESET_SIO: u16 = 0;
    pub const PURGE_RX: u16 = 1;
    pub const PURGE_TX: u16 = 2;
}

/// FTDI bitmode values, sent in the high byte of `SET_BITMODE`'s wValue.
#[derive(Copy, Clone, Debug)]
#[repr(u8)]
pub enum BitMode {
    Reset = 0x00,
    Bitbang = 0x01,
    Mpsse = 0x02,
}

const WRITE_TIMEOUT: Duration = Duration::from_secs(2);
const CONTROL_TIMEOUT: Duration = Duration::from_millis(500);

/// An opened, interface-claimed USB device with bulk endpoints resolved.
pub struct UsbLink {
    handle: rusb::DeviceHandle<rusb::GlobalContext>,
    write_ep: u8,
    read_ep: u8,
    /// True for FT245-style endpoints (the legacy adapter), which prepend a
    /// 2-byte modem/line-status header to every IN packet.
    strip_status_bytes: bool,
}

/// Which matching device to open, when more than one is attached.
pub enum DeviceSelector {
    First,
    Index(usize),
    Serial(String),
}

impl UsbLink {
    /// Find and open a USB device matching `vendor_id` and any of
    /// `product_ids`, claim interface 0, and resolve its first bulk IN/OUT
    /// endpoint pair.
    pub fn open(
        vendor_id: u16,
        product_ids: &[u16],
        strip_status_bytes: bool,
        selector: &DeviceSelector,
        log: &mut LogSink,
    ) -> Result<Self, JtagError> {
        let devices = rusb::devices().context("error listing USB devices")?;
        let mut candidate_index = 0;
        for device in devices.iter() {
            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(_) => continue,
            };
            if desc.vendor_id() != vendor_id || !product_ids.contains(&desc.product_id()) {
                continue;
            }

            let this_index = candidate_index;
            candidate_index += 1;
            if let DeviceSelector::Index(want) = selector {
                if this_index != *want {
                    continue;
                }
            }

            log.info(format!(
                "found USB device {:04x}:{:04x} at bus {} address {}",
                vendor_id,
                desc.product_id(),
                device.bus_number(),
                device.address()
            ));

            let mut handle = device.open().context("error opening USB device")?;

            if let DeviceSelector::Serial(want) = selector {
                let serial = handle
                    .read_serial_number_string_ascii(&desc, CONTROL_TIMEOUT)
                    .unwrap_or_default();
                if &serial != want {
                    continue;
                }
            }

            let config = device.active_config_descriptor().context("error reading config descriptor")?;
            let interface = config
                .interfaces()
                .next()
                .ok_or(JtagError::EndpointsMissing)?;
            let descriptor = interface
                .descriptors()
                .next()
                .ok_or(JtagError::EndpointsMissing)?;

            let mut write_ep = None;
            let mut read_ep = None;
            for endpoint in descriptor.endpoint_descriptors() {
                match endpoint.direction() {
                    rusb::Direction::Out if write_ep.is_none() => write_ep = Some(endpoint.address()),
                    rusb::Direction::In if read_ep.is_none() => read_ep = Some(endpoint.address()),
                    _ => {}
                }
            }
            let (write_ep, read_ep) = match (write_ep, read_ep) {
                (Some(w), Some(r)) => (w, r),
                _ => return Err(JtagError::EndpointsMissing),
            };

            handle.claim_interface(0).context("error claiming interface 0")?;

            return Ok(Self { handle, write_ep, read_ep, strip_status_bytes });
        }
        Err(JtagError::DeviceNotFound)
    }

    /// Full FTDI reset (`SIO_RESET`, value 0). A NAK here is non-fatal: the
    /// device is sometimes fine even when this particular control transfer
    /// fails (spec.md §7).
    pub fn ftdi_reset(&mut self, log: &mut LogSink) -> Result<(), JtagError> {
        match self.control_write(vendor_request::RESET, reset_selector::RESET_SIO) {
            Ok(()) => Ok(()),
            Err(e) => {
                log.warning(format!("FTDI reset control transfer failed, continuing: {}", e));
                Ok(())
            }
        }
    }

    pub fn purge_rx(&mut self) -> Result<(), JtagError> {
        self.control_write(vendor_request::RESET, reset_selector::PURGE_RX)
    }

    pub fn purge_tx(&mut self) -> Result<(), JtagError> {
        self.control_write(vendor_request::RESET, reset_selector::PURGE_TX)
    }

    pub fn set_latency_timer(&mut self, millis: u8) -> Result<(), JtagError> {
        self.control_write(vendor_request::SET_LATENCY_TIMER, millis as u16)
    }

    /// Sets the bitmode; `output_mask` selects which low-byte pins are
    /// driven as outputs when `mode` needs one (bit-bang, MPSSE).
    pub fn set_bitmode(&mut self, mode: BitMode, output_mask: u8) -> Result<(), JtagError> {
        let value = ((mode as u16) << 8) | (output_mask as u16);
        self.control_write(vendor_request::SET_BITMODE, value)
    }

    fn control_write(&mut self, request: u8, value: u16) -> Result<(), JtagError> {
        let request_type = rusb::request_type(
            rusb::Direction::Out,
            rusb::RequestType::Vendor,
            rusb::Recipient::Device,
        );
        self.handle
            .write_control(request_type, request, value, 0, &[], CONTROL_TIMEOUT)
            .map_err(JtagError::from)?;
        Ok(())
    }

    /// Write `data` to the bulk OUT endpoint, chunking to respect the
    /// default 2s write timeout per chunk.
    pub fn bulk_write(&mut self, data: &[u8]) -> Result<(), JtagError> {
        debug!("bulk_write {} bytes", data.len());
        let mut offset = 0;
        while offset < data.len() {
            let n = self
                .handle
                .write_bulk(self.write_ep, &data[offset..], WRITE_TIMEOUT)
                .map_err(|e| JtagError::TransferFailed {
                    direction: "OUT",
                    detail: e.to_string(),
                })?;
            if n == 0 {
                return Err(JtagError::TransferFailed {
                    direction: "OUT",
                    detail: "zero-length bulk write".to_string(),
                });
            }
            offset += n;
        }
        Ok(())
    }

    /// Read up to `max_len` bytes from the bulk IN endpoint within
    /// `timeout`. For FT245-style endpoints, strips the 2-byte
    /// modem/line-status header FTDI prepends to every IN packet
    /// (including packets carrying no payload).
    pub fn bulk_read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, JtagError> {
        if !self.strip_status_bytes {
            let mut buf = vec![0u8; max_len];
            let n = self
                .handle
                .read_bulk(self.read_ep, &mut buf, timeout)
                .map_err(Self::map_read_error)?;
            buf.truncate(n);
            return Ok(buf);
        }

        // FT245 packets are at most 64 bytes and always carry a 2-byte
        // status header, even when there's no payload.
        const PACKET_SIZE: usize = 64;
        let mut out = Vec::with_capacity(max_len);
        let mut buf = vec![0u8; PACKET_SIZE];
        while out.len() < max_len {
            let n = self
                .handle
                .read_bulk(self.read_ep, &mut buf, timeout)
                .map_err(Self::map_read_error)?;
            if n < 2 {
                break;
            }
            out.extend_from_slice(&buf[2..n]);
            if n < PACKET_SIZE {
                // Short packet: device has nothing more queued right now.
                break;
            }
        }
        out.truncate(max_len);
        Ok(out)
    }

    fn map_read_error(e: rusb::Error) -> JtagError {
        if e == rusb::Error::Timeout {
            JtagError::Timeout
        } else {
            JtagError::TransferFailed { direction: "IN", detail: e.to_string() }
        }
    }
}

/// Runs the common FTDI init sequence shared by both adapters: full reset,
/// purge RX, purge TX, set latency timer, drain any residual IN bytes.
pub fn ftdi_init_sequence(link: &mut UsbLink, latency_ms: u8, log: &mut LogSink) -> Result<(), JtagError> {
    link.ftdi_reset(log)?;
    link.purge_rx()?;
    link.purge_tx()?;
    link.set_latency_timer(latency_ms)?;
    // Best-effort drain: read until a short/empty packet or the drain
    // timeout expires, ignoring timeouts (there's simply nothing queued).
    loop {
        match link.bulk_read(64, Duration::from_millis(50)) {
            Ok(bytes) if bytes.is_empty() => break,
            Ok(_) => continue,
            Err(JtagError::Timeout) => break,
            Err(e) => return Err(e),
        }
    }
    info!("FTDI init sequence complete (latency={}ms)", latency_ms);
    Ok(())
}
