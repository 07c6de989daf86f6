//! Legacy bit-bang adapter for the Altera USB-Blaster family (FT245-style
//! FTDI chips): spec.md §4.2.1.

use std::time::Duration;

use log::debug;

use crate::adapter::Adapter;
use crate::bitvec::{bytes_for_bits, BitVec};
use crate::error::{JtagError, Result};
use crate::progress::LogSink;
use crate::usb::{ftdi_init_sequence, DeviceSelector, UsbLink};

const VENDOR_ID: u16 = 0x09FB;
const PRODUCT_IDS: &[u16] = &[0x6001];

/// Base bit-bang byte value: bits 2, 3, 5 held high to keep the chip-select
/// lines asserted, per spec.md §4.2.1.
const BASE_VALUE: u8 = 0x2C;
const BIT_TCK: u8 = 1 << 0;
const BIT_TMS: u8 = 1 << 1;
const BIT_TDI: u8 = 1 << 4;
const BIT_READ: u8 = 1 << 6;

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const RESET_FLUSH_CYCLES: usize = 2000;

fn bitbang_byte(tck: bool, tms: bool, tdi: bool, read: bool) -> u8 {
    let mut v = BASE_VALUE;
    if tck {
        v |= BIT_TCK;
    }
    if tms {
        v |= BIT_TMS;
    }
    if tdi {
        v |= BIT_TDI;
    }
    if read {
        v |= BIT_READ;
    }
    v
}

pub struct LegacyAdapter {
    link: UsbLink,
}

impl LegacyAdapter {
    pub fn new(selector: &DeviceSelector, log: &mut LogSink) -> Result<Self> {
        let mut link = UsbLink::open(VENDOR_ID, PRODUCT_IDS, true, selector, log)?;
        ftdi_init_sequence(&mut link, 2, log)?;

        let mut adapter = Self { link };
        // Emit a long TMS=1 flush to guarantee the TAP is in RESET,
        // regardless of whatever state it was left in.
        log.info(format!("flushing {} TMS=1 cycles to force TAP RESET", RESET_FLUSH_CYCLES));
        let tdi = BitVec::zeros(RESET_FLUSH_CYCLES);
        let tms = BitVec::ones(RESET_FLUSH_CYCLES);
        adapter.shift(&tdi, &tms, false)?;
        Ok(adapter)
    }

    /// Append one bit-bang TCK edge (setup + clock byte pair) to `buf`.
    fn push_bitbang_bit(buf: &mut Vec<u8>, tms: bool, tdi: bool, read: bool) {
        buf.push(bitbang_byte(false, tms, tdi, false));
        buf.push(bitbang_byte(true, tms, tdi, read));
    }

    /// Append a byte-shift command (`0x80 | N`, then N data bytes) to
    /// `buf`, splitting into multiple commands if `data.len() > 63`.
    fn push_byte_shift(buf: &mut Vec<u8>, data: &[u8]) {
        for chunk in data.chunks(63) {
            buf.push(0x80 | (chunk.len() as u8));
            buf.extend_from_slice(chunk);
        }
    }
}

impl Adapter for LegacyAdapter {
    fn shift(&mut self, tdi: &BitVec, tms: &BitVec, capture: bool) -> Result<Option<BitVec>> {
        assert_eq!(tdi.len(), tms.len());
        let n = tdi.len();
        let mut buf = Vec::new();
        let mut n_reads = 0usize;

        if capture {
            // Bit-bang every bit individually with read-enable set, per
            // spec.md §4.2.1 / §9: reliable for small/state-interrogation
            // reads, not relied upon for bulk data elsewhere in this crate.
            for i in 0..n {
                Self::push_bitbang_bit(&mut buf, tms.get(i), tdi.get(i), true);
                n_reads += 1;
            }
        } else {
            let mut pos = 0;
            while pos < n {
                if pos + 8 <= n && (pos..pos + 8).all(|i| !tms.get(i)) {
                    // Greedily batch as many all-TMS=0 bytes as fit in one
                    // command (max 63 per §4.2.1).
                    let mut nbytes = 0usize;
                    while nbytes < 63 && pos + (nbytes + 1) * 8 <= n {
                        let start = pos + nbytes * 8;
                        if (start..start + 8).all(|i| !tms.get(i)) {
                            nbytes += 1;
                        } else {
                            break;
                        }
                    }
                    let mut data = vec![0u8; nbytes];
                    for i in 0..nbytes * 8 {
                        if tdi.get(pos + i) {
                            data[i / 8] |= 1 << (i % 8);
                        }
                    }
                    Self::push_byte_shift(&mut buf, &data);
                    pos += nbytes * 8;
                } else {
                    Self::push_bitbang_bit(&mut buf, tms.get(pos), tdi.get(pos), false);
                    pos += 1;
                }
            }
        }

        self.link.bulk_write(&buf)?;

        if capture {
            let bytes = self.link.bulk_read(n_reads, READ_TIMEOUT)?;
            if bytes.len() < n_reads {
                return Err(JtagError::TransferFailed {
                    direction: "IN",
                    detail: format!("expected {} read-back bytes, got {}", n_reads, bytes.len()),
                }
                .into());
            }
            let mut result = BitVec::zeros(n);
            for (i, byte) in bytes.iter().take(n).enumerate() {
                result.set(i, byte & 1 == 1);
            }
            Ok(Some(result))
        } else {
            Ok(None)
        }
    }

    fn shift_bytes(&mut self, tdi: &[u8], n_bits: usize) -> Result<()> {
        assert!(n_bits > 0);
        assert_eq!(tdi.len(), bytes_for_bits(n_bits));
        let mut buf = Vec::new();

        // Anchor byte: a single TCK=0 byte with no following clock edge,
        // priming the pin state before the fast byte-shift commands.
        buf.push(bitbang_byte(false, false, false, false));

        Self::push_byte_shift(&mut buf, tdi);

        // Re-emit the last bit via bit-bang with TMS=1 to exit SHIFT,
        // per spec.md §4.2.1 / §8 scenario D.
        let last_bit_idx = n_bits - 1;
        let last_bit = (tdi[last_bit_idx / 8] >> (last_bit_idx % 8)) & 1 == 1;
        Self::push_bitbang_bit(&mut buf, true, last_bit, false);

        self.link.bulk_write(&buf)
    }

    fn toggle_clock(&mut self, cycles: usize) -> Result<()> {
        debug!("legacy toggle_clock({})", cycles);
        let mut buf = Vec::new();
        buf.push(bitbang_byte(false, false, false, false));

        let full_bytes = cycles / 8;
        if full_bytes > 0 {
            Self::push_byte_shift(&mut buf, &vec![0u8; full_bytes]);
        }
        for _ in 0..(cycles % 8) {
            Self::push_bitbang_bit(&mut buf, false, false, false);
        }

        self.link.bulk_write(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitbang_byte_base_value() {
        assert_eq!(bitbang_byte(false, false, false, false), 0x2C);
        assert_eq!(bitbang_byte(true, false, false, false), 0x2D);
        assert_eq!(bitbang_byte(false, true, false, false), 0x2E);
        assert_eq!(bitbang_byte(false, false, true, false), 0x3C);
        assert_eq!(bitbang_byte(false, false, false, true), 0x6C);
    }

    #[test]
    fn byte_shift_command_header() {
        let mut buf = Vec::new();
        LegacyAdapter::push_byte_shift(&mut buf, &[0xAA, 0x55, 0xFF]);
        assert_eq!(buf, vec![0x83, 0xAA, 0x55, 0xFF]);
    }

    #[test]
    fn byte_shift_splits_over_63_bytes() {
        let data = vec![0x11u8; 70];
        let mut buf = Vec::new();
        LegacyAdapter::push_byte_shift(&mut buf, &data);
        assert_eq!(buf[0], 0x80 | 63);
        assert_eq!(&buf[1..64], &data[..63]);
        assert_eq!(buf[64], 0x80 | 7);
        assert_eq!(&buf[65..], &data[63..]);
    }
}
