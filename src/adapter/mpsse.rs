//! MPSSE adapter for FT2232H/FT232H-family cables: spec.md §4.2.2.

use std::time::Duration;

use log::debug;

use crate::adapter::Adapter;
use crate::bitvec::{bytes_for_bits, BitVec};
use crate::error::{JtagError, Result};
use crate::progress::LogSink;
use crate::usb::{ftdi_init_sequence, BitMode, DeviceSelector, UsbLink};

const VENDOR_ID: u16 = 0x0403;
/// FT2232H, FT4232H, FT232H — all speak MPSSE, per spec.md §4.1.
const PRODUCT_IDS: &[u16] = &[0x6010, 0x6011, 0x6014];

/// MPSSE command flag bits; an opcode byte is the OR of the flags it needs,
/// per spec.md §4.2.2 / AN108.
mod flag {
    pub const NEG: u8 = 0x01;
    pub const BITMODE: u8 = 0x02;
    pub const LSB: u8 = 0x08;
    pub const DO_WRITE: u8 = 0x10;
    pub const DO_READ: u8 = 0x20;
    pub const TMS_CMD: u8 = 0x40;
}

const CMD_DISABLE_DIV5: u8 = 0x8A;
const CMD_DISABLE_ADAPTIVE: u8 = 0x97;
const CMD_DISABLE_3PHASE: u8 = 0x8D;
const CMD_LOOPBACK_OFF: u8 = 0x85;
const CMD_SET_CLOCK_DIVISOR: u8 = 0x86;
const CMD_SET_BITS_LOW: u8 = 0x80;
const CMD_SET_BITS_HIGH: u8 = 0x82;
const CMD_CLOCK_BYTES: u8 = 0x8F;
const CMD_CLOCK_BITS: u8 = 0x8E;
const CMD_SEND_IMMEDIATE: u8 = 0x87;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MpsseAdapter {
    link: UsbLink,
}

impl MpsseAdapter {
    pub fn new(selector: &DeviceSelector, log: &mut LogSink) -> Result<Self> {
        let mut link = UsbLink::open(VENDOR_ID, PRODUCT_IDS, false, selector, log)?;
        ftdi_init_sequence(&mut link, 1, log)?;
        link.set_bitmode(BitMode::Mpsse, 0x0B)?;

        link.bulk_write(&[
            CMD_DISABLE_DIV5,
            CMD_DISABLE_ADAPTIVE,
            CMD_DISABLE_3PHASE,
            CMD_LOOPBACK_OFF,
            CMD_SET_CLOCK_DIVISOR,
            0x05,
            0x00,
            CMD_SET_BITS_LOW,
            0xE8,
            0xEB,
            CMD_SET_BITS_HIGH,
            0x00,
            0x60,
        ])?;
        log.info("MPSSE adapter ready at approximately 5 MHz".to_string());
        Ok(Self { link })
    }

    /// Build a TMS-write command: up to 7 TMS bits, TDI held constant
    /// (carried in bit 7 of the data byte) for the whole command.
    fn push_tms_command(buf: &mut Vec<u8>, tms_bits: &[bool], tdi_level: bool, capture: bool) {
        assert!(!tms_bits.is_empty() && tms_bits.len() <= 7);
        let mut cmd = flag::TMS_CMD | flag::BITMODE | flag::LSB | flag::NEG;
        if capture {
            cmd |= flag::DO_READ;
        }
        buf.push(cmd);
        buf.push((tms_bits.len() - 1) as u8);
        let mut data = 0u8;
        for (i, &bit) in tms_bits.iter().enumerate() {
            if bit {
                data |= 1 << i;
            }
        }
        if tdi_level {
            data |= 1 << 7;
        }
        buf.push(data);
    }

    /// Build a full-byte read-write command for `data`, TMS held at 0.
    fn push_byte_command(buf: &mut Vec<u8>, data: &[u8], capture: bool) {
        assert!(!data.is_empty() && data.len() <= 65536);
        let mut cmd = flag::LSB | flag::NEG | flag::DO_WRITE;
        if capture {
            cmd |= flag::DO_READ;
        }
        buf.push(cmd);
        let n = (data.len() - 1) as u16;
        buf.push((n & 0xFF) as u8);
        buf.push((n >> 8) as u8);
        buf.extend_from_slice(data);
    }

    /// Build a bit read-write command for `n` bits (1..=8) of `byte`, TMS
    /// held at 0 throughout.
    fn push_bit_command(buf: &mut Vec<u8>, byte: u8, n: usize, capture: bool) {
        assert!(n >= 1 && n <= 8);
        let mut cmd = flag::BITMODE | flag::LSB | flag::NEG | flag::DO_WRITE;
        if capture {
            cmd |= flag::DO_READ;
        }
        buf.push(cmd);
        buf.push((n - 1) as u8);
        buf.push(byte);
    }

    fn push_clock_only(buf: &mut Vec<u8>, cycles: usize) {
        let full_bytes = cycles / 8;
        let mut remaining_bytes = full_bytes;
        while remaining_bytes > 0 {
            let chunk = remaining_bytes.min(65536);
            buf.push(CMD_CLOCK_BYTES);
            let n = (chunk - 1) as u16;
            buf.push((n & 0xFF) as u8);
            buf.push((n >> 8) as u8);
            remaining_bytes -= chunk;
        }
        let rem_bits = cycles % 8;
        if rem_bits > 0 {
            buf.push(CMD_CLOCK_BITS);
            buf.push((rem_bits - 1) as u8);
        }
    }
}

/// Plan entry: how many response bits a queued command will produce, in
/// the order commands were issued.
enum ReadWidth {
    Bits(usize),
}

impl Adapter for MpsseAdapter {
    fn shift(&mut self, tdi: &BitVec, tms: &BitVec, capture: bool) -> Result<Option<BitVec>> {
        assert_eq!(tdi.len(), tms.len());
        let n = tdi.len();
        let mut buf = Vec::new();
        let mut read_plan: Vec<ReadWidth> = Vec::new();

        let mut pos = 0;
        while pos < n {
            if !tms.get(pos) {
                let mut run_len = 0;
                while pos + run_len < n && !tms.get(pos + run_len) {
                    run_len += 1;
                }
                let mut off = 0;
                while run_len - off >= 8 {
                    let mut nbytes = 0usize;
                    while nbytes < 65536 && (nbytes + 1) * 8 <= run_len - off {
                        nbytes += 1;
                    }
                    let mut data = vec![0u8; nbytes];
                    for i in 0..nbytes * 8 {
                        if tdi.get(pos + off + i) {
                            data[i / 8] |= 1 << (i % 8);
                        }
                    }
                    Self::push_byte_command(&mut buf, &data, capture);
                    if capture {
                        read_plan.push(ReadWidth::Bits(nbytes * 8));
                    }
                    off += nbytes * 8;
                }
                let rem = run_len - off;
                if rem > 0 {
                    let mut byte = 0u8;
                    for i in 0..rem {
                        if tdi.get(pos + off + i) {
                            byte |= 1 << i;
                        }
                    }
                    Self::push_bit_command(&mut buf, byte, rem, capture);
                    if capture {
                        read_plan.push(ReadWidth::Bits(rem));
                    }
                }
                pos += run_len;
            } else {
                let mut run_len = 0;
                while pos + run_len < n && tms.get(pos + run_len) {
                    run_len += 1;
                }
                let mut off = 0;
                while off < run_len {
                    let take = (run_len - off).min(7);
                    let bits: Vec<bool> = (0..take).map(|i| tms.get(pos + off + i)).collect();
                    let tdi_level = tdi.get(pos + off);
                    Self::push_tms_command(&mut buf, &bits, tdi_level, capture);
                    if capture {
                        read_plan.push(ReadWidth::Bits(take));
                    }
                    off += take;
                }
                pos += run_len;
            }
        }

        buf.push(CMD_SEND_IMMEDIATE);
        self.link.bulk_write(&buf)?;

        if capture {
            let n_reads = read_plan.len();
            let bytes = self.link.bulk_read(n_reads, READ_TIMEOUT)?;
            if bytes.len() < n_reads {
                return Err(JtagError::TransferFailed {
                    direction: "IN",
                    detail: format!("expected {} read bytes, got {}", n_reads, bytes.len()),
                }
                .into());
            }
            let mut result = BitVec::zeros(n);
            let mut bit_pos = 0;
            for (byte, ReadWidth::Bits(width)) in bytes.into_iter().zip(read_plan) {
                // Full bytes arrive intact (shift 0); k-bit reads arrive
                // right-justified (shift 8-k); a TMS read's single bit
                // lands in bit 7 (shift 8-1=7) — one formula covers all
                // three per spec.md §4.2.2.
                let shift = 8 - width;
                for i in 0..width {
                    let bit = (byte >> (shift + i)) & 1 == 1;
                    result.set(bit_pos + i, bit);
                }
                bit_pos += width;
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

        let full_bytes = n_bits / 8;
        if full_bytes > 0 {
            Self::push_byte_command(&mut buf, &tdi[..full_bytes], false);
        }
        let rem = n_bits % 8;
        if rem > 0 {
            Self::push_bit_command(&mut buf, tdi[full_bytes], rem, false);
        }

        buf.push(CMD_SEND_IMMEDIATE);
        self.link.bulk_write(&buf)
    }

    fn toggle_clock(&mut self, cycles: usize) -> Result<()> {
        debug!("MPSSE toggle_clock({})", cycles);
        let mut buf = Vec::new();
        Self::push_clock_only(&mut buf, cycles);
        buf.push(CMD_SEND_IMMEDIATE);
        self.link.bulk_write(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_command_header_is_len_minus_one() {
        let mut buf = Vec::new();
        MpsseAdapter::push_byte_command(&mut buf, &[0xAA, 0x55], false);
        assert_eq!(buf[0], flag::LSB | flag::NEG | flag::DO_WRITE);
        assert_eq!(buf[1], 1);
        assert_eq!(buf[2], 0);
        assert_eq!(&buf[3..], &[0xAA, 0x55]);
    }

    #[test]
    fn byte_command_sets_read_flag_when_capturing() {
        let mut buf = Vec::new();
        MpsseAdapter::push_byte_command(&mut buf, &[0x00], true);
        assert_eq!(buf[0] & flag::DO_READ, flag::DO_READ);
    }

    #[test]
    fn tms_command_opcode_matches_scenario_e() {
        // Scenario E: shift(tdi=[0x81], tms=[0,0,0,0,0,0,0,1]) yields a
        // bit-mode write (0x1B, 6, 0x01) then a TMS write (0x4B, 0, 0x81).
        let mut buf = Vec::new();
        MpsseAdapter::push_bit_command(&mut buf, 0x01, 7, false);
        assert_eq!(buf, vec![0x1B, 6, 0x01]);

        let mut buf = Vec::new();
        MpsseAdapter::push_tms_command(&mut buf, &[true], true, false);
        assert_eq!(buf, vec![0x4B, 0, 0x81]);
    }

    #[test]
    fn bit_command_encodes_length_minus_one() {
        let mut buf = Vec::new();
        MpsseAdapter::push_bit_command(&mut buf, 0b1010_0000, 4, false);
        assert_eq!(buf[0] & flag::BITMODE, flag::BITMODE);
        assert_eq!(buf[1], 3);
        assert_eq!(buf[2], 0b1010_0000);
    }

    #[test]
    fn shift_scenario_e_matches_spec() {
        let mut adapter_buf = Vec::new();
        // Mirror the shift() scan logic directly against scenario E's
        // expected command sequence.
        let tdi = BitVec::from_bytes(8, vec![0x81]);
        let tms = {
            let mut t = BitVec::zeros(8);
            t.set(7, true);
            t
        };
        // bits 0..7 are TMS=0 -> bit-mode write of the low 7 bits (0x01)
        let mut byte = 0u8;
        for i in 0..7 {
            if tdi.get(i) {
                byte |= 1 << i;
            }
        }
        MpsseAdapter::push_bit_command(&mut adapter_buf, byte, 7, false);
        MpsseAdapter::push_tms_command(&mut adapter_buf, &[tms.get(7)], tdi.get(7), false);
        assert_eq!(adapter_buf, vec![0x1B, 6, 0x01, 0x4B, 0, 0x81]);
    }
}
