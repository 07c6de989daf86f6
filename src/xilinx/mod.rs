//! Xilinx 7-series JTAG configuration: spec.md §4.5.

pub mod bitfile;

use crate::adapter::Adapter;
use crate::bitvec::{bit_reverse, BitVec};
use crate::error::Result;
use crate::progress::{LogSink, ProgressSink};
use crate::tap::{TapController, TapState};

const IR_LEN: usize = 6;
const INSTR_IDCODE: u8 = 0x09;
const INSTR_BYPASS: u8 = 0x3F;
const INSTR_JPROGRAM: u8 = 0x0B;
const INSTR_CFG_IN: u8 = 0x05;
const INSTR_JSTART: u8 = 0x0C;

const CHUNK_BYTES: usize = 4096;
const POST_PROGRAM_CLOCKS: usize = 120_000;
const POST_START_CLOCKS: usize = 2_000;
const INIT_POLL_ATTEMPTS: usize = 100;
const INIT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(10);

/// A raw 32-bit JTAG IDCODE, with an optional friendly name for well-known
/// 7-series parts (log cosmetics only; an unrecognised IDCODE is not an
/// error per spec.md §7).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IdCode(pub u32);

impl IdCode {
    pub fn friendly_name(&self) -> Option<&'static str> {
        match self.0 {
            0x0362_D093 => Some("XC7A35T"),
            0x0362_F093 => Some("XC7A100T"),
            0x0365_1093 => Some("XC7K325T"),
            _ => None,
        }
    }
}

impl std::fmt::Display for IdCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.friendly_name() {
            Some(name) => write!(f, "{:#010x} ({})", self.0, name),
            None => write!(f, "{:#010x}", self.0),
        }
    }
}

/// Drives a Xilinx 7-series device's JTAG configuration sequence directly
/// on top of a `TapController`.
pub struct Xilinx7Programmer<'a, A: Adapter> {
    tap: &'a mut TapController<A>,
}

impl<'a, A: Adapter> Xilinx7Programmer<'a, A> {
    pub fn new(tap: &'a mut TapController<A>) -> Self {
        Self { tap }
    }

    /// Shift `INSTR_IDCODE` and read back the 32-bit ID register.
    pub fn read_idcode(&mut self) -> Result<IdCode> {
        self.shift_instruction(INSTR_IDCODE, TapState::Idle)?;
        let dr = self.tap.shift_dr(&BitVec::zeros(32), true)?.expect("capture requested");
        let bytes = dr.as_bytes();
        let value = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Ok(IdCode(value))
    }

    /// Programs `bitstream` (an already-stripped `.bit` payload, MSB-first
    /// per byte) onto the device, per spec.md §4.5 / §8 scenario F.
    pub fn program(&mut self, bitstream: &[u8], progress: &mut ProgressSink, log: &mut LogSink) -> Result<()> {
        log.info("resetting TAP before configuration".to_string());
        self.tap.reset()?;

        match self.read_idcode() {
            Ok(id) => log.info(format!("target IDCODE {}", id)),
            Err(e) => log.warning(format!("could not read IDCODE before programming: {}", e)),
        }

        log.info("asserting JPROGRAM".to_string());
        self.shift_instruction(INSTR_JPROGRAM, TapState::Idle)?;

        let mut init_seen = false;
        for attempt in 0..INIT_POLL_ATTEMPTS {
            let status = self.poll_bypass_status()?;
            if status & 0x01 != 0 {
                init_seen = true;
                break;
            }
            if attempt + 1 < INIT_POLL_ATTEMPTS {
                std::thread::sleep(INIT_POLL_INTERVAL);
            }
        }
        if !init_seen {
            log.warning("INIT bit not observed after JPROGRAM, continuing anyway".to_string());
        }
        progress.report(10);

        self.tap.run_test(POST_PROGRAM_CLOCKS, TapState::Idle, TapState::Idle)?;

        log.info("streaming configuration data".to_string());
        self.shift_instruction(INSTR_CFG_IN, TapState::Idle)?;

        let reversed = bit_reverse(bitstream);
        let chunks: Vec<&[u8]> = if reversed.is_empty() {
            Vec::new()
        } else {
            reversed.chunks(CHUNK_BYTES).collect()
        };
        let n = chunks.len();
        for (i, chunk) in chunks.iter().enumerate() {
            let is_last = i + 1 == n;
            self.tap.set_end_dr(if is_last { TapState::DrUpdate } else { TapState::DrShift });
            let bits = BitVec::from_bytes(chunk.len() * 8, chunk.to_vec());
            self.tap.shift_dr(&bits, false)?;
            progress.report(10 + ((i + 1) * 70 / n.max(1)) as u8);
        }
        self.tap.set_end_dr(TapState::Idle);
        self.tap.move_to(TapState::Idle)?;

        log.info("asserting JSTART".to_string());
        self.shift_instruction(INSTR_JSTART, TapState::IrUpdate)?;
        self.tap.run_test(POST_START_CLOCKS, TapState::Idle, TapState::Idle)?;
        self.tap.reset()?;

        let status = self.poll_bypass_status()?;
        if status & 0x20 == 0 {
            log.warning("DONE bit not set after JSTART".to_string());
        } else {
            log.success("FPGA configuration complete".to_string());
        }
        progress.report(100);
        Ok(())
    }

    fn shift_instruction(&mut self, opcode: u8, end_state: TapState) -> Result<()> {
        self.tap.set_end_ir(end_state);
        let bits = BitVec::from_bytes(IR_LEN, vec![opcode]);
        self.tap.shift_ir(&bits, false)?;
        Ok(())
    }

    fn poll_bypass_status(&mut self) -> Result<u8> {
        self.shift_instruction(INSTR_BYPASS, TapState::Idle)?;
        let dr = self.tap.shift_dr(&BitVec::zeros(8), true)?.expect("capture requested");
        Ok(dr.as_bytes()[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockAdapter;

    #[test]
    fn program_issues_expected_sequence() {
        let mut adapter = MockAdapter::new();
        adapter.queue_response(vec![0x12, 0x34, 0x56, 0x78]); // IDCODE
        adapter.queue_response(vec![0x21]); // BYPASS poll after JPROGRAM: INIT=1
        adapter.queue_response(vec![0x20]); // BYPASS poll after JSTART: DONE=1
        let mut tap = TapController::new(adapter);

        let mut xilinx = Xilinx7Programmer::new(&mut tap);
        let bitstream = vec![0xAAu8; 5000]; // ceil(5000/4096) = 2 chunks
        let mut progress = ProgressSink::none();
        let mut log = LogSink::none();
        xilinx.program(&bitstream, &mut progress, &mut log).unwrap();

        let toggles = tap.adapter().toggle_clock_calls.clone();
        assert!(toggles.contains(&POST_PROGRAM_CLOCKS));
        assert!(toggles.contains(&POST_START_CLOCKS));
    }

    #[test]
    fn idcode_friendly_name_for_known_part() {
        let id = IdCode(0x0362_D093);
        assert_eq!(id.friendly_name(), Some("XC7A35T"));
        let unknown = IdCode(0xDEAD_BEEF);
        assert_eq!(unknown.friendly_name(), None);
    }
}
