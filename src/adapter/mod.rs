//! The `Adapter` trait and its two wire-level implementations: spec.md §4.2.
//!
//! An adapter's job is narrow and mechanical: given TMS/TDI bits (optionally
//! requesting TDO capture) or a cycle count, encode the bytes its hardware
//! wants and push them through a `UsbLink`. It never inspects or tracks TAP
//! state — that's the `TapController`'s job (spec.md §3's "Adapter code
//! never observes or mutates TAP state directly").

pub mod legacy;
pub mod mpsse;

use crate::bitvec::BitVec;
use crate::error::Result;

/// Wire-level JTAG adapter, implemented once per supported hardware family.
pub trait Adapter {
    /// Clock `tdi.len()` TCK edges. On edge `i`, present `tdi[i]` and
    /// `tms[i]`. `tdi` and `tms` must have equal length. If `capture`,
    /// return that many bits of TDO sampled on the appropriate clock edge.
    fn shift(&mut self, tdi: &BitVec, tms: &BitVec, capture: bool) -> Result<Option<BitVec>>;

    /// Optimised write-only path for runs where TMS=0 on every bit except
    /// the last, which is TMS=1 (i.e. stay in a SHIFT state for
    /// `n_bits - 1` bits, then exit). `tdi` is `ceil(n_bits/8)` bytes,
    /// LSB-first within each byte.
    fn shift_bytes(&mut self, tdi: &[u8], n_bits: usize) -> Result<()>;

    /// Clock `cycles` TCK edges with TMS=0, TDI=0. No capture.
    fn toggle_clock(&mut self, cycles: usize) -> Result<()>;
}

/// A fake `Adapter` used in unit tests of `TapController`, `svf::Executor`
/// and `xilinx::Xilinx7Programmer`. Records every call it receives and
/// replies to capturing shifts from a canned queue of responses (all-zero
/// if the queue is empty), so tests can assert on both the TMS path the TAP
/// engine generated and the response data it claims to have received.
#[cfg(test)]
pub struct MockAdapter {
    pub shifts: Vec<(Vec<u8>, Vec<bool>, bool)>,
    pub shift_bytes_calls: Vec<(Vec<u8>, usize)>,
    pub toggle_clock_calls: Vec<usize>,
    pub responses: std::collections::VecDeque<Vec<u8>>,
}

#[cfg(test)]
impl MockAdapter {
    pub fn new() -> Self {
        Self {
            shifts: Vec::new(),
            shift_bytes_calls: Vec::new(),
            toggle_clock_calls: Vec::new(),
            responses: std::collections::VecDeque::new(),
        }
    }

    /// Queue a response (LSB-first packed bytes) for the next capturing
    /// `shift` call.
    pub fn queue_response(&mut self, bytes: Vec<u8>) {
        self.responses.push_back(bytes);
    }
}

#[cfg(test)]
impl Adapter for MockAdapter {
    fn shift(&mut self, tdi: &BitVec, tms: &BitVec, capture: bool) -> Result<Option<BitVec>> {
        assert_eq!(tdi.len(), tms.len());
        let tms_bits: Vec<bool> = tms.iter().collect();
        self.shifts.push((tdi.as_bytes().to_vec(), tms_bits, capture));
        if capture {
            let bytes = self
                .responses
                .pop_front()
                .unwrap_or_else(|| vec![0u8; crate::bitvec::bytes_for_bits(tdi.len())]);
            Ok(Some(BitVec::from_bytes(tdi.len(), bytes)))
        } else {
            Ok(None)
        }
    }

    fn shift_bytes(&mut self, tdi: &[u8], n_bits: usize) -> Result<()> {
        self.shift_bytes_calls.push((tdi.to_vec(), n_bits));
        Ok(())
    }

    fn toggle_clock(&mut self, cycles: usize) -> Result<()> {
        self.toggle_clock_calls.push(cycles);
        Ok(())
    }
}
