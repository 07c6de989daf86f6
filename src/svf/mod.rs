//! SVF command model and executor: spec.md §4.4.

pub mod parser;

use crate::adapter::Adapter;
use crate::bitvec::BitVec;
use crate::error::{JtagError, Result};
use crate::progress::{LogSink, ProgressSink};
use crate::tap::{TapController, TapState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrstMode {
    On,
    Off,
    HighZ,
    Absent,
}

/// One parsed SVF command. The executor dispatches on this tag rather than
/// duck-typing a generic record (spec.md §9).
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    State(Vec<TapState>),
    EndIr(TapState),
    EndDr(TapState),
    Hir(BitVec),
    Tir(BitVec),
    Hdr(BitVec),
    Tdr(BitVec),
    Shift {
        dr: bool,
        bits: usize,
        tdi: BitVec,
        tdo: Option<BitVec>,
        mask: Option<BitVec>,
    },
    RunTest {
        run_state: TapState,
        cycles: Option<usize>,
        min_time_secs: Option<f64>,
        end_state: TapState,
    },
    Frequency(Option<f64>),
    Trst(TrstMode),
    Unknown(String),
}

/// Parse a complete SVF document into an ordered command list.
pub fn parse(input: &str) -> Result<Vec<Command>> {
    parser::parse(input).map_err(failure::Error::from)
}

/// Outcome of running a command list to completion or to the first fatal
/// error.
pub struct SvfReport {
    pub executed: usize,
    pub total: usize,
    pub error: Option<(usize, JtagError)>,
}

/// Runs parsed SVF commands against a `TapController`, reporting progress
/// and honouring a cooperative cancellation predicate (spec.md §5).
pub struct Executor;

impl Executor {
    pub fn run<A: Adapter>(
        tap: &mut TapController<A>,
        commands: &[Command],
        progress: &mut ProgressSink,
        log: &mut LogSink,
        cancel: &dyn Fn() -> bool,
    ) -> SvfReport {
        let total = commands.len();
        for (i, cmd) in commands.iter().enumerate() {
            if cancel() {
                log.warning("SVF execution cancelled".to_string());
                let _ = tap.move_to(TapState::Reset);
                return SvfReport { executed: i, total, error: Some((i, JtagError::Cancelled)) };
            }

            if let Err(e) = execute_one(tap, cmd, log) {
                let jtag_err = to_jtag_error(e);
                log.error(format!("SVF command {} failed: {}", i, jtag_err));
                return SvfReport { executed: i, total, error: Some((i, jtag_err)) };
            }

            progress.report((((i + 1) * 100) / total.max(1)) as u8);
        }
        SvfReport { executed: total, total, error: None }
    }
}

fn execute_one<A: Adapter>(
    tap: &mut TapController<A>,
    cmd: &Command,
    log: &mut LogSink,
) -> Result<()> {
    match cmd {
        Command::State(path) => {
            let target = *path.last().expect("parser guarantees non-empty STATE path");
            tap.move_to(target)?;
        }
        Command::EndIr(s) => tap.set_end_ir(*s),
        Command::EndDr(s) => tap.set_end_dr(*s),
        Command::Hir(v) => tap.set_hir(v.clone()),
        Command::Tir(v) => tap.set_tir(v.clone()),
        Command::Hdr(v) => tap.set_hdr(v.clone()),
        Command::Tdr(v) => tap.set_tdr(v.clone()),
        Command::Shift { dr, tdi, tdo, mask, .. } => {
            let capture = tdo.is_some();
            let captured = if *dr { tap.shift_dr(tdi, capture)? } else { tap.shift_ir(tdi, capture)? };
            if let (Some(expected), Some(got)) = (tdo, captured) {
                verify_tdo(expected, &got, mask.as_ref())?;
            }
        }
        Command::RunTest { run_state, cycles, end_state, .. } => {
            tap.run_test(cycles.unwrap_or(0), *run_state, *end_state)?;
        }
        Command::Frequency(hz) => {
            if let Some(hz) = hz {
                log.info(format!("FREQUENCY {} Hz recorded, not enforced", hz));
            }
        }
        Command::Trst(mode) => {
            log.info(format!("TRST {:?} (no-op on this adapter)", mode));
        }
        Command::Unknown(kw) => {
            log.warning(format!("unrecognised SVF command {:?}, skipping", kw));
        }
    }
    Ok(())
}

fn verify_tdo(expected: &BitVec, got: &BitVec, mask: Option<&BitVec>) -> Result<()> {
    for byte_index in 0..expected.as_bytes().len() {
        let mask_byte = mask.map(|m| m.as_bytes()[byte_index]).unwrap_or(0xFF);
        let e = expected.as_bytes()[byte_index] & mask_byte;
        let g = got.as_bytes()[byte_index] & mask_byte;
        if e != g {
            return Err(JtagError::TdoMismatch { byte_index, got: g, expected: e, mask: mask_byte }.into());
        }
    }
    Ok(())
}

fn to_jtag_error(e: failure::Error) -> JtagError {
    match e.downcast::<JtagError>() {
        Ok(je) => je,
        Err(e) => JtagError::AdapterError { stage: "svf", detail: e.to_string() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockAdapter;

    #[test]
    fn executes_state_endir_sir_in_order() {
        let mut tap = TapController::new(MockAdapter::new());
        let commands = parse("STATE RESET;\nENDIR IDLE;\nSIR 8 TDI(FF);\n").unwrap();
        let mut progress = ProgressSink::none();
        let mut log = LogSink::none();
        let report = Executor::run(&mut tap, &commands, &mut progress, &mut log, &|| false);
        assert_eq!(report.executed, 3);
        assert!(report.error.is_none());
        assert_eq!(tap.end_ir(), TapState::Idle);
        assert_eq!(tap.state(), TapState::Idle);
    }

    #[test]
    fn tdo_mismatch_is_fatal_and_reported() {
        let mut adapter = MockAdapter::new();
        adapter.queue_response(vec![0x00]);
        let mut tap = TapController::new(adapter);
        let commands = parse("SDR 8 TDI(FF) TDO(FF);\n").unwrap();
        let mut progress = ProgressSink::none();
        let mut log = LogSink::none();
        let report = Executor::run(&mut tap, &commands, &mut progress, &mut log, &|| false);
        assert_eq!(report.executed, 0);
        match report.error {
            Some((0, JtagError::TdoMismatch { .. })) => {}
            other => panic!("expected TdoMismatch at command 0, got {:?}", other.map(|(i, e)| (i, e.to_string()))),
        }
    }

    #[test]
    fn unknown_command_is_skipped_not_fatal() {
        let mut tap = TapController::new(MockAdapter::new());
        let commands = parse("PIO 0101;\nSTATE IDLE;\n").unwrap();
        let mut progress = ProgressSink::none();
        let mut log = LogSink::none();
        let report = Executor::run(&mut tap, &commands, &mut progress, &mut log, &|| false);
        assert_eq!(report.executed, 2);
        assert!(report.error.is_none());
    }

    #[test]
    fn cancellation_stops_before_next_command() {
        let mut tap = TapController::new(MockAdapter::new());
        let commands = parse("STATE IDLE;\nSTATE IDLE;\nSTATE IDLE;\n").unwrap();
        let mut progress = ProgressSink::none();
        let mut log = LogSink::none();
        let calls = std::cell::Cell::new(0);
        let cancel = || {
            calls.set(calls.get() + 1);
            calls.get() > 1
        };
        let report = Executor::run(&mut tap, &commands, &mut progress, &mut log, &cancel);
        assert_eq!(report.executed, 1);
        assert!(matches!(report.error, Some((1, JtagError::Cancelled))));
    }
}
