use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;

use jtagctl::adapter::legacy::LegacyAdapter;
use jtagctl::adapter::mpsse::MpsseAdapter;
use jtagctl::tap::TapController;
use jtagctl::usb::DeviceSelector;
use jtagctl::xilinx::{bitfile, Xilinx7Programmer};
use jtagctl::{svf, LogLevel, LogSink, ProgressSink};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Cable {
    /// Altera USB-Blaster / FT245 bit-bang adapters.
    Legacy,
    /// FT2232H/FT232H MPSSE adapters.
    Mpsse,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum InputFormat {
    Svf,
    Bit,
}

/// Program an FPGA over JTAG via a USB-Blaster or FTDI MPSSE cable.
#[derive(Parser, Debug)]
#[command(name = "jtagctl", version, about)]
struct Args {
    /// JTAG cable type attached to the host.
    #[arg(long, value_enum)]
    cable: Cable,

    /// SVF playback file or Xilinx .bit bitstream.
    input: PathBuf,

    /// Override input format detection (otherwise inferred from extension).
    #[arg(long, value_enum)]
    format: Option<InputFormat>,

    /// Select the Nth matching USB device (0-based) when more than one cable
    /// is attached.
    #[arg(long, conflicts_with = "serial")]
    index: Option<usize>,

    /// Select the USB device with this serial number.
    #[arg(long, conflicts_with = "index")]
    serial: Option<String>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output but errors.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn infer_format(args: &Args) -> Result<InputFormat, String> {
    if let Some(fmt) = args.format {
        return Ok(fmt);
    }
    match args.input.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("svf") => Ok(InputFormat::Svf),
        Some(ext) if ext.eq_ignore_ascii_case("bit") => Ok(InputFormat::Bit),
        _ => Err(format!(
            "cannot infer format from {:?}; pass --format explicitly",
            args.input
        )),
    }
}

fn selector(args: &Args) -> DeviceSelector {
    if let Some(index) = args.index {
        DeviceSelector::Index(index)
    } else if let Some(serial) = &args.serial {
        DeviceSelector::Serial(serial.clone())
    } else {
        DeviceSelector::First
    }
}

fn level_filter(args: &Args) -> LevelFilter {
    if args.quiet {
        LevelFilter::Error
    } else {
        match args.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

fn run(args: Args) -> jtagctl::Result<()> {
    let bar = if args.quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        bar
    };

    let quiet = args.quiet;
    let bar_for_progress = bar.clone();
    let mut progress = ProgressSink::new(move |percent| bar_for_progress.set_position(percent as u64));
    let mut log = LogSink::new(move |level, message| {
        if quiet && level != LogLevel::Error {
            return;
        }
        match level {
            LogLevel::Info => log::info!("{}", message),
            LogLevel::Warning => log::warn!("{}", message),
            LogLevel::Error => log::error!("{}", message),
            LogLevel::Success => log::info!("{}", message),
        }
    });

    let format = infer_format(&args).map_err(|detail| jtagctl::JtagError::UnsupportedCommand { cmd: detail })?;
    let sel = selector(&args);
    let data = fs::read(&args.input)?;

    match args.cable {
        Cable::Legacy => {
            let adapter = LegacyAdapter::new(&sel, &mut log)?;
            let mut tap = TapController::new(adapter);
            run_with_tap(&mut tap, format, &data, &mut progress, &mut log)
        }
        Cable::Mpsse => {
            let adapter = MpsseAdapter::new(&sel, &mut log)?;
            let mut tap = TapController::new(adapter);
            run_with_tap(&mut tap, format, &data, &mut progress, &mut log)
        }
    }?;

    bar.finish_with_message("done");
    Ok(())
}

fn run_with_tap<A: jtagctl::adapter::Adapter>(
    tap: &mut TapController<A>,
    format: InputFormat,
    data: &[u8],
    progress: &mut ProgressSink,
    log: &mut LogSink,
) -> jtagctl::Result<()> {
    match format {
        InputFormat::Svf => {
            let text = std::str::from_utf8(data)
                .map_err(|e| jtagctl::JtagError::ParseError { line: 0, detail: e.to_string() })?;
            let commands = svf::parse(text)?;
            let cancel = || false;
            let report = svf::Executor::run(tap, &commands, progress, log, &cancel);
            if let Some((line, error)) = report.error {
                log.error(format!("SVF command {} failed: {}", line, error));
                return Err(error.into());
            }
            log.success(format!("executed {}/{} SVF commands", report.executed, report.total));
            Ok(())
        }
        InputFormat::Bit => {
            let bit_file = bitfile::parse(data)?;
            if let Some(design) = &bit_file.design_name {
                log.info(format!("design: {}", design));
            }
            if let Some(device) = &bit_file.device_name {
                log.info(format!("target device: {}", device));
            }
            let mut xilinx = Xilinx7Programmer::new(tap);
            xilinx.program(&bit_file.data, progress, log)
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    env_logger::Builder::new().filter_level(level_filter(&args)).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
