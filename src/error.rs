use failure_derive::Fail;

/// All the ways a JTAG/USB operation in this crate can fail.
///
/// Variants map directly onto the error kinds of the external contract:
/// USB Link failures bubble up as-is, the SVF executor and Xilinx programmer
/// decide which of these are fatal and which are warnings (see crate-level
/// docs on `svf::Executor` and `xilinx::Xilinx7Programmer`).
#[derive(Fail, Debug)]
pub enum JtagError {
    #[fail(display = "USB error: {}", _0)]
    Usb(#[cause] rusb::Error),

    #[fail(display = "USB device not available")]
    UsbUnavailable,

    #[fail(display = "No matching USB device found")]
    DeviceNotFound,

    #[fail(display = "USB device is missing the expected bulk endpoints")]
    EndpointsMissing,

    #[fail(display = "{} transfer failed: {}", direction, detail)]
    TransferFailed { direction: &'static str, detail: String },

    #[fail(display = "Operation timed out")]
    Timeout,

    #[fail(display = "SVF parse error at line {}: {}", line, detail)]
    ParseError { line: usize, detail: String },

    #[fail(display = "Unsupported SVF command: {}", cmd)]
    UnsupportedCommand { cmd: String },

    #[fail(
        display = "TDO mismatch at byte {}: got {:#04x}, expected {:#04x} (mask {:#04x})",
        byte_index, got, expected, mask
    )]
    TdoMismatch {
        byte_index: usize,
        got: u8,
        expected: u8,
        mask: u8,
    },

    #[fail(display = "Bitstream format error: {}", _0)]
    BitstreamFormatError(String),

    #[fail(display = "Unrecognised device IDCODE: {:#010x}", _0)]
    UnknownDevice(u32),

    #[fail(display = "Adapter error during {}: {}", stage, detail)]
    AdapterError { stage: &'static str, detail: String },

    #[fail(display = "This adapter does not support this operation")]
    NotSupported,

    #[fail(display = "Operation was cancelled")]
    Cancelled,
}

impl From<rusb::Error> for JtagError {
    fn from(error: rusb::Error) -> Self {
        JtagError::Usb(error)
    }
}

impl JtagError {
    /// Whether this error should still permit SRAM programming to proceed,
    /// per spec.md §7: an unrecognised IDCODE is not fatal for bit-reversal
    /// + JPROGRAM programming, which is device-independent for 7-series.
    pub fn is_unknown_device(&self) -> bool {
        matches!(self, JtagError::UnknownDevice(_))
    }
}

pub type Result<T> = std::result::Result<T, failure::Error>;
