use std::fmt;
use std::io;

use sigrelay_peer::SignalError;
use sigrelay_relay::RelayError;
use sigrelay_wire::FrameError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const NOT_FOUND: i32 = 44;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const ADDR_IN_USE: i32 = 98;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::AddrInUse => ADDR_IN_USE,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn relay_error(context: &str, err: RelayError) -> CliError {
    match err {
        RelayError::Bind { addr, source } => io_error(&format!("{context} ({addr})"), source),
        RelayError::Io(source) => io_error(context, source),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn signal_error(context: &str, err: SignalError) -> CliError {
    match err {
        SignalError::NotFound { .. } => CliError::new(NOT_FOUND, format!("{context}: {err}")),
        SignalError::Connect { source, .. } => io_error(context, source),
        SignalError::Frame(err) => frame_error(context, err),
        SignalError::Transport(_) | SignalError::ChannelFailed(_) => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        SignalError::Json(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        SignalError::UnknownChannel(_)
        | SignalError::InvalidChannelSet(_)
        | SignalError::InvalidConfig(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        SignalError::Disconnected(_) | SignalError::Closed => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}
