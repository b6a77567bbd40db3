use crate::mem::bank::Bank;

use std::fmt::Display;

/// Failure of any public supervisor, instance or file record operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    Config(String),
    DuplicateId(String),
    NotFound(String),
    NotRunning,
    ReadOnlyViolation(Bank, u16),
    OutOfRange { bank: Bank, address: u16, value: i64 },
    Transport(String),
    Timeout(String),
    InvalidBank(String),
    FileSize { required: usize, max: usize },
    FileReadOnly(u16),
    FileDataMissing(u16),
    UnsupportedFunction(u8),
    NotConnected(String),
    Exception(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Invalid configuration: {}", e),
            Error::DuplicateId(id) => write!(f, "ID {} already exists", id),
            Error::NotFound(what) => write!(f, "{} not found", what),
            Error::NotRunning => write!(f, "Instance is not running"),
            Error::ReadOnlyViolation(bank, addr) => {
                write!(f, "Address {} of {} is read-only", addr, bank)
            }
            Error::OutOfRange {
                bank,
                address,
                value,
            } => write!(
                f,
                "Value {} out of valid range for {} address {}",
                value, bank, address
            ),
            Error::Transport(e) => write!(f, "Transport error: {}", e),
            Error::Timeout(e) => write!(f, "Timed out: {}", e),
            Error::InvalidBank(s) => write!(f, "Invalid register type: {}", s),
            Error::FileSize { required, max } => write!(
                f,
                "File record size {} exceeds maximum size of {} bytes",
                required, max
            ),
            Error::FileReadOnly(n) => write!(f, "File {} is read-only", n),
            Error::FileDataMissing(n) => write!(f, "Data of file {} is missing", n),
            Error::UnsupportedFunction(code) => {
                write!(f, "Unsupported function code {:#04X}", code)
            }
            Error::NotConnected(id) => write!(f, "Device {} is not connected", id),
            Error::Exception(e) => write!(f, "Exception response: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport(e.to_string())
    }
}
