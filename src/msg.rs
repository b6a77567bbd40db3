use crate::mem::bank::Bank;

use chrono::Local;
use std::fmt::Display;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Info,
    Warning,
    Error,
    Success,
}

impl Display for Level {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Info => fmt.pad("INFO"),
            Level::Warning => fmt.pad("WARNING"),
            Level::Error => fmt.pad("ERROR"),
            Level::Success => fmt.pad("SUCCESS"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Message {
    pub timestamp: String,
    pub message: String,
}

impl Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} - {}", self.timestamp, self.message)
    }
}

#[derive(Clone, Debug)]
pub struct LogMsg {
    pub level: Level,
    pub message: Message,
}

impl LogMsg {
    pub fn new(level: Level, msg: &str) -> LogMsg {
        Self {
            level,
            message: Message {
                timestamp: format!("{}", Local::now().format("[ %d:%m:%Y | %H:%M:%S ]")),
                message: str!(msg),
            },
        }
    }

    pub fn info(msg: &str) -> LogMsg {
        Self::new(Level::Info, msg)
    }

    pub fn warn(msg: &str) -> LogMsg {
        Self::new(Level::Warning, msg)
    }

    pub fn err(msg: &str) -> LogMsg {
        Self::new(Level::Error, msg)
    }

    pub fn ok(msg: &str) -> LogMsg {
        Self::new(Level::Success, msg)
    }

    pub fn timestamp(&self) -> String {
        self.message.timestamp.clone()
    }

    pub fn text(&self) -> &str {
        &self.message.message
    }
}

impl Display for LogMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} - {:<7} {}",
            self.message.timestamp, self.level, self.message.message
        )
    }
}

/// Receiver of all log messages emitted by the supervisor and its instances
pub trait LogSink: Send + Sync {
    fn log(&self, msg: LogMsg);
}

impl<F> LogSink for F
where
    F: Fn(LogMsg) + Send + Sync,
{
    fn log(&self, msg: LogMsg) {
        self(msg)
    }
}

/// Sink dropping every message
pub struct NoLog;

impl LogSink for NoLog {
    fn log(&self, _msg: LogMsg) {}
}

/// Observer of every successful register write
pub trait ValueListener: Send + Sync {
    fn value_changed(&self, bank: Bank, address: u16, value: u16);
}

impl<F> ValueListener for F
where
    F: Fn(Bank, u16, u16) + Send + Sync,
{
    fn value_changed(&self, bank: Bank, address: u16, value: u16) {
        self(bank, address, value)
    }
}

pub struct NoListener;

impl ValueListener for NoListener {
    fn value_changed(&self, _bank: Bank, _address: u16, _value: u16) {}
}

/// Named handle to a log sink. Each message is prefixed with the owner's name and a panicking
/// sink never takes the caller down with it.
#[derive(Clone)]
pub struct Logger {
    name: String,
    sink: Arc<dyn LogSink>,
}

impl Logger {
    pub fn new(name: &str, sink: Arc<dyn LogSink>) -> Self {
        Self {
            name: str!(name),
            sink,
        }
    }

    pub fn log(&self, level: Level, msg: &str) {
        let msg = LogMsg::new(level, &format!("[{}] {}", self.name, msg));
        let _ = catch_unwind(AssertUnwindSafe(|| self.sink.log(msg)));
    }

    pub fn info(&self, msg: &str) {
        self.log(Level::Info, msg)
    }

    pub fn warn(&self, msg: &str) {
        self.log(Level::Warning, msg)
    }

    pub fn err(&self, msg: &str) {
        self.log(Level::Error, msg)
    }

    pub fn ok(&self, msg: &str) {
        self.log(Level::Success, msg)
    }
}
