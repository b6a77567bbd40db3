#[macro_use]
pub mod util;

pub mod config;
pub mod device;
pub mod error;
pub mod file;
pub mod instance;
pub mod mem;
pub mod msg;
pub mod net;
pub mod point;
pub mod supervisor;

pub use config::{DeviceConfig, SlaveConfig, SupervisorConfig, TransportConfig};
pub use device::{DeviceManager, ModbusDevice};
pub use error::Error;
pub use instance::{Instance, PointValue, State};
pub use mem::Bank;
pub use msg::{Level, LogMsg, LogSink, NoListener, NoLog, ValueListener};
pub use point::RegisterPoint;
pub use supervisor::Supervisor;
