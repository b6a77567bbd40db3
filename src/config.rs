use crate::error::Error;
use crate::point::RegisterPoint;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Write};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 502;
pub const DEFAULT_BANK_SIZE: usize = 1000;
pub const DEFAULT_MAX_FILE_SIZE: usize = 65535;

fn default_bank_size() -> usize {
    DEFAULT_BANK_SIZE
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_device_address() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_max_size() -> usize {
    DEFAULT_MAX_FILE_SIZE
}

fn default_length_function() -> u8 {
    0x03
}

fn default_length_quantity() -> u16 {
    2
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum FileType {
    Toml,
    Json,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct TcpConfig {
    /// The interface to bind to, all interfaces if not set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// The port to listen on, 502 if not set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl TcpConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, Error> {
        let host = self.host.as_deref().unwrap_or(DEFAULT_HOST);
        let port = self.port.unwrap_or(DEFAULT_PORT);
        format!("{}:{}", host, port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid bind address {}:{} ({})", host, port, e)))
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RtuConfig {
    /// The device path to use for communication.
    #[serde(default)]
    pub path: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_data_bits")]
    pub data_bits: u8,

    #[serde(default)]
    pub parity: Parity,

    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
}

impl Default for RtuConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: Parity::default(),
            stop_bits: default_stop_bits(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Tcp(TcpConfig),
    Rtu(RtuConfig),
}

impl TransportConfig {
    /// Check the descriptor before any worker is launched
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            TransportConfig::Tcp(tcp) => tcp.socket_addr().map(|_| ()),
            TransportConfig::Rtu(rtu) => {
                if rtu.path.trim().is_empty() {
                    return Err(Error::Config(str!("RTU mode requires a serial port path")));
                }
                if !(5..=8).contains(&rtu.data_bits) {
                    return Err(Error::Config(format!(
                        "Invalid data bits {} (expected 5 to 8)",
                        rtu.data_bits
                    )));
                }
                if rtu.stop_bits != 1 && rtu.stop_bits != 2 {
                    return Err(Error::Config(format!(
                        "Invalid stop bits {} (expected 1 or 2)",
                        rtu.stop_bits
                    )));
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportConfig::Tcp(tcp) => write!(
                f,
                "TCP {}:{}",
                tcp.host.as_deref().unwrap_or(DEFAULT_HOST),
                tcp.port.unwrap_or(DEFAULT_PORT)
            ),
            TransportConfig::Rtu(rtu) => write!(f, "RTU {} ({} baud)", rtu.path, rtu.baud_rate),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankSizes {
    #[serde(default = "default_bank_size")]
    pub coils: usize,
    #[serde(default = "default_bank_size")]
    pub discrete_inputs: usize,
    #[serde(default = "default_bank_size")]
    pub holding_registers: usize,
    #[serde(default = "default_bank_size")]
    pub input_registers: usize,
}

impl Default for BankSizes {
    fn default() -> Self {
        Self {
            coils: DEFAULT_BANK_SIZE,
            discrete_inputs: DEFAULT_BANK_SIZE,
            holding_registers: DEFAULT_BANK_SIZE,
            input_registers: DEFAULT_BANK_SIZE,
        }
    }
}

/// Register access performed before a file record is read
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Write the file number into the holding register at the trigger address
    WriteRegister,
    /// Read the holding register at the trigger address
    ReadHoldingRegister,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerConfig {
    pub kind: TriggerKind,
    pub address: u16,
}

/// Registers holding the byte length of a file record
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthRegisterConfig {
    /// Read function used to access the registers, `0x03` or `0x04`
    #[serde(default = "default_length_function")]
    pub function_code: u8,
    pub address: u16,
    #[serde(default = "default_length_quantity")]
    pub quantity: u16,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FileRecordConfig {
    pub file_number: u16,
    pub file_path: PathBuf,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// Fixed number of bytes returned by a read, takes precedence over the length register
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length_register: Option<LengthRegisterConfig>,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub description: String,
}

impl FileRecordConfig {
    pub fn new(file_number: u16, file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_number,
            file_path: file_path.into(),
            max_size: DEFAULT_MAX_FILE_SIZE,
            file_length: None,
            trigger: None,
            length_register: None,
            read_only: false,
            description: String::new(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SlaveConfig {
    pub slave_id: String,
    pub name: String,
    pub transport: TransportConfig,
    #[serde(default = "default_device_address")]
    pub device_address: u8,
    #[serde(default)]
    pub sizes: BankSizes,
    #[serde(default)]
    pub points: Vec<RegisterPoint>,
    #[serde(default)]
    pub files: Vec<FileRecordConfig>,
    #[serde(default = "default_true")]
    pub file_operations: bool,
}

impl SlaveConfig {
    pub fn new(slave_id: &str, name: &str, transport: TransportConfig) -> Self {
        Self {
            slave_id: str!(slave_id),
            name: str!(name),
            transport,
            device_address: default_device_address(),
            sizes: BankSizes::default(),
            points: vec![],
            files: vec![],
            file_operations: true,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.slave_id.trim().is_empty() {
            return Err(Error::Config(str!("Slave ID must not be empty")));
        }
        if !(1..=247).contains(&self.device_address) {
            return Err(Error::Config(format!(
                "Invalid device address {} (expected 1 to 247)",
                self.device_address
            )));
        }
        self.transport.validate()?;

        let mut numbers = HashSet::new();
        for file in self.files.iter() {
            if !numbers.insert(file.file_number) {
                return Err(Error::Config(format!(
                    "File number {} configured more than once",
                    file.file_number
                )));
            }
            if let Some(length) = file.length_register {
                if !(1..=4).contains(&length.quantity) {
                    return Err(Error::Config(format!(
                        "File {}: invalid length register quantity {} (expected 1 to 4)",
                        file.file_number, length.quantity
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Remote slave polled by a `ModbusDevice`
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub device_id: String,
    pub name: String,
    /// Remote host and port or local serial line, the host is required for TCP
    pub transport: TransportConfig,
    /// Unit id put into every request
    #[serde(default = "default_device_address")]
    pub unit: u8,
    /// Bound on connecting and on every request
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl DeviceConfig {
    pub fn new(device_id: &str, name: &str, transport: TransportConfig) -> Self {
        Self {
            device_id: str!(device_id),
            name: str!(name),
            transport,
            unit: default_device_address(),
            timeout_ms: default_timeout_ms(),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.device_id.trim().is_empty() {
            return Err(Error::Config(str!("Device ID must not be empty")));
        }
        if let TransportConfig::Tcp(tcp) = &self.transport {
            if tcp.host.as_deref().map_or(true, |h| h.trim().is_empty()) {
                return Err(Error::Config(str!("TCP mode requires a host address")));
            }
        }
        self.transport.validate()
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub slaves: Vec<SlaveConfig>,
}

impl SupervisorConfig {
    /// Read slave configuration from a JSON or TOML file
    pub fn read(path: &str) -> anyhow::Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        if let Ok(c) = serde_json::from_reader(reader) {
            Ok(c)
        } else {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content).map_err(|e| e.into())
        }
    }

    pub fn write(&self, path: &str, file_type: FileType) -> anyhow::Result<()> {
        let content = match file_type {
            FileType::Toml => toml::to_string(self)?,
            FileType::Json => serde_json::to_string_pretty(self)?,
        };
        let mut file = File::create(path)?;
        write!(file, "{}", content)?;
        Ok(())
    }
}
