pub mod manager;

pub use manager::DeviceManager;

use crate::config::{DeviceConfig, TransportConfig};
use crate::error::Error;
use crate::mem::bank::Bank;
use crate::msg::{LogSink, Logger};
use crate::net::rtu;
use crate::util::to_hex_str;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::error::Elapsed;
use tokio::time::timeout;
use tokio_modbus::client::{self as modbus, Context};
use tokio_modbus::prelude::{Client, Reader, Slave, Writer};
use tokio_modbus::FunctionCode;

/// Client connection to one remote slave
///
/// Every request is bounded by the configured timeout. A failed request leaves the connection in
/// place and is recorded as the last error.
pub struct ModbusDevice {
    config: DeviceConfig,
    context: Option<Context>,
    last_error: Option<Error>,
    log: Logger,
}

impl ModbusDevice {
    pub fn new(config: DeviceConfig, sink: Arc<dyn LogSink>) -> Result<Self, Error> {
        config.validate()?;
        let log = Logger::new(&config.device_id, sink);
        Ok(Self {
            config,
            context: None,
            last_error: None,
            log,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.device_id
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.context.is_some()
    }

    pub fn last_error(&self) -> Option<Error> {
        self.last_error.clone()
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    /// Open the connection, a connected device is left as is
    pub async fn connect(&mut self) -> Result<(), Error> {
        if self.context.is_some() {
            return Ok(());
        }
        let slave = Slave(self.config.unit);
        let res = match &self.config.transport {
            TransportConfig::Tcp(c) => {
                let addr = c.socket_addr()?;
                let connecting = modbus::tcp::connect_slave(addr, slave);
                match timeout(self.timeout(), connecting).await {
                    Ok(Ok(context)) => Ok(context),
                    Ok(Err(e)) => Err(Error::Transport(format!(
                        "Failed to connect to {} ({})",
                        addr, e
                    ))),
                    Err(_) => Err(Error::Timeout(format!("connect to {}", addr))),
                }
            }
            TransportConfig::Rtu(c) => rtu::open(c).map(|s| modbus::rtu::attach_slave(s, slave)),
        };
        match res {
            Ok(context) => {
                self.context = Some(context);
                self.last_error = None;
                self.log.ok(&format!("Connected to {}", self.config.transport));
                Ok(())
            }
            Err(e) => {
                self.log.err(&format!("Connection failed: {}", e));
                self.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Close the connection, a disconnected device is left as is
    pub async fn disconnect(&mut self) -> Result<(), Error> {
        let Some(mut context) = self.context.take() else {
            return Ok(());
        };
        match context.disconnect().await {
            Ok(()) => {
                self.log.ok("Disconnected");
                Ok(())
            }
            Err(e) => {
                let e = Error::from(e);
                self.log.warn(&format!("Disconnect incomplete: {}", e));
                Err(e)
            }
        }
    }

    fn context(&mut self) -> Result<&mut Context, Error> {
        self.context
            .as_mut()
            .ok_or_else(|| Error::NotConnected(self.config.device_id.clone()))
    }

    /// Flatten a bounded request result, logging and recording failures
    fn finish<T>(
        &mut self,
        fc: FunctionCode,
        res: Result<tokio_modbus::Result<T>, Elapsed>,
    ) -> Result<T, Error> {
        let e = match res {
            Ok(Ok(Ok(v))) => return Ok(v),
            Ok(Ok(Err(code))) => Error::Exception(format!("function {} ({})", fc, code)),
            Ok(Err(e)) => Error::Transport(e.to_string()),
            Err(_) => Error::Timeout(format!("function {}", fc)),
        };
        self.log.warn(&format!("Request failed: {}", e));
        self.last_error = Some(e.clone());
        Err(e)
    }

    /// FC 1
    pub async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>, Error> {
        let limit = self.timeout();
        let res = timeout(limit, self.context()?.read_coils(address, count)).await;
        self.finish(FunctionCode::ReadCoils, res)
    }

    /// FC 2
    pub async fn read_discrete_inputs(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, Error> {
        let limit = self.timeout();
        let res = timeout(limit, self.context()?.read_discrete_inputs(address, count)).await;
        self.finish(FunctionCode::ReadDiscreteInputs, res)
    }

    /// FC 3
    pub async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, Error> {
        let limit = self.timeout();
        let res = timeout(limit, self.context()?.read_holding_registers(address, count)).await;
        self.finish(FunctionCode::ReadHoldingRegisters, res)
    }

    /// FC 4
    pub async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, Error> {
        let limit = self.timeout();
        let res = timeout(limit, self.context()?.read_input_registers(address, count)).await;
        self.finish(FunctionCode::ReadInputRegisters, res)
    }

    /// Read any bank, bits are returned as 0 or 1
    pub async fn read(&mut self, bank: Bank, address: u16, count: u16) -> Result<Vec<u16>, Error> {
        let bits = |v: Vec<bool>| v.into_iter().map(u16::from).collect::<Vec<u16>>();
        let values = match bank {
            Bank::Coil => self.read_coils(address, count).await.map(bits)?,
            Bank::DiscreteInput => self.read_discrete_inputs(address, count).await.map(bits)?,
            Bank::HoldingRegister => self.read_holding_registers(address, count).await?,
            Bank::InputRegister => self.read_input_registers(address, count).await?,
        };
        self.log.info(&format!(
            "Read {} at {} = {}",
            bank,
            address,
            to_hex_str(&values)
        ));
        Ok(values)
    }

    /// FC 5
    pub async fn write_single_coil(&mut self, address: u16, value: bool) -> Result<(), Error> {
        let limit = self.timeout();
        let res = timeout(limit, self.context()?.write_single_coil(address, value)).await;
        self.finish(FunctionCode::WriteSingleCoil, res)
    }

    /// FC 6
    pub async fn write_single_register(&mut self, address: u16, value: u16) -> Result<(), Error> {
        let limit = self.timeout();
        let res = timeout(limit, self.context()?.write_single_register(address, value)).await;
        self.finish(FunctionCode::WriteSingleRegister, res)
    }

    /// FC 15
    pub async fn write_multiple_coils(
        &mut self,
        address: u16,
        values: &[bool],
    ) -> Result<(), Error> {
        let limit = self.timeout();
        let res = timeout(limit, self.context()?.write_multiple_coils(address, values)).await;
        self.finish(FunctionCode::WriteMultipleCoils, res)
    }

    /// FC 16
    pub async fn write_multiple_registers(
        &mut self,
        address: u16,
        values: &[u16],
    ) -> Result<(), Error> {
        let limit = self.timeout();
        let res = timeout(limit, self.context()?.write_multiple_registers(address, values)).await;
        self.finish(FunctionCode::WriteMultipleRegisters, res)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::ModbusDevice;
    use crate::config::{DeviceConfig, RtuConfig, TcpConfig, TransportConfig};
    use crate::error::Error;
    use crate::instance::tests::{free_port, local, wait_for};
    use crate::instance::{Instance, State};
    use crate::mem::bank::Bank;
    use crate::msg::{NoListener, NoLog};
    use crate::point::RegisterPoint;
    use std::sync::Arc;

    pub fn remote(id: &str, port: u16) -> DeviceConfig {
        let mut config = DeviceConfig::new(
            id,
            id,
            TransportConfig::Tcp(TcpConfig {
                host: Some(str!("127.0.0.1")),
                port: Some(port),
            }),
        );
        config.timeout_ms = 1000;
        config
    }

    /// Running slave on a free local port with a guarded holding register at 5
    pub fn serving(id: &str) -> (Instance, u16) {
        let port = free_port();
        let mut config = local(id, port);
        config.points = vec![
            RegisterPoint::new(5, "temp", Bank::HoldingRegister, 42)
                .with_bounds(Some(0.0), Some(100.0)),
            RegisterPoint::new(2, "run", Bank::Coil, 1),
        ];
        let instance = Instance::new(config, Arc::new(NoLog), Arc::new(NoListener)).unwrap();
        instance.start().unwrap();
        assert!(wait_for(&instance, State::Running));
        (instance, port)
    }

    #[tokio::test]
    async fn ut_device_reads_and_writes() {
        let (slave, port) = serving("remote");
        let mut device = ModbusDevice::new(remote("plc", port), Arc::new(NoLog)).unwrap();
        assert!(!device.is_connected());
        device.connect().await.unwrap();
        assert!(device.is_connected());

        assert_eq!(device.read_holding_registers(4, 2).await, Ok(vec![0, 42]));
        assert_eq!(device.read_coils(1, 2).await, Ok(vec![false, true]));
        assert_eq!(device.read_input_registers(0, 1).await, Ok(vec![0]));
        assert_eq!(device.read_discrete_inputs(0, 1).await, Ok(vec![false]));

        device.write_single_register(5, 77).await.unwrap();
        device.write_multiple_registers(10, &[1, 2, 3]).await.unwrap();
        device.write_single_coil(2, false).await.unwrap();
        device.write_multiple_coils(3, &[true, true]).await.unwrap();
        assert_eq!(slave.read_register(Bank::HoldingRegister, 5), Ok(77));
        assert_eq!(slave.read_register(Bank::HoldingRegister, 12), Ok(3));
        assert_eq!(slave.read_register(Bank::Coil, 2), Ok(0));
        assert_eq!(slave.read_register(Bank::Coil, 4), Ok(1));
        assert_eq!(device.read(Bank::Coil, 2, 3).await, Ok(vec![0, 1, 1]));

        device.disconnect().await.unwrap();
        assert!(!device.is_connected());
        assert_eq!(device.disconnect().await, Ok(()));
        slave.stop().unwrap();
    }

    #[tokio::test]
    async fn ut_device_exception_response() {
        let (slave, port) = serving("strict");
        let mut device = ModbusDevice::new(remote("plc", port), Arc::new(NoLog)).unwrap();
        device.connect().await.unwrap();

        assert!(matches!(
            device.write_single_register(5, 150).await,
            Err(Error::Exception(_))
        ));
        assert!(matches!(device.last_error(), Some(Error::Exception(_))));
        assert!(matches!(
            device.read_holding_registers(5000, 1).await,
            Err(Error::Exception(_))
        ));
        assert!(device.is_connected());
        assert_eq!(slave.read_register(Bank::HoldingRegister, 5), Ok(42));
        slave.stop().unwrap();
    }

    #[tokio::test]
    async fn ut_device_not_connected() {
        let port = free_port();
        let mut device = ModbusDevice::new(remote("idle", port), Arc::new(NoLog)).unwrap();
        assert_eq!(
            device.read_holding_registers(0, 1).await,
            Err(Error::NotConnected(str!("idle")))
        );
        assert!(device.connect().await.is_err());
        assert!(!device.is_connected());
        assert!(device.last_error().is_some());
    }

    #[test]
    fn ut_device_rejects_invalid_config() {
        let config = DeviceConfig::new("x", "X", TransportConfig::Tcp(TcpConfig::default()));
        assert!(matches!(
            ModbusDevice::new(config, Arc::new(NoLog)),
            Err(Error::Config(_))
        ));
        let config = DeviceConfig::new("y", "Y", TransportConfig::Rtu(RtuConfig::default()));
        assert!(ModbusDevice::new(config, Arc::new(NoLog)).is_err());
    }
}
