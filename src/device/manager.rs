use crate::config::DeviceConfig;
use crate::device::ModbusDevice;
use crate::error::Error;
use crate::msg::{LogSink, Logger, NoLog};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type SharedDevice = Arc<tokio::sync::Mutex<ModbusDevice>>;

/// Registry of client connections keyed by device id
///
/// The registry lock is never held across a request, each device serializes its own requests.
pub struct DeviceManager {
    devices: Mutex<HashMap<String, SharedDevice>>,
    sink: Arc<dyn LogSink>,
    log: Logger,
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new(Arc::new(NoLog))
    }
}

impl DeviceManager {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            log: Logger::new("devices", sink.clone()),
            sink,
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, SharedDevice>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, id: &str) -> Result<SharedDevice, Error> {
        self.get(id).ok_or_else(|| Error::NotFound(format!("Device {}", id)))
    }

    /// Register a device, disconnected until `connect()` is called
    pub fn add(&self, config: DeviceConfig) -> Result<SharedDevice, Error> {
        let id = config.device_id.clone();
        let device = ModbusDevice::new(config, self.sink.clone())?;
        let mut registry = self.registry();
        if registry.contains_key(&id) {
            return Err(Error::DuplicateId(id));
        }
        let device = Arc::new(tokio::sync::Mutex::new(device));
        registry.insert(id.clone(), device.clone());
        drop(registry);
        self.log.info(&format!("Added device {}", id));
        Ok(device)
    }

    /// Unregister a device and close its connection
    pub async fn remove(&self, id: &str) -> Result<(), Error> {
        let device = self
            .registry()
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("Device {}", id)))?;
        if let Err(e) = device.lock().await.disconnect().await {
            self.log
                .warn(&format!("Disconnecting removed device {} failed: {}", id, e));
        }
        self.log.info(&format!("Removed device {}", id));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<SharedDevice> {
        self.registry().get(id).cloned()
    }

    /// Registered device ids in sorted order
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registry().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.registry().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry().is_empty()
    }

    pub async fn connect(&self, id: &str) -> Result<(), Error> {
        self.lookup(id)?.lock().await.connect().await
    }

    pub async fn disconnect(&self, id: &str) -> Result<(), Error> {
        self.lookup(id)?.lock().await.disconnect().await
    }

    /// Disconnect every device, continuing past individual failures
    pub async fn disconnect_all(&self) -> Vec<(String, Error)> {
        let mut devices: Vec<(String, SharedDevice)> = self
            .registry()
            .iter()
            .map(|(id, d)| (id.clone(), d.clone()))
            .collect();
        devices.sort_by(|a, b| a.0.cmp(&b.0));

        let mut failed = vec![];
        for (id, device) in devices {
            if let Err(e) = device.lock().await.disconnect().await {
                self.log
                    .warn(&format!("Failed to disconnect device {}: {}", id, e));
                failed.push((id, e));
            }
        }
        failed
    }
}
