use crate::config::SlaveConfig;
use crate::error::Error;
use crate::instance::{Instance, State};
use crate::msg::{LogSink, Logger, NoListener, NoLog, ValueListener};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Registry of slave instances keyed by slave id
///
/// The registry lock only guards the map. Starting and stopping happen on a cloned handle after
/// the lock is released.
pub struct Supervisor {
    instances: Mutex<HashMap<String, Arc<Instance>>>,
    sink: Arc<dyn LogSink>,
    listener: Arc<dyn ValueListener>,
    log: Logger,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(Arc::new(NoLog), Arc::new(NoListener))
    }
}

impl Supervisor {
    pub fn new(sink: Arc<dyn LogSink>, listener: Arc<dyn ValueListener>) -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
            log: Logger::new("supervisor", sink.clone()),
            sink,
            listener,
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, Arc<Instance>>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, id: &str) -> Result<Arc<Instance>, Error> {
        self.registry()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Slave {}", id)))
    }

    fn build(&self, config: SlaveConfig) -> Result<Arc<Instance>, Error> {
        Instance::new(config, self.sink.clone(), self.listener.clone()).map(Arc::new)
    }

    /// Register a new instance, stopped until `start()` is called
    pub fn add(&self, config: SlaveConfig) -> Result<Arc<Instance>, Error> {
        let id = config.slave_id.clone();
        if self.registry().contains_key(&id) {
            return Err(Error::DuplicateId(id));
        }
        let instance = self.build(config)?;

        let mut registry = self.registry();
        if registry.contains_key(&id) {
            return Err(Error::DuplicateId(id));
        }
        registry.insert(id.clone(), instance.clone());
        drop(registry);
        self.log.info(&format!("Added slave {}", id));
        Ok(instance)
    }

    /// Unregister an instance and stop it
    pub fn remove(&self, id: &str) -> Result<(), Error> {
        let instance = self
            .registry()
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("Slave {}", id)))?;
        if let Err(e) = instance.stop() {
            self.log
                .warn(&format!("Stopping removed slave {} failed: {}", id, e));
        }
        self.log.info(&format!("Removed slave {}", id));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Instance>> {
        self.registry().get(id).cloned()
    }

    /// Registered slave ids in sorted order
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

    pub fn start(&self, id: &str) -> Result<(), Error> {
        self.lookup(id)?.start()
    }

    pub fn stop(&self, id: &str) -> Result<(), Error> {
        self.lookup(id)?.stop()
    }

    fn snapshot(&self) -> Vec<Arc<Instance>> {
        let mut instances: Vec<_> = self.registry().values().cloned().collect();
        instances.sort_by(|a, b| a.id().cmp(b.id()));
        instances
    }

    /// Start every instance, returning the ids that failed to launch
    pub fn start_all(&self) -> Vec<(String, Error)> {
        let mut failed = vec![];
        for instance in self.snapshot() {
            if let Err(e) = instance.start() {
                self.log
                    .err(&format!("Failed to start slave {}: {}", instance.id(), e));
                failed.push((str!(instance.id()), e));
            }
        }
        failed
    }

    /// Stop every instance, continuing past individual failures
    pub fn stop_all(&self) -> Vec<(String, Error)> {
        let mut failed = vec![];
        for instance in self.snapshot() {
            if let Err(e) = instance.stop() {
                self.log
                    .warn(&format!("Failed to stop slave {}: {}", instance.id(), e));
                failed.push((str!(instance.id()), e));
            }
        }
        failed
    }

    /// Replace the configuration of a registered instance
    ///
    /// The new instance is swapped in under the registry lock so the id never disappears. The old
    /// one is stopped afterwards and, if it was serving, the new one is started.
    pub fn update(&self, id: &str, config: SlaveConfig) -> Result<Arc<Instance>, Error> {
        if config.slave_id != id {
            return Err(Error::Config(format!(
                "Slave ID {} cannot be changed to {}",
                id, config.slave_id
            )));
        }
        if !self.registry().contains_key(id) {
            return Err(Error::NotFound(format!("Slave {}", id)));
        }
        let instance = self.build(config)?;

        let old = {
            let mut registry = self.registry();
            match registry.get_mut(id) {
                Some(slot) => std::mem::replace(slot, instance.clone()),
                None => return Err(Error::NotFound(format!("Slave {}", id))),
            }
        };
        let was_serving = old.is_running() || old.state() == State::Starting;
        if let Err(e) = old.stop() {
            self.log
                .warn(&format!("Stopping previous slave {} failed: {}", id, e));
        }
        self.log.info(&format!("Updated slave {}", id));
        if was_serving {
            instance.start()?;
        }
        Ok(instance)
    }
}
