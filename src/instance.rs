pub mod shared;
pub mod state;
pub mod worker;

pub use state::State;

use crate::config::SlaveConfig;
use crate::error::Error;
use crate::file::FileInfo;
use crate::instance::shared::{notify, Core};
use crate::instance::state::Status;
use crate::instance::worker::Worker;
use crate::mem::bank::Bank;
use crate::msg::{LogSink, Logger, ValueListener};
use crate::net::Service;
use crate::point::group_points_by_bank;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);
const JOIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Current value of a configured point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointValue {
    pub address: u16,
    pub name: String,
    pub description: String,
    pub unit: String,
    pub value: Result<u16, Error>,
}

/// One Modbus slave: its register banks, file records and the worker serving them
pub struct Instance {
    config: SlaveConfig,
    core: Arc<Mutex<Core>>,
    status: Status,
    worker: Mutex<Option<Worker>>,
    listener: Arc<dyn ValueListener>,
    log: Logger,
}

impl Instance {
    /// Build the datastore and load file records, the transport is not touched until `start()`
    pub fn new(
        config: SlaveConfig,
        sink: Arc<dyn LogSink>,
        listener: Arc<dyn ValueListener>,
    ) -> Result<Self, Error> {
        config.validate()?;
        let log = Logger::new(&config.slave_id, sink);
        let core = Core::new(&config, log.clone());
        Ok(Self {
            config,
            core: Arc::new(Mutex::new(core)),
            status: Status::default(),
            worker: Mutex::new(None),
            listener,
            log,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.slave_id
    }

    pub fn config(&self) -> &SlaveConfig {
        &self.config
    }

    pub fn state(&self) -> State {
        self.status.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == State::Running
    }

    /// Error that caused the last transition to `Failed`
    pub fn last_error(&self) -> Option<Error> {
        self.status.last_error()
    }

    /// Launch the worker thread
    ///
    /// Returns once the worker is spawned. Binding happens on the worker which then reports
    /// `Running` or `Failed`.
    pub fn start(&self) -> Result<(), Error> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(self.state(), State::Running | State::Starting) {
            return Ok(());
        }
        self.config.transport.validate()?;
        if let Some(old) = worker.take() {
            self.release(old);
        }

        self.status.starting();
        let service = Service::new(
            self.core.clone(),
            self.listener.clone(),
            self.config.device_address,
            self.config.file_operations,
            self.log.clone(),
        );
        match Worker::spawn(
            &self.config.slave_id,
            self.config.transport.clone(),
            service,
            self.status.clone(),
            self.log.clone(),
        ) {
            Ok(w) => {
                *worker = Some(w);
                self.log.info(&format!("Starting on {}", self.config.transport));
                Ok(())
            }
            Err(e) => {
                self.log.err(&format!("Failed to start: {}", e));
                self.status.fail(e.clone());
                Err(e)
            }
        }
    }

    /// Stop serving and join the worker
    ///
    /// A failed instance keeps its state and error, only its worker is reclaimed. This also holds
    /// for a worker that fails to bind while the stop is in progress.
    pub fn stop(&self) -> Result<(), Error> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(w) = worker.take() else {
            return Ok(());
        };
        if !self.status.stopping() {
            self.release(w);
            return Ok(());
        }
        self.release(w);
        if self.status.stopped() {
            self.log.ok("Stopped");
        } else if let Some(e) = self.last_error() {
            self.log.warn(&format!("Failed while stopping: {}", e));
        }
        Ok(())
    }

    /// Transport shutdown, then halt, then join
    fn release(&self, worker: Worker) {
        match worker.shutdown(SHUTDOWN_TIMEOUT) {
            Ok(()) | Err(Error::NotRunning) => {}
            Err(e) => self.log.warn(&format!("Transport shutdown incomplete: {}", e)),
        }
        worker.halt();
        if let Err(e) = worker.join(JOIN_TIMEOUT) {
            self.log
                .warn(&format!("Worker did not finish, detaching it: {}", e));
        }
    }

    fn core(&self) -> std::sync::MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn read_register(&self, bank: Bank, address: u16) -> Result<u16, Error> {
        self.core()
            .read(bank, address, 1)?
            .first()
            .copied()
            .ok_or_else(|| Error::NotFound(format!("{} address {}", bank, address)))
    }

    /// Write a single value, checked against the point configured at the address
    ///
    /// The listener is called after the instance lock is released.
    pub fn write_register(&self, bank: Bank, address: u16, value: i64) -> Result<(), Error> {
        let changes = self.core().write(bank, address, &[value]).map_err(|e| {
            self.log.warn(&format!(
                "Write of {} address {} = {} rejected: {}",
                bank, address, value, e
            ));
            e
        })?;
        self.log.ok(&format!("Wrote {} address {} = {}", bank, address, value));
        notify(self.listener.as_ref(), &changes);
        Ok(())
    }

    /// Current value of every configured point, grouped by bank and sorted by address
    pub fn get_all_values(&self) -> BTreeMap<Bank, Vec<PointValue>> {
        let core = self.core();
        group_points_by_bank(&self.config.points)
            .into_iter()
            .map(|(bank, points)| {
                let values = points
                    .into_iter()
                    .map(|p| PointValue {
                        address: p.address,
                        value: core.read(bank, p.address, 1).map(|v| v[0]),
                        name: p.name,
                        description: p.description,
                        unit: p.unit,
                    })
                    .collect();
                (bank, values)
            })
            .collect()
    }

    pub fn read_file_record(
        &self,
        file_number: u16,
        word_offset: u16,
        word_length: Option<u16>,
    ) -> Result<Vec<u8>, Error> {
        let mut changes = vec![];
        let res = self.core().read_file(file_number, word_offset, word_length, &mut changes);
        notify(self.listener.as_ref(), &changes);
        res
    }

    pub fn write_file_record(
        &self,
        file_number: u16,
        word_offset: u16,
        data: &[u8],
    ) -> Result<(), Error> {
        self.core()
            .write_file(file_number, word_offset, data)
            .map_err(|e| {
                self.log
                    .warn(&format!("Write of file {} rejected: {}", file_number, e));
                e
            })?;
        self.log.ok(&format!(
            "Wrote {} bytes to file {} at word {}",
            data.len(),
            file_number,
            word_offset
        ));
        Ok(())
    }

    pub fn get_file_info(&self) -> Vec<FileInfo> {
        self.core().file_info()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{Instance, State};
    use crate::config::{FileRecordConfig, RtuConfig, SlaveConfig, TcpConfig, TransportConfig};
    use crate::error::Error;
    use crate::mem::bank::Bank;
    use crate::msg::{LogMsg, NoListener, NoLog};
    use crate::point::RegisterPoint;
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex, OnceLock, Weak};
    use std::time::{Duration, Instant};

    pub fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    pub fn local(id: &str, port: u16) -> SlaveConfig {
        SlaveConfig::new(
            id,
            id,
            TransportConfig::Tcp(TcpConfig {
                host: Some(str!("127.0.0.1")),
                port: Some(port),
            }),
        )
    }

    pub fn wait_for(instance: &Instance, state: State) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if instance.state() == state {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn instance(config: SlaveConfig) -> Instance {
        Instance::new(config, Arc::new(NoLog), Arc::new(NoListener)).unwrap()
    }

    #[test]
    fn ut_holding_register_example() {
        let mut config = local("boiler", free_port());
        config.points = vec![RegisterPoint::new(5, "temp", Bank::HoldingRegister, 42)
            .with_bounds(Some(0.0), Some(100.0))];
        let instance = instance(config);

        assert_eq!(instance.read_register(Bank::HoldingRegister, 5), Ok(42));
        assert_eq!(
            instance.write_register(Bank::HoldingRegister, 5, 150),
            Err(Error::OutOfRange {
                bank: Bank::HoldingRegister,
                address: 5,
                value: 150
            })
        );
        assert_eq!(instance.read_register(Bank::HoldingRegister, 5), Ok(42));
        assert_eq!(instance.write_register(Bank::HoldingRegister, 5, 77), Ok(()));
        assert_eq!(instance.read_register(Bank::HoldingRegister, 5), Ok(77));
    }

    #[test]
    fn ut_read_only_rejected() {
        let mut config = local("meter", free_port());
        config.points =
            vec![RegisterPoint::new(3, "serial", Bank::InputRegister, 1234).with_read_only(true)];
        let instance = instance(config);

        assert_eq!(
            instance.write_register(Bank::InputRegister, 3, 1),
            Err(Error::ReadOnlyViolation(Bank::InputRegister, 3))
        );
        assert_eq!(instance.read_register(Bank::InputRegister, 3), Ok(1234));
        assert_eq!(instance.write_register(Bank::InputRegister, 4, 1), Ok(()));
        assert!(matches!(
            instance.read_register(Bank::InputRegister, 1000),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn ut_value_changed_callback() {
        let changes = Arc::new(Mutex::new(vec![]));
        let listener = {
            let changes = changes.clone();
            move |bank: Bank, address: u16, value: u16| {
                changes.lock().unwrap().push((bank, address, value))
            }
        };
        let instance =
            Instance::new(local("cb", free_port()), Arc::new(NoLog), Arc::new(listener)).unwrap();

        instance.write_register(Bank::Coil, 7, 1).unwrap();
        assert!(instance.write_register(Bank::Coil, 7, 2).is_err());
        assert_eq!(*changes.lock().unwrap(), vec![(Bank::Coil, 7, 1)]);
    }

    #[test]
    fn ut_listener_reads_instance() {
        let this: Arc<OnceLock<Weak<Instance>>> = Arc::new(OnceLock::new());
        let seen = Arc::new(Mutex::new(vec![]));
        let listener = {
            let this = this.clone();
            let seen = seen.clone();
            move |bank: Bank, address: u16, _: u16| {
                if let Some(instance) = this.get().and_then(Weak::upgrade) {
                    let value = instance.read_register(bank, address);
                    let points = instance.get_all_values().len();
                    seen.lock().unwrap().push((value, points));
                }
            }
        };
        let mut config = local("reentrant", free_port());
        config.points = vec![RegisterPoint::new(2, "level", Bank::HoldingRegister, 0)];
        let instance =
            Arc::new(Instance::new(config, Arc::new(NoLog), Arc::new(listener)).unwrap());
        this.set(Arc::downgrade(&instance)).unwrap();

        let (done, finished) = mpsc::channel();
        let writer = instance.clone();
        std::thread::spawn(move || {
            let _ = done.send(writer.write_register(Bank::HoldingRegister, 2, 17));
        });
        assert_eq!(finished.recv_timeout(Duration::from_secs(3)), Ok(Ok(())));
        assert_eq!(*seen.lock().unwrap(), vec![(Ok(17), 4)]);
    }

    #[test]
    fn ut_write_register_logged() {
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let messages = messages.clone();
            move |msg: LogMsg| messages.lock().unwrap().push(msg.text().to_string())
        };
        let mut config = local("logged", free_port());
        config.points =
            vec![RegisterPoint::new(3, "serial", Bank::HoldingRegister, 1).with_read_only(true)];
        let instance = Instance::new(config, Arc::new(sink), Arc::new(NoListener)).unwrap();

        instance.write_register(Bank::HoldingRegister, 4, 9).unwrap();
        assert!(instance.write_register(Bank::HoldingRegister, 3, 2).is_err());
        let messages = messages.lock().unwrap();
        assert!(messages
            .iter()
            .any(|m| m.contains("Wrote holding_register address 4 = 9")));
        assert!(messages
            .iter()
            .any(|m| m.contains("Write of holding_register address 3 = 2 rejected")));
    }

    #[test]
    fn ut_get_all_values() {
        let mut config = local("all", free_port());
        config.sizes.input_registers = 10;
        config.points = vec![
            RegisterPoint::new(9, "b", Bank::HoldingRegister, 2),
            RegisterPoint::new(1, "a", Bank::HoldingRegister, 1),
            RegisterPoint::new(20, "outside", Bank::InputRegister, 0),
        ];
        let instance = instance(config);
        let values = instance.get_all_values();

        assert_eq!(values.len(), 4);
        let holding: Vec<_> = values[&Bank::HoldingRegister]
            .iter()
            .map(|v| (v.name.as_str(), v.value.clone()))
            .collect();
        assert_eq!(holding, vec![("a", Ok(1)), ("b", Ok(2))]);
        assert!(matches!(
            values[&Bank::InputRegister][0].value,
            Err(Error::NotFound(_))
        ));
        assert!(values[&Bank::Coil].is_empty());
    }

    #[test]
    fn ut_file_records_through_instance() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = local("files", free_port());
        config.files = vec![FileRecordConfig::new(1, dir.path().join("one.bin"))];
        let instance = instance(config);

        instance.write_file_record(1, 1, &[1, 2, 3, 4]).unwrap();
        assert_eq!(instance.read_file_record(1, 0, None), Ok(vec![0, 0, 1, 2, 3, 4]));
        let info = instance.get_file_info();
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].size, 6);
        assert!(matches!(
            instance.read_file_record(2, 0, None),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn ut_new_rejects_invalid_config() {
        let config = SlaveConfig::new("rtu", "RTU", TransportConfig::Rtu(RtuConfig::default()));
        assert!(matches!(
            Instance::new(config, Arc::new(NoLog), Arc::new(NoListener)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn ut_start_stop_idempotent() {
        let port = free_port();
        let instance = instance(local("life", port));

        assert_eq!(instance.stop(), Ok(()));
        assert_eq!(instance.state(), State::Stopped);

        assert_eq!(instance.start(), Ok(()));
        assert!(wait_for(&instance, State::Running));
        assert_eq!(instance.start(), Ok(()));
        assert_eq!(instance.state(), State::Running);
        assert!(std::net::TcpStream::connect(("127.0.0.1", port)).is_ok());

        assert_eq!(instance.stop(), Ok(()));
        assert_eq!(instance.state(), State::Stopped);
        assert_eq!(instance.stop(), Ok(()));
        assert_eq!(instance.state(), State::Stopped);
    }

    #[test]
    fn ut_restart_after_stop() {
        let port = free_port();
        let instance = instance(local("again", port));
        for _ in 0..2 {
            instance.start().unwrap();
            assert!(wait_for(&instance, State::Running));
            instance.stop().unwrap();
            assert_eq!(instance.state(), State::Stopped);
        }
        assert_eq!(instance.last_error(), None);
    }

    #[test]
    fn ut_bind_failure_recurs() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let instance = instance(local("busy", port));

        for _ in 0..2 {
            assert_eq!(instance.start(), Ok(()));
            assert!(wait_for(&instance, State::Failed));
            assert!(matches!(instance.last_error(), Some(Error::Transport(_))));
            assert_eq!(instance.stop(), Ok(()));
            assert_eq!(instance.state(), State::Failed);
        }
        drop(taken);
    }

    #[test]
    fn ut_stop_while_starting() {
        let port = free_port();
        let instance = instance(local("early", port));
        for _ in 0..3 {
            assert_eq!(instance.start(), Ok(()));
            assert_eq!(instance.stop(), Ok(()));
            assert_eq!(instance.state(), State::Stopped);
            assert_eq!(instance.last_error(), None);
        }
        assert!(std::net::TcpListener::bind(("127.0.0.1", port)).is_ok());
    }

    #[test]
    fn ut_stop_while_starting_bind_fails() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let instance = instance(local("early-busy", taken.local_addr().unwrap().port()));
        for _ in 0..3 {
            assert_eq!(instance.start(), Ok(()));
            assert_eq!(instance.stop(), Ok(()));
            match instance.state() {
                State::Failed => {
                    assert!(matches!(instance.last_error(), Some(Error::Transport(_))))
                }
                State::Stopped => assert_eq!(instance.last_error(), None),
                state => panic!("Unexpected state {} after stop", state),
            }
        }
        drop(taken);
    }

    #[test]
    fn ut_serial_open_failure() {
        let config = SlaveConfig::new(
            "serial",
            "Serial",
            TransportConfig::Rtu(RtuConfig {
                path: str!("/dev/does-not-exist-modbus"),
                ..RtuConfig::default()
            }),
        );
        let instance = instance(config);
        assert_eq!(instance.start(), Ok(()));
        assert!(wait_for(&instance, State::Failed));
        assert!(matches!(instance.last_error(), Some(Error::Transport(_))));
    }
}
