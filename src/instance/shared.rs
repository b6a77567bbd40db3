use crate::config::SlaveConfig;
use crate::error::Error;
use crate::file::{FileInfo, FileRecordStore, FileWrite, Registers};
use crate::mem::bank::Bank;
use crate::mem::datastore::Datastore;
use crate::msg::{Logger, ValueListener};
use crate::point::RegisterPoint;

use std::collections::HashMap;

/// Register value stored by a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    pub bank: Bank,
    pub address: u16,
    pub value: u16,
}

/// Report stored values to the listener
///
/// Must be called after the instance lock is released, the listener may call back into the
/// instance.
pub fn notify(listener: &dyn ValueListener, changes: &[Change]) {
    for c in changes {
        listener.value_changed(c.bank, c.address, c.value);
    }
}

/// State of one slave shared by the API and the wire service
///
/// Every access happens under the instance lock, so a multi-value write is checked completely
/// before the first value is stored. Stored values are returned to the caller instead of being
/// reported from inside the lock.
pub struct Core {
    datastore: Datastore,
    points: HashMap<(Bank, u16), RegisterPoint>,
    files: FileRecordStore,
    log: Logger,
}

/// Register view used by file triggers, collecting every write
struct Recording<'a> {
    datastore: &'a mut Datastore,
    changes: &'a mut Vec<Change>,
}

impl Registers for Recording<'_> {
    fn read_registers(
        &mut self,
        bank: Bank,
        address: u16,
        count: usize,
    ) -> Result<Vec<u16>, Error> {
        self.datastore.get(bank, address, count)
    }

    fn write_register(&mut self, bank: Bank, address: u16, value: u16) -> Result<(), Error> {
        self.datastore.set(bank, address, &[value])?;
        self.changes.push(Change {
            bank,
            address,
            value,
        });
        Ok(())
    }
}

impl Core {
    pub fn new(config: &SlaveConfig, log: Logger) -> Self {
        let mut datastore = Datastore::new(&config.sizes);
        let seeded = datastore.seed(&config.points, &log);
        log.info(&format!(
            "Initialized {} of {} points",
            seeded,
            config.points.len()
        ));

        let points = config
            .points
            .iter()
            .map(|p| ((p.bank, p.address), p.clone()))
            .collect();
        let files = FileRecordStore::load(&config.files, &log);
        if !files.is_empty() {
            log.info(&format!("Loaded {} file records", files.len()));
        }

        Self {
            datastore,
            points,
            files,
            log,
        }
    }

    pub fn point(&self, bank: Bank, address: u16) -> Option<&RegisterPoint> {
        self.points.get(&(bank, address))
    }

    pub fn read(&self, bank: Bank, address: u16, count: usize) -> Result<Vec<u16>, Error> {
        self.datastore.get(bank, address, count)
    }

    /// Write consecutive values starting at `address`
    ///
    /// Configured points guard their address, unconfigured addresses only need a value storable
    /// in the bank. Nothing is stored unless every value passes.
    pub fn write(
        &mut self,
        bank: Bank,
        address: u16,
        values: &[i64],
    ) -> Result<Vec<Change>, Error> {
        let mut words = Vec::with_capacity(values.len());
        for (i, value) in values.iter().enumerate() {
            let addr = u16::try_from(address as usize + i).map_err(|_| {
                Error::NotFound(format!("{} address {}", bank, address as usize + i))
            })?;
            if let Some(point) = self.points.get(&(bank, addr)) {
                point.check_write(*value)?;
            }
            words.push(bank.coerce(addr, *value)?);
        }
        self.datastore.set(bank, address, &words)?;
        Ok(words
            .into_iter()
            .enumerate()
            .map(|(i, value)| Change {
                bank,
                address: address + i as u16,
                value,
            })
            .collect())
    }

    /// Read a file record, running its trigger first
    ///
    /// Trigger writes land in `changes` even if the read itself fails.
    pub fn read_file(
        &mut self,
        file_number: u16,
        word_offset: u16,
        word_length: Option<u16>,
        changes: &mut Vec<Change>,
    ) -> Result<Vec<u8>, Error> {
        let mut registers = Recording {
            datastore: &mut self.datastore,
            changes,
        };
        self.files.read(
            &mut registers,
            file_number,
            word_offset,
            word_length,
            &self.log,
        )
    }

    pub fn write_file(
        &mut self,
        file_number: u16,
        word_offset: u16,
        data: &[u8],
    ) -> Result<(), Error> {
        self.files.write(file_number, word_offset, data, &self.log)
    }

    pub fn write_files(&mut self, writes: &[FileWrite]) -> Result<(), Error> {
        self.files.write_all(writes, &self.log)
    }

    pub fn file_info(&self) -> Vec<FileInfo> {
        self.files.info()
    }
}

#[cfg(test)]
mod tests {
    use super::{Change, Core};
    use crate::config::{
        FileRecordConfig, LengthRegisterConfig, SlaveConfig, TcpConfig, TransportConfig,
        TriggerConfig, TriggerKind,
    };
    use crate::error::Error;
    use crate::mem::bank::Bank;
    use crate::msg::{Logger, NoLog};
    use crate::point::RegisterPoint;
    use std::sync::Arc;

    fn shared_core(points: Vec<RegisterPoint>) -> Core {
        let mut config =
            SlaveConfig::new("s", "S", TransportConfig::Tcp(TcpConfig::default()));
        config.points = points;
        Core::new(&config, Logger::new("s", Arc::new(NoLog)))
    }

    #[test]
    fn ut_core_write_all_or_nothing() {
        let mut core = shared_core(vec![
            RegisterPoint::new(2, "limited", Bank::HoldingRegister, 0)
                .with_bounds(None, Some(10.0)),
        ]);
        assert!(matches!(
            core.write(Bank::HoldingRegister, 0, &[1, 2, 11]),
            Err(Error::OutOfRange { address: 2, .. })
        ));
        assert_eq!(core.read(Bank::HoldingRegister, 0, 3), Ok(vec![0, 0, 0]));

        let changes = core.write(Bank::HoldingRegister, 0, &[1, 2, 10]).unwrap();
        assert_eq!(core.read(Bank::HoldingRegister, 0, 3), Ok(vec![1, 2, 10]));
        assert_eq!(
            changes,
            vec![
                Change {
                    bank: Bank::HoldingRegister,
                    address: 0,
                    value: 1
                },
                Change {
                    bank: Bank::HoldingRegister,
                    address: 1,
                    value: 2
                },
                Change {
                    bank: Bank::HoldingRegister,
                    address: 2,
                    value: 10
                },
            ]
        );
    }

    #[test]
    fn ut_core_write_storage_type() {
        let mut core = shared_core(vec![]);
        assert!(matches!(
            core.write(Bank::Coil, 0, &[2]),
            Err(Error::OutOfRange { .. })
        ));
        assert!(matches!(
            core.write(Bank::HoldingRegister, 0, &[65536]),
            Err(Error::OutOfRange { .. })
        ));
        assert!(matches!(
            core.write(Bank::HoldingRegister, 999, &[1, 2]),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            core.write(Bank::HoldingRegister, u16::MAX, &[1, 2]),
            Err(Error::NotFound(_))
        ));
        assert!(core.point(Bank::HoldingRegister, 0).is_none());
    }

    #[test]
    fn ut_core_trigger_changes_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.bin");
        std::fs::write(&path, [1, 2]).unwrap();
        let mut file = FileRecordConfig::new(4, &path);
        file.trigger = Some(TriggerConfig {
            kind: TriggerKind::WriteRegister,
            address: 30,
        });
        file.length_register = Some(LengthRegisterConfig {
            function_code: 6,
            address: 0,
            quantity: 1,
        });
        let mut config =
            SlaveConfig::new("s", "S", TransportConfig::Tcp(TcpConfig::default()));
        config.files = vec![file];
        let mut core = Core::new(&config, Logger::new("s", Arc::new(NoLog)));

        let trigger = Change {
            bank: Bank::HoldingRegister,
            address: 30,
            value: 4,
        };
        let mut changes = vec![];
        assert_eq!(
            core.read_file(4, 0, None, &mut changes),
            Err(Error::UnsupportedFunction(6))
        );
        assert_eq!(changes, vec![trigger]);

        changes.clear();
        assert_eq!(core.read_file(4, 0, Some(1), &mut changes), Ok(vec![1, 2]));
        assert_eq!(changes, vec![trigger]);
        assert_eq!(core.read(Bank::HoldingRegister, 30, 1), Ok(vec![4]));
    }
}
