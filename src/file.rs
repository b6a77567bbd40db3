use crate::config::{FileRecordConfig, TriggerKind};
use crate::error::Error;
use crate::mem::bank::Bank;
use crate::mem::datastore::Datastore;
use crate::msg::Logger;

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Register access the file record layer needs for triggers and length registers
pub trait Registers {
    fn read_registers(&mut self, bank: Bank, address: u16, count: usize)
        -> Result<Vec<u16>, Error>;
    fn write_register(&mut self, bank: Bank, address: u16, value: u16) -> Result<(), Error>;
}

impl Registers for Datastore {
    fn read_registers(
        &mut self,
        bank: Bank,
        address: u16,
        count: usize,
    ) -> Result<Vec<u16>, Error> {
        self.get(bank, address, count)
    }

    fn write_register(&mut self, bank: Bank, address: u16, value: u16) -> Result<(), Error> {
        self.set(bank, address, &[value])
    }
}

/// Concatenate big-endian words into a byte length
///
/// The first word is the most significant: one word is taken as is, two words give
/// `(hi << 16) | lo` and in general word `i` of `n` is shifted left by `16 * (n - 1 - i)`.
/// Words shifted beyond 64 bits contribute nothing.
pub fn decode_length(words: &[u16]) -> usize {
    let n = words.len();
    words
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, w)| {
            let shift = 16 * (n - 1 - i) as u32;
            acc.wrapping_add((*w as u64).checked_shl(shift).unwrap_or(0))
        }) as usize
}

/// Snapshot of a configured file record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub file_number: u16,
    pub file_path: PathBuf,
    pub size: usize,
    pub max_size: usize,
    pub read_only: bool,
    pub description: String,
}

/// One sub-request of a write file record request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    pub file_number: u16,
    pub word_offset: u16,
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct FileRecord {
    config: FileRecordConfig,
    data: Option<Vec<u8>>,
}

/// In-memory file blobs addressed by file number and word offset
///
/// The in-memory buffer is the serving copy. It is loaded once from disk and the whole buffer
/// is written back after every successful write.
#[derive(Debug, Default)]
pub struct FileRecordStore {
    files: BTreeMap<u16, FileRecord>,
}

impl FileRecordStore {
    pub fn load(configs: &[FileRecordConfig], log: &Logger) -> Self {
        let mut files = BTreeMap::new();
        for config in configs {
            let data = match std::fs::read(&config.file_path) {
                Ok(data) => Some(data),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    log.info(&format!(
                        "File {} not found at {}, starting empty",
                        config.file_number,
                        config.file_path.display()
                    ));
                    Some(vec![])
                }
                Err(e) => {
                    log.warn(&format!(
                        "Failed to load file {} from {} ({})",
                        config.file_number,
                        config.file_path.display(),
                        e
                    ));
                    None
                }
            };
            files.insert(
                config.file_number,
                FileRecord {
                    config: config.clone(),
                    data,
                },
            );
        }
        Self { files }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, file_number: u16) -> bool {
        self.files.contains_key(&file_number)
    }

    fn record(&self, file_number: u16) -> Result<&FileRecord, Error> {
        self.files
            .get(&file_number)
            .ok_or_else(|| Error::NotFound(format!("File {}", file_number)))
    }

    /// Read a file record starting at the given word offset
    ///
    /// Without an explicit word length the byte length is resolved from the fixed file length,
    /// then the length register, then the rest of the buffer. The result is clipped to the end
    /// of the buffer.
    pub fn read<R: Registers>(
        &self,
        registers: &mut R,
        file_number: u16,
        word_offset: u16,
        word_length: Option<u16>,
        log: &Logger,
    ) -> Result<Vec<u8>, Error> {
        let record = self.record(file_number)?;
        let data = record
            .data
            .as_ref()
            .ok_or(Error::FileDataMissing(file_number))?;
        let config = &record.config;

        if let Some(trigger) = config.trigger {
            let res = match trigger.kind {
                TriggerKind::WriteRegister => {
                    registers.write_register(Bank::HoldingRegister, trigger.address, file_number)
                }
                TriggerKind::ReadHoldingRegister => registers
                    .read_registers(Bank::HoldingRegister, trigger.address, 1)
                    .map(|_| ()),
            };
            if let Err(e) = res {
                log.warn(&format!(
                    "Trigger of file {} at address {} failed: {}",
                    file_number, trigger.address, e
                ));
            }
        }

        let start = word_offset as usize * 2;
        let length = if let Some(words) = word_length {
            words as usize * 2
        } else if let Some(length) = config.file_length {
            length
        } else if let Some(reg) = config.length_register {
            let bank = match Bank::from_read_code(reg.function_code)? {
                bank @ (Bank::HoldingRegister | Bank::InputRegister) => bank,
                _ => return Err(Error::UnsupportedFunction(reg.function_code)),
            };
            let words = registers.read_registers(bank, reg.address, reg.quantity as usize)?;
            decode_length(&words)
        } else {
            data.len().saturating_sub(start)
        };

        if start >= data.len() {
            return Ok(vec![]);
        }
        let end = std::cmp::min(start.saturating_add(length), data.len());
        Ok(data[start..end].to_vec())
    }

    /// Check that `len` bytes can be written at the given word offset
    ///
    /// A record whose data could not be loaded refuses writes so the file on disk is not
    /// replaced by a buffer that never saw its contents.
    pub fn check_write(
        &self,
        file_number: u16,
        word_offset: u16,
        len: usize,
    ) -> Result<(), Error> {
        let record = self.record(file_number)?;
        if record.config.read_only {
            return Err(Error::FileReadOnly(file_number));
        }
        if record.data.is_none() {
            return Err(Error::FileDataMissing(file_number));
        }
        let required = word_offset as usize * 2 + len;
        if required > record.config.max_size {
            return Err(Error::FileSize {
                required,
                max: record.config.max_size,
            });
        }
        Ok(())
    }

    /// Write data at the given word offset and persist the whole buffer
    pub fn write(
        &mut self,
        file_number: u16,
        word_offset: u16,
        data: &[u8],
        log: &Logger,
    ) -> Result<(), Error> {
        self.check_write(file_number, word_offset, data.len())?;
        let record = self
            .files
            .get_mut(&file_number)
            .ok_or_else(|| Error::NotFound(format!("File {}", file_number)))?;
        let buffer = record
            .data
            .as_mut()
            .ok_or(Error::FileDataMissing(file_number))?;

        let start = word_offset as usize * 2;
        let required = start + data.len();
        if buffer.len() < required {
            buffer.resize(required, 0);
        }
        buffer[start..required].copy_from_slice(data);

        if let Err(e) = std::fs::write(&record.config.file_path, buffer.as_slice()) {
            log.warn(&format!(
                "Failed to persist file {} to {} ({})",
                file_number,
                record.config.file_path.display(),
                e
            ));
        }
        Ok(())
    }

    /// Write several records, none of them unless all pass `check_write`
    pub fn write_all(&mut self, writes: &[FileWrite], log: &Logger) -> Result<(), Error> {
        for w in writes {
            self.check_write(w.file_number, w.word_offset, w.data.len())?;
        }
        for w in writes {
            self.write(w.file_number, w.word_offset, &w.data, log)?;
        }
        Ok(())
    }

    pub fn info(&self) -> Vec<FileInfo> {
        self.files
            .values()
            .map(|r| FileInfo {
                file_number: r.config.file_number,
                file_path: r.config.file_path.clone(),
                size: r.data.as_ref().map(|d| d.len()).unwrap_or(0),
                max_size: r.config.max_size,
                read_only: r.config.read_only,
                description: r.config.description.clone(),
            })
            .collect()
    }
}
