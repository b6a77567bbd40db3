use crate::error::Error;
use crate::file::FileWrite;
use crate::instance::shared::{notify, Change, Core};
use crate::mem::bank::Bank;
use crate::mem::range::Range;
use crate::msg::{Logger, ValueListener};
use crate::util::to_hex_str;

use byteorder::{BigEndian, ReadBytesExt};
use bytes::Bytes;
use std::future;
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_modbus::prelude::{ExceptionCode, Response, SlaveRequest};
use tokio_modbus::Request;

pub const READ_FILE_RECORD: u8 = 0x14;
pub const WRITE_FILE_RECORD: u8 = 0x15;

/// Reference type of every file record sub-request
const FILE_REFERENCE_TYPE: u8 = 0x06;
/// Reference type, file number, record number and record length
const SUB_REQUEST_HEADER: usize = 7;

/// Map a failed register or file access to the exception sent on the wire
pub fn exception(e: &Error) -> ExceptionCode {
    match e {
        Error::NotFound(_) => ExceptionCode::IllegalDataAddress,
        Error::ReadOnlyViolation(..)
        | Error::OutOfRange { .. }
        | Error::FileReadOnly(_)
        | Error::FileSize { .. } => ExceptionCode::IllegalDataValue,
        _ => ExceptionCode::ServerDeviceFailure,
    }
}

fn field<T>(v: std::io::Result<T>) -> Result<T, ExceptionCode> {
    v.map_err(|_| ExceptionCode::IllegalDataValue)
}

/// Modbus request handler over the shared core of one instance
#[derive(Clone)]
pub struct Service {
    core: Arc<Mutex<Core>>,
    listener: Arc<dyn ValueListener>,
    device_address: u8,
    file_operations: bool,
    log: Logger,
}

impl Service {
    pub fn new(
        core: Arc<Mutex<Core>>,
        listener: Arc<dyn ValueListener>,
        device_address: u8,
        file_operations: bool,
        log: Logger,
    ) -> Self {
        Self {
            core,
            listener,
            device_address,
            file_operations,
            log,
        }
    }

    pub fn logger(&self) -> &Logger {
        &self.log
    }

    fn read_bits(&self, bank: Bank, addr: u16, cnt: u16) -> Result<Vec<bool>, ExceptionCode> {
        self.read_words(bank, addr, cnt)
            .map(|v| v.into_iter().map(|b| b != 0).collect())
    }

    fn read_words(&self, bank: Bank, addr: u16, cnt: u16) -> Result<Vec<u16>, ExceptionCode> {
        let core = self.core.lock().unwrap_or_else(PoisonError::into_inner);
        let values = core.read(bank, addr, cnt as usize).map_err(|e| {
            self.log.warn(&format!("Read of {} failed: {}", bank, e));
            exception(&e)
        })?;
        self.log.info(&format!(
            "Read {}: {} = {}",
            bank,
            Range::new(addr as usize, cnt as usize),
            to_hex_str(&values)
        ));
        Ok(values)
    }

    fn write(&self, bank: Bank, addr: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        let wide: Vec<i64> = values.iter().map(|v| *v as i64).collect();
        let changes = self
            .core
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(bank, addr, &wide)
            .map_err(|e| {
                self.log.warn(&format!("Write of {} rejected: {}", bank, e));
                exception(&e)
            })?;
        self.log.info(&format!(
            "Write {}: {} = {}",
            bank,
            Range::new(addr as usize, values.len()),
            to_hex_str(values)
        ));
        notify(self.listener.as_ref(), &changes);
        Ok(())
    }

    /// Read `count` sub-requests under the core lock, collecting trigger writes in `changes`
    fn read_records(
        &self,
        rdr: &mut Cursor<&[u8]>,
        count: usize,
        changes: &mut Vec<Change>,
    ) -> Result<Vec<u8>, ExceptionCode> {
        let mut core = self.core.lock().unwrap_or_else(PoisonError::into_inner);
        let mut body = vec![];
        for _ in 0..count {
            if field(rdr.read_u8())? != FILE_REFERENCE_TYPE {
                return Err(ExceptionCode::IllegalDataAddress);
            }
            let file_number = field(rdr.read_u16::<BigEndian>())?;
            let record_number = field(rdr.read_u16::<BigEndian>())?;
            let record_length = field(rdr.read_u16::<BigEndian>())?;
            let record = core
                .read_file(file_number, record_number, Some(record_length), changes)
                .map_err(|e| {
                    self.log
                        .warn(&format!("Read of file {} failed: {}", file_number, e));
                    exception(&e)
                })?;
            self.log.info(&format!(
                "Read file {}: record {} = {} bytes",
                file_number,
                record_number,
                record.len()
            ));
            body.push((record.len() + 1) as u8);
            body.push(FILE_REFERENCE_TYPE);
            body.extend(record);
        }
        Ok(body)
    }

    /// Serve a read file record PDU and return the response payload
    fn read_file_records(&self, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
        let mut rdr = Cursor::new(data);
        let byte_count = field(rdr.read_u8())? as usize;
        if byte_count == 0 || byte_count != data.len() - 1 || byte_count % SUB_REQUEST_HEADER != 0
        {
            return Err(ExceptionCode::IllegalDataValue);
        }

        let mut changes = vec![];
        let body = self.read_records(&mut rdr, byte_count / SUB_REQUEST_HEADER, &mut changes);
        notify(self.listener.as_ref(), &changes);
        let body = body?;
        if body.len() > u8::MAX as usize {
            return Err(ExceptionCode::IllegalDataValue);
        }

        let mut pdu = Vec::with_capacity(body.len() + 1);
        pdu.push(body.len() as u8);
        pdu.extend(body);
        Ok(pdu)
    }

    /// Serve a write file record PDU, the response echoes the request
    ///
    /// Every sub-request is parsed and checked before the first one is written.
    fn write_file_records(&self, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
        let mut rdr = Cursor::new(data);
        let byte_count = field(rdr.read_u8())? as usize;
        if byte_count == 0 || byte_count != data.len() - 1 {
            return Err(ExceptionCode::IllegalDataValue);
        }

        let mut writes = vec![];
        while (rdr.position() as usize) < data.len() {
            if field(rdr.read_u8())? != FILE_REFERENCE_TYPE {
                return Err(ExceptionCode::IllegalDataAddress);
            }
            let file_number = field(rdr.read_u16::<BigEndian>())?;
            let word_offset = field(rdr.read_u16::<BigEndian>())?;
            let record_length = field(rdr.read_u16::<BigEndian>())?;
            let mut record = vec![0u8; record_length as usize * 2];
            field(rdr.read_exact(&mut record))?;
            writes.push(FileWrite {
                file_number,
                word_offset,
                data: record,
            });
        }

        self.core
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write_files(&writes)
            .map_err(|e| {
                self.log.warn(&format!("Write of file records rejected: {}", e));
                exception(&e)
            })?;
        for w in &writes {
            self.log.info(&format!(
                "Write file {}: record {} = {} bytes",
                w.file_number,
                w.word_offset,
                w.data.len()
            ));
        }
        Ok(data.to_vec())
    }

    fn handle(&self, request: Request<'static>) -> Result<Response, ExceptionCode> {
        match request {
            Request::ReadCoils(addr, cnt) => self
                .read_bits(Bank::Coil, addr, cnt)
                .map(Response::ReadCoils),
            Request::ReadDiscreteInputs(addr, cnt) => self
                .read_bits(Bank::DiscreteInput, addr, cnt)
                .map(Response::ReadDiscreteInputs),
            Request::ReadHoldingRegisters(addr, cnt) => self
                .read_words(Bank::HoldingRegister, addr, cnt)
                .map(Response::ReadHoldingRegisters),
            Request::ReadInputRegisters(addr, cnt) => self
                .read_words(Bank::InputRegister, addr, cnt)
                .map(Response::ReadInputRegisters),
            Request::WriteSingleCoil(addr, value) => self
                .write(Bank::Coil, addr, &[value as u16])
                .map(|_| Response::WriteSingleCoil(addr, value)),
            Request::WriteSingleRegister(addr, value) => self
                .write(Bank::HoldingRegister, addr, &[value])
                .map(|_| Response::WriteSingleRegister(addr, value)),
            Request::WriteMultipleCoils(addr, values) => {
                let words: Vec<u16> = values.iter().map(|b| *b as u16).collect();
                self.write(Bank::Coil, addr, &words)
                    .map(|_| Response::WriteMultipleCoils(addr, words.len() as u16))
            }
            Request::WriteMultipleRegisters(addr, values) => self
                .write(Bank::HoldingRegister, addr, &values)
                .map(|_| Response::WriteMultipleRegisters(addr, values.len() as u16)),
            Request::Custom(READ_FILE_RECORD, data) if self.file_operations => self
                .read_file_records(&data)
                .map(|pdu| Response::Custom(READ_FILE_RECORD, Bytes::from(pdu))),
            Request::Custom(WRITE_FILE_RECORD, data) if self.file_operations => self
                .write_file_records(&data)
                .map(|pdu| Response::Custom(WRITE_FILE_RECORD, Bytes::from(pdu))),
            request => {
                self.log
                    .warn(&format!("Unsupported request received. [{:?}]", request));
                Err(ExceptionCode::IllegalFunction)
            }
        }
    }
}

impl tokio_modbus::server::Service for Service {
    type Request = SlaveRequest<'static>;
    type Exception = ExceptionCode;
    type Response = Response;
    type Future = future::Ready<Result<Response, ExceptionCode>>;

    fn call(&self, request: Self::Request) -> Self::Future {
        let SlaveRequest { slave, request } = request;
        if slave != 0 && slave != self.device_address {
            self.log.warn(&format!(
                "Request for unit {} ignored, serving unit {}",
                slave, self.device_address
            ));
            return future::ready(Err(ExceptionCode::GatewayTargetDevice));
        }
        future::ready(self.handle(request))
    }
}
