use crate::config::BankSizes;
use crate::error::Error;
use crate::mem::bank::Bank;
use crate::mem::range::Range;
use crate::msg::Logger;
use crate::point::RegisterPoint;

/// Four independently sized value banks addressed by protocol address
///
/// Coils and discrete inputs are stored as `0` or `1` words. No offset is applied to the
/// address, address `0` is the first element of each bank.
#[derive(Debug, Default, Clone)]
pub struct Datastore {
    coils: Vec<u16>,
    discrete_inputs: Vec<u16>,
    holding_registers: Vec<u16>,
    input_registers: Vec<u16>,
}

impl Datastore {
    pub fn new(sizes: &BankSizes) -> Self {
        Self {
            coils: vec![0; sizes.coils],
            discrete_inputs: vec![0; sizes.discrete_inputs],
            holding_registers: vec![0; sizes.holding_registers],
            input_registers: vec![0; sizes.input_registers],
        }
    }

    fn bank(&self, bank: Bank) -> &[u16] {
        match bank {
            Bank::Coil => &self.coils,
            Bank::DiscreteInput => &self.discrete_inputs,
            Bank::HoldingRegister => &self.holding_registers,
            Bank::InputRegister => &self.input_registers,
        }
    }

    fn bank_mut(&mut self, bank: Bank) -> &mut [u16] {
        match bank {
            Bank::Coil => &mut self.coils,
            Bank::DiscreteInput => &mut self.discrete_inputs,
            Bank::HoldingRegister => &mut self.holding_registers,
            Bank::InputRegister => &mut self.input_registers,
        }
    }

    pub fn size(&self, bank: Bank) -> usize {
        self.bank(bank).len()
    }

    pub fn get(&self, bank: Bank, address: u16, count: usize) -> Result<Vec<u16>, Error> {
        let range = Range::new(address as usize, count);
        let values = self.bank(bank);
        if !range.fits(values.len()) {
            return Err(Error::NotFound(format!("{} range {}", bank, range)));
        }
        Ok(values[range.start..range.end].to_vec())
    }

    pub fn set(&mut self, bank: Bank, address: u16, values: &[u16]) -> Result<(), Error> {
        let range = Range::new(address as usize, values.len());
        let target = self.bank_mut(bank);
        if !range.fits(target.len()) {
            return Err(Error::NotFound(format!("{} range {}", bank, range)));
        }
        let target = &mut target[range.start..range.end];
        if bank.is_bit() {
            for (dst, src) in target.iter_mut().zip(values) {
                *dst = (*src != 0) as u16;
            }
        } else {
            target.copy_from_slice(values);
        }
        Ok(())
    }

    /// Write the initial value of every point into its bank
    ///
    /// Points outside of their bank or with a value not storable in the bank are skipped with a
    /// warning. Returns the number of points written.
    pub fn seed(&mut self, points: &[RegisterPoint], log: &Logger) -> usize {
        let mut seeded = 0;
        for point in points {
            let res = point
                .bank
                .coerce(point.address, point.value)
                .and_then(|v| self.set(point.bank, point.address, &[v]));
            match res {
                Ok(()) => seeded += 1,
                Err(e) => log.warn(&format!(
                    "Failed to initialize point {} ({} address {}): {}",
                    point.name, point.bank, point.address, e
                )),
            }
        }
        seeded
    }
}
