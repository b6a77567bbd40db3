use crate::error::Error;

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// One of the four addressable register kinds
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Bank {
    Coil,
    DiscreteInput,
    HoldingRegister,
    InputRegister,
}

impl Bank {
    pub const ALL: [Bank; 4] = [
        Bank::Coil,
        Bank::DiscreteInput,
        Bank::HoldingRegister,
        Bank::InputRegister,
    ];

    /// Coils and discrete inputs only store 0 or 1
    pub fn is_bit(&self) -> bool {
        matches!(self, Bank::Coil | Bank::DiscreteInput)
    }

    /// Bank read by the given Modbus read function code
    pub fn from_read_code(code: u8) -> Result<Self, Error> {
        match code {
            0x01 => Ok(Bank::Coil),
            0x02 => Ok(Bank::DiscreteInput),
            0x03 => Ok(Bank::HoldingRegister),
            0x04 => Ok(Bank::InputRegister),
            _ => Err(Error::UnsupportedFunction(code)),
        }
    }

    /// Check whether the value fits into the storage of this bank
    pub fn coerce(&self, address: u16, value: i64) -> Result<u16, Error> {
        let out_of_range = || Error::OutOfRange {
            bank: *self,
            address,
            value,
        };
        if self.is_bit() {
            match value {
                0 | 1 => Ok(value as u16),
                _ => Err(out_of_range()),
            }
        } else {
            u16::try_from(value).map_err(|_| out_of_range())
        }
    }
}

impl Display for Bank {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bank::Coil => fmt.write_str("coil"),
            Bank::DiscreteInput => fmt.write_str("discrete_input"),
            Bank::HoldingRegister => fmt.write_str("holding_register"),
            Bank::InputRegister => fmt.write_str("input_register"),
        }
    }
}

impl FromStr for Bank {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "coil" | "coils" => Ok(Bank::Coil),
            "discrete_input" | "discrete_inputs" => Ok(Bank::DiscreteInput),
            "holding_register" | "holding_registers" => Ok(Bank::HoldingRegister),
            "input_register" | "input_registers" => Ok(Bank::InputRegister),
            _ => Err(Error::InvalidBank(str!(s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Bank;
    use crate::error::Error;

    #[test]
    fn ut_bank_parse() {
        for bank in Bank::ALL {
            assert_eq!(bank.to_string().parse::<Bank>(), Ok(bank));
        }
        assert_eq!(" Holding_Registers ".parse::<Bank>(), Ok(Bank::HoldingRegister));
        assert_eq!(
            "analog".parse::<Bank>(),
            Err(Error::InvalidBank(String::from("analog")))
        );
    }

    #[test]
    fn ut_bank_coerce() {
        assert_eq!(Bank::Coil.coerce(0, 1), Ok(1));
        assert!(Bank::Coil.coerce(0, 2).is_err());
        assert!(Bank::DiscreteInput.coerce(0, -1).is_err());
        assert_eq!(Bank::HoldingRegister.coerce(0, 65535), Ok(65535));
        assert!(Bank::InputRegister.coerce(0, 65536).is_err());
        assert!(Bank::HoldingRegister.coerce(0, -5).is_err());
    }

    #[test]
    fn ut_bank_read_code() {
        assert_eq!(Bank::from_read_code(3), Ok(Bank::HoldingRegister));
        assert_eq!(Bank::from_read_code(4), Ok(Bank::InputRegister));
        assert_eq!(Bank::from_read_code(7), Err(Error::UnsupportedFunction(7)));
    }
}
