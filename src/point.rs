use crate::error::Error;
use crate::mem::bank::Bank;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Named, validated binding of one bank address to a value
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct RegisterPoint {
    pub address: u16,
    pub name: String,
    #[serde(alias = "register_type")]
    pub bank: Bank,
    #[serde(default)]
    pub value: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default)]
    pub read_only: bool,
}

impl RegisterPoint {
    pub fn new(address: u16, name: &str, bank: Bank, value: i64) -> Self {
        Self {
            address,
            name: str!(name),
            bank,
            value,
            description: String::new(),
            unit: String::new(),
            min: None,
            max: None,
            read_only: false,
        }
    }

    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Whether the value is acceptable for this point
    ///
    /// Bit banks only accept `0` and `1`. Bounds are ignored for bit banks.
    pub fn validate_value(&self, value: i64) -> bool {
        if self.bank.is_bit() {
            return value == 0 || value == 1;
        }
        let v = value as f64;
        if self.min.is_some_and(|min| v < min) {
            return false;
        }
        if self.max.is_some_and(|max| v > max) {
            return false;
        }
        true
    }

    /// Guard applied to every write targeting this point
    pub fn check_write(&self, value: i64) -> Result<(), Error> {
        if self.read_only {
            return Err(Error::ReadOnlyViolation(self.bank, self.address));
        }
        if !self.validate_value(value) {
            return Err(Error::OutOfRange {
                bank: self.bank,
                address: self.address,
                value,
            });
        }
        Ok(())
    }
}

/// Check a point list for duplicate addresses within a bank and invalid initial values
///
/// All problems are collected into a single configuration error. On success the number of
/// points is returned.
pub fn validate_points(points: &[RegisterPoint]) -> Result<usize, Error> {
    let mut seen = HashSet::new();
    let mut errors = vec![];
    for point in points {
        if !seen.insert((point.bank, point.address)) {
            errors.push(format!(
                "Address conflict: {} address {} defined more than once",
                point.bank, point.address
            ));
        }
        if !point.validate_value(point.value) {
            errors.push(format!(
                "Point '{}' (address {}): initial value {} out of valid range",
                point.name, point.address, point.value
            ));
        }
    }
    if errors.is_empty() {
        Ok(points.len())
    } else {
        Err(Error::Config(errors.into_iter().join("\n")))
    }
}

/// Points per bank, each list sorted by address
pub fn group_points_by_bank(points: &[RegisterPoint]) -> BTreeMap<Bank, Vec<RegisterPoint>> {
    let mut grouped: BTreeMap<Bank, Vec<RegisterPoint>> =
        Bank::ALL.iter().map(|b| (*b, vec![])).collect();
    for (bank, group) in &points
        .iter()
        .sorted_by_key(|p| (p.bank, p.address))
        .chunk_by(|p| p.bank)
    {
        grouped.insert(bank, group.cloned().collect());
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::{group_points_by_bank, validate_points, RegisterPoint};
    use crate::error::Error;
    use crate::mem::bank::Bank;

    #[test]
    fn ut_point_validate_value() {
        let point = RegisterPoint::new(5, "temp", Bank::HoldingRegister, 42)
            .with_bounds(Some(0.0), Some(100.0));
        assert!(point.validate_value(0));
        assert!(point.validate_value(100));
        assert!(!point.validate_value(150));
        assert!(!point.validate_value(-1));

        let open = RegisterPoint::new(5, "open", Bank::InputRegister, 0);
        assert!(open.validate_value(65535));

        let coil = RegisterPoint::new(0, "run", Bank::Coil, 0).with_bounds(Some(5.0), None);
        assert!(coil.validate_value(1));
        assert!(!coil.validate_value(2));
    }

    #[test]
    fn ut_point_check_write() {
        let point = RegisterPoint::new(5, "temp", Bank::HoldingRegister, 42)
            .with_bounds(Some(0.0), Some(100.0));
        assert_eq!(point.check_write(77), Ok(()));
        assert_eq!(
            point.check_write(150),
            Err(Error::OutOfRange {
                bank: Bank::HoldingRegister,
                address: 5,
                value: 150
            })
        );
        let point = point.with_read_only(true);
        assert_eq!(
            point.check_write(77),
            Err(Error::ReadOnlyViolation(Bank::HoldingRegister, 5))
        );
    }

    #[test]
    fn ut_validate_points() {
        let points = vec![
            RegisterPoint::new(0, "a", Bank::HoldingRegister, 1),
            RegisterPoint::new(0, "b", Bank::InputRegister, 1),
            RegisterPoint::new(1, "c", Bank::Coil, 1),
        ];
        assert_eq!(validate_points(&points), Ok(3));

        let points = vec![
            RegisterPoint::new(0, "a", Bank::HoldingRegister, 1),
            RegisterPoint::new(0, "b", Bank::HoldingRegister, 1),
            RegisterPoint::new(1, "c", Bank::Coil, 3),
        ];
        match validate_points(&points) {
            Err(Error::Config(msg)) => {
                assert_eq!(msg.lines().count(), 2);
                assert!(msg.contains("holding_register address 0"));
                assert!(msg.contains("'c'"));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn ut_group_points_by_bank() {
        let points = vec![
            RegisterPoint::new(7, "h7", Bank::HoldingRegister, 0),
            RegisterPoint::new(2, "c2", Bank::Coil, 0),
            RegisterPoint::new(3, "h3", Bank::HoldingRegister, 0),
        ];
        let grouped = group_points_by_bank(&points);
        assert_eq!(grouped.len(), 4);
        assert!(grouped[&Bank::InputRegister].is_empty());
        let names: Vec<_> = grouped[&Bank::HoldingRegister]
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["h3", "h7"]);
        assert_eq!(grouped[&Bank::Coil].len(), 1);
    }

    #[test]
    fn ut_point_deserialize() {
        let point: RegisterPoint = serde_json::from_str(
            r#"{ "address": 5, "name": "temp", "register_type": "holding_register", "value": 42, "max": 100 }"#,
        )
        .unwrap();
        assert_eq!(point.bank, Bank::HoldingRegister);
        assert_eq!(point.max, Some(100.0));
        assert_eq!(point.min, None);
        assert!(!point.read_only);
    }
}
