//! Fuel stock discrepancy detection.
//!
//! Compares the litres an attendant derived from dip readings against the
//! independently reported pump meter figure and against what the tank can
//! actually hold. Pure and synchronous; callers decide whether a result blocks.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::record::FuelEntryDetails;

pub const DEFAULT_TOLERANCE_LITRES: Decimal = Decimal::from_parts(5, 0, 0, false, 0);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyClass {
    Ok,
    /// Pump and dip figures disagree beyond tolerance. Warning only.
    Discrepancy,
    /// Pump reports more fuel sold than the tank holds. Blocks submission.
    ExceedsTankLevel,
}

impl DiscrepancyClass {
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::ExceedsTankLevel)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscrepancyReport {
    pub class: DiscrepancyClass,
    pub calculated_sold: Decimal,
    pub pump_sold: Option<Decimal>,
    pub difference: Option<Decimal>,
    pub tank_level: Decimal,
    pub tolerance: Decimal,
}

impl DiscrepancyReport {
    pub fn summary(&self) -> String {
        match self.class {
            DiscrepancyClass::Ok => "pump and dip readings agree".to_owned(),
            DiscrepancyClass::Discrepancy => format!(
                "pump reading differs from dip calculation by {}L (tolerance {}L)",
                self.difference.unwrap_or_default(),
                self.tolerance
            ),
            DiscrepancyClass::ExceedsTankLevel => format!(
                "pump reports {}L sold but the tank only holds {}L",
                self.pump_sold.unwrap_or_default(),
                self.tank_level
            ),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiscrepancyDetector {
    tolerance: Decimal,
}

impl Default for DiscrepancyDetector {
    fn default() -> Self {
        Self { tolerance: DEFAULT_TOLERANCE_LITRES }
    }
}

impl DiscrepancyDetector {
    pub fn new(tolerance: Decimal) -> Self {
        Self { tolerance: tolerance.abs() }
    }

    pub fn tolerance(&self) -> Decimal {
        self.tolerance
    }

    pub fn check(
        &self,
        opening_stock: Decimal,
        closing_stock: Decimal,
        pump_fuel_sold: Option<Decimal>,
        tank_level: Decimal,
    ) -> DiscrepancyReport {
        let calculated_sold = opening_stock - closing_stock;
        let difference = pump_fuel_sold.map(|pump| (pump - calculated_sold).abs());

        let class = match pump_fuel_sold {
            Some(pump) if pump > tank_level => DiscrepancyClass::ExceedsTankLevel,
            None => DiscrepancyClass::Ok,
            Some(_) => match difference {
                Some(difference) if difference > self.tolerance => DiscrepancyClass::Discrepancy,
                _ => DiscrepancyClass::Ok,
            },
        };

        DiscrepancyReport {
            class,
            calculated_sold,
            pump_sold: pump_fuel_sold,
            difference,
            tank_level,
            tolerance: self.tolerance,
        }
    }

    pub fn check_entry(&self, entry: &FuelEntryDetails, tank_level: Decimal) -> DiscrepancyReport {
        self.check(entry.opening_stock, entry.closing_stock, entry.pump_fuel_sold, tank_level)
    }
}
