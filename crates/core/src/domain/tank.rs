use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::actor::ActorId;
use crate::domain::record::RecordId;

/// Fuel grade key, normalized to lowercase (`petrol`, `diesel`, ...).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FuelType(String);

impl FuelType {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FuelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TankInventory {
    pub fuel_type: FuelType,
    pub capacity: Decimal,
    pub current_level: Decimal,
    pub last_refill_amount: Option<Decimal>,
    pub last_refill_date: Option<DateTime<Utc>>,
    pub updated_by: Option<ActorId>,
    pub version: u32,
    pub updated_at: DateTime<Utc>,
}

impl TankInventory {
    pub fn is_within_bounds(&self) -> bool {
        self.current_level >= Decimal::ZERO && self.current_level <= self.capacity
    }

    /// Fraction of capacity currently held, `None` for a zero-capacity tank.
    pub fn fill_ratio(&self) -> Option<Decimal> {
        (self.capacity > Decimal::ZERO).then(|| self.current_level / self.capacity)
    }
}

/// Idempotency key for a deduction. Workflow deductions use the originating record id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationKey(pub String);

impl From<&RecordId> for OperationKey {
    fn from(id: &RecordId) -> Self {
        Self(id.0.clone())
    }
}

/// Refill history row written alongside the level change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefillEntry {
    pub fuel_type: FuelType,
    pub amount: Decimal,
    pub notes: Option<String>,
    pub refilled_by: ActorId,
    pub refilled_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{FuelType, TankInventory};

    #[test]
    fn fuel_type_is_normalized() {
        assert_eq!(FuelType::new("  Diesel "), FuelType::new("diesel"));
        assert_eq!(FuelType::new("PETROL").as_str(), "petrol");
    }

    #[test]
    fn fill_ratio_handles_zero_capacity() {
        let mut tank = TankInventory {
            fuel_type: FuelType::new("petrol"),
            capacity: Decimal::new(5000, 0),
            current_level: Decimal::new(1000, 0),
            last_refill_amount: None,
            last_refill_date: None,
            updated_by: None,
            version: 1,
            updated_at: Utc::now(),
        };
        assert_eq!(tank.fill_ratio(), Some(Decimal::new(2, 1)));
        assert!(tank.is_within_bounds());

        tank.capacity = Decimal::ZERO;
        assert_eq!(tank.fill_ratio(), None);
        assert!(!tank.is_within_bounds());
    }
}
