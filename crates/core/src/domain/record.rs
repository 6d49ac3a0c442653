use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::actor::ActorId;
use crate::domain::tank::FuelType;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Sale,
    Expense,
    FuelEntry,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 3] =
        [WorkflowKind::Sale, WorkflowKind::Expense, WorkflowKind::FuelEntry];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sale => "sale",
            Self::Expense => "expense",
            Self::FuelEntry => "fuel_entry",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sale" => Some(Self::Sale),
            "expense" => Some(Self::Expense),
            "fuel_entry" => Some(Self::FuelEntry),
            _ => None,
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Submitted,
    AccountantApproved,
    ManagerApproved,
    DirectorApproved,
    Rejected,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::AccountantApproved => "accountant_approved",
            Self::ManagerApproved => "manager_approved",
            Self::DirectorApproved => "director_approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "submitted" => Some(Self::Submitted),
            "accountant_approved" => Some(Self::AccountantApproved),
            "manager_approved" => Some(Self::ManagerApproved),
            "director_approved" => Some(Self::DirectorApproved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// The approval stage whose sign-off produces this status.
    pub fn stage(&self) -> Option<ApprovalStage> {
        match self {
            Self::AccountantApproved => Some(ApprovalStage::Accountant),
            Self::ManagerApproved => Some(ApprovalStage::Manager),
            Self::DirectorApproved => Some(ApprovalStage::Director),
            Self::Submitted | Self::Rejected => None,
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStage {
    Accountant,
    Manager,
    Director,
}

impl ApprovalStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accountant => "accountant",
            Self::Manager => "manager",
            Self::Director => "director",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "accountant" => Some(Self::Accountant),
            "manager" => Some(Self::Manager),
            "director" => Some(Self::Director),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStamp {
    pub approver_id: ActorId,
    pub approved_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub reason: String,
    pub rejected_by: ActorId,
    pub rejected_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuelEntryDetails {
    pub fuel_type: FuelType,
    pub opening_stock: Decimal,
    pub closing_stock: Decimal,
    pub pump_fuel_sold: Option<Decimal>,
}

impl FuelEntryDetails {
    /// Litres sold according to the dip readings. Always derived, never stored.
    pub fn fuel_sold(&self) -> Decimal {
        self.opening_stock - self.closing_stock
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordDetails {
    Sale { quantity: Option<Decimal>, notes: Option<String> },
    Expense { category: String, description: String },
    FuelEntry(FuelEntryDetails),
}

impl RecordDetails {
    pub fn kind(&self) -> WorkflowKind {
        match self {
            Self::Sale { .. } => WorkflowKind::Sale,
            Self::Expense { .. } => WorkflowKind::Expense,
            Self::FuelEntry(_) => WorkflowKind::FuelEntry,
        }
    }

    pub fn fuel_entry(&self) -> Option<&FuelEntryDetails> {
        match self {
            Self::FuelEntry(details) => Some(details),
            Self::Sale { .. } | Self::Expense { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: RecordId,
    pub department: String,
    pub amount: Decimal,
    pub details: RecordDetails,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
    pub status: RecordStatus,
    pub approvals: BTreeMap<ApprovalStage, ApprovalStamp>,
    pub rejection: Option<Rejection>,
    pub version: u32,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRecord {
    pub fn kind(&self) -> WorkflowKind {
        self.details.kind()
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection.as_ref().map(|rejection| rejection.reason.as_str())
    }
}

/// Caller-supplied payload for a new submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    #[serde(default)]
    pub id: Option<RecordId>,
    pub department: String,
    pub amount: Decimal,
    pub details: RecordDetails,
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{
        ApprovalStage, FuelEntryDetails, RecordDetails, RecordStatus, WorkflowKind,
    };
    use crate::domain::tank::FuelType;

    #[test]
    fn status_storage_encoding_is_stable() {
        let statuses = [
            RecordStatus::Submitted,
            RecordStatus::AccountantApproved,
            RecordStatus::ManagerApproved,
            RecordStatus::DirectorApproved,
            RecordStatus::Rejected,
        ];

        for status in statuses {
            assert_eq!(RecordStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RecordStatus::parse("approved"), None);
    }

    #[test]
    fn approved_statuses_map_to_their_stage() {
        assert_eq!(RecordStatus::AccountantApproved.stage(), Some(ApprovalStage::Accountant));
        assert_eq!(RecordStatus::DirectorApproved.stage(), Some(ApprovalStage::Director));
        assert_eq!(RecordStatus::Rejected.stage(), None);
    }

    #[test]
    fn fuel_sold_is_derived_from_dip_readings() {
        let details = RecordDetails::FuelEntry(FuelEntryDetails {
            fuel_type: FuelType::new("diesel"),
            opening_stock: Decimal::new(1000, 0),
            closing_stock: Decimal::new(9405, 1),
            pump_fuel_sold: None,
        });

        assert_eq!(details.kind(), WorkflowKind::FuelEntry);
        assert_eq!(details.fuel_entry().map(|entry| entry.fuel_sold()), Some(Decimal::new(595, 1)));
    }

    #[test]
    fn details_are_tagged_by_kind_in_json() {
        let details = RecordDetails::FuelEntry(FuelEntryDetails {
            fuel_type: FuelType::new("petrol"),
            opening_stock: Decimal::new(1000, 0),
            closing_stock: Decimal::new(940, 0),
            pump_fuel_sold: None,
        });

        let value = serde_json::to_value(&details).expect("serialize details");

        assert_eq!(
            value,
            serde_json::json!({
                "kind": "fuel_entry",
                "fuel_type": "petrol",
                "opening_stock": "1000",
                "closing_stock": "940",
                "pump_fuel_sold": null,
            })
        );
        let decoded: RecordDetails = serde_json::from_value(value).expect("decode details");
        assert_eq!(decoded, details);
    }
}
