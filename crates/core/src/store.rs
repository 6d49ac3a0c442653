//! Ledger store boundary.
//!
//! The store exclusively owns workflow records and tank rows. Engines read, decide
//! with pure functions, then hand the next state back through a conditional write
//! that fails with [`StoreError::Conflict`] when the stored value moved underneath
//! them. Every committed mutation is published once on the [`ChangeFeed`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::domain::record::{RecordId, RecordStatus, WorkflowKind, WorkflowRecord};
use crate::domain::tank::{FuelType, OperationKey, RefillEntry, TankInventory};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("conditional write lost: stored state changed since it was read")]
    Conflict,
    #[error("entity already exists: {0}")]
    Duplicate(String),
    #[error("ledger store unavailable: {0}")]
    Unavailable(String),
    #[error("stored data could not be decoded: {0}")]
    Decode(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Insert,
    Update,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Record,
    Tank,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Tank => "tank",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum ChangePayload {
    Record { before: Option<WorkflowRecord>, after: WorkflowRecord },
    Tank { before: Option<TankInventory>, after: TankInventory },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub sequence: u64,
    pub event_type: ChangeType,
    pub payload: ChangePayload,
    pub committed_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn entity_kind(&self) -> EntityKind {
        match self.payload {
            ChangePayload::Record { .. } => EntityKind::Record,
            ChangePayload::Tank { .. } => EntityKind::Tank,
        }
    }

    /// Identity of the mutation: the same entity at the same version is the same event.
    pub fn dedup_key(&self) -> (EntityKind, String, u32) {
        match &self.payload {
            ChangePayload::Record { after, .. } => {
                (EntityKind::Record, after.id.0.clone(), after.version)
            }
            ChangePayload::Tank { after, .. } => {
                (EntityKind::Tank, after.fuel_type.as_str().to_owned(), after.version)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeductionWrite {
    Applied,
    AlreadyApplied,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_record(&self, id: &RecordId) -> Result<Option<WorkflowRecord>, StoreError>;

    /// Fails with [`StoreError::Duplicate`] when the id is taken.
    async fn insert_record(&self, record: &WorkflowRecord) -> Result<(), StoreError>;

    /// Replaces the stored record with `next` only while its status still equals
    /// `expected`. Approval stamps already stored are never overwritten.
    async fn transition_record(
        &self,
        expected: RecordStatus,
        next: &WorkflowRecord,
    ) -> Result<(), StoreError>;

    async fn count_by_status(
        &self,
        kind: WorkflowKind,
        status: RecordStatus,
    ) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait TankStore: Send + Sync {
    async fn find_tank(&self, fuel_type: &FuelType) -> Result<Option<TankInventory>, StoreError>;

    async fn list_tanks(&self) -> Result<Vec<TankInventory>, StoreError>;

    async fn insert_tank(&self, tank: &TankInventory) -> Result<(), StoreError>;

    async fn has_deduction(&self, key: &OperationKey) -> Result<bool, StoreError>;

    /// Writes `next` if the stored tank is still at `expected_version`. When a key is
    /// given it is recorded in the same commit; a key seen before leaves the level
    /// untouched and reports [`DeductionWrite::AlreadyApplied`].
    async fn commit_deduction(
        &self,
        expected_version: u32,
        next: &TankInventory,
        key: Option<&OperationKey>,
    ) -> Result<DeductionWrite, StoreError>;

    async fn commit_refill(
        &self,
        expected_version: u32,
        next: &TankInventory,
        entry: &RefillEntry,
    ) -> Result<(), StoreError>;
}

pub trait ChangeFeed: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// Convenience bound for stores that serve every collection.
pub trait LedgerStore: RecordStore + TankStore + ChangeFeed {}

impl<T> LedgerStore for T where T: RecordStore + TankStore + ChangeFeed {}
