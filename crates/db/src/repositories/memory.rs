use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, RwLock};

use forecourt_core::domain::record::{RecordId, RecordStatus, WorkflowKind, WorkflowRecord};
use forecourt_core::domain::tank::{FuelType, OperationKey, RefillEntry, TankInventory};
use forecourt_core::store::{
    ChangeEvent, ChangeFeed, ChangePayload, ChangeType, DeductionWrite, RecordStore, StoreError,
    TankStore,
};

use super::DEFAULT_CHANGE_FEED_CAPACITY;

#[derive(Default)]
struct LedgerState {
    records: HashMap<String, WorkflowRecord>,
    tanks: BTreeMap<FuelType, TankInventory>,
    deductions: HashSet<OperationKey>,
    refills: Vec<RefillEntry>,
    sequence: u64,
}

impl LedgerState {
    /// Publishes while the caller still holds the write lock, so sequence order is commit order.
    fn publish(
        &mut self,
        changes: &broadcast::Sender<ChangeEvent>,
        event_type: ChangeType,
        payload: ChangePayload,
    ) {
        self.sequence += 1;
        let _ = changes.send(ChangeEvent {
            sequence: self.sequence,
            event_type,
            payload,
            committed_at: Utc::now(),
        });
    }
}

/// Process-local ledger store with the same conditional-write contract as the SQLite one.
pub struct InMemoryLedgerStore {
    state: RwLock<LedgerState>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CHANGE_FEED_CAPACITY)
    }
}

impl InMemoryLedgerStore {
    pub fn with_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self { state: RwLock::new(LedgerState::default()), changes }
    }

    pub async fn refill_history(&self, fuel_type: &FuelType) -> Vec<RefillEntry> {
        let state = self.state.read().await;
        state.refills.iter().filter(|entry| &entry.fuel_type == fuel_type).cloned().collect()
    }
}

#[async_trait]
impl RecordStore for InMemoryLedgerStore {
    async fn find_record(&self, id: &RecordId) -> Result<Option<WorkflowRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state.records.get(&id.0).cloned())
    }

    async fn insert_record(&self, record: &WorkflowRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.records.contains_key(&record.id.0) {
            return Err(StoreError::Duplicate(record.id.0.clone()));
        }
        state.records.insert(record.id.0.clone(), record.clone());
        state.publish(
            &self.changes,
            ChangeType::Insert,
            ChangePayload::Record { before: None, after: record.clone() },
        );
        Ok(())
    }

    async fn transition_record(
        &self,
        expected: RecordStatus,
        next: &WorkflowRecord,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let before = state.records.get(&next.id.0).cloned().ok_or(StoreError::Conflict)?;
        if before.status != expected || before.version.saturating_add(1) != next.version {
            return Err(StoreError::Conflict);
        }

        let mut after = next.clone();
        for (stage, stamp) in &before.approvals {
            after.approvals.insert(*stage, stamp.clone());
        }
        state.records.insert(after.id.0.clone(), after.clone());
        state.publish(
            &self.changes,
            ChangeType::Update,
            ChangePayload::Record { before: Some(before), after },
        );
        Ok(())
    }

    async fn count_by_status(
        &self,
        kind: WorkflowKind,
        status: RecordStatus,
    ) -> Result<u64, StoreError> {
        let state = self.state.read().await;
        let count = state
            .records
            .values()
            .filter(|record| record.kind() == kind && record.status == status)
            .count();
        Ok(count as u64)
    }
}

#[async_trait]
impl TankStore for InMemoryLedgerStore {
    async fn find_tank(&self, fuel_type: &FuelType) -> Result<Option<TankInventory>, StoreError> {
        let state = self.state.read().await;
        Ok(state.tanks.get(fuel_type).cloned())
    }

    async fn list_tanks(&self) -> Result<Vec<TankInventory>, StoreError> {
        let state = self.state.read().await;
        Ok(state.tanks.values().cloned().collect())
    }

    async fn insert_tank(&self, tank: &TankInventory) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.tanks.contains_key(&tank.fuel_type) {
            return Err(StoreError::Duplicate(tank.fuel_type.to_string()));
        }
        state.tanks.insert(tank.fuel_type.clone(), tank.clone());
        state.publish(
            &self.changes,
            ChangeType::Insert,
            ChangePayload::Tank { before: None, after: tank.clone() },
        );
        Ok(())
    }

    async fn has_deduction(&self, key: &OperationKey) -> Result<bool, StoreError> {
        let state = self.state.read().await;
        Ok(state.deductions.contains(key))
    }

    async fn commit_deduction(
        &self,
        expected_version: u32,
        next: &TankInventory,
        key: Option<&OperationKey>,
    ) -> Result<DeductionWrite, StoreError> {
        let mut state = self.state.write().await;
        if key.is_some_and(|key| state.deductions.contains(key)) {
            return Ok(DeductionWrite::AlreadyApplied);
        }

        let before = state.tanks.get(&next.fuel_type).cloned().ok_or(StoreError::Conflict)?;
        if before.version != expected_version {
            return Err(StoreError::Conflict);
        }

        if let Some(key) = key {
            state.deductions.insert(key.clone());
        }
        state.tanks.insert(next.fuel_type.clone(), next.clone());
        state.publish(
            &self.changes,
            ChangeType::Update,
            ChangePayload::Tank { before: Some(before), after: next.clone() },
        );
        Ok(DeductionWrite::Applied)
    }

    async fn commit_refill(
        &self,
        expected_version: u32,
        next: &TankInventory,
        entry: &RefillEntry,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let before = state.tanks.get(&next.fuel_type).cloned().ok_or(StoreError::Conflict)?;
        if before.version != expected_version {
            return Err(StoreError::Conflict);
        }

        state.tanks.insert(next.fuel_type.clone(), next.clone());
        state.refills.push(entry.clone());
        state.publish(
            &self.changes,
            ChangeType::Update,
            ChangePayload::Tank { before: Some(before), after: next.clone() },
        );
        Ok(())
    }
}

impl ChangeFeed for InMemoryLedgerStore {
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}
